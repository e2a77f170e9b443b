//! Shared types for the hubline real-time chat client.
//!
//! Contains the conversation/message schema exchanged with the chat hub, the
//! typed inbound and outbound events, and the JSON hub-protocol codec.

pub mod error;
pub mod events;
pub mod models;
pub mod protocol;

pub use error::*;
pub use events::*;
pub use models::*;
pub use protocol::*;
