//! Access to the bearer credential used when connecting.
//!
//! The credential is read on every connection attempt, including built-in
//! reconnects, so a rotated token is picked up without tearing anything down.
//! Sources that can report changes let a live connection close on logout.

use std::sync::Arc;

use tokio::sync::watch;

pub trait CredentialSource: Send + Sync + 'static {
    /// The current bearer token, if any.
    fn token(&self) -> Option<String>;

    fn is_authenticated(&self) -> bool {
        self.token().is_some()
    }

    /// Observe token changes. `None` if the source cannot report them.
    fn subscribe(&self) -> Option<watch::Receiver<Option<String>>> {
        None
    }
}

impl<F> CredentialSource for F
where
    F: Fn() -> Option<String> + Send + Sync + 'static,
{
    fn token(&self) -> Option<String> {
        self()
    }
}

/// A token slot shared between the auth layer and the connection.
///
/// Clearing it closes any connection made with it.
#[derive(Debug, Clone)]
pub struct SharedCredentials {
    token: Arc<watch::Sender<Option<String>>>,
}

impl Default for SharedCredentials {
    fn default() -> Self {
        let (token, _) = watch::channel(None);
        Self {
            token: Arc::new(token),
        }
    }
}

impl SharedCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        let credentials = Self::new();
        credentials.set_token(token);
        credentials
    }

    pub fn set_token(&self, token: impl Into<String>) {
        let token = token.into();
        self.token.send_replace((!token.is_empty()).then_some(token));
    }

    /// Forget the token (logout).
    pub fn clear(&self) {
        self.token.send_replace(None);
    }
}

impl CredentialSource for SharedCredentials {
    fn token(&self) -> Option<String> {
        self.token.borrow().clone()
    }

    fn subscribe(&self) -> Option<watch::Receiver<Option<String>>> {
        Some(self.token.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_credentials_rotate_and_clear() {
        let credentials = SharedCredentials::with_token("first");
        let reader = credentials.clone();
        assert_eq!(reader.token().as_deref(), Some("first"));

        credentials.set_token("second");
        assert_eq!(reader.token().as_deref(), Some("second"));

        credentials.clear();
        assert!(!reader.is_authenticated());
    }

    #[test]
    fn empty_token_counts_as_absent() {
        assert!(!SharedCredentials::with_token("").is_authenticated());
    }

    #[test]
    fn closures_are_credential_sources() {
        let source: Arc<dyn CredentialSource> = Arc::new(|| Some("abc".to_string()));
        assert_eq!(source.token().as_deref(), Some("abc"));
        assert!(source.subscribe().is_none());
    }

    #[tokio::test]
    async fn subscribers_see_logout() {
        let credentials = SharedCredentials::with_token("first");
        let mut changes = credentials.subscribe().unwrap();
        assert_eq!(changes.borrow_and_update().as_deref(), Some("first"));

        credentials.clear();
        changes.changed().await.unwrap();
        assert!(changes.borrow().is_none());
    }
}
