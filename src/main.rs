//! hubline - terminal chat over a real-time hub connection.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use hubline_client::{HubClient, HubConfig, MessageStore, SharedCredentials};
use hubline_shared::{ConversationId, MarkReadDto, MessageId, SendMessageDto, ToggleReactionDto};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod console;

use console::ConsoleSink;

/// Chat in one conversation from the terminal
#[derive(Parser, Debug)]
#[command(name = "hubline")]
#[command(version)]
struct Args {
    /// Hub endpoint; falls back to HUBLINE_HUB_URL
    #[arg(long)]
    hub_url: Option<String>,

    /// Bearer token sent with every connection attempt
    #[arg(long, env = "HUBLINE_TOKEN", hide_env_values = true)]
    token: String,

    /// Conversation to join
    #[arg(short, long)]
    conversation: ConversationId,
}

/// One line typed by the user.
#[derive(Debug, PartialEq)]
enum Input {
    Say(String),
    Typing,
    StopTyping,
    React(MessageId, String),
    Read(Vec<MessageId>),
    Leave,
    Quit,
}

impl Input {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Some(Input::Say(line.to_string()));
        };

        let mut parts = command.split_whitespace();
        match parts.next()? {
            "typing" => Some(Input::Typing),
            "stop" => Some(Input::StopTyping),
            "react" => {
                let message_id = parts.next()?.parse().ok()?;
                let emoji = parts.next()?.to_string();
                Some(Input::React(message_id, emoji))
            }
            "read" => {
                let ids: Vec<MessageId> = parts.filter_map(|p| p.parse().ok()).collect();
                (!ids.is_empty()).then_some(Input::Read(ids))
            }
            "leave" => Some(Input::Leave),
            "quit" => Some(Input::Quit),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hubline=info,hubline_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let mut config = HubConfig::from_env();
    if let Some(url) = args.hub_url {
        config.hub_url = url;
    }

    let credentials = SharedCredentials::with_token(args.token);
    let sink = ConsoleSink::new(MessageStore::new(), args.conversation);
    let client = HubClient::websocket(&config, Arc::new(credentials), Arc::new(sink))
        .context("invalid hub url")?;
    let _guard = client.acquire();

    let mut states = client.subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let snapshot = states.borrow_and_update().clone();
            info!(state = %snapshot.state, attempt = snapshot.reconnect_attempt, "connection state");
        }
    });

    let info = client
        .ensure_connected()
        .await
        .context("could not connect to the hub")?;
    info!(connection_id = %info.connection_id, "connected");
    client.join_conversation(args.conversation).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let Some(input) = Input::parse(&line) else {
            continue;
        };
        if input == Input::Quit {
            break;
        }
        if let Err(e) = run(&client, args.conversation, input).await {
            warn!(error = %e, "command failed");
            if e.is_not_ready() {
                rejoin(&client, args.conversation).await;
            }
        }
    }

    let _ = client.leave_conversation(args.conversation).await;
    client.teardown().await;
    Ok(())
}

/// Reconnect and join again. Failures are logged; the next command retries.
async fn rejoin(client: &HubClient, conversation_id: ConversationId) {
    if let Err(e) = client.ensure_connected().await {
        warn!(error = %e, "reconnect failed");
        return;
    }
    if let Err(e) = client.join_conversation(conversation_id).await {
        warn!(error = %e, conversation_id, "rejoin failed");
    }
}

async fn run(
    client: &HubClient,
    conversation_id: ConversationId,
    input: Input,
) -> Result<(), hubline_client::CommandError> {
    match input {
        Input::Say(text) => {
            client.stop_typing(conversation_id)?;
            client
                .send_message(SendMessageDto::new(conversation_id, text))
                .await?;
        }
        Input::Typing => client.start_typing(conversation_id)?,
        Input::StopTyping => client.stop_typing(conversation_id)?,
        Input::React(message_id, emoji) => {
            client
                .toggle_reaction(ToggleReactionDto::new(conversation_id, message_id, emoji))
                .await?
        }
        Input::Read(ids) => {
            client
                .mark_messages_as_read(MarkReadDto::new(conversation_id, ids))
                .await?
        }
        Input::Leave => client.leave_conversation(conversation_id).await?,
        Input::Quit => {}
    }
    Ok(())
}
