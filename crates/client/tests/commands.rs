//! Command gateway: fail-fast readiness and per-command error policy.

mod common;

use std::time::Duration;

use common::{message_json, quiet_config, Harness};
use hubline_client::{BackoffSchedule, CommandError, ConnectionState};
use hubline_shared::{MarkReadDto, SendMessageDto, ToggleReactionDto};
use serde_json::json;

#[tokio::test(start_paused = true)]
async fn every_command_fails_fast_while_disconnected() {
    let harness = Harness::new();
    let not_ready = CommandError::NotReady {
        state: ConnectionState::Disconnected,
    };

    assert_eq!(harness.client.join_conversation(1).await, Err(not_ready.clone()));
    assert_eq!(harness.client.leave_conversation(1).await, Err(not_ready.clone()));
    assert_eq!(
        harness.client.send_message(SendMessageDto::new(1, "hi")).await,
        Err(not_ready.clone())
    );
    assert_eq!(harness.client.start_typing(1), Err(not_ready.clone()));
    assert_eq!(harness.client.stop_typing(1), Err(not_ready.clone()));
    assert_eq!(
        harness
            .client
            .toggle_reaction(ToggleReactionDto::new(1, 2, "👍"))
            .await,
        Err(not_ready.clone())
    );
    assert_eq!(
        harness
            .client
            .mark_messages_as_read(MarkReadDto::new(1, vec![2]))
            .await,
        Err(not_ready)
    );

    assert_eq!(harness.connector.attempts(), 0);
    assert_eq!(harness.client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(harness.client.supervisor().snapshot().attempt_sequence, 0);
}

#[tokio::test(start_paused = true)]
async fn commands_are_rejected_while_reconnecting() {
    let config = quiet_config().with_retry_policy(BackoffSchedule::from_millis(&[60_000]));
    let harness = Harness::with_config(config);
    let server = harness.connect().await;

    drop(server);
    harness.wait_for_state(ConnectionState::Reconnecting).await;

    let result = harness.client.send_message(SendMessageDto::new(1, "hi")).await;
    assert_eq!(
        result,
        Err(CommandError::NotReady {
            state: ConnectionState::Reconnecting
        })
    );
    assert_eq!(harness.connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn join_sends_invocation_and_tolerates_rejection() {
    let harness = Harness::new();
    let mut server = harness.connect().await;

    let client = harness.client.clone();
    let join = tokio::spawn(async move { client.join_conversation(42).await });

    let invocation = server.next_invocation().await.unwrap();
    assert_eq!(invocation.target, "JoinConversation");
    assert_eq!(invocation.arguments, vec![json!(42)]);
    server.fail(invocation.invocation_id.as_deref().unwrap(), "Not a member");

    assert_eq!(join.await.unwrap(), Ok(()));
    assert_eq!(harness.client.connection_state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn send_message_escalates_rejection() {
    let harness = Harness::new();
    let mut server = harness.connect().await;

    let client = harness.client.clone();
    let send = tokio::spawn(async move { client.send_message(SendMessageDto::new(42, "hello")).await });

    let invocation = server.next_invocation().await.unwrap();
    assert_eq!(invocation.target, "SendMessage");
    assert_eq!(invocation.arguments[0]["content"], "hello");
    assert!(invocation.arguments[0]["clientNonce"].is_string());
    server.fail(invocation.invocation_id.as_deref().unwrap(), "Conversation is archived");

    assert_eq!(
        send.await.unwrap(),
        Err(CommandError::Rejected {
            target: "SendMessage",
            reason: "Conversation is archived".into()
        })
    );
    // Command failures leave the connection alone
    assert_eq!(harness.client.connection_state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn send_message_returns_the_persisted_message() {
    let harness = Harness::new();
    let mut server = harness.connect().await;

    let client = harness.client.clone();
    let send = tokio::spawn(async move { client.send_message(SendMessageDto::new(42, "hello")).await });

    let invocation = server.next_invocation().await.unwrap();
    server.complete(
        invocation.invocation_id.as_deref().unwrap(),
        Some(message_json(900, 42)),
    );

    let persisted = send.await.unwrap().unwrap().expect("message echoed");
    assert_eq!(persisted.id, 900);
    assert_eq!(persisted.conversation_id, 42);
}

#[tokio::test(start_paused = true)]
async fn typing_is_fire_and_forget() {
    let harness = Harness::new();
    let mut server = harness.connect().await;

    harness.client.start_typing(42).unwrap();
    harness.client.stop_typing(42).unwrap();

    let start = server.next_invocation().await.unwrap();
    let stop = server.next_invocation().await.unwrap();
    assert_eq!((start.target.as_str(), start.invocation_id), ("StartTyping", None));
    assert_eq!((stop.target.as_str(), stop.invocation_id), ("StopTyping", None));
}

#[tokio::test(start_paused = true)]
async fn toggle_reaction_and_mark_read_escalate_failures() {
    let harness = Harness::new();
    let mut server = harness.connect().await;

    let client = harness.client.clone();
    let toggle = tokio::spawn(async move {
        client
            .toggle_reaction(ToggleReactionDto::new(42, 7, "🎉"))
            .await
    });
    let invocation = server.next_invocation().await.unwrap();
    assert_eq!(invocation.target, "ToggleReaction");
    assert_eq!(invocation.arguments[0]["emoji"], "🎉");
    server.fail(invocation.invocation_id.as_deref().unwrap(), "Unknown message");
    assert!(matches!(
        toggle.await.unwrap(),
        Err(CommandError::Rejected { target: "ToggleReaction", .. })
    ));

    let client = harness.client.clone();
    let read = tokio::spawn(async move {
        client
            .mark_messages_as_read(MarkReadDto::new(42, vec![7, 8]))
            .await
    });
    let invocation = server.next_invocation().await.unwrap();
    assert_eq!(invocation.target, "MarkMessagesAsRead");
    server.complete(invocation.invocation_id.as_deref().unwrap(), None);
    assert_eq!(read.await.unwrap(), Ok(()));
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_invocation_times_out() {
    let harness = Harness::with_config(quiet_config().with_invocation_timeout(Duration::from_secs(3)));
    let mut server = harness.connect().await;

    let client = harness.client.clone();
    let read = tokio::spawn(async move {
        client
            .mark_messages_as_read(MarkReadDto::new(42, vec![1]))
            .await
    });
    let _ignored = server.next_invocation().await.unwrap();

    assert_eq!(
        read.await.unwrap(),
        Err(CommandError::Timeout {
            target: "MarkMessagesAsRead",
            timeout: Duration::from_secs(3)
        })
    );
}

#[tokio::test(start_paused = true)]
async fn in_flight_invocation_fails_when_the_link_drops() {
    let harness = Harness::new();
    let mut server = harness.connect().await;

    let client = harness.client.clone();
    let toggle = tokio::spawn(async move {
        client
            .toggle_reaction(ToggleReactionDto::new(42, 7, "👍"))
            .await
    });
    let _pending = server.next_invocation().await.unwrap();
    drop(server);

    assert_eq!(
        toggle.await.unwrap(),
        Err(CommandError::ConnectionClosed {
            target: "ToggleReaction"
        })
    );
}

#[tokio::test(start_paused = true)]
async fn completions_are_matched_by_invocation_id() {
    let harness = Harness::new();
    let mut server = harness.connect().await;

    let first = {
        let client = harness.client.clone();
        tokio::spawn(async move { client.send_message(SendMessageDto::new(1, "one")).await })
    };
    let a = server.next_invocation().await.unwrap();
    let second = {
        let client = harness.client.clone();
        tokio::spawn(async move { client.send_message(SendMessageDto::new(1, "two")).await })
    };
    let b = server.next_invocation().await.unwrap();
    assert_ne!(a.invocation_id, b.invocation_id);

    // Answer out of order
    server.complete(b.invocation_id.as_deref().unwrap(), Some(message_json(2, 1)));
    server.fail(a.invocation_id.as_deref().unwrap(), "rate limited");

    assert_eq!(second.await.unwrap().unwrap().map(|m| m.id), Some(2));
    assert!(matches!(first.await.unwrap(), Err(CommandError::Rejected { .. })));
}
