mod common;

use std::time::Duration;

use common::{message_json, Harness, SinkCall};
use hubline_client::ConnectionState;
use hubline_shared::HubMessage;
use serde_json::json;

#[tokio::test(start_paused = true)]
async fn redelivered_message_is_appended_once() {
    let harness = Harness::new();
    let server = harness.connect().await;

    server.invoke("ReceiveMessage", vec![message_json(1, 7)]);
    server.invoke("ReceiveMessage", vec![message_json(1, 7)]);
    // Sentinel so we know both pushes were processed
    server.invoke("UserStoppedTyping", vec![json!(7), json!("u-9")]);

    assert_eq!(harness.sink.next_call().await, SinkCall::Appended(7, 1));
    assert_eq!(
        harness.sink.next_call().await,
        SinkCall::TypingStopped(7, "u-9".into())
    );
    assert_eq!(harness.sink.appended(1), 1);
    assert_eq!(harness.sink.store.messages(7).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn messages_already_in_history_are_skipped() {
    let harness = Harness::new();
    let history = serde_json::from_value(message_json(5, 7)).unwrap();
    harness.sink.store.set_history(7, vec![history]);
    let server = harness.connect().await;

    server.invoke("ReceiveMessage", vec![message_json(5, 7)]);
    server.invoke("ReceiveMessage", vec![message_json(6, 7)]);

    assert_eq!(harness.sink.next_call().await, SinkCall::Appended(7, 6));
    let ids: Vec<_> = harness.sink.store.messages(7).iter().map(|m| m.id).collect();
    assert_eq!(ids, vec![5, 6]);
}

#[tokio::test(start_paused = true)]
async fn typing_bursts_are_throttled_per_user() {
    let harness = Harness::new();
    let server = harness.connect().await;
    let typing = |user: &str| vec![json!(7), json!(user), json!("Bo")];

    server.invoke("UserIsTyping", typing("u-2"));
    server.invoke("UserIsTyping", typing("u-2"));
    server.invoke("UserIsTyping", typing("u-3"));
    server.invoke("UserIsTyping", typing("u-2"));
    server.invoke("UserStoppedTyping", vec![json!(7), json!("u-9")]);

    assert_eq!(
        harness.sink.next_call().await,
        SinkCall::TypingStarted(7, "u-2".into())
    );
    assert_eq!(
        harness.sink.next_call().await,
        SinkCall::TypingStarted(7, "u-3".into())
    );
    assert_eq!(
        harness.sink.next_call().await,
        SinkCall::TypingStopped(7, "u-9".into())
    );

    // Outside the window the next notice goes through
    tokio::time::sleep(Duration::from_secs(3)).await;
    server.invoke("UserIsTyping", typing("u-2"));
    assert_eq!(
        harness.sink.next_call().await,
        SinkCall::TypingStarted(7, "u-2".into())
    );
}

#[tokio::test(start_paused = true)]
async fn a_new_message_clears_its_senders_typing_entry() {
    let harness = Harness::new();
    let server = harness.connect().await;

    server.invoke("UserIsTyping", vec![json!(7), json!("u-2"), json!("Bo")]);
    assert_eq!(
        harness.sink.next_call().await,
        SinkCall::TypingStarted(7, "u-2".into())
    );
    assert_eq!(
        harness.sink.store.typing_users(7),
        vec![("u-2".to_string(), "Bo".to_string())]
    );

    server.invoke("ReceiveMessage", vec![message_json(1, 7)]);
    assert_eq!(harness.sink.next_call().await, SinkCall::Appended(7, 1));
    assert!(harness.sink.store.typing_users(7).is_empty());

    // The throttle was reset with it
    server.invoke("UserIsTyping", vec![json!(7), json!("u-2"), json!("Bo")]);
    assert_eq!(
        harness.sink.next_call().await,
        SinkCall::TypingStarted(7, "u-2".into())
    );
}

#[tokio::test(start_paused = true)]
async fn reaction_updates_replace_the_summary() {
    let harness = Harness::new();
    let server = harness.connect().await;
    server.invoke("ReceiveMessage", vec![message_json(1, 7)]);
    assert_eq!(harness.sink.next_call().await, SinkCall::Appended(7, 1));

    server.invoke(
        "MessageReactionsUpdated",
        vec![json!({
            "messageId": 1,
            "conversationId": 7,
            "reactions": [
                { "emoji": "👍", "count": 2, "userIds": ["u-1", "u-2"] },
                { "emoji": "🎉", "count": 1, "userIds": ["u-3"] }
            ]
        })],
    );
    assert_eq!(harness.sink.next_call().await, SinkCall::Reactions(1, 2));

    server.invoke(
        "MessageReactionsUpdated",
        vec![json!(1), json!(7), json!([{ "emoji": "👍", "count": 1 }])],
    );
    assert_eq!(harness.sink.next_call().await, SinkCall::Reactions(1, 1));

    let stored = harness.sink.store.message(7, 1).unwrap();
    assert_eq!(stored.reactions.len(), 1);
    assert_eq!(stored.reactions[0].count, 1);
}

#[tokio::test(start_paused = true)]
async fn malformed_and_unknown_pushes_are_dropped() {
    let harness = Harness::new();
    let server = harness.connect().await;

    server.invoke("ReceiveMessage", vec![json!("not a message")]);
    server.invoke("UserIsTyping", vec![]);
    server.invoke("SomethingNew", vec![json!(1)]);
    server.invoke("ReceiveMessage", vec![message_json(2, 7)]);

    assert_eq!(harness.sink.next_call().await, SinkCall::Appended(7, 2));
    assert_eq!(harness.sink.calls().len(), 1);
    assert_eq!(harness.client.connection_state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn server_invocations_expecting_a_result_get_an_error_completion() {
    let harness = Harness::new();
    let mut server = harness.connect().await;

    server.push(HubMessage::Invocation {
        invocation_id: Some("s-1".into()),
        target: "GetClientVersion".into(),
        arguments: vec![],
    });

    match server.recv().await {
        Some(HubMessage::Completion {
            invocation_id,
            result,
            error,
        }) => {
            assert_eq!(invocation_id, "s-1");
            assert_eq!(result, None);
            assert!(error.is_some());
        }
        other => panic!("expected a completion, got {other:?}"),
    }
}
