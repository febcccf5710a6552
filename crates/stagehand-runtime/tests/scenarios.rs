//! End-to-end usage scenarios
//!
//! Each test drives a small actor through the public client surface only.

mod common;

use common::*;
use serde_json::json;
use stagehand_runtime::{ActorConnection, ActorHandle};

async fn connect(handle: &ActorHandle) -> ActorConnection {
    handle.connect().await.expect("connect succeeds")
}

#[tokio::test]
async fn test_counter_increments_and_broadcasts() {
    let runtime = runtime();
    let counter = runtime
        .client()
        .get_or_create("counter", ["my-counter"])
        .await
        .unwrap();

    let connection = connect(&counter).await;
    let mut changes = collect(&connection, "countChanged");

    assert_eq!(counter.call::<i64>("increment", 5).await.unwrap(), 5);
    assert_eq!(counter.invoke(&INCREMENT, 3).await.unwrap(), 8);
    assert_eq!(counter.invoke(&GET_COUNT, ()).await.unwrap(), 8);

    assert_eq!(next(&mut changes).await, json!(5));
    assert_eq!(next(&mut changes).await, json!(8));
}

#[tokio::test]
async fn test_counter_keys_are_independent() {
    let runtime = runtime();
    let client = runtime.client();

    let a = client.get_or_create("counter", ["a"]).await.unwrap();
    let b = client.get_or_create("counter", ["b"]).await.unwrap();
    let nested = client.get_or_create("counter", ["a", "b"]).await.unwrap();

    a.invoke(&INCREMENT, 1).await.unwrap();
    b.invoke(&INCREMENT, 10).await.unwrap();
    nested.invoke(&INCREMENT, 100).await.unwrap();

    assert_eq!(a.invoke(&GET_COUNT, ()).await.unwrap(), 1);
    assert_eq!(b.invoke(&GET_COUNT, ()).await.unwrap(), 10);
    assert_eq!(nested.invoke(&GET_COUNT, ()).await.unwrap(), 100);
    assert_eq!(runtime.live_actor_count(), 3);
}

#[tokio::test]
async fn test_rate_limiter_caps_requests_per_window() {
    let runtime = runtime();
    let limiter = runtime
        .client()
        .get_or_create("rateLimiter", ["user-1"])
        .await
        .unwrap();

    for expected_remaining in (0..RATE_LIMIT_COUNT_MAX).rev() {
        let result = limiter.invoke(&CHECK_LIMIT, ()).await.unwrap();
        assert!(result.allowed);
        assert_eq!(result.remaining, expected_remaining);
        assert!(result.resets_in_ms <= RATE_LIMIT_WINDOW_MS);
    }

    let denied = limiter.invoke(&CHECK_LIMIT, ()).await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);

    // Another user has its own window
    let other = runtime
        .client()
        .get_or_create("rateLimiter", ["user-2"])
        .await
        .unwrap();
    assert!(other.invoke(&CHECK_LIMIT, ()).await.unwrap().allowed);
}

#[tokio::test]
async fn test_chat_room_fans_out_to_every_connection() {
    let runtime = runtime();
    let room = runtime
        .client()
        .get_or_create("chatRoom", ["general"])
        .await
        .unwrap();

    let alice = connect(&room).await;
    let bob = connect(&room).await;
    let mut alice_inbox = collect(&alice, "newMessage");
    let mut bob_inbox = collect(&bob, "newMessage");

    let hello = Message {
        sender: "alice".into(),
        text: "hello".into(),
    };
    let sent = alice.invoke(&SEND_MESSAGE, hello.clone()).await.unwrap();
    assert_eq!(sent, hello);

    let reply = Message {
        sender: "bob".into(),
        text: "hi alice".into(),
    };
    bob.invoke(&SEND_MESSAGE, reply.clone()).await.unwrap();

    for inbox in [&mut alice_inbox, &mut bob_inbox] {
        assert_eq!(next(inbox).await, serde_json::to_value(&hello).unwrap());
        assert_eq!(next(inbox).await, serde_json::to_value(&reply).unwrap());
    }

    let history = room.invoke(&GET_HISTORY, ()).await.unwrap();
    assert_eq!(history, vec![hello, reply]);
}

#[tokio::test]
async fn test_late_subscriber_gets_no_replay() {
    let runtime = runtime();
    let room = runtime
        .client()
        .get_or_create("chatRoom", ["late"])
        .await
        .unwrap();

    let early = Message {
        sender: "early".into(),
        text: "before anyone listened".into(),
    };
    room.invoke(&SEND_MESSAGE, early).await.unwrap();

    let connection = connect(&room).await;
    let mut inbox = collect(&connection, "newMessage");

    let later = Message {
        sender: "later".into(),
        text: "now with an audience".into(),
    };
    room.invoke(&SEND_MESSAGE, later.clone()).await.unwrap();

    assert_eq!(next(&mut inbox).await, serde_json::to_value(&later).unwrap());
    assert!(inbox.try_recv().is_err());
}

#[tokio::test]
async fn test_user_error_reaches_caller_intact() {
    let runtime = runtime();
    let room = runtime
        .client()
        .get_or_create("chatRoom", ["general"])
        .await
        .unwrap();

    let err = room
        .invoke(
            &SEND_MESSAGE,
            Message {
                sender: "x".repeat(USERNAME_LENGTH_BYTES_MAX + 1),
                text: "hi".into(),
            },
        )
        .await
        .unwrap_err();

    assert_eq!(err.message, "Username is too long");
    assert_eq!(err.code(), Some("invalid_username"));
    assert_eq!(err.metadata, Some(json!({ "maxLength": 32 })));

    // The rejected message was never stored
    assert!(room.invoke(&GET_HISTORY, ()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_once_and_off_listeners() {
    let runtime = runtime();
    let counter = runtime
        .client()
        .get_or_create("counter", ["listeners"])
        .await
        .unwrap();
    let connection = connect(&counter).await;

    let (once_tx, mut once_rx) = tokio::sync::mpsc::unbounded_channel();
    connection.once("countChanged", move |payload| {
        let _ = once_tx.send(payload.clone());
    });
    let removed = connection.on("countChanged", |_| panic!("listener was removed"));
    assert!(connection.off(removed));
    let mut all = collect(&connection, "countChanged");

    counter.invoke(&INCREMENT, 1).await.unwrap();
    counter.invoke(&INCREMENT, 1).await.unwrap();

    assert_eq!(next(&mut all).await, json!(1));
    assert_eq!(next(&mut all).await, json!(2));
    assert_eq!(next(&mut once_rx).await, json!(1));
    assert!(once_rx.try_recv().is_err());
}
