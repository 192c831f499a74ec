//! Tests for `src/queue.rs`: FIFO order, isolation, depth, corrupt entries.

use hg_bot::event::EventKind;
use hg_bot::queue::{EventQueue, QueueError, QueueKey};

use crate::support::{fresh_pool, key, text_event, NAMESPACE};

#[tokio::test]
async fn pop_returns_events_in_push_order() {
    let queue = EventQueue::new(fresh_pool().await);
    let key = key("u1", EventKind::Message);
    for (mid, text) in [("m1", "one"), ("m2", "two"), ("m3", "three")] {
        queue
            .push(&key, &text_event("u1", mid, text))
            .await
            .expect("push should succeed");
    }

    let mut texts = Vec::new();
    while let Some(event) = queue.pop(&key).await.expect("pop should succeed") {
        texts.push(event.text().unwrap_or_default().to_owned());
    }
    assert_eq!(texts, vec!["one", "two", "three"]);
}

#[tokio::test]
async fn pop_on_empty_queue_returns_none() {
    let queue = EventQueue::new(fresh_pool().await);
    let popped = queue
        .pop(&key("nobody", EventKind::Message))
        .await
        .expect("pop should succeed");
    assert!(popped.is_none());
}

#[tokio::test]
async fn queues_are_isolated_by_user_kind_and_namespace() {
    let queue = EventQueue::new(fresh_pool().await);
    let event = text_event("u1", "m1", "hello");
    queue
        .push(&key("u1", EventKind::Message), &event)
        .await
        .expect("push should succeed");

    for other in [
        key("u2", EventKind::Message),
        key("u1", EventKind::Postback),
        QueueKey::new("weather_bots", "u1", EventKind::Message),
    ] {
        assert!(
            queue.pop(&other).await.expect("pop should succeed").is_none(),
            "{other} should be empty"
        );
    }

    let popped = queue
        .pop(&key("u1", EventKind::Message))
        .await
        .expect("pop should succeed");
    assert_eq!(popped, Some(event));
}

#[tokio::test]
async fn depth_counts_waiting_events() {
    let queue = EventQueue::new(fresh_pool().await);
    let key = key("u1", EventKind::Message);
    assert_eq!(queue.depth(&key).await.expect("depth"), 0);

    queue
        .push(&key, &text_event("u1", "m1", "a"))
        .await
        .expect("push should succeed");
    queue
        .push(&key, &text_event("u1", "m2", "b"))
        .await
        .expect("push should succeed");
    assert_eq!(queue.depth(&key).await.expect("depth"), 2);

    queue.pop(&key).await.expect("pop should succeed");
    assert_eq!(queue.depth(&key).await.expect("depth"), 1);
}

#[tokio::test]
async fn undecodable_entry_is_removed_and_reported() {
    let pool = fresh_pool().await;
    sqlx::query(
        "INSERT INTO event_queue (namespace, user_id, kind, payload) \
         VALUES (?1, 'u1', 'message', 'not json')",
    )
    .bind(NAMESPACE)
    .execute(&pool)
    .await
    .expect("raw insert should succeed");

    let queue = EventQueue::new(pool);
    let key = key("u1", EventKind::Message);
    let err = queue.pop(&key).await.expect_err("corrupt entry should error");
    assert!(matches!(err, QueueError::Corrupt { .. }), "got {err:?}");
    assert_eq!(queue.depth(&key).await.expect("depth"), 0);
}
