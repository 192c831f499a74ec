//! Tests for `src/ingest.rs`: push then schedule.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use hg_bot::event::EventKind;
use hg_bot::ingest::{IngestError, Ingestor};
use hg_bot::worker::{RetryPolicy, Scheduler};

use crate::support::{key, quick_reply_event, Harness, ScriptedNlu};

fn ingestor(h: &Harness) -> Ingestor {
    let policy = RetryPolicy {
        max_attempts: 2,
        retry_delay: Duration::from_millis(1),
    };
    let scheduler = Scheduler::new(Arc::new(h.worker()), policy);
    Ingestor::new(h.queue.clone(), Arc::clone(&h.bots), scheduler)
}

#[tokio::test]
async fn enqueue_queues_and_drains_the_event() {
    let h = Harness::new(ScriptedNlu::default()).await;
    let raw = quick_reply_event("u1", "m1", json!({"action": "subscribe"}));

    let handle = ingestor(&h)
        .enqueue("NewsBot", EventKind::Message, &raw)
        .await
        .expect("enqueue should succeed");
    let report = handle
        .await
        .expect("task should join")
        .expect("drain should succeed");

    assert_eq!(report.dispatched, 1);
    assert_eq!(h.router.handled()[0].action, "subscribe");
    assert_eq!(h.router.handled()[0].user.platform_id, "u1");
}

#[tokio::test]
async fn enqueue_for_unknown_bot_queues_nothing() {
    let h = Harness::new(ScriptedNlu::default()).await;
    let raw = quick_reply_event("u1", "m1", json!({"action": "subscribe"}));

    let err = ingestor(&h)
        .enqueue("MissingBot", EventKind::Message, &raw)
        .await
        .expect_err("unknown bot should fail");
    assert!(matches!(err, IngestError::Bot(_)), "got {err:?}");
    assert_eq!(
        h.queue
            .depth(&key("u1", EventKind::Message))
            .await
            .expect("depth"),
        0
    );
}

#[tokio::test]
async fn redundant_drains_after_enqueue_are_noops() {
    let h = Harness::new(ScriptedNlu::default()).await;
    let ingest = ingestor(&h);
    let mut handles = Vec::new();
    for i in 0..5 {
        let raw = quick_reply_event("u1", &format!("m{i}"), json!({"action": format!("a{i}")}));
        handles.push(
            ingest
                .enqueue("NewsBot", EventKind::Message, &raw)
                .await
                .expect("enqueue should succeed"),
        );
    }

    let mut dispatched = 0;
    for handle in handles {
        dispatched += handle
            .await
            .expect("task should join")
            .expect("drain should succeed")
            .dispatched;
    }

    assert_eq!(dispatched, 5);
    let actions: Vec<String> = h.router.handled().into_iter().map(|r| r.action).collect();
    assert_eq!(actions, vec!["a0", "a1", "a2", "a3", "a4"]);
}
