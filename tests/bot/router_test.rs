//! Tests for `src/bot/router.rs`: JSON lines output.

use serde_json::{json, Value};

use hg_bot::bot::{JsonLinesRouter, Router, User};
use hg_bot::event::RawEvent;
use hg_bot::request::{Payload, Request};

fn request(action: &str) -> Request {
    let user = User {
        platform_id: "u1".to_owned(),
        namespace: "news_bots".to_owned(),
        nlu_session_id: "s-1".to_owned(),
    };
    let event: RawEvent = serde_json::from_value(json!({
        "sender": {"id": "u1"},
        "message": {"mid": "m1", "text": "hi"},
    }))
    .expect("event should deserialize");
    let payload = Payload::parse(&json!({"action": action, "params": {"n": 1}}))
        .expect("payload should parse");
    Request::from_payload(&user, &event, payload)
}

#[tokio::test]
async fn each_request_is_one_json_line() {
    let tmp = tempfile::tempdir().expect("should create temp dir");
    let path = tmp.path().join("requests.jsonl");
    let file = tokio::fs::File::create(&path)
        .await
        .expect("output file should open");
    let router = JsonLinesRouter::new(file);
    router.handle(request("first")).await.expect("handle");
    router.handle(request("second")).await.expect("handle");
    drop(router);

    let out = std::fs::read_to_string(&path).expect("output should be readable");
    let lines: Vec<Value> = out
        .lines()
        .map(|line| serde_json::from_str(line).expect("line should be json"))
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["action"], json!("first"));
    assert_eq!(lines[1]["intent"], json!("second"));
    assert_eq!(lines[0]["parameters"]["n"], json!(1));
    assert_eq!(lines[0]["user"]["platform_id"], json!("u1"));
    // Absent optional fields are omitted.
    assert!(lines[0].get("route_override").is_none());
    assert!(lines[0].get("response").is_none());
}
