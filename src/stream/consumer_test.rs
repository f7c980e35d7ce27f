use std::sync::Arc;

use mockito::Matcher;
use serde_json::json;
use tokio::sync::mpsc;

use super::*;
use crate::{
    models::Credential,
    storage::{CredentialStore, MemoryStore},
};

fn store_with_token() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::with_credential(Credential {
        access_token: Some("access-1".to_string()),
        refresh_token: Some("refresh-1".to_string()),
        user: None,
    }))
}

fn sse(records: &[serde_json::Value]) -> String {
    records
        .iter()
        .map(|record| format!("data: {}\n\n", record))
        .collect::<String>()
}

fn drain(rx: &mut mpsc::UnboundedReceiver<StreamFrame>) -> Vec<StreamFrame> {
    let mut frames = vec![];
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

#[tokio::test]
async fn test_stream_delivers_frames_until_done() {
    let body = sse(&[
        json!({"type": "content", "content": "A"}),
        json!({"type": "content", "content": "B"}),
        json!({"type": "done", "message": {"id": "m2", "conversation_id": "c1", "content": "AB"}}),
        json!({"type": "content", "content": "after done"}),
    ]) + "data: [DONE]\n\n";

    let mut server = mockito::Server::new_async().await;
    let handler = server
        .mock("POST", "/conversations/c1/messages/stream")
        .match_header("Authorization", "Bearer access-1")
        .match_header("X-Test-Mode", "1")
        .match_body(Matcher::Json(json!({"content": "hello"})))
        .with_status(200)
        .with_header("content-type", "text/event-stream")
        .with_body(body)
        .create_async()
        .await;

    let consumer =
        StreamConsumer::new(&server.url(), store_with_token()).with_test_mode(Some(TestMode::Verbose));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let end = consumer
        .stream("c1", "hello", &tx, &CancellationToken::new())
        .await
        .expect("stream reply");

    assert_eq!(end, StreamEnd::Terminal);
    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 3, "nothing is read past the terminal frame");
    assert_eq!(frames[0], StreamFrame::Content("A".to_string()));
    assert_eq!(frames[1], StreamFrame::Content("B".to_string()));
    assert!(matches!(&frames[2], StreamFrame::Done(c) if c.message.id == "m2"));
    handler.assert_async().await;
}

#[tokio::test]
async fn test_missing_credential_fails_without_request() {
    let mut server = mockito::Server::new_async().await;
    let handler = server
        .mock("POST", Matcher::Any)
        .expect(0)
        .create_async()
        .await;

    let consumer = StreamConsumer::new(&server.url(), Arc::new(MemoryStore::new()));
    let (tx, _rx) = mpsc::unbounded_channel();
    let err = consumer
        .stream("c1", "hello", &tx, &CancellationToken::new())
        .await
        .expect_err("no token");

    assert_eq!(err, StreamError::MissingCredential);
    handler.assert_async().await;
}

#[tokio::test]
async fn test_error_status_is_surfaced() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/conversations/c1/messages/stream")
        .with_status(403)
        .with_body(r#"{"detail": "Not your conversation"}"#)
        .create_async()
        .await;

    let consumer = StreamConsumer::new(&server.url(), store_with_token());
    let (tx, _rx) = mpsc::unbounded_channel();
    let err = consumer
        .stream("c1", "hello", &tx, &CancellationToken::new())
        .await
        .expect_err("forbidden");

    assert_eq!(
        err,
        StreamError::Http {
            status: 403,
            message: "Not your conversation".to_string()
        }
    );
}

#[tokio::test]
async fn test_body_without_terminal_frame_is_interrupted() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/conversations/c1/messages/stream")
        .with_status(200)
        .with_body(sse(&[json!({"type": "content", "content": "partial"})]))
        .create_async()
        .await;

    let consumer = StreamConsumer::new(&server.url(), store_with_token());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let err = consumer
        .stream("c1", "hello", &tx, &CancellationToken::new())
        .await
        .expect_err("connection cut");

    assert_eq!(err, StreamError::Interrupted);
    assert_eq!(drain(&mut rx), vec![StreamFrame::Content("partial".to_string())]);
}

#[tokio::test]
async fn test_done_marker_ends_stream() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/conversations/c1/messages/stream")
        .with_status(200)
        .with_body(sse(&[json!({"type": "content", "content": "only"})]) + "data: [DONE]")
        .create_async()
        .await;

    let consumer = StreamConsumer::new(&server.url(), store_with_token());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let end = consumer
        .stream("c1", "hello", &tx, &CancellationToken::new())
        .await
        .expect("stream reply");

    assert_eq!(end, StreamEnd::DoneMarker);
    assert_eq!(drain(&mut rx), vec![StreamFrame::Content("only".to_string())]);
}

#[tokio::test]
async fn test_confirmation_stops_reading() {
    let body = sse(&[
        json!({
            "type": "content",
            "content": "Tool: create_event",
            "requires_confirmation": true,
            "tool_name": "create_event",
            "tool_params": {"title": "Standup"}
        }),
        json!({"type": "content", "content": "unexpected"}),
    ]);

    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/conversations/c1/messages/stream")
        .with_status(200)
        .with_body(body)
        .create_async()
        .await;

    let consumer = StreamConsumer::new(&server.url(), store_with_token());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let end = consumer
        .stream("c1", "add standup", &tx, &CancellationToken::new())
        .await
        .expect("stream reply");

    assert_eq!(end, StreamEnd::Gated);
    let frames = drain(&mut rx);
    assert_eq!(frames.len(), 1);
    assert!(matches!(&frames[0], StreamFrame::ConfirmRequired(r) if r.tool_name == "create_event"));
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/conversations/c1/messages/stream")
        .with_status(200)
        .with_body(sse(&[json!({"type": "content", "content": "A"})]))
        .create_async()
        .await;

    let consumer = StreamConsumer::new(&server.url(), store_with_token());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let end = consumer
        .stream("c1", "hello", &tx, &cancel)
        .await
        .expect("cancelled stream");

    assert_eq!(end, StreamEnd::Cancelled);
    assert!(drain(&mut rx).is_empty());
}

#[tokio::test]
async fn test_dropped_receiver_stops_stream() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/conversations/c1/messages/stream")
        .with_status(200)
        .with_body(sse(&[
            json!({"type": "content", "content": "A"}),
            json!({"type": "done", "message": {"content": "A"}}),
        ]))
        .create_async()
        .await;

    let consumer = StreamConsumer::new(&server.url(), store_with_token());
    let (tx, rx) = mpsc::unbounded_channel();
    drop(rx);

    let end = consumer
        .stream_message(
            "c1".to_string(),
            "hello".to_string(),
            tx,
            CancellationToken::new(),
        )
        .await
        .expect("stream reply");
    assert_eq!(end, StreamEnd::Cancelled);
}

#[tokio::test]
async fn test_token_is_read_at_call_time() {
    let mut server = mockito::Server::new_async().await;
    let handler = server
        .mock("POST", "/conversations/c1/messages/stream")
        .match_header("Authorization", "Bearer access-2")
        .match_header("X-Test-Mode", Matcher::Missing)
        .with_status(200)
        .with_body("data: [DONE]\n")
        .create_async()
        .await;

    let store = store_with_token();
    let consumer = StreamConsumer::new(&server.url(), store.clone());
    store.set(Credential {
        access_token: Some("access-2".to_string()),
        refresh_token: None,
        user: None,
    });

    let (tx, _rx) = mpsc::unbounded_channel();
    let end = consumer
        .stream("c1", "hello", &tx, &CancellationToken::new())
        .await
        .expect("stream reply");
    assert_eq!(end, StreamEnd::DoneMarker);
    handler.assert_async().await;
}
