//! HTTP surface of the widget host.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum_test::TestServer;
use chat_widget::AppState;
use chat_widget::config::AppConfig;
use chat_widget::remote::{ChatReply, ChatTransport, TransportError};
use chat_widget::server::build_router;
use chat_widget::session::{SessionStore, WidgetFactory};
use chat_widget::widget::{FALLBACK_REPLY, Message, Sender, WidgetEvent, WidgetOptions};
use futures::StreamExt;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tower::ServiceExt;

/// Replies "Hi there" to everything except "fail", which errors; "stall"
/// never answers.
#[derive(Debug)]
struct ScriptedTransport;

#[async_trait::async_trait]
impl ChatTransport for ScriptedTransport {
    async fn send(&self, query: &str) -> Result<ChatReply, TransportError> {
        match query {
            "fail" => Err(TransportError::InvalidBody("connection reset".into())),
            "stall" => std::future::pending().await,
            _ => Ok(ChatReply::from("Hi there")),
        }
    }
}

fn state_with(options: WidgetOptions) -> AppState {
    let config = AppConfig::load_from_args(["chat-widget"]).expect("default config");
    AppState {
        sessions: SessionStore::new(WidgetFactory::new(Arc::new(ScriptedTransport), options)),
        config: Arc::new(config),
    }
}

fn session_id_from_page(html: &str) -> String {
    let start = html.find("/sessions/").expect("session path in page") + "/sessions/".len();
    let end = start + html[start..].find('/').expect("end of session id");
    html[start..end].to_string()
}

async fn next_settled(rx: &mut broadcast::Receiver<WidgetEvent>) -> Message {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let WidgetEvent::Settled { message, .. } = rx.recv().await.unwrap() {
                return message;
            }
        }
    })
    .await
    .expect("request should settle")
}

async fn open_events(state: &AppState, id: &str) -> axum::response::Response {
    let response = build_router(state.clone())
        .oneshot(
            Request::get(format!("/sessions/{id}/events"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    response
}

/// Read the event stream until `needle` shows up; returns everything read.
async fn read_until(response: axum::response::Response, needle: &str) -> String {
    let mut body = response.into_body().into_data_stream();
    let mut received = String::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !received.contains(needle) {
            let chunk = body.next().await.expect("stream open").expect("chunk");
            received.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    })
    .await
    .expect("expected text should be streamed");
    received
}

#[tokio::test]
async fn test_index_creates_fresh_session_per_load() {
    let state = state_with(WidgetOptions::default());
    let server = TestServer::new(build_router(state.clone())).unwrap();

    let first = server.get("/").await;
    first.assert_status_ok();
    let html = first.text();
    assert!(html.contains(r#"id="user-input""#));
    assert!(html.contains(r#"id="send-btn""#));
    assert!(html.contains(r#"id="chat-history""#));

    let id = session_id_from_page(&html);
    server
        .post(&format!("/sessions/{id}/send"))
        .form(&[("message", "Hello")])
        .await
        .assert_status_ok();

    // a reload is a new session with an empty history
    let second = server.get("/").await.text();
    let reloaded = session_id_from_page(&second);
    assert_ne!(id, reloaded);
    assert!(!second.contains("user-message"));
    assert_eq!(state.sessions.len(), 2);
}

#[tokio::test]
async fn test_send_returns_echo_and_indicator_then_reply() {
    let state = state_with(WidgetOptions::default());
    let session = state.sessions.create();
    let mut rx = session.widget().subscribe();
    let server = TestServer::new(build_router(state.clone())).unwrap();

    let response = server
        .post(&format!("/sessions/{}/send", session.id()))
        .form(&[("message", "  Hello ")])
        .await;
    response.assert_status_ok();
    assert_eq!(response.header("HX-Trigger-After-Settle"), "chat-sent");

    let fragment = response.text();
    assert!(fragment.contains("user-message"));
    assert!(fragment.contains("<p>Hello</p>"));
    assert!(fragment.contains(r#"id="loading-"#));

    let reply = next_settled(&mut rx).await;
    assert_eq!(reply.text, "Hi there");
    assert_eq!(reply.sender, Sender::System);

    let history = server
        .get(&format!("/sessions/{}/history", session.id()))
        .await
        .text();
    assert!(history.contains("<p>Hi there</p>"));
    assert!(!history.contains("loading-"));

    let info: Value = server
        .get(&format!("/api/sessions/{}", session.id()))
        .await
        .json();
    assert_eq!(info["message_count"], 2);
    assert_eq!(info["pending"], json!([]));
    assert_eq!(info["scroll"]["offset"], info["scroll"]["max"]);
    assert!(info["age_secs"].is_u64());
}

#[tokio::test]
async fn test_whitespace_send_is_a_no_op() {
    let state = state_with(WidgetOptions::default());
    let session = state.sessions.create();
    let server = TestServer::new(build_router(state.clone())).unwrap();

    server
        .post(&format!("/sessions/{}/send", session.id()))
        .form(&[("message", "   ")])
        .await
        .assert_status(StatusCode::NO_CONTENT);

    let messages: Vec<Message> = server
        .get(&format!("/api/sessions/{}/messages", session.id()))
        .await
        .json();
    assert!(messages.is_empty());
    assert!(session.widget().pending().is_empty());
}

#[tokio::test]
async fn test_failed_request_shows_fallback() {
    let state = state_with(WidgetOptions::default());
    let session = state.sessions.create();
    let mut rx = session.widget().subscribe();
    let server = TestServer::new(build_router(state.clone())).unwrap();

    let outcome: Value = server
        .post(&format!("/api/sessions/{}/send", session.id()))
        .json(&json!({ "message": "fail" }))
        .await
        .json();
    assert_eq!(outcome["status"], "sent");

    let reply = next_settled(&mut rx).await;
    assert_eq!(reply.text, FALLBACK_REPLY);

    let messages: Vec<Message> = server
        .get(&format!("/api/sessions/{}/messages", session.id()))
        .await
        .json();
    let texts: Vec<_> = messages.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["fail", FALLBACK_REPLY]);
}

#[tokio::test]
async fn test_locked_widget_refuses_overlapping_send() {
    let state = state_with(WidgetOptions {
        lock_while_pending: true,
        ..WidgetOptions::default()
    });
    let session = state.sessions.create();
    let server = TestServer::new(build_router(state.clone())).unwrap();
    let path = format!("/sessions/{}/send", session.id());

    server.post(&path).form(&[("message", "stall")]).await.assert_status_ok();
    server
        .post(&path)
        .form(&[("message", "second")])
        .await
        .assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let state = state_with(WidgetOptions::default());
    let server = TestServer::new(build_router(state)).unwrap();

    server
        .post("/sessions/nope/send")
        .form(&[("message", "Hello")])
        .await
        .assert_status(StatusCode::NOT_FOUND);
    server
        .get("/sessions/nope/history")
        .await
        .assert_status(StatusCode::NOT_FOUND);
    server
        .delete("/api/sessions/nope")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_session() {
    let state = state_with(WidgetOptions::default());
    let session = state.sessions.create();
    let server = TestServer::new(build_router(state.clone())).unwrap();

    server
        .delete(&format!("/api/sessions/{}", session.id()))
        .await
        .assert_status(StatusCode::NO_CONTENT);
    assert!(state.sessions.is_empty());
}

#[tokio::test]
async fn test_health() {
    let server = TestServer::new(build_router(state_with(WidgetOptions::default()))).unwrap();
    let response = server.get("/health").await;
    response.assert_status_ok();
    assert_eq!(response.text(), "ok");
}

#[tokio::test]
async fn test_events_stream_carries_settlement_fragment() {
    let state = state_with(WidgetOptions::default());
    let session = state.sessions.create();

    let response = open_events(&state, session.id()).await;
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );

    session.widget().send("Hello");

    let received = read_until(response, "event: send.settled").await;
    assert!(received.contains("event: send.dispatched"));
    assert!(received.contains("event: widget\n"));
    assert!(received.contains(r#"hx-swap-oob="delete""#));
    assert!(received.contains("<p>Hi there</p>"));
}

#[tokio::test]
async fn test_late_events_stream_shows_missed_reply() {
    let state = state_with(WidgetOptions::default());
    let session = state.sessions.create();
    let mut rx = session.widget().subscribe();
    let server = TestServer::new(build_router(state.clone())).unwrap();

    let dispatch = server
        .post(&format!("/sessions/{}/send", session.id()))
        .form(&[("message", "Hello")])
        .await
        .text();
    assert!(dispatch.contains(r#"id="loading-"#));
    next_settled(&mut rx).await;
    assert!(session.widget().pending().is_empty());

    let received = read_until(open_events(&state, session.id()).await, "Hi there").await;
    assert!(received.starts_with("event: widget\n"));
    assert!(received.contains(r#"<div id="chat-history" hx-swap-oob="innerHTML">"#));
    assert!(received.contains("<p>Hello</p>"));
    assert!(!received.contains(r#"id="loading-"#));
}

#[tokio::test]
async fn test_open_events_stream_keeps_session_alive() {
    let state = state_with(WidgetOptions::default());
    let session = state.sessions.create();
    let events = open_events(&state, session.id()).await;

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(
        state.sessions.cleanup_expired_with_timeout(Duration::from_millis(1)),
        0
    );

    let server = TestServer::new(build_router(state.clone())).unwrap();
    server
        .post(&format!("/sessions/{}/send", session.id()))
        .form(&[("message", "Hello")])
        .await
        .assert_status_ok();

    drop(events);
}

#[tokio::test]
async fn test_history_limit_deletes_evicted_nodes() {
    let state = state_with(WidgetOptions {
        history_limit: Some(2),
        ..WidgetOptions::default()
    });
    let session = state.sessions.create();
    let mut rx = session.widget().subscribe();
    let server = TestServer::new(build_router(state.clone())).unwrap();
    let path = format!("/sessions/{}/send", session.id());

    let first = server.post(&path).form(&[("message", "one")]).await.text();
    assert!(first.contains(r#"id="msg-1""#));
    assert!(!first.contains(r#"hx-swap-oob="delete""#));
    next_settled(&mut rx).await;

    let second = server.post(&path).form(&[("message", "two")]).await.text();
    assert!(second.contains(r#"<div id="msg-1" hx-swap-oob="delete"></div>"#));
    assert!(second.contains(r#"id="msg-3""#));

    let history = server
        .get(&format!("/sessions/{}/history", session.id()))
        .await
        .text();
    assert!(!history.contains(r#"id="msg-1""#));
}
