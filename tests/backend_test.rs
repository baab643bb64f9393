mod common;

use common::{closed_port_url, http_response, serve_raw, serve_recording};
use wifibot::backend::{ChatBackend, ChatRequest, HttpChatBackend};
use wifibot::config::BotConfig;
use wifibot::diagnostics::{format_auto_test_results, RawDiagnostics};
use wifibot::error::BotError;

fn backend_for(base: String) -> HttpChatBackend {
    let config = BotConfig {
        backend_url: base,
        ..BotConfig::default()
    };
    HttpChatBackend::new(reqwest::Client::new(), &config)
}

fn request(text: &str) -> ChatRequest {
    ChatRequest {
        message: text.to_string(),
        session_id: "session_test".to_string(),
        auto_test_results: None,
    }
}

#[tokio::test]
async fn test_chat_reply_is_decoded() {
    let body = br#"{"message":"Try moving closer","next_question":"Better?","is_conversation_ended":false}"#;
    let base = serve_raw(http_response("200 OK", body)).await;

    let reply = backend_for(base).send_chat(request("slow")).await.unwrap();
    assert_eq!(reply.reply(), Some("Try moving closer"));
    assert_eq!(reply.follow_up(), Some("Better?"));
    assert!(!reply.ends_conversation());
}

#[tokio::test]
async fn test_chat_posts_snake_case_body() {
    let (base, seen) = serve_recording(http_response("200 OK", br#"{"message":"ok"}"#)).await;
    let report = format_auto_test_results(&RawDiagnostics::default());
    let chat = ChatRequest {
        auto_test_results: Some(report),
        ..request("My WiFi is slow")
    };

    backend_for(base).send_chat(chat).await.unwrap();

    let requests = seen.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].starts_with("POST /api/v1/chat HTTP/1.1\r\n"));
    let (_, body) = requests[0].split_once("\r\n\r\n").unwrap();
    let body: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(body["message"], "My WiFi is slow");
    assert_eq!(body["session_id"], "session_test");
    assert_eq!(body["auto_test_results"]["connectivity"]["connected"], false);
    assert!(body.get("sessionId").is_none());
}

#[tokio::test]
async fn test_chat_without_report_sends_null() {
    let (base, seen) = serve_recording(http_response("200 OK", br#"{"message":"ok"}"#)).await;

    backend_for(base).send_chat(request("hello?")).await.unwrap();

    let requests = seen.lock().unwrap().clone();
    let (_, body) = requests[0].split_once("\r\n\r\n").unwrap();
    let body: serde_json::Value = serde_json::from_str(body).unwrap();
    assert!(body["auto_test_results"].is_null());
}

#[tokio::test]
async fn test_error_status_keeps_body() {
    let base = serve_raw(http_response("500 Internal Server Error", b"backend exploded")).await;

    let err = backend_for(base).send_chat(request("slow")).await.unwrap_err();
    match err {
        BotError::Status { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "backend exploded");
        }
        other => panic!("expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_undecodable_reply_is_decode_error() {
    let base = serve_raw(http_response("200 OK", b"not json")).await;

    let err = backend_for(base).send_chat(request("slow")).await.unwrap_err();
    assert!(matches!(err, BotError::Decode(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_refused_chat_is_transport_error() {
    let base = closed_port_url().await;

    let err = backend_for(base).send_chat(request("slow")).await.unwrap_err();
    assert!(matches!(err, BotError::Transport(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_health_ok() {
    let (base, seen) = serve_recording(http_response("200 OK", b"{}")).await;

    assert!(backend_for(base).health().await);
    assert!(seen.lock().unwrap()[0].starts_with("GET /health HTTP/1.1\r\n"));
}

#[tokio::test]
async fn test_health_error_status() {
    let base = serve_raw(http_response("500 Internal Server Error", b"")).await;
    assert!(!backend_for(base).health().await);
}

#[tokio::test]
async fn test_health_closed_port() {
    let base = closed_port_url().await;
    assert!(!backend_for(base).health().await);
}
