#![allow(dead_code)]

use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use wifibot::backend::{ChatBackend, ChatRequest, ChatResponse};
use wifibot::conversation::ConversationController;
use wifibot::diagnostics::DiagnosticAggregator;
use wifibot::error::BotError;
use wifibot::link_info::{LinkInfo, StaticLinkInfo};
use wifibot::probe::{ConnectivityResult, NetworkProbe, SpeedResult};

pub const DESKTOP_PLATFORM: &str = "wifibot/0.1.0 (Linux; 22.04 Ubuntu; x86_64)";

/// Probe double that counts its calls.
pub struct FakeProbe {
    pub connected: bool,
    pub connectivity_calls: AtomicUsize,
    pub speed_calls: AtomicUsize,
}

impl FakeProbe {
    pub fn online() -> Arc<Self> {
        Arc::new(Self {
            connected: true,
            connectivity_calls: AtomicUsize::new(0),
            speed_calls: AtomicUsize::new(0),
        })
    }

    pub fn offline() -> Arc<Self> {
        Arc::new(Self {
            connected: false,
            connectivity_calls: AtomicUsize::new(0),
            speed_calls: AtomicUsize::new(0),
        })
    }

    pub fn connectivity_calls(&self) -> usize {
        self.connectivity_calls.load(Ordering::SeqCst)
    }

    pub fn speed_calls(&self) -> usize {
        self.speed_calls.load(Ordering::SeqCst)
    }
}

impl NetworkProbe for FakeProbe {
    fn test_connectivity(&self) -> BoxFuture<'_, ConnectivityResult> {
        Box::pin(async move {
            self.connectivity_calls.fetch_add(1, Ordering::SeqCst);
            if self.connected {
                ConnectivityResult::connected(42)
            } else {
                ConnectivityResult::failed("error sending request: connection refused")
            }
        })
    }

    fn measure_speed(&self) -> BoxFuture<'_, SpeedResult> {
        Box::pin(async move {
            self.speed_calls.fetch_add(1, Ordering::SeqCst);
            SpeedResult::measured(50_000, 100)
        })
    }
}

/// Backend double: replays queued replies and records every request.
pub struct FakeBackend {
    replies: Mutex<VecDeque<Result<ChatResponse, BotError>>>,
    requests: Mutex<Vec<ChatRequest>>,
    delay: Option<Duration>,
}

impl FakeBackend {
    pub fn new(replies: Vec<Result<ChatResponse, BotError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        })
    }

    pub fn delayed(replies: Vec<Result<ChatResponse, BotError>>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            delay: Some(delay),
        })
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl ChatBackend for FakeBackend {
    fn send_chat(&self, request: ChatRequest) -> BoxFuture<'_, Result<ChatResponse, BotError>> {
        Box::pin(async move {
            self.requests.lock().unwrap().push(request);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(ChatResponse::new("ok")))
        })
    }
}

pub fn aggregator(probe: Arc<FakeProbe>) -> DiagnosticAggregator {
    let link = StaticLinkInfo::new(
        LinkInfo::Supported {
            effective_type: Some("4g".to_string()),
            downlink_mbps: Some(10.0),
            rtt_ms: Some(100.0),
        },
        DESKTOP_PLATFORM,
    );
    DiagnosticAggregator::new(probe, Arc::new(link))
}

pub fn controller(probe: Arc<FakeProbe>, backend: Arc<FakeBackend>) -> ConversationController {
    ConversationController::new(aggregator(probe), backend, Duration::from_secs(5))
}

/// Serve `response` verbatim to every connection on a random local port.
pub async fn serve_raw(response: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let response = response.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(&response).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{}", addr)
}

/// Like `serve_raw`, but keeps the full text of every request it answers.
pub async fn serve_recording(response: Vec<u8>) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = seen.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let response = response.clone();
            let recorded = recorded.clone();
            tokio::spawn(async move {
                let request = read_request(&mut socket).await;
                recorded.lock().unwrap().push(request);
                let _ = socket.write_all(&response).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    (format!("http://{}", addr), seen)
}

/// Read one request: headers, then as much body as Content-Length announces.
async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        data.extend_from_slice(&buf[..n]);

        let text = String::from_utf8_lossy(&data);
        let Some(header_end) = text.find("\r\n\r\n") else {
            continue;
        };
        let content_length = text[..header_end]
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if data.len() >= header_end + 4 + content_length {
            break;
        }
    }
    String::from_utf8_lossy(&data).into_owned()
}

pub fn http_response(status: &str, body: &[u8]) -> Vec<u8> {
    let mut response = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(body);
    response
}

/// A local URL nothing is listening on.
pub async fn closed_port_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}
