use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::backend::{ChatBackend, ChatRequest, ChatResponse};
use crate::config::EVENT_CHANNEL_CAPACITY;
use crate::diagnostics::{DiagnosticAggregator, DiagnosticReport};
use crate::error::BotError;

pub const GREETING: &str = "Hey there! How can I help you with your WiFi today?";
pub const FALLBACK_REPLY: &str = "Sorry, I encountered an error. Please try again.";

/// Quick-start prompts offered before the first message.
pub const INITIAL_OPTIONS: &[&str] = &[
    "My WiFi is slow",
    "I can't connect to the internet",
    "My connection keeps dropping",
    "Some websites won't load",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPhase {
    Init,
    AwaitingDiagnostics,
    Qa,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub content: String,
    pub is_user: bool,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_user: true,
            timestamp: Utc::now(),
        }
    }

    pub fn bot(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_user: false,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub session_id: String,
    pub messages: Vec<Message>,
    pub ended: bool,
    pub diagnostics_run: bool,
    pub show_initial_options: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConversationEvent {
    MessageAppended(Message),
    LoadingChanged(bool),
    TestingChanged(bool),
    DiagnosticsCompleted(DiagnosticReport),
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Empty,
    Busy,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The exchange ran to completion; `appended` counts every message added,
    /// the user's included.
    Completed {
        phase: ConversationPhase,
        appended: usize,
    },
    Ignored(IgnoreReason),
}

struct SessionInner {
    state: ConversationState,
    /// The exchange that carries the diagnostic report is the current one.
    reporting_turn: bool,
    last_report: Option<DiagnosticReport>,
}

/// Clears the loading flag when the exchange finishes or its future is dropped.
struct LoadingGuard<'a> {
    controller: &'a ConversationController,
    announced: bool,
}

impl LoadingGuard<'_> {
    fn announce(&mut self) {
        self.announced = true;
        self.controller.publish(ConversationEvent::LoadingChanged(true));
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.controller.loading.store(false, Ordering::SeqCst);
        self.controller.testing.store(false, Ordering::SeqCst);
        if self.announced {
            self.controller.publish(ConversationEvent::LoadingChanged(false));
        }
    }
}

/// One conversation: its message log, session id and state machine.
///
/// `Init` → (first message) `AwaitingDiagnostics` → `Qa` ⇄ `Qa` → `Ended`.
/// Diagnostics run once, on the first accepted message, and their report is
/// attached only to that first backend call. While an exchange is in flight
/// the loading flag is set and further messages are ignored as `Busy`; once
/// ended, messages are ignored without touching the log or the backend.
pub struct ConversationController {
    session_id: String,
    inner: RwLock<SessionInner>,
    loading: AtomicBool,
    testing: AtomicBool,
    aggregator: DiagnosticAggregator,
    backend: Arc<dyn ChatBackend>,
    backend_timeout: Duration,
    events: broadcast::Sender<ConversationEvent>,
}

impl ConversationController {
    pub fn new(
        aggregator: DiagnosticAggregator,
        backend: Arc<dyn ChatBackend>,
        backend_timeout: Duration,
    ) -> Self {
        let session_id = format!("session_{}", uuid::Uuid::new_v4().simple());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        info!("Starting conversation {}", session_id);

        Self {
            inner: RwLock::new(SessionInner {
                state: ConversationState {
                    session_id: session_id.clone(),
                    messages: Vec::new(),
                    ended: false,
                    diagnostics_run: false,
                    show_initial_options: true,
                },
                reporting_turn: false,
                last_report: None,
            }),
            session_id,
            loading: AtomicBool::new(false),
            testing: AtomicBool::new(false),
            aggregator,
            backend,
            backend_timeout,
            events,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn greeting(&self) -> &'static str {
        GREETING
    }

    pub fn initial_options(&self) -> &'static [&'static str] {
        INITIAL_OPTIONS
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    pub fn is_testing(&self) -> bool {
        self.testing.load(Ordering::SeqCst)
    }

    /// Derived from the session flags, so an abandoned exchange never leaves
    /// a stale phase behind.
    pub async fn phase(&self) -> ConversationPhase {
        let inner = self.inner.read().await;
        if inner.state.ended {
            ConversationPhase::Ended
        } else if inner.reporting_turn && self.is_loading() {
            ConversationPhase::AwaitingDiagnostics
        } else if inner.state.diagnostics_run {
            ConversationPhase::Qa
        } else {
            ConversationPhase::Init
        }
    }

    pub async fn is_ended(&self) -> bool {
        self.inner.read().await.state.ended
    }

    pub async fn diagnostics_run(&self) -> bool {
        self.inner.read().await.state.diagnostics_run
    }

    pub async fn show_initial_options(&self) -> bool {
        self.inner.read().await.state.show_initial_options
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.inner.read().await.state.messages.clone()
    }

    pub async fn snapshot(&self) -> ConversationState {
        self.inner.read().await.state.clone()
    }

    pub async fn last_report(&self) -> Option<DiagnosticReport> {
        self.inner.read().await.last_report.clone()
    }

    /// Run one user turn to completion.
    pub async fn send_message(&self, text: &str) -> SendOutcome {
        if text.trim().is_empty() {
            return SendOutcome::Ignored(IgnoreReason::Empty);
        }

        if self
            .loading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Message ignored, an exchange is already in flight");
            return SendOutcome::Ignored(IgnoreReason::Busy);
        }
        let mut guard = LoadingGuard {
            controller: self,
            announced: false,
        };

        // Accept the message, or bail out if the conversation is over
        let (start_len, first_turn) = {
            let mut inner = self.inner.write().await;
            if inner.state.ended {
                debug!("Message ignored, conversation has ended");
                return SendOutcome::Ignored(IgnoreReason::Ended);
            }
            let start_len = inner.state.messages.len();
            // Only the first accepted message ever gathers, even if its
            // exchange is abandoned before the gather finishes.
            let first_turn = !inner.state.diagnostics_run;
            inner.state.diagnostics_run = true;
            inner.reporting_turn = first_turn;
            inner.state.show_initial_options = false;
            self.append(&mut inner, Message::user(text));
            (start_len, first_turn)
        };
        guard.announce();

        let auto_test_results = if first_turn {
            Some(self.run_diagnostics().await)
        } else {
            None
        };

        let request = ChatRequest {
            message: text.to_string(),
            session_id: self.session_id.clone(),
            auto_test_results,
        };
        let result = self.call_backend(request).await;

        let mut inner = self.inner.write().await;
        match result {
            Ok(response) => self.apply_response(&mut inner, &response),
            Err(e) => {
                warn!("Chat request failed for {}: {}", self.session_id, e);
                self.append(&mut inner, Message::bot(FALLBACK_REPLY));
            }
        }
        inner.reporting_turn = false;
        let phase = if inner.state.ended {
            ConversationPhase::Ended
        } else {
            ConversationPhase::Qa
        };

        SendOutcome::Completed {
            phase,
            appended: inner.state.messages.len() - start_len,
        }
    }

    async fn run_diagnostics(&self) -> DiagnosticReport {
        self.testing.store(true, Ordering::SeqCst);
        self.publish(ConversationEvent::TestingChanged(true));

        let report = self.aggregator.run().await;

        {
            let mut inner = self.inner.write().await;
            inner.last_report = Some(report.clone());
        }
        self.testing.store(false, Ordering::SeqCst);
        self.publish(ConversationEvent::TestingChanged(false));
        self.publish(ConversationEvent::DiagnosticsCompleted(report.clone()));
        report
    }

    async fn call_backend(&self, request: ChatRequest) -> Result<ChatResponse, BotError> {
        match timeout(self.backend_timeout, self.backend.send_chat(request)).await {
            Ok(result) => result,
            Err(_) => Err(BotError::Timeout(format!(
                "backend did not answer within {:?}",
                self.backend_timeout
            ))),
        }
    }

    fn apply_response(&self, inner: &mut SessionInner, response: &ChatResponse) {
        let ends = response.ends_conversation();
        if let Some(reply) = response.reply() {
            self.append(inner, Message::bot(reply));
        }
        if !ends {
            if let Some(question) = response.follow_up() {
                self.append(inner, Message::bot(question));
            }
        }
        if ends && !inner.state.ended {
            inner.state.ended = true;
            info!("Conversation {} ended by backend", self.session_id);
            self.publish(ConversationEvent::Ended);
        }
    }

    fn append(&self, inner: &mut SessionInner, message: Message) {
        inner.state.messages.push(message.clone());
        self.publish(ConversationEvent::MessageAppended(message));
    }

    fn publish(&self, event: ConversationEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
