use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{BotConfig, HEALTH_TIMEOUT_SECS};
use crate::diagnostics::DiagnosticReport;
use crate::error::BotError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub message: String,
    pub session_id: String,
    pub auto_test_results: Option<DiagnosticReport>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub next_question: Option<String>,
    #[serde(default)]
    pub is_conversation_ended: Option<bool>,
}

impl ChatResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_next_question(mut self, question: impl Into<String>) -> Self {
        self.next_question = Some(question.into());
        self
    }

    pub fn ending(mut self) -> Self {
        self.is_conversation_ended = Some(true);
        self
    }

    pub fn ends_conversation(&self) -> bool {
        self.is_conversation_ended.unwrap_or(false)
    }

    pub fn reply(&self) -> Option<&str> {
        non_empty(self.message.as_deref())
    }

    pub fn follow_up(&self) -> Option<&str> {
        non_empty(self.next_question.as_deref())
    }
}

fn non_empty(text: Option<&str>) -> Option<&str> {
    text.filter(|t| !t.trim().is_empty())
}

/// Delivers chat turns to the troubleshooting backend.
pub trait ChatBackend: Send + Sync {
    fn send_chat(&self, request: ChatRequest) -> BoxFuture<'_, Result<ChatResponse, BotError>>;
}

pub fn build_http_client(user_agent: &str) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(user_agent)
        .pool_max_idle_per_host(4)
        .build()
        .expect("Failed to create HTTP client")
}

pub struct HttpChatBackend {
    client: reqwest::Client,
    chat_url: String,
    health_url: String,
}

impl HttpChatBackend {
    pub fn new(client: reqwest::Client, config: &BotConfig) -> Self {
        Self {
            client,
            chat_url: config.chat_url(),
            health_url: config.health_url(),
        }
    }

    /// Check if the backend answers its health endpoint.
    pub async fn health(&self) -> bool {
        let request = self
            .client
            .get(&self.health_url)
            .timeout(Duration::from_secs(HEALTH_TIMEOUT_SECS))
            .send();

        match request.await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Backend health check failed: {}", e);
                false
            }
        }
    }

    /// No timeout of its own: the conversation bounds each call.
    async fn post_chat(&self, request: ChatRequest) -> Result<ChatResponse, BotError> {
        debug!(
            "POST {} (session {}, diagnostics attached: {})",
            self.chat_url,
            request.session_id,
            request.auto_test_results.is_some()
        );
        let resp = self.client.post(&self.chat_url).json(&request).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            warn!("Chat endpoint returned {}: {}", status, body);
            return Err(BotError::Status { status, body });
        }

        let reply: ChatResponse = resp.json().await?;
        Ok(reply)
    }
}

impl ChatBackend for HttpChatBackend {
    fn send_chat(&self, request: ChatRequest) -> BoxFuture<'_, Result<ChatResponse, BotError>> {
        Box::pin(self.post_chat(request))
    }
}
