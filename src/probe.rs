use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use reqwest::header::CACHE_CONTROL;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

use crate::config::{BotConfig, SPEED_NONCE_PARAM};
use crate::error::BotError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityResult {
    pub connected: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ConnectivityResult {
    pub fn connected(latency_ms: u64) -> Self {
        Self {
            connected: true,
            latency_ms: Some(latency_ms),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            connected: false,
            latency_ms: None,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeedResult {
    pub speed_mbps: Option<f64>,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl SpeedResult {
    /// A measurement of `bytes` transferred in `duration_ms`.
    pub fn measured(bytes: u64, duration_ms: u64) -> Self {
        Self {
            speed_mbps: Some(compute_speed_mbps(bytes, duration_ms)),
            latency_ms: Some(duration_ms),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            speed_mbps: None,
            latency_ms: None,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}

/// Megabits (2^20 bits) per second, rounded to two decimals. A zero duration
/// is clamped to 1 ms.
pub fn compute_speed_mbps(bytes: u64, duration_ms: u64) -> f64 {
    let duration_secs = duration_ms.max(1) as f64 / 1000.0;
    let mbps = (bytes as f64 * 8.0) / (1024.0 * 1024.0) / duration_secs;
    (mbps * 100.0).round() / 100.0
}

/// The two network measurements the diagnostics are built from.
///
/// Implementations never fail: transport errors and timeouts are reported
/// inside the returned result.
pub trait NetworkProbe: Send + Sync {
    fn test_connectivity(&self) -> BoxFuture<'_, ConnectivityResult>;

    /// Single-sample throughput estimate. Not statistically stable.
    fn measure_speed(&self) -> BoxFuture<'_, SpeedResult>;
}

pub struct HttpProbe {
    client: reqwest::Client,
    connectivity_url: String,
    speed_url: String,
    payload_bytes: u64,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(client: reqwest::Client, config: &BotConfig) -> Self {
        Self {
            client,
            connectivity_url: config.connectivity_url.clone(),
            speed_url: config.speed_url.clone(),
            payload_bytes: config.speed_payload_bytes,
            timeout: config.probe_timeout,
        }
    }

    /// The throughput URL with a fresh cache-busting query parameter.
    pub fn speed_url_with_nonce(&self) -> Result<Url, BotError> {
        let mut url = Url::parse(&self.speed_url)?;
        url.query_pairs_mut()
            .append_pair(SPEED_NONCE_PARAM, &uuid::Uuid::new_v4().simple().to_string());
        Ok(url)
    }

    async fn connectivity(&self) -> ConnectivityResult {
        let start = Instant::now();
        let request = self
            .client
            .get(&self.connectivity_url)
            .header(CACHE_CONTROL, "no-cache")
            .send();

        // Any response counts, whatever its status: the body is never read.
        match timeout(self.timeout, request).await {
            Ok(Ok(resp)) => {
                let latency_ms = start.elapsed().as_millis() as u64;
                debug!(
                    "Connectivity check answered {} in {} ms",
                    resp.status(),
                    latency_ms
                );
                ConnectivityResult::connected(latency_ms)
            }
            Ok(Err(e)) => {
                warn!("Connectivity test failed: {}", e);
                ConnectivityResult::failed(BotError::from(e).to_string())
            }
            Err(_) => {
                let e = BotError::Timeout(format!(
                    "connectivity check exceeded {:?}",
                    self.timeout
                ));
                warn!("Connectivity test failed: {}", e);
                ConnectivityResult::failed(e.to_string())
            }
        }
    }

    async fn speed(&self) -> SpeedResult {
        match self.download().await {
            Ok(duration_ms) => {
                let result = SpeedResult::measured(self.payload_bytes, duration_ms);
                debug!(
                    "Downloaded {} bytes in {} ms ({:?} Mbps)",
                    self.payload_bytes, duration_ms, result.speed_mbps
                );
                result
            }
            Err(e) => {
                warn!("Speed test failed: {}", e);
                SpeedResult::failed(e.to_string())
            }
        }
    }

    /// Fetch the full payload and return the elapsed milliseconds.
    async fn download(&self) -> Result<u64, BotError> {
        let url = self.speed_url_with_nonce()?;
        let start = Instant::now();

        let fetch = async {
            let resp = self.client.get(url).send().await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(BotError::Status {
                    status: status.as_u16(),
                    body: String::new(),
                });
            }
            let body: Bytes = resp.bytes().await?;
            Ok::<Bytes, BotError>(body)
        };

        let body = timeout(self.timeout, fetch)
            .await
            .map_err(|_| BotError::Timeout(format!("speed test exceeded {:?}", self.timeout)))??;
        let duration_ms = start.elapsed().as_millis() as u64;

        if body.len() as u64 != self.payload_bytes {
            debug!(
                "Speed payload was {} bytes, expected {}",
                body.len(),
                self.payload_bytes
            );
        }
        Ok(duration_ms)
    }
}

impl NetworkProbe for HttpProbe {
    fn test_connectivity(&self) -> BoxFuture<'_, ConnectivityResult> {
        Box::pin(self.connectivity())
    }

    fn measure_speed(&self) -> BoxFuture<'_, SpeedResult> {
        Box::pin(self.speed())
    }
}
