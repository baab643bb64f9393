use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use tracing::{debug, info};

use crate::link_info::{ConnectionInfo, LinkInfoSource};
use crate::probe::{ConnectivityResult, NetworkProbe, SpeedResult};

static MOBILE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Mobi|Android").unwrap());

const UNKNOWN: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Desktop,
    Unknown,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Mobile => "mobile",
            DeviceType::Desktop => "desktop",
            DeviceType::Unknown => UNKNOWN,
        }
    }
}

pub fn classify_device(platform_id: &str) -> DeviceType {
    if MOBILE_PATTERN.is_match(platform_id) {
        DeviceType::Mobile
    } else {
        DeviceType::Desktop
    }
}

/// Whatever the probes and the platform produced. Any part may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDiagnostics {
    #[serde(default)]
    pub connectivity: Option<ConnectivityResult>,
    #[serde(default)]
    pub speed: Option<SpeedResult>,
    #[serde(default)]
    pub connection_info: Option<ConnectionInfo>,
    #[serde(default)]
    pub device_type: Option<DeviceType>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportConnectivity {
    pub connected: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSpeed {
    pub speed_mbps: f64,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportConnectionInfo {
    pub effective_type: String,
    pub downlink_mbps: Option<f64>,
    pub rtt_ms: Option<f64>,
}

/// The normalized report attached to the first backend call. Every field is
/// always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticReport {
    pub connectivity: ReportConnectivity,
    pub speed: ReportSpeed,
    pub connection_info: ReportConnectionInfo,
    pub device_type: DeviceType,
    pub test_timestamp: DateTime<Utc>,
}

impl DiagnosticReport {
    pub fn summary(&self) -> String {
        let connectivity = if self.connectivity.connected {
            "working"
        } else {
            "issues detected"
        };
        let latency = self
            .connectivity
            .latency_ms
            .map(|ms| format!("{} ms", ms))
            .unwrap_or_else(|| UNKNOWN.to_string());
        format!(
            "Test results:\n\
             - Speed: {} Mbps\n\
             - Latency: {}\n\
             - Connection type: {}\n\
             - Connectivity: {}\n\
             - Device: {}",
            self.speed.speed_mbps,
            latency,
            self.connection_info.effective_type,
            connectivity,
            self.device_type.as_str(),
        )
    }
}

/// Normalize raw diagnostics into a complete report. Missing or null parts
/// fall back to `connected=false`, speed and latency `0`, effective type and
/// device type `"unknown"`; everything present passes through.
pub fn format_auto_test_results(raw: &RawDiagnostics) -> DiagnosticReport {
    let connectivity = match &raw.connectivity {
        Some(c) => ReportConnectivity {
            connected: c.connected,
            latency_ms: c.latency_ms,
            error: c.error.clone(),
            timestamp: Some(c.timestamp),
        },
        None => ReportConnectivity {
            connected: false,
            latency_ms: None,
            error: None,
            timestamp: None,
        },
    };

    let speed = match &raw.speed {
        Some(s) => ReportSpeed {
            speed_mbps: s.speed_mbps.unwrap_or(0.0),
            latency_ms: s.latency_ms.unwrap_or(0),
            error: s.error.clone(),
            timestamp: Some(s.timestamp),
        },
        None => ReportSpeed {
            speed_mbps: 0.0,
            latency_ms: 0,
            error: None,
            timestamp: None,
        },
    };

    let connection_info = match &raw.connection_info {
        Some(info) => ReportConnectionInfo {
            effective_type: info
                .effective_type
                .clone()
                .unwrap_or_else(|| UNKNOWN.to_string()),
            downlink_mbps: info.downlink_mbps,
            rtt_ms: info.rtt_ms,
        },
        None => ReportConnectionInfo {
            effective_type: UNKNOWN.to_string(),
            downlink_mbps: None,
            rtt_ms: None,
        },
    };

    DiagnosticReport {
        connectivity,
        speed,
        connection_info,
        device_type: raw.device_type.unwrap_or(DeviceType::Unknown),
        test_timestamp: Utc::now(),
    }
}

pub struct DiagnosticAggregator {
    probe: Arc<dyn NetworkProbe>,
    link: Arc<dyn LinkInfoSource>,
}

impl DiagnosticAggregator {
    pub fn new(probe: Arc<dyn NetworkProbe>, link: Arc<dyn LinkInfoSource>) -> Self {
        Self { probe, link }
    }

    /// Connectivity first; throughput only if connected; then link metadata
    /// and device class.
    pub async fn gather_automatic_data(&self) -> RawDiagnostics {
        info!("Starting automatic network tests");
        let mut data = RawDiagnostics::default();

        let connectivity = self.probe.test_connectivity().await;
        debug!("Connectivity result: {:?}", connectivity);
        let connected = connectivity.connected;
        data.connectivity = Some(connectivity);

        if connected {
            let speed = self.probe.measure_speed().await;
            debug!("Speed result: {:?}", speed);
            data.speed = Some(speed);
        } else {
            info!("Skipping speed test, no connectivity");
        }

        data.connection_info = self.link.link_info().connection_info();
        debug!("Connection info: {:?}", data.connection_info);

        data.device_type = Some(classify_device(&self.link.platform_id()));
        info!(
            "Automatic tests finished: connected={}, device={:?}",
            connected, data.device_type
        );
        data
    }

    pub async fn run(&self) -> DiagnosticReport {
        let raw = self.gather_automatic_data().await;
        format_auto_test_results(&raw)
    }
}
