use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::error::BotError;
use crate::settings::PersistentSettings;

/// WiFi Helper — checks your connection and walks you through troubleshooting.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "wifibot")]
pub struct CliArgs {
    /// Base URL of the troubleshooting backend
    #[arg(short = 'b', long = "backend-url")]
    pub backend_url: Option<String>,

    /// Timeout for each connectivity/speed probe
    #[arg(long = "probe-timeout-secs")]
    pub probe_timeout_secs: Option<u64>,

    /// Timeout for each backend chat call
    #[arg(long = "backend-timeout-secs")]
    pub backend_timeout_secs: Option<u64>,

    /// Resource used for the connectivity/latency check
    #[arg(long = "connectivity-url")]
    pub connectivity_url: Option<String>,

    /// Fixed-size payload used for the throughput measurement
    #[arg(long = "speed-url")]
    pub speed_url: Option<String>,

    /// Size in bytes of the payload served by --speed-url
    #[arg(long = "speed-payload-bytes")]
    pub speed_payload_bytes: Option<u64>,

    /// Report this link type instead of reading it from the system (e.g. "wifi", "4g")
    #[arg(long = "link-type")]
    pub link_type: Option<String>,

    /// Run the diagnostics once, print the report as JSON and exit
    #[arg(short = 'd', long = "diagnose")]
    pub diagnose: bool,

    /// Write logs to this file instead of stderr
    #[arg(short = 'l', long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Settings file (defaults to the user config directory)
    #[arg(long = "settings-file")]
    pub settings_file: Option<PathBuf>,

    /// Persist the effective backend URL and timeouts to the settings file
    #[arg(long = "save-settings")]
    pub save_settings: bool,
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub backend_url: String,
    pub connectivity_url: String,
    pub speed_url: String,
    pub speed_payload_bytes: u64,
    pub probe_timeout: Duration,
    pub backend_timeout: Duration,
    pub link_type: Option<String>,
    pub diagnose_only: bool,
    pub log_file: Option<PathBuf>,
    pub settings_path: PathBuf,
    pub save_settings: bool,
}

// Backend
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";
pub const CHAT_PATH: &str = "/api/v1/chat";
pub const HEALTH_PATH: &str = "/health";
pub const BACKEND_TIMEOUT_SECS: u64 = 30;
pub const HEALTH_TIMEOUT_SECS: u64 = 3;

// Probe endpoints
pub const CONNECTIVITY_URL: &str = "https://httpbin.org/get";
pub const SPEED_TEST_URL: &str = "https://httpbin.org/bytes/50000";
pub const SPEED_PAYLOAD_BYTES: u64 = 50_000;
pub const SPEED_NONCE_PARAM: &str = "nocache";
pub const PROBE_TIMEOUT_SECS: u64 = 10;

// Conversation
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

impl BotConfig {
    /// CLI flags win over the settings file, which wins over the built-in defaults.
    pub fn from_args(args: CliArgs, settings: &PersistentSettings, settings_path: PathBuf) -> Self {
        let backend_url = args
            .backend_url
            .or_else(|| settings.backend_url.clone())
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string());
        let probe_timeout_secs = args
            .probe_timeout_secs
            .or(settings.probe_timeout_secs)
            .unwrap_or(PROBE_TIMEOUT_SECS);
        let backend_timeout_secs = args
            .backend_timeout_secs
            .or(settings.backend_timeout_secs)
            .unwrap_or(BACKEND_TIMEOUT_SECS);

        BotConfig {
            backend_url,
            connectivity_url: args
                .connectivity_url
                .unwrap_or_else(|| CONNECTIVITY_URL.to_string()),
            speed_url: args
                .speed_url
                .unwrap_or_else(|| SPEED_TEST_URL.to_string()),
            speed_payload_bytes: args.speed_payload_bytes.unwrap_or(SPEED_PAYLOAD_BYTES),
            probe_timeout: Duration::from_secs(probe_timeout_secs),
            backend_timeout: Duration::from_secs(backend_timeout_secs),
            link_type: args.link_type,
            diagnose_only: args.diagnose,
            log_file: args.log_file,
            settings_path,
            save_settings: args.save_settings,
        }
    }

    /// Reject URLs that cannot be parsed and a zero payload size, before any
    /// network traffic happens.
    pub fn validate(&self) -> Result<(), BotError> {
        for (name, value) in [
            ("backend URL", &self.backend_url),
            ("connectivity URL", &self.connectivity_url),
            ("speed URL", &self.speed_url),
        ] {
            Url::parse(value).map_err(|e| BotError::Config(format!("{} {:?}: {}", name, value, e)))?;
        }
        if self.speed_payload_bytes == 0 {
            return Err(BotError::Config("speed payload size must be positive".to_string()));
        }
        Ok(())
    }

    pub fn chat_url(&self) -> String {
        format!("{}{}", self.backend_url.trim_end_matches('/'), CHAT_PATH)
    }

    pub fn health_url(&self) -> String {
        format!("{}{}", self.backend_url.trim_end_matches('/'), HEALTH_PATH)
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        BotConfig::from_args(
            CliArgs::default(),
            &PersistentSettings::default(),
            crate::settings::default_settings_path(),
        )
    }
}
