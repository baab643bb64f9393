use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use sysinfo::System;
use tracing::debug;

const SYS_CLASS_NET: &str = "/sys/class/net";

/// Link metadata as reported by the platform, when it reports any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub effective_type: Option<String>,
    pub downlink_mbps: Option<f64>,
    pub rtt_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LinkInfo {
    Supported {
        effective_type: Option<String>,
        downlink_mbps: Option<f64>,
        rtt_ms: Option<f64>,
    },
    Unsupported,
}

impl LinkInfo {
    pub fn of_type(effective_type: impl Into<String>) -> Self {
        LinkInfo::Supported {
            effective_type: Some(effective_type.into()),
            downlink_mbps: None,
            rtt_ms: None,
        }
    }

    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        match self {
            LinkInfo::Supported {
                effective_type,
                downlink_mbps,
                rtt_ms,
            } => Some(ConnectionInfo {
                effective_type: effective_type.clone(),
                downlink_mbps: *downlink_mbps,
                rtt_ms: *rtt_ms,
            }),
            LinkInfo::Unsupported => None,
        }
    }
}

/// Platform capability queried by the diagnostics: link quality, if available,
/// and a platform identification string used to classify the device.
pub trait LinkInfoSource: Send + Sync {
    fn link_info(&self) -> LinkInfo;
    fn platform_id(&self) -> String;
}

/// `wifibot/<version> (<os name>; <os version>; <arch>)`
pub fn platform_id() -> String {
    let os = System::name().unwrap_or_else(|| std::env::consts::OS.to_string());
    let version = System::long_os_version().unwrap_or_default();
    format!(
        "wifibot/{} ({}; {}; {})",
        env!("CARGO_PKG_VERSION"),
        os,
        version,
        std::env::consts::ARCH
    )
}

/// Reads link metadata from sysfs. Reports `Unsupported` off Linux or when
/// no interface other than loopback is up.
pub struct SystemLinkInfo {
    root: PathBuf,
}

impl SystemLinkInfo {
    pub fn new() -> Self {
        Self::with_root(SYS_CLASS_NET)
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for SystemLinkInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkInfoSource for SystemLinkInfo {
    fn link_info(&self) -> LinkInfo {
        if !cfg!(target_os = "linux") {
            return LinkInfo::Unsupported;
        }
        read_sysfs_link(&self.root).unwrap_or(LinkInfo::Unsupported)
    }

    fn platform_id(&self) -> String {
        platform_id()
    }
}

/// First non-loopback interface (by name) whose operstate is `up`.
fn read_sysfs_link(root: &Path) -> Option<LinkInfo> {
    let mut names: Vec<String> = std::fs::read_dir(root)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name != "lo")
        .collect();
    names.sort();

    for name in names {
        let dir = root.join(&name);
        let state = std::fs::read_to_string(dir.join("operstate")).unwrap_or_default();
        if state.trim() != "up" {
            continue;
        }

        let effective_type = if dir.join("wireless").exists() {
            "wifi"
        } else {
            "ethernet"
        };
        // Wireless drivers commonly report -1 or nothing here.
        let downlink_mbps = std::fs::read_to_string(dir.join("speed"))
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|speed| *speed > 0.0);

        debug!(
            "Link {} is up: type={}, downlink={:?}",
            name, effective_type, downlink_mbps
        );
        return Some(LinkInfo::Supported {
            effective_type: Some(effective_type.to_string()),
            downlink_mbps,
            rtt_ms: None,
        });
    }
    None
}

/// Fixed link metadata, for `--link-type` and tests.
pub struct StaticLinkInfo {
    link: LinkInfo,
    platform: String,
}

impl StaticLinkInfo {
    pub fn new(link: LinkInfo, platform: impl Into<String>) -> Self {
        Self {
            link,
            platform: platform.into(),
        }
    }
}

impl LinkInfoSource for StaticLinkInfo {
    fn link_info(&self) -> LinkInfo {
        self.link.clone()
    }

    fn platform_id(&self) -> String {
        self.platform.clone()
    }
}
