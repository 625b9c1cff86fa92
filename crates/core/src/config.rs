//! Configuration types for the session coordinator and media engine

use serde::{Deserialize, Serialize};

use crate::capabilities::{default_media_codecs, RtpCodecCapability};

/// Media configuration (`[media]` in the server TOML)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Media engine worker settings
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Relay codec set
    #[serde(default)]
    pub router: RouterConfig,

    /// Per-transport settings
    #[serde(default)]
    pub webrtc_transport: WebRtcTransportConfig,
}

/// Media engine worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Lowest RTC port handed to transports (default: 10000)
    #[serde(default = "default_rtc_min_port")]
    pub rtc_min_port: u16,

    /// Highest RTC port handed to transports, inclusive (default: 10100)
    #[serde(default = "default_rtc_max_port")]
    pub rtc_max_port: u16,

    /// Engine log level (default: warn)
    #[serde(default = "default_worker_log_level")]
    pub log_level: String,

    /// Engine log tags
    #[serde(default = "default_worker_log_tags")]
    pub log_tags: Vec<String>,
}

/// Relay codec set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_media_codecs")]
    pub media_codecs: Vec<RtpCodecCapability>,
}

/// Listen address for transports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenIp {
    pub ip: String,

    /// Public address advertised in ICE candidates (NAT / cloud hosts)
    #[serde(default, alias = "announced_ip", skip_serializing_if = "Option::is_none")]
    pub announced_ip: Option<String>,
}

/// Per-transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebRtcTransportConfig {
    #[serde(default = "default_listen_ips")]
    pub listen_ips: Vec<ListenIp>,

    #[serde(default = "default_true")]
    pub enable_udp: bool,

    #[serde(default = "default_true")]
    pub enable_tcp: bool,

    #[serde(default = "default_true")]
    pub prefer_udp: bool,

    /// Initial outgoing bitrate estimate in bps (default: 1000000)
    #[serde(default = "default_initial_outgoing_bitrate")]
    pub initial_available_outgoing_bitrate: u32,

    /// Cap applied to every new transport, in bps (default: 1500000)
    #[serde(default = "default_max_incoming_bitrate")]
    pub max_incoming_bitrate: Option<u32>,

    /// Simulated DTLS handshake latency for the loopback engine (default: 0)
    #[serde(default)]
    pub handshake_latency_ms: u64,
}

fn default_rtc_min_port() -> u16 {
    10000
}

fn default_rtc_max_port() -> u16 {
    10100
}

fn default_worker_log_level() -> String {
    "warn".to_string()
}

fn default_worker_log_tags() -> Vec<String> {
    ["info", "ice", "dtls", "rtp", "srtp", "rtcp"]
        .iter()
        .map(|t| t.to_string())
        .collect()
}

fn default_listen_ips() -> Vec<ListenIp> {
    vec![ListenIp {
        ip: "0.0.0.0".to_string(),
        announced_ip: None,
    }]
}

fn default_true() -> bool {
    true
}

fn default_initial_outgoing_bitrate() -> u32 {
    1_000_000
}

fn default_max_incoming_bitrate() -> Option<u32> {
    Some(1_500_000)
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            rtc_min_port: default_rtc_min_port(),
            rtc_max_port: default_rtc_max_port(),
            log_level: default_worker_log_level(),
            log_tags: default_worker_log_tags(),
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            media_codecs: default_media_codecs(),
        }
    }
}

impl Default for WebRtcTransportConfig {
    fn default() -> Self {
        Self {
            listen_ips: default_listen_ips(),
            enable_udp: true,
            enable_tcp: true,
            prefer_udp: true,
            initial_available_outgoing_bitrate: default_initial_outgoing_bitrate(),
            max_incoming_bitrate: default_max_incoming_bitrate(),
            handshake_latency_ms: 0,
        }
    }
}

impl SessionConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `router.media_codecs` is empty
    /// - the RTC port range is empty or inverted
    /// - `webrtc_transport.listen_ips` is empty
    /// - both UDP and TCP are disabled
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.router.media_codecs.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one media codec is required".to_string(),
            ));
        }

        if self.worker.rtc_min_port == 0 || self.worker.rtc_min_port > self.worker.rtc_max_port {
            return Err(Error::InvalidConfig(format!(
                "invalid RTC port range {}-{}",
                self.worker.rtc_min_port, self.worker.rtc_max_port
            )));
        }

        if self.webrtc_transport.listen_ips.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one listen IP is required".to_string(),
            ));
        }

        if !self.webrtc_transport.enable_udp && !self.webrtc_transport.enable_tcp {
            return Err(Error::InvalidConfig(
                "enable_udp and enable_tcp cannot both be false".to_string(),
            ));
        }

        Ok(())
    }

    /// Number of transports the port range can hold
    pub fn port_capacity(&self) -> usize {
        (self.worker.rtc_max_port as usize + 1).saturating_sub(self.worker.rtc_min_port as usize)
    }
}
