//! Configuration for the Roomcast signaling server
//!
//! Compiled defaults, overridden by an optional TOML file, overridden by
//! command line flags and environment variables (see `main.rs`).

use roomcast_core::SessionConfig;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

/// Main configuration for the signaling server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listener configuration
    #[serde(default)]
    pub server: ListenConfig,

    /// TLS material
    #[serde(default)]
    pub tls: TlsConfig,

    /// Media engine and router settings
    #[serde(default)]
    pub media: SessionConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    /// Address to bind to
    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,

    /// HTTPS port
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,

    /// Path of the signaling WebSocket
    #[serde(default = "default_ws_path")]
    pub ws_path: String,

    /// Directory served for every other path
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,

    /// Per-participant outbox bound
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
}

fn default_listen_ip() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    3000
}

fn default_ws_path() -> String {
    "/server".to_string()
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("./public")
}

fn default_outbox_capacity() -> usize {
    256
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            listen_ip: default_listen_ip(),
            listen_port: default_listen_port(),
            ws_path: default_ws_path(),
            static_dir: default_static_dir(),
            outbox_capacity: default_outbox_capacity(),
        }
    }
}

/// PEM certificate and key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default = "default_tls_cert")]
    pub cert: PathBuf,

    #[serde(default = "default_tls_key")]
    pub key: PathBuf,
}

fn default_tls_cert() -> PathBuf {
    PathBuf::from("./certs/fullchain.pem")
}

fn default_tls_key() -> PathBuf {
    PathBuf::from("./certs/privkey.pem")
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            cert: default_tls_cert(),
            key: default_tls_key(),
        }
    }
}

impl TlsConfig {
    /// Paths that do not exist on disk
    pub fn missing_files(&self) -> Vec<&Path> {
        [self.cert.as_path(), self.key.as_path()]
            .into_iter()
            .filter(|p| !p.is_file())
            .collect()
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.as_ref().display(), e)))?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from `path` when given, otherwise compiled defaults
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => Self::from_file(p),
            None => Ok(Self::default()),
        }
    }

    /// Socket address the HTTPS listener binds to
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.server.listen_ip.parse().map_err(|_| {
            ConfigError::Invalid(format!("listen_ip {:?} is not an IP address", self.server.listen_ip))
        })?;
        Ok(SocketAddr::new(ip, self.server.listen_port))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;
        if !self.server.ws_path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "ws_path {:?} must start with '/'",
                self.server.ws_path
            )));
        }
        if self.server.outbox_capacity == 0 {
            return Err(ConfigError::Invalid("outbox_capacity must be > 0".into()));
        }
        self.media
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
