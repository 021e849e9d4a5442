use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreamConfig {
    /// Route of the subscription endpoint
    #[serde(default = "default_stream_path")]
    pub path: String,
    /// Seconds between `HEARTBEAT` envelopes on an idle stream.
    ///
    /// **Hot-reload safe:** yes, for streams opened after the reload.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Frames a sink may queue before it is treated as stalled and pruned
    #[serde(default = "default_sink_buffer")]
    pub sink_buffer: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub stream: StreamConfig,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

impl ServerConfig {
    /// Full bind address, e.g. `"0.0.0.0:1337"`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl StreamConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    /// Proxies commonly drop connections idle for 30-60s.
    pub fn heartbeat_in_recommended_range(&self) -> bool {
        (15..=30).contains(&self.heartbeat_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            path: default_stream_path(),
            heartbeat_secs: default_heartbeat_secs(),
            sink_buffer: default_sink_buffer(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Serde defaults
// ---------------------------------------------------------------------------

pub fn default_bind() -> String {
    "127.0.0.1".to_string()
}

pub fn default_port() -> u16 {
    1337
}

pub fn default_max_connections() -> usize {
    1000
}

pub fn default_stream_path() -> String {
    "/api/events".to_string()
}

pub fn default_heartbeat_secs() -> u64 {
    25
}

pub fn default_sink_buffer() -> usize {
    64
}
