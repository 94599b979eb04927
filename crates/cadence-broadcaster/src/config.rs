//! Configuration loading and typed config structures for a broadcaster node.
//!
//! Configuration lives in `cadence.yaml`; every operationally interesting
//! knob can also be set through the environment, which wins over the file.
//! All durations are integer milliseconds or seconds as named.

use std::path::Path;

use serde::Deserialize;

use crate::latency::LatencyThresholds;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level broadcaster configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct BroadcasterConfig {
    /// Network binding and advertised endpoints.
    #[serde(default)]
    pub server: ServerConfig,

    /// Session creation and tick-loop settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Latency thresholds and sweeper cadence.
    #[serde(default)]
    pub latency: LatencyConfig,

    /// Storage backend selection.
    #[serde(default)]
    pub store: StoreConfig,
}

impl BroadcasterConfig {
    /// Load configuration from a YAML file, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Self = serde_yml::from_str(&contents)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a YAML string, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Defaults plus environment overrides, for nodes run without a file.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply recognized environment variables over the current values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("HOST") {
            self.server.host = val;
        }
        if let Some(val) = env_parse::<u16>("PORT") {
            self.server.port = val;
        }
        if let Ok(val) = std::env::var("REGION") {
            self.server.region = val;
        }
        if let Some(val) = env_parse::<i64>("DEFAULT_TICK_MS") {
            self.session.default_tick_ms = val;
        }
        if let Some(val) = env_parse::<i64>("COUNTDOWN_MS") {
            self.session.countdown_ms = val;
        }
        if let Some(val) = env_parse::<i64>("SESSION_TTL_SECONDS") {
            self.session.session_ttl_seconds = val;
        }
        if let Some(val) = env_parse::<i64>("CONNECTION_TTL_SECONDS") {
            self.session.connection_ttl_seconds = val;
        }
        if let Some(val) = env_parse::<u64>("MAX_LATENCY_MS") {
            self.latency.max_latency_ms = val;
        }
        if let Some(val) = env_parse::<u64>("MAX_JITTER_MS") {
            self.latency.max_jitter_ms = val;
        }
        if let Some(val) = env_parse::<u64>("WARNING_LATENCY_MS") {
            self.latency.warning_latency_ms = val;
        }
        if let Some(val) = env_parse::<u64>("WARNING_JITTER_MS") {
            self.latency.warning_jitter_ms = val;
        }
        if let Some(val) = env_parse::<usize>("LATENCY_SAMPLES") {
            self.latency.sample_count = val;
        }
        if let Ok(val) = std::env::var("STORE_BACKEND") {
            self.store.backend = val;
        }
        if let Ok(val) = std::env::var("REDIS_URL") {
            self.store.redis_url = val;
        }
    }
}

/// Parse an environment variable, ignoring unset or malformed values.
fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

/// Network binding and advertised endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    /// The host address to bind to (e.g. `0.0.0.0`).
    #[serde(default = "default_host")]
    pub host: String,

    /// The TCP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Region identifier stamped onto created sessions.
    #[serde(default = "default_region")]
    pub region: String,

    /// Advertised WebSocket endpoint. Derived from host/port when unset,
    /// which is only right behind no proxy.
    #[serde(default)]
    pub public_ws_endpoint: Option<String>,

    /// Advertised HTTP endpoint. Derived from host/port when unset.
    #[serde(default)]
    pub public_http_endpoint: Option<String>,
}

impl ServerConfig {
    /// The bind address, `host:port`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The WebSocket endpoint advertised to clients.
    pub fn ws_endpoint(&self) -> String {
        self.public_ws_endpoint
            .clone()
            .unwrap_or_else(|| format!("ws://{}:{}/ws", self.host, self.port))
    }

    /// The HTTP endpoint advertised to clients.
    pub fn http_endpoint(&self) -> String {
        self.public_http_endpoint
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.host, self.port))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            region: default_region(),
            public_ws_endpoint: None,
            public_http_endpoint: None,
        }
    }
}

/// Session creation and tick-loop configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SessionConfig {
    /// Tick period used when a create request does not specify one.
    #[serde(default = "default_tick_ms")]
    pub default_tick_ms: i64,

    /// Countdown between session creation and the start instant.
    #[serde(default = "default_countdown_ms")]
    pub countdown_ms: i64,

    /// Session row TTL.
    #[serde(default = "default_session_ttl_seconds")]
    pub session_ttl_seconds: i64,

    /// Connection row TTL.
    #[serde(default = "default_connection_ttl_seconds")]
    pub connection_ttl_seconds: i64,

    /// How often the tick loop refreshes its session cache.
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    /// How long the tick loop sleeps when no session is active.
    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_tick_ms: default_tick_ms(),
            countdown_ms: default_countdown_ms(),
            session_ttl_seconds: default_session_ttl_seconds(),
            connection_ttl_seconds: default_connection_ttl_seconds(),
            refresh_interval_ms: default_refresh_interval_ms(),
            idle_poll_ms: default_idle_poll_ms(),
        }
    }
}

/// Latency thresholds and enforcement cadence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LatencyConfig {
    /// Hard bound on average latency; breaching it kicks the connection.
    #[serde(default = "default_max_latency_ms")]
    pub max_latency_ms: u64,

    /// Hard bound on jitter.
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,

    /// Soft bound on average latency; breaching it warns the client.
    #[serde(default = "default_warning_latency_ms")]
    pub warning_latency_ms: u64,

    /// Soft bound on jitter.
    #[serde(default = "default_warning_jitter_ms")]
    pub warning_jitter_ms: u64,

    /// Samples required before any classification.
    #[serde(default = "default_sample_count")]
    pub sample_count: usize,

    /// Cadence of the latency sweep loop.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// A connection with no ping activity for this long is evicted.
    #[serde(default = "default_stale_after_seconds")]
    pub stale_after_seconds: i64,
}

impl LatencyConfig {
    /// The classification thresholds derived from this configuration.
    pub const fn thresholds(&self) -> LatencyThresholds {
        LatencyThresholds {
            max_latency_ms: self.max_latency_ms,
            max_jitter_ms: self.max_jitter_ms,
            warning_latency_ms: self.warning_latency_ms,
            warning_jitter_ms: self.warning_jitter_ms,
            sample_count: self.sample_count,
        }
    }
}

impl Default for LatencyConfig {
    fn default() -> Self {
        Self {
            max_latency_ms: default_max_latency_ms(),
            max_jitter_ms: default_max_jitter_ms(),
            warning_latency_ms: default_warning_latency_ms(),
            warning_jitter_ms: default_warning_jitter_ms(),
            sample_count: default_sample_count(),
            sweep_interval_ms: default_sweep_interval_ms(),
            stale_after_seconds: default_stale_after_seconds(),
        }
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// `memory` or `redis`.
    #[serde(default = "default_store_backend")]
    pub backend: String,

    /// Redis URL, used when `backend` is `redis`.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Per-operation deadline for store calls.
    #[serde(default = "default_op_deadline_seconds")]
    pub op_deadline_seconds: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            redis_url: default_redis_url(),
            op_deadline_seconds: default_op_deadline_seconds(),
        }
    }
}

fn default_host() -> String {
    String::from("0.0.0.0")
}

const fn default_port() -> u16 {
    8080
}

fn default_region() -> String {
    String::from("local")
}

const fn default_tick_ms() -> i64 {
    100
}

const fn default_countdown_ms() -> i64 {
    3000
}

const fn default_session_ttl_seconds() -> i64 {
    86_400
}

const fn default_connection_ttl_seconds() -> i64 {
    3600
}

const fn default_refresh_interval_ms() -> u64 {
    5000
}

const fn default_idle_poll_ms() -> u64 {
    1000
}

const fn default_max_latency_ms() -> u64 {
    150
}

const fn default_max_jitter_ms() -> u64 {
    50
}

const fn default_warning_latency_ms() -> u64 {
    100
}

const fn default_warning_jitter_ms() -> u64 {
    30
}

const fn default_sample_count() -> usize {
    5
}

const fn default_sweep_interval_ms() -> u64 {
    1000
}

const fn default_stale_after_seconds() -> i64 {
    60
}

fn default_store_backend() -> String {
    String::from("memory")
}

fn default_redis_url() -> String {
    String::from("redis://127.0.0.1:6379")
}

const fn default_op_deadline_seconds() -> u64 {
    5
}
