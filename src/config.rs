//! # Configuration
//!
//! Explicit, defaulted config structs rather than process-wide globals,
//! in the style of the teacher's `defaults` module.

use std::time::Duration;

/// Named default values, mirroring the teacher's `defaults` module.
pub mod defaults {
    use std::time::Duration;

    pub const URL: &str = "tcp://127.0.0.1:12321";

    /// MessagePack is the preferred default for size.
    pub const CODEC: &str = "msgpack";

    pub const RETRY_COUNT: u32 = 3;
    pub const RETRY_INTERVAL: Duration = Duration::from_millis(500);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Tracebacks are off by default.
    pub const TRACEBACK_ENABLED: bool = false;
}

/// Server-side configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub url: String,
    /// Codecs the server accepts, in preference order; the first one also
    /// offered by a connecting client during `HELLO`/`WELCOME` wins.
    pub supported_codecs: Vec<String>,
    /// Gates whether `ERROR.traceback` is ever populated.
    pub traceback_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            url: defaults::URL.to_string(),
            supported_codecs: vec![defaults::CODEC.to_string(), "json".to_string()],
            traceback_enabled: defaults::TRACEBACK_ENABLED,
        }
    }
}

impl ServerConfig {
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

/// Client-side configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub url: String,
    /// Codecs offered during `HELLO`, in preference order.
    pub offered_codecs: Vec<String>,
    /// Number of connection-establishment attempts beyond the first —
    /// only connecting is retried, never a sent `CALL`.
    pub retry_count: u32,
    pub retry_interval: Duration,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            url: defaults::URL.to_string(),
            offered_codecs: vec![defaults::CODEC.to_string(), "json".to_string()],
            retry_count: defaults::RETRY_COUNT,
            retry_interval: defaults::RETRY_INTERVAL,
            connect_timeout: defaults::CONNECT_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}
