//! Client configuration.

use std::time::Duration;

use switchboard_core::ConnectionConfig;

use crate::api::DEFAULT_REQUEST_TIMEOUT;

/// Default REST base URL.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8080/api";

/// Default live stream URL.
pub const DEFAULT_STREAM_URL: &str = "ws://127.0.0.1:8080/ws";

/// Endpoints and timing for one engine instance.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// REST base URL
    pub api_url: String,
    /// Live stream URL
    pub stream_url: String,
    /// Timeout applied to every REST call
    pub request_timeout: Duration,
    /// Live connection timing
    pub connection: ConnectionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_owned(),
            stream_url: DEFAULT_STREAM_URL.to_owned(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            connection: ConnectionConfig::default(),
        }
    }
}
