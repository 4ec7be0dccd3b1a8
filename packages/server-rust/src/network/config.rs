//! Network configuration types for the gateway HTTP surface.

use std::time::Duration;

/// Top-level network configuration for the server.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Allowed CORS origins.
    pub cors_origins: Vec<String>,
    /// Maximum time to wait for a request to complete.
    ///
    /// Kept above the synchronous result timeout so the registry's own
    /// deadline fires first and the caller sees a gateway timeout.
    pub request_timeout: Duration,
    /// Cap on invocation request bodies. `None` reads bodies of any size.
    pub max_body_bytes: Option<usize>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(330),
            max_body_bytes: None,
        }
    }
}

impl NetworkConfig {
    /// `host:port` suitable for `TcpListener::bind`.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
