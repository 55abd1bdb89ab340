//! HTTP-surface server configuration, separate from the per-worker
//! `WorkerConfig` enumerated in `refinery-traits::config`.

use serde::{Deserialize, Serialize};

/// Binding and storage options for the health/metrics HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Path to a redb file backing the hot cache. `None` uses an in-memory cache.
    #[serde(default)]
    pub cache_path: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cache_path: None,
        }
    }
}

impl ServerConfig {
    /// Builds configuration from defaults with environment variable overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("REFINERY_HOST") {
            config.host = host;
        }
        if let Ok(port) = std::env::var("REFINERY_PORT") {
            if let Ok(p) = port.parse::<u16>() {
                config.port = p;
            }
        }
        if let Ok(path) = std::env::var("REFINERY_CACHE_PATH") {
            config.cache_path = Some(path);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_bind_all_interfaces_on_8080() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert!(config.cache_path.is_none());
    }
}
