//! Transport configuration types.

#[cfg(feature = "http")]
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Transport configuration options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Standard input/output transport (default for MCP).
    #[default]
    Stdio,

    /// TCP socket transport with line-delimited JSON-RPC.
    #[cfg(feature = "tcp")]
    Tcp(TcpConfig),

    /// HTTP transport with JSON-RPC over POST.
    #[cfg(feature = "http")]
    Http(HttpConfig),
}

/// TCP transport configuration.
#[cfg(feature = "tcp")]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Port number to listen on.
    pub port: u16,

    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: String,
}

/// HTTP transport configuration.
#[cfg(feature = "http")]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Port number to listen on.
    pub port: u16,

    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Path for JSON-RPC endpoint.
    #[serde(default = "default_rpc_path")]
    pub rpc_path: String,

    /// Enable CORS for browser clients.
    #[serde(default = "default_cors")]
    pub enable_cors: bool,

    /// Sessions with no request for this long, and no call in flight, are
    /// disconnected and forgotten.
    #[serde(default = "default_session_idle_ttl_ms")]
    pub session_idle_ttl_ms: u64,

    /// Upper bound on live sessions; the least recently used one is evicted
    /// to make room.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

#[cfg(feature = "http")]
impl HttpConfig {
    pub fn session_idle_ttl(&self) -> Duration {
        Duration::from_millis(self.session_idle_ttl_ms)
    }
}

#[cfg(any(feature = "tcp", feature = "http"))]
fn default_host() -> String {
    "127.0.0.1".to_string()
}

#[cfg(feature = "http")]
fn default_rpc_path() -> String {
    "/mcp".to_string()
}

#[cfg(feature = "http")]
fn default_cors() -> bool {
    true
}

#[cfg(feature = "http")]
fn default_session_idle_ttl_ms() -> u64 {
    30 * 60 * 1000
}

#[cfg(feature = "http")]
fn default_max_sessions() -> usize {
    1024
}

#[cfg(feature = "tcp")]
impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            host: default_host(),
        }
    }
}

#[cfg(feature = "http")]
impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: default_host(),
            rpc_path: default_rpc_path(),
            enable_cors: default_cors(),
            session_idle_ttl_ms: default_session_idle_ttl_ms(),
            max_sessions: default_max_sessions(),
        }
    }
}

#[cfg(any(feature = "tcp", feature = "http"))]
fn env_or<T>(var: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid {}={:?}, using {}", var, raw, default);
            default
        }),
        Err(_) => default,
    }
}

impl TransportConfig {
    /// Create a STDIO transport config.
    pub fn stdio() -> Self {
        Self::Stdio
    }

    /// Create a TCP transport config.
    #[cfg(feature = "tcp")]
    pub fn tcp(port: u16, host: impl Into<String>) -> Self {
        Self::Tcp(TcpConfig {
            port,
            host: host.into(),
        })
    }

    /// Create an HTTP transport config.
    #[cfg(feature = "http")]
    pub fn http(port: u16, host: impl Into<String>) -> Self {
        Self::Http(HttpConfig {
            port,
            host: host.into(),
            ..Default::default()
        })
    }

    /// Load transport config from environment variables.
    ///
    /// `MCP_TRANSPORT` selects `stdio`, `tcp` or `http`; unknown or
    /// disabled transports fall back to STDIO.
    pub fn from_env() -> Self {
        let transport = std::env::var("MCP_TRANSPORT")
            .unwrap_or_default()
            .trim()
            .to_lowercase();

        match transport.as_str() {
            #[cfg(feature = "tcp")]
            "tcp" => {
                let port = env_or("MCP_TCP_PORT", 3000);
                let host = std::env::var("MCP_TCP_HOST").unwrap_or_else(|_| default_host());
                Self::Tcp(TcpConfig { port, host })
            }
            #[cfg(feature = "http")]
            "http" => {
                let port = env_or("MCP_HTTP_PORT", 8080);
                let host = std::env::var("MCP_HTTP_HOST").unwrap_or_else(|_| default_host());
                let rpc_path =
                    std::env::var("MCP_HTTP_PATH").unwrap_or_else(|_| default_rpc_path());
                let enable_cors = std::env::var("MCP_HTTP_CORS")
                    .map(|v| v.to_lowercase() != "false" && v != "0")
                    .unwrap_or(true);
                Self::Http(HttpConfig {
                    port,
                    host,
                    rpc_path,
                    enable_cors,
                    session_idle_ttl_ms: env_or(
                        "MCP_HTTP_SESSION_TTL_MS",
                        default_session_idle_ttl_ms(),
                    ),
                    max_sessions: env_or("MCP_HTTP_MAX_SESSIONS", default_max_sessions()),
                })
            }
            "" | "stdio" => Self::Stdio,
            other => {
                warn!("Transport {:?} is unknown or not compiled in, using STDIO", other);
                Self::Stdio
            }
        }
    }

    /// Get a description of this transport for logging.
    pub fn description(&self) -> String {
        match self {
            Self::Stdio => "STDIO (standard MCP mode)".to_string(),
            #[cfg(feature = "tcp")]
            Self::Tcp(cfg) => format!("TCP on {}:{}", cfg.host, cfg.port),
            #[cfg(feature = "http")]
            Self::Http(cfg) => format!("HTTP on {}:{}{}", cfg.host, cfg.port, cfg.rpc_path),
        }
    }

    /// Check if this transport is the standard STDIO mode.
    pub fn is_stdio(&self) -> bool {
        matches!(self, Self::Stdio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_stdio() {
        let config = TransportConfig::default();
        assert!(config.is_stdio());
        assert_eq!(config.description(), "STDIO (standard MCP mode)");
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_http_defaults() {
        let config = TransportConfig::http(9000, "0.0.0.0");
        assert_eq!(config.description(), "HTTP on 0.0.0.0:9000/mcp");
        let TransportConfig::Http(http) = config else {
            panic!("expected an HTTP config");
        };
        assert_eq!(http.session_idle_ttl(), Duration::from_secs(30 * 60));
        assert_eq!(http.max_sessions, 1024);
    }

    #[cfg(feature = "http")]
    #[test]
    fn test_http_session_limits_from_json() {
        let config: TransportConfig = serde_json::from_str(
            r#"{"type":"http","port":9000,"session_idle_ttl_ms":500,"max_sessions":4}"#,
        )
        .unwrap();
        let TransportConfig::Http(http) = config else {
            panic!("expected an HTTP config");
        };
        assert_eq!(http.session_idle_ttl(), Duration::from_millis(500));
        assert_eq!(http.max_sessions, 4);
        assert_eq!(http.rpc_path, "/mcp");
    }

    #[test]
    fn test_serde_tagging() {
        let config: TransportConfig = serde_json::from_str(r#"{"type":"stdio"}"#).unwrap();
        assert!(config.is_stdio());
    }
}
