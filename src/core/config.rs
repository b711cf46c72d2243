//! Configuration management for the MCP server.
//!
//! This module provides a centralized configuration structure that can be
//! populated from environment variables or defaults. The core consumes a
//! populated [`Config`]; it never reads the environment on its own.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use super::transport::TransportConfig;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Main configuration structure for the MCP server.
///
/// This struct contains all configurable aspects of the server, organized
/// by concern for clarity and maintainability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server identification and metadata.
    pub server: ServerConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Transport configuration.
    pub transport: TransportConfig,

    /// Per-session limits.
    pub session: SessionConfig,

    /// Tool execution deadlines.
    pub tools: ToolsConfig,

    /// Network tool probe defaults.
    pub network: NetworkConfig,

    /// Weather provider endpoint and credentials.
    pub weather: WeatherConfig,

    /// IP geolocation provider used by the network and weather tools.
    pub geolocation: GeolocationConfig,
}

/// Server identification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The name of the server as reported to clients.
    pub name: String,

    /// The version of the server.
    pub version: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "trace").
    pub level: String,

    /// Whether to include timestamps in log output.
    pub with_timestamps: bool,
}

/// Limits applied to every client session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum number of concurrently executing tool calls per session.
    pub max_in_flight: usize,

    /// How long in-flight calls may keep running after a close request.
    pub close_grace_ms: u64,

    /// Out-of-order messages tolerated before the session is closed.
    pub max_sequence_violations: u32,
}

impl SessionConfig {
    pub fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }
}

/// Tool execution deadlines enforced by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Deadline for tools without an explicit entry in `timeouts_ms`.
    pub default_timeout_ms: u64,

    /// Per-tool deadlines, keyed by tool name.
    pub timeouts_ms: HashMap<String, u64>,
}

impl ToolsConfig {
    /// Deadline for the named tool.
    pub fn timeout_for(&self, tool: &str) -> Duration {
        let ms = self
            .timeouts_ms
            .get(tool)
            .copied()
            .unwrap_or(self.default_timeout_ms);
        Duration::from_millis(ms)
    }
}

/// Defaults for the network tool's outbound probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Upper bound for a single probe.
    pub probe_timeout_ms: u64,

    /// Glob patterns (`*` wildcard) a probe target must match.
    /// Empty means every syntactically valid target is allowed.
    pub allowed_targets: Vec<String>,
}

impl NetworkConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Weather provider configuration (OpenWeatherMap compatible).
#[derive(Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Base URL of the provider API, without trailing slash.
    pub endpoint: String,

    /// Provider API key.
    /// Get a free key at: https://openweathermap.org/api
    pub api_key: Option<String>,

    /// Timeout for a single provider request.
    pub request_timeout_ms: u64,
}

impl WeatherConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Custom Debug implementation to redact secrets from logs.
impl std::fmt::Debug for WeatherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeatherConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish()
    }
}

/// IP geolocation provider configuration (ip-api.com compatible).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeolocationConfig {
    /// Base URL; lookups go to `{endpoint}/json/{ip}`.
    pub endpoint: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 16,
            close_grace_ms: 5_000,
            max_sequence_violations: 3,
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            timeouts_ms: HashMap::from([
                ("network".to_string(), 10_000),
                ("weather".to_string(), 15_000),
            ]),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 5_000,
            allowed_targets: Vec::new(),
        }
    }
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openweathermap.org/data/2.5".to_string(),
            api_key: None,
            request_timeout_ms: 10_000,
        }
    }
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://ip-api.com".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                name: "LazyMCP".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                with_timestamps: true,
            },
            transport: TransportConfig::default(),
            session: SessionConfig::default(),
            tools: ToolsConfig::default(),
            network: NetworkConfig::default(),
            weather: WeatherConfig::default(),
            geolocation: GeolocationConfig::default(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables are expected to be prefixed with `MCP_`.
    /// For example: `MCP_SERVER_NAME`, `MCP_LOG_LEVEL`. The weather key is
    /// also read from `OPENWEATHER_API_KEY`.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Ok(name) = std::env::var("MCP_SERVER_NAME") {
            config.server.name = name;
        }

        if let Ok(level) = std::env::var("MCP_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(with_timestamps) = env_parse("MCP_LOG_TIMESTAMPS") {
            config.logging.with_timestamps = with_timestamps;
        }

        // Load transport configuration from environment
        config.transport = TransportConfig::from_env();

        if let Some(max) = env_parse("MCP_MAX_IN_FLIGHT") {
            config.session.max_in_flight = max;
        }
        if let Some(grace) = env_parse("MCP_CLOSE_GRACE_MS") {
            config.session.close_grace_ms = grace;
        }
        if let Some(max) = env_parse("MCP_MAX_SEQUENCE_VIOLATIONS") {
            config.session.max_sequence_violations = max;
        }

        if let Some(timeout) = env_parse("MCP_TOOL_TIMEOUT_MS") {
            config.tools.default_timeout_ms = timeout;
        }
        if let Ok(raw) = std::env::var("MCP_TOOL_TIMEOUTS") {
            config.tools.timeouts_ms.extend(parse_timeouts(&raw));
        }

        if let Some(timeout) = env_parse("MCP_NETWORK_PROBE_TIMEOUT_MS") {
            config.network.probe_timeout_ms = timeout;
        }
        if let Ok(raw) = std::env::var("MCP_NETWORK_ALLOWED_TARGETS") {
            config.network.allowed_targets = parse_list(&raw);
            info!(
                "Network probes restricted to: {:?}",
                config.network.allowed_targets
            );
        }

        if let Ok(endpoint) = std::env::var("MCP_WEATHER_ENDPOINT") {
            config.weather.endpoint = endpoint.trim_end_matches('/').to_string();
        }
        if let Some(timeout) = env_parse("MCP_WEATHER_TIMEOUT_MS") {
            config.weather.request_timeout_ms = timeout;
        }

        // Load weather API key
        let api_key = std::env::var("MCP_WEATHER_API_KEY")
            .or_else(|_| std::env::var("OPENWEATHER_API_KEY"))
            .ok()
            .filter(|key| !key.trim().is_empty());
        if let Some(key) = api_key {
            config.weather.api_key = Some(key);
            info!("Weather API key loaded from environment");
        } else {
            warn!(
                "OPENWEATHER_API_KEY not set - the weather tool will report an error. \
                 Get a free key at https://openweathermap.org/api"
            );
        }

        if let Ok(endpoint) = std::env::var("MCP_GEOLOCATION_ENDPOINT") {
            config.geolocation.endpoint = endpoint.trim_end_matches('/').to_string();
        }

        config
    }
}

/// Read and parse an environment variable, ignoring (with a warning) bad values.
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid value for {}: {:?}", key, raw);
            None
        }
    }
}

/// Parse `name=ms,name=ms` pairs.
fn parse_timeouts(raw: &str) -> HashMap<String, u64> {
    raw.split(',')
        .filter_map(|pair| {
            let (name, ms) = pair.split_once('=')?;
            match ms.trim().parse() {
                Ok(ms) => Some((name.trim().to_string(), ms)),
                Err(_) => {
                    warn!("Ignoring invalid tool timeout entry: {:?}", pair);
                    None
                }
            }
        })
        .collect()
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
