//! Network tool definition.
//!
//! Outbound diagnostics: DNS resolution, TCP reachability with latency, HTTP
//! checks, IP geolocation, and echoing the caller's address. Every probe is
//! bounded by the configured probe timeout and never retried automatically.

pub mod target;

use std::error::Error as StdError;
use std::fmt;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::redirect::Policy;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::net::{TcpStream, lookup_host};
use tracing::{debug, instrument};

use super::geolocation::{GeolocationClient, IpData, format_ip_data};
use super::outbound::{
    http_client, http_client_with_redirects, is_connection_refused, request_error,
};
use crate::core::config::{GeolocationConfig, NetworkConfig};
use crate::domains::tools::cancellation::CancellationSignal;
use crate::domains::tools::contract::{
    Arguments, InvocationContext, Tool, ToolDescriptor, ToolOutput, decode_validated, describe,
    parse_arguments, to_arguments,
};
use crate::domains::tools::error::{ExecutionError, ValidationError};

/// Redirect hops an http probe follows before giving up.
const MAX_REDIRECTS: usize = 10;

// ============================================================================
// Tool Parameters
// ============================================================================

/// Kind of probe to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Probe {
    /// Resolve a hostname to its addresses.
    Dns,
    /// Open a TCP connection to target:port and measure the latency.
    Tcp,
    /// Send an HTTP GET and report status and latency.
    Http,
    /// Geolocate an IP address (the caller's when no target is given).
    IpInfo,
    /// Report the caller's IP address as seen by the server.
    ClientIp,
}

impl Probe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dns => "dns",
            Self::Tcp => "tcp",
            Self::Http => "http",
            Self::IpInfo => "ip_info",
            Self::ClientIp => "client_ip",
        }
    }
}

impl fmt::Display for Probe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for the network tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct NetworkParams {
    /// Probe to run.
    pub probe: Probe,

    /// Hostname, IP address or URL, depending on the probe.
    #[schemars(
        description = "Hostname or IP (dns, tcp), URL or host (http), IP address (ip_info, defaults to the caller)"
    )]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Port for the tcp probe.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Probe timeout in milliseconds; can only lower the server default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Structured result of a probe. Only the fields relevant to the probe are set.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct NetworkOutput {
    pub probe: Probe,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    /// Resolved addresses (dns) or the connected address (tcp).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addresses: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Round-trip time of the probe in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,

    /// HTTP status code (http).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_info: Option<IpData>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
}

impl NetworkOutput {
    fn new(probe: Probe, target: Option<String>) -> Self {
        Self {
            probe,
            target,
            addresses: None,
            port: None,
            latency_ms: None,
            status: None,
            ip_info: None,
            client_ip: None,
        }
    }
}

// ============================================================================
// Tool Definition
// ============================================================================

/// Network tool - bounded outbound probes.
pub struct NetworkTool {
    descriptor: ToolDescriptor,
    config: NetworkConfig,
    http: reqwest::Client,
    geolocation: GeolocationClient,
}

impl NetworkTool {
    /// Tool name as registered in MCP.
    pub const NAME: &'static str = "network";

    /// Tool description shown to clients.
    pub const DESCRIPTION: &'static str = "Run a network diagnostic: 'dns' resolves a hostname, 'tcp' checks that target:port accepts connections and measures latency, 'http' fetches a URL and reports the status, 'ip_info' geolocates an IP address (the caller's by default), 'client_ip' returns the caller's IP address. Probes are time-bounded and never retried automatically.";

    pub fn new(config: NetworkConfig, geolocation: GeolocationConfig) -> Self {
        let http = http_client_with_redirects(
            config.probe_timeout(),
            redirect_policy(config.allowed_targets.clone()),
        );
        Self {
            descriptor: describe::<NetworkParams, NetworkOutput>(Self::NAME, Self::DESCRIPTION),
            geolocation: GeolocationClient::new(geolocation, http_client(config.probe_timeout())),
            http,
            config,
        }
    }

    async fn run_probe(
        &self,
        params: &NetworkParams,
        context: &InvocationContext,
    ) -> Result<(String, NetworkOutput), ExecutionError> {
        let target = params.target.clone();
        let mut output = NetworkOutput::new(params.probe, target.clone());

        match params.probe {
            Probe::Dns => {
                let host = required(&target)?;
                let started = Instant::now();
                let addresses = resolve(host, 0).await?;
                output.latency_ms = Some(elapsed_ms(started));
                let ips: Vec<String> = dedup_ips(&addresses);
                let summary = format!("{} resolves to {}", host, ips.join(", "));
                output.addresses = Some(ips);
                Ok((summary, output))
            }
            Probe::Tcp => {
                let host = required(&target)?;
                let port = params
                    .port
                    .ok_or_else(|| ExecutionError::internal("tcp probe without port"))?;
                let addresses = resolve(host, port).await?;
                let started = Instant::now();
                let stream = TcpStream::connect(&addresses[..])
                    .await
                    .map_err(|e| connect_error(host, port, &e))?;
                let latency = elapsed_ms(started);
                let peer = stream
                    .peer_addr()
                    .map(|a| a.ip().to_string())
                    .unwrap_or_else(|_| host.to_string());
                drop(stream);

                output.port = Some(port);
                output.latency_ms = Some(latency);
                output.addresses = Some(vec![peer.clone()]);
                let summary = format!(
                    "{}:{} is reachable ({}) in {} ms",
                    host, port, peer, latency
                );
                Ok((summary, output))
            }
            Probe::Http => {
                let url = required(&target)?;
                let started = Instant::now();
                let response = self.http.get(url).send().await.map_err(|e| {
                    if e.is_redirect() {
                        redirect_error(url, &e)
                    } else {
                        request_error(url, &e)
                    }
                })?;
                let latency = elapsed_ms(started);
                let status = response.status();

                output.status = Some(status.as_u16());
                output.latency_ms = Some(latency);
                let summary = format!("GET {} -> {} in {} ms", url, status, latency);
                Ok((summary, output))
            }
            Probe::IpInfo => {
                let ip = match (&target, &context.client_ip) {
                    (Some(ip), _) | (None, Some(ip)) => ip.clone(),
                    (None, None) => {
                        return Err(ExecutionError::invalid_target(
                            "could not determine client IP address and no target provided",
                        ));
                    }
                };
                let data = self.geolocation.lookup(&ip).await?;
                let summary = format_ip_data(&data);
                output.target = Some(ip);
                output.ip_info = Some(data);
                Ok((summary, output))
            }
            Probe::ClientIp => {
                let ip = context.client_ip.clone().ok_or_else(|| {
                    ExecutionError::invalid_target("could not determine client IP address")
                })?;
                output.client_ip = Some(ip.clone());
                Ok((ip, output))
            }
        }
    }
}

#[async_trait]
impl Tool for NetworkTool {
    fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    fn validate(&self, arguments: Arguments) -> Result<Arguments, ValidationError> {
        let mut params: NetworkParams = parse_arguments(&arguments)?;

        params.timeout_ms = match params.timeout_ms {
            Some(0) => {
                return Err(ValidationError::field("timeout_ms", "timeout_ms must be positive"));
            }
            Some(ms) => Some(ms.min(self.config.probe_timeout_ms)),
            None => Some(self.config.probe_timeout_ms),
        };

        let raw_target = params
            .target
            .take()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let allowed = &self.config.allowed_targets;

        match params.probe {
            Probe::Dns | Probe::Tcp => {
                let raw = raw_target.ok_or_else(|| {
                    ValidationError::field(
                        "target",
                        format!("the {} probe requires a target", params.probe),
                    )
                })?;
                let host = target::parse_host(&raw)?;
                target::check_allowed(&host, allowed)?;
                params.target = Some(host);

                if params.probe == Probe::Tcp {
                    match params.port {
                        None => {
                            return Err(ValidationError::field(
                                "port",
                                "the tcp probe requires a port",
                            ));
                        }
                        Some(0) => {
                            return Err(ValidationError::field("port", "port must be 1-65535"));
                        }
                        Some(_) => {}
                    }
                } else {
                    params.port = None;
                }
            }
            Probe::Http => {
                let raw = raw_target.ok_or_else(|| {
                    ValidationError::field("target", "the http probe requires a URL or host")
                })?;
                let url = target::parse_url(&raw)?;
                target::check_allowed(url.host_str().unwrap_or_default(), allowed)?;
                params.target = Some(url.to_string());
                params.port = None;
            }
            Probe::IpInfo => {
                if let Some(raw) = raw_target {
                    params.target = Some(target::parse_ip(&raw)?.to_string());
                }
                params.port = None;
            }
            Probe::ClientIp => {
                params.port = None;
            }
        }

        to_arguments(&params)
    }

    #[instrument(skip_all, fields(tool = "network"))]
    async fn execute(
        &self,
        arguments: Arguments,
        context: &InvocationContext,
        cancel: CancellationSignal,
    ) -> Result<ToolOutput, ExecutionError> {
        let params: NetworkParams = decode_validated(arguments)?;
        let limit = Duration::from_millis(
            params
                .timeout_ms
                .unwrap_or(self.config.probe_timeout_ms)
                .min(self.config.probe_timeout_ms),
        );
        debug!(probe = %params.probe, target = ?params.target, "Running network probe");

        let (summary, output) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(ExecutionError::cancelled(format!("{} probe cancelled", params.probe)));
            }
            outcome = tokio::time::timeout(limit, self.run_probe(&params, context)) => {
                match outcome {
                    Ok(result) => result?,
                    Err(_) => {
                        return Err(ExecutionError::timeout(format!(
                            "{} probe did not complete within {} ms",
                            params.probe,
                            limit.as_millis()
                        )));
                    }
                }
            }
        };

        ToolOutput::new(summary, &output)
    }
}

/// Every redirect hop must satisfy the same allow list as the original target.
fn redirect_policy(allowed: Vec<String>) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error(format!("more than {} redirects", MAX_REDIRECTS));
        }
        let checked = match attempt.url().host_str() {
            Some(host) => target::check_allowed(host, &allowed).map_err(|e| e.message),
            None => Err("redirect target has no host".to_string()),
        };
        match checked {
            Ok(()) => attempt.follow(),
            Err(reason) => attempt.error(reason),
        }
    })
}

fn redirect_error(url: &str, err: &reqwest::Error) -> ExecutionError {
    let reason = err
        .source()
        .map(ToString::to_string)
        .unwrap_or_else(|| err.to_string());
    ExecutionError::invalid_target(format!("redirect from {} refused: {}", url, reason))
}

fn required(target: &Option<String>) -> Result<&str, ExecutionError> {
    target
        .as_deref()
        .ok_or_else(|| ExecutionError::internal("probe target missing after validation"))
}

async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, ExecutionError> {
    let addresses: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|e| {
            ExecutionError::unreachable(format!("failed to resolve {}: {}", host, e), true)
        })?
        .collect();

    if addresses.is_empty() {
        return Err(ExecutionError::invalid_target(format!(
            "{} has no addresses",
            host
        )));
    }
    Ok(addresses)
}

fn connect_error(host: &str, port: u16, err: &std::io::Error) -> ExecutionError {
    if is_connection_refused(err) {
        ExecutionError::unreachable(format!("{}:{} refused the connection", host, port), false)
    } else {
        ExecutionError::unreachable(format!("{}:{} is unreachable: {}", host, port, err), true)
    }
}

fn dedup_ips(addresses: &[SocketAddr]) -> Vec<String> {
    let mut ips: Vec<String> = Vec::new();
    for addr in addresses {
        let ip = addr.ip().to_string();
        if !ips.contains(&ip) {
            ips.push(ip);
        }
    }
    ips
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Tests
// ============================================================================
