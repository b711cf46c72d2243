//! Shared plumbing for tools that call out to the network.
//!
//! Maps transport-level failures and provider HTTP statuses onto the
//! [`ExecutionError`] taxonomy so every outbound tool classifies them the
//! same way.

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::redirect::Policy;
use tracing::warn;

use crate::domains::tools::error::ExecutionError;

const USER_AGENT: &str = concat!("lazy-mcp-server/", env!("CARGO_PKG_VERSION"));

/// Build an HTTP client with a per-request timeout.
pub fn http_client(timeout: Duration) -> reqwest::Client {
    http_client_with_redirects(timeout, Policy::default())
}

/// Build an HTTP client with a per-request timeout and a custom redirect policy.
pub fn http_client_with_redirects(timeout: Duration, redirects: Policy) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .redirect(redirects)
        .build()
        .unwrap_or_else(|e| {
            warn!("Falling back to default HTTP client: {}", e);
            reqwest::Client::new()
        })
}

/// Classify a failed request (no HTTP status received).
pub fn request_error(service: &str, err: &reqwest::Error) -> ExecutionError {
    if err.is_timeout() {
        return ExecutionError::timeout(format!("{} did not respond in time", service));
    }
    if is_connection_refused(err) {
        return ExecutionError::unreachable(format!("{} refused the connection", service), false);
    }
    if err.is_decode() {
        return ExecutionError::upstream(format!("{} sent an unreadable response: {}", service, err), false);
    }
    ExecutionError::unreachable(format!("failed to reach {}: {}", service, err), true)
}

/// Classify a non-success HTTP status from a provider.
pub fn status_error(service: &str, status: StatusCode, body: &str) -> ExecutionError {
    let detail = provider_message(body);
    match status {
        StatusCode::NOT_FOUND => {
            ExecutionError::invalid_target(format!("{}: not found ({})", service, detail))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            ExecutionError::upstream(format!("{}: rate limited ({})", service, detail), true)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ExecutionError::upstream(
            format!("{}: credentials rejected ({})", service, detail),
            false,
        ),
        s if s.is_server_error() => ExecutionError::unreachable(
            format!("{}: unavailable (status {})", service, s.as_u16()),
            true,
        ),
        s => ExecutionError::upstream(
            format!("{} error (status {}): {}", service, s.as_u16(), detail),
            false,
        ),
    }
}

/// True when an I/O error somewhere in the chain is a refused connection.
pub fn is_connection_refused(err: &(dyn StdError + 'static)) -> bool {
    let mut source = Some(err);
    while let Some(current) = source {
        if let Some(io_err) = current.downcast_ref::<io::Error>() {
            if io_err.kind() == io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        source = current.source();
    }
    false
}

/// Extract `message` from a JSON error body, or a trimmed excerpt of the body.
fn provider_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().chars().take(200).collect())
}
