//! Transport layer for the MCP server.
//!
//! This module provides different transport implementations:
//! - **STDIO**: Standard input/output, line-delimited (always available)
//! - **TCP**: Raw TCP socket, line-delimited, one session per connection - feature: `tcp`
//! - **HTTP**: JSON-RPC over POST with an `Mcp-Session-Id` header - feature: `http`
//!
//! Transports only frame and decode messages; sequencing and concurrency are
//! handled by the protocol layer.

mod config;
mod error;
mod line;
mod service;

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "tcp")]
pub mod tcp;

pub mod stdio;

pub use config::TransportConfig;
pub use error::{TransportError, TransportResult};
pub use line::serve_lines;
pub use service::TransportService;

#[cfg(feature = "tcp")]
pub use config::TcpConfig;

#[cfg(feature = "http")]
pub use config::HttpConfig;
