//! LazyMCP server library.
//!
//! A Model Context Protocol (MCP) server exposing a calculator, network
//! probes and weather reports as tools to AI-model clients.
//!
//! # Architecture
//!
//! - **core**: configuration, error handling, the protocol runtime
//!   (sessions, dispatch, method routing), the server and its transports
//! - **domains**: business logic organized by bounded contexts
//!   - **tools**: the tool contract, registry and tool implementations
//!
//! # Example
//!
//! ```rust,no_run
//! use lazy_mcp_server::core::{Config, McpServer, TransportService};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env();
//!     let server = McpServer::new(config.clone())?;
//!     TransportService::new(config.transport).run(server).await?;
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod domains;

// Re-export commonly used types for convenience
pub use core::{Config, Error, McpServer, Result};
