//! STDIO transport implementation.
//!
//! Standard input/output transport for MCP - the default and recommended mode.
//! Logs go to stderr; stdout carries only JSON-RPC lines.

use tracing::info;

use super::TransportResult;
use super::line::serve_lines;
use crate::core::McpServer;

/// STDIO transport handler.
pub struct StdioTransport;

impl StdioTransport {
    /// Run the STDIO transport until stdin closes or the client shuts down.
    pub async fn run(server: McpServer) -> TransportResult<()> {
        info!("Ready - communicating via stdin/stdout");

        serve_lines(&server, tokio::io::stdin(), tokio::io::stdout(), None).await?;

        info!("STDIO transport finished");
        Ok(())
    }
}
