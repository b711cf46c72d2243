//! MCP Server implementation and lifecycle management.
//!
//! [`McpServer`] owns the shared, immutable parts of the server (config,
//! tool registry, protocol handler) and hands out per-connection
//! [`Session`]s. It is cheap to clone; every transport connection gets its
//! own clone.

use std::sync::Arc;

use tracing::{debug, info, instrument};

use super::config::Config;
use super::error::Result;
use super::protocol::{Dispatcher, Handled, JsonRpcRequest, ProtocolHandler, Session};
use crate::domains::tools::ToolRegistry;

/// The main MCP server.
#[derive(Clone)]
pub struct McpServer {
    /// Server configuration.
    config: Arc<Config>,

    /// Registered tools, shared read-only by all sessions.
    registry: Arc<ToolRegistry>,

    /// Method routing shared by all sessions.
    handler: Arc<ProtocolHandler>,
}

impl McpServer {
    /// Create a new MCP server with the built-in tools.
    ///
    /// Fails if two tools share a name.
    pub fn new(config: Config) -> Result<Self> {
        let registry = Arc::new(ToolRegistry::with_builtin_tools(&config)?);
        Ok(Self::with_registry(config, registry))
    }

    /// Create a server around an already built registry.
    pub fn with_registry(config: Config, registry: Arc<ToolRegistry>) -> Self {
        let config = Arc::new(config);
        let dispatcher = Arc::new(Dispatcher::new(registry.clone(), config.tools.clone()));
        let handler = Arc::new(ProtocolHandler::new(config.server.clone(), dispatcher));

        Self {
            config,
            registry,
            handler,
        }
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.config.server.name
    }

    /// Get the server version.
    pub fn version(&self) -> &str {
        &self.config.server.version
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Start a session for a new client connection.
    pub fn open_session(&self, client_ip: Option<String>) -> Arc<Session> {
        let session = Session::new(self.config.session.clone(), client_ip);
        info!(
            session = %session.id(),
            client_ip = session.client_ip().unwrap_or("unknown"),
            "Client connected"
        );
        session
    }

    /// Handle one decoded message for `session`.
    pub fn handle(&self, session: &Arc<Session>, request: JsonRpcRequest) -> Handled {
        self.handler.handle(session, request)
    }

    /// Drain and close a session after `shutdown`/`close` or repeated
    /// sequence violations.
    #[instrument(skip_all, fields(session = %session.id()))]
    pub async fn close_session(&self, session: &Session) {
        session.close(self.config.session.close_grace()).await;
        debug!("Session drained");
    }

    /// The client went away: cancel everything immediately.
    pub fn disconnect(&self, session: &Session) {
        session.disconnect();
    }
}
