//! Transport service - runs the configured transport until it finishes or
//! the process is interrupted.

use tracing::{info, warn};

use super::stdio::StdioTransport;
use super::{TransportConfig, TransportResult};
use crate::core::McpServer;

#[cfg(feature = "tcp")]
use super::tcp::TcpTransport;

#[cfg(feature = "http")]
use super::http::HttpTransport;

/// Owns the transport configuration and drives the selected transport.
pub struct TransportService {
    config: TransportConfig,
}

impl TransportService {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    pub fn from_env() -> Self {
        Self::new(TransportConfig::from_env())
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Serve `server` on the configured transport.
    ///
    /// Returns when the transport ends (stdin closed, client shutdown) or on
    /// Ctrl-C. Sessions still open at that point are dropped with the runtime.
    pub async fn run(self, server: McpServer) -> TransportResult<()> {
        info!(
            "{} v{} serving {} tools over {}",
            server.name(),
            server.version(),
            server.registry().len(),
            self.config.description()
        );

        let transport = async move {
            match self.config {
                TransportConfig::Stdio => StdioTransport::run(server).await,
                #[cfg(feature = "tcp")]
                TransportConfig::Tcp(cfg) => TcpTransport::new(cfg).run(server).await,
                #[cfg(feature = "http")]
                TransportConfig::Http(cfg) => HttpTransport::new(cfg).run(server).await,
            }
        };

        tokio::select! {
            result = transport => result,
            _ = interrupted() => {
                info!("Interrupt received, stopping transport");
                Ok(())
            }
        }
    }
}

async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
