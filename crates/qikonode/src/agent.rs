//! Agent lifecycle: initial connect, loop supervision, shutdown.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::actions::CommandHandler;
use crate::connection::ConnectionManager;
use crate::error::NodeError;
use crate::heartbeat::{HeartbeatConfig, spawn_heartbeat};
use crate::inbound::{InboundConfig, spawn_inbound};

/// A not yet started agent.
pub struct Agent {
    connection: Arc<ConnectionManager>,
    handler: Arc<dyn CommandHandler>,
    heartbeat: HeartbeatConfig,
    inbound: InboundConfig,
}

impl Agent {
    /// Create an agent over a shared connection.
    #[must_use]
    pub fn new(connection: Arc<ConnectionManager>, handler: Arc<dyn CommandHandler>) -> Self {
        Self {
            connection,
            handler,
            heartbeat: HeartbeatConfig::default(),
            inbound: InboundConfig::default(),
        }
    }

    /// Set the heartbeat configuration.
    #[must_use]
    pub fn with_heartbeat_config(mut self, config: HeartbeatConfig) -> Self {
        self.heartbeat = config;
        self
    }

    /// Set the inbound loop configuration.
    #[must_use]
    pub fn with_inbound_config(mut self, config: InboundConfig) -> Self {
        self.inbound = config;
        self
    }

    /// Connect, then spawn the heartbeat and inbound loops.
    ///
    /// # Errors
    ///
    /// Returns the connect error if the broker cannot be reached within the
    /// connect retry policy. No loops are started in that case.
    pub async fn start(self) -> Result<AgentHandle, NodeError> {
        self.connection.connect().await?;

        let cancel = CancellationToken::new();
        let heartbeat = spawn_heartbeat(
            Arc::clone(&self.connection),
            self.heartbeat,
            cancel.child_token(),
        );
        let inbound = spawn_inbound(
            Arc::clone(&self.connection),
            self.handler,
            self.inbound,
            cancel.child_token(),
        );

        info!(endpoint = %self.connection.endpoint(), "agent started");

        Ok(AgentHandle {
            connection: self.connection,
            cancel,
            heartbeat,
            inbound,
        })
    }
}

/// A running agent.
pub struct AgentHandle {
    connection: Arc<ConnectionManager>,
    cancel: CancellationToken,
    heartbeat: JoinHandle<()>,
    inbound: JoinHandle<()>,
}

impl AgentHandle {
    /// The shared connection.
    #[must_use]
    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Token cancelled when the agent stops.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether both loops are still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.heartbeat.is_finished() && !self.inbound.is_finished()
    }

    /// Cancel both loops, wait for them to exit, then disconnect.
    pub async fn stop(self) {
        info!("stopping agent");
        self.cancel.cancel();

        for (name, handle) in [("heartbeat", self.heartbeat), ("inbound", self.inbound)] {
            if let Err(e) = handle.await {
                warn!(task = name, error = %e, "loop task ended abnormally");
            }
        }

        self.connection.disconnect().await;
        info!("agent stopped");
    }
}
