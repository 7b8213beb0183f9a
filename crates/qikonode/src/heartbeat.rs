//! Heartbeat/keepalive loop.

use std::sync::Arc;
use std::time::Duration;

use qiko_proto::OutboundFrame;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::connection::ConnectionManager;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between heartbeats.
    pub interval: Duration,
    /// Pause after a failed heartbeat before trying again.
    pub error_backoff: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            error_backoff: Duration::from_secs(2),
        }
    }
}

/// Send heartbeats until `cancel` fires.
///
/// Failures (after the connection manager's own retries) are logged and the
/// loop carries on after `error_backoff`; the next send reconnects.
pub async fn run_heartbeat(
    connection: Arc<ConnectionManager>,
    config: HeartbeatConfig,
    cancel: CancellationToken,
) {
    let frame = OutboundFrame::Heartbeat.to_bytes();
    info!(interval_secs = config.interval.as_secs(), "heartbeat loop started");

    loop {
        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            sent = connection.send(&frame) => sent,
        };

        let pause = match sent {
            Ok(()) => {
                debug!("heartbeat sent");
                config.interval
            }
            Err(e) => {
                error!(
                    error = %e,
                    retry_in_ms = config.error_backoff.as_millis() as u64,
                    "heartbeat failed"
                );
                config.error_backoff
            }
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = sleep(pause) => {}
        }
    }

    info!("heartbeat loop stopped");
}

/// Spawn [`run_heartbeat`] as a task.
pub fn spawn_heartbeat(
    connection: Arc<ConnectionManager>,
    config: HeartbeatConfig,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_heartbeat(connection, config, cancel))
}
