//! Liveness HTTP endpoint.

use std::future::Future;
use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;

use crate::connection::ConnectionManager;
use crate::error::NodeError;

/// Body of `GET /`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process serves requests.
    pub status: String,
    /// Broker connection state.
    pub connection: String,
    /// When the current broker connection was established.
    pub connected_since: Option<DateTime<Utc>>,
}

/// Build the liveness router.
pub fn router(connection: Arc<ConnectionManager>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .with_state(connection)
}

/// Report liveness and the broker connection state.
pub async fn health_check(State(connection): State<Arc<ConnectionManager>>) -> Json<HealthResponse> {
    let status = connection.status().await;
    Json(HealthResponse {
        status: "ok".to_string(),
        connection: status.state.to_string(),
        connected_since: status.connected_since,
    })
}

/// Serve the liveness endpoint until `shutdown` completes.
///
/// # Errors
///
/// Returns an error if the server fails.
pub async fn serve_health<F>(
    listener: TcpListener,
    connection: Arc<ConnectionManager>,
    shutdown: F,
) -> Result<(), NodeError>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "health endpoint listening");
    }

    axum::serve(listener, router(connection))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("health endpoint shut down");
    Ok(())
}
