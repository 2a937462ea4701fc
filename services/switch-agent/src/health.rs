//! Health check endpoint.
//!
//! Reports whether the bus session is connected. Used by container
//! orchestrators and supervisors to decide whether the agent is usable.

use std::net::SocketAddr;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::session::SessionState;

/// Read-only view of the session state.
#[derive(Debug, Clone)]
pub struct HealthProbe {
    session: watch::Receiver<SessionState>,
}

impl HealthProbe {
    pub fn new(session: watch::Receiver<SessionState>) -> Self {
        Self { session }
    }

    /// Healthy iff the session is connected.
    pub fn is_healthy(&self) -> bool {
        self.session_state() == SessionState::Connected
    }

    pub fn session_state(&self) -> SessionState {
        *self.session.borrow()
    }
}

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// "healthy" or "unhealthy".
    pub status: String,
}

/// Create the health router.
pub fn router(probe: HealthProbe) -> Router {
    Router::new().route("/health", get(health)).with_state(probe)
}

async fn health(State(probe): State<HealthProbe>) -> (StatusCode, Json<HealthResponse>) {
    if probe.is_healthy() {
        (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unhealthy".to_string(),
            }),
        )
    }
}

/// Serve the health endpoint until `shutdown` flips to true.
pub async fn serve(
    addr: SocketAddr,
    probe: HealthProbe,
    shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Health server listening");
    serve_on(listener, probe, shutdown).await
}

/// Serve on an already bound listener.
pub async fn serve_on(
    listener: TcpListener,
    probe: HealthProbe,
    shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    axum::serve(listener, router(probe))
        .with_graceful_shutdown(async move {
            let mut shutdown_rx = shutdown;
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                if shutdown_rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;

    info!("Health server stopped");
    Ok(())
}
