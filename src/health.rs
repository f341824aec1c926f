//! `/health` endpoint reflecting the supervisor's connection state.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::error::Result;
use crate::supervisor::ConnectionState;

#[derive(Clone)]
struct HealthState {
    stage: String,
    connection: watch::Receiver<ConnectionState>,
}

/// Build the health router for one worker.
pub fn router(stage: impl Into<String>, connection: watch::Receiver<ConnectionState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .with_state(HealthState {
            stage: stage.into(),
            connection,
        })
}

async fn health_check(State(state): State<HealthState>) -> (StatusCode, Json<serde_json::Value>) {
    let connection = *state.connection.borrow();
    let status = if connection == ConnectionState::Connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({
            "status": connection.as_str(),
            "stage": state.stage,
            "service": "clipboard-tts",
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}

/// Serve the router on an already-bound listener until the task is dropped.
pub async fn serve(listener: TcpListener, router: Router) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "health endpoint listening");
    }
    axum::serve(listener, router).await?;
    Ok(())
}
