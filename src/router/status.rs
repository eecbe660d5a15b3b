//! Public health page for load balancers and uptime checks.

use axum::Json;
use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::AppState;

/// Structured health report.
#[derive(Serialize)]
pub struct Health {
    status: &'static str,
    timestamp: DateTime<Utc>,
    /// Seconds since the server started.
    uptime: f64,
    version: String,
    name: String,
}

/// Public server health.
pub async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "OK",
        timestamp: state.clock.now(),
        uptime: state.started_at.elapsed().as_secs_f64(),
        version: state.config.version().to_owned(),
        name: state.config.name.clone(),
    })
}
