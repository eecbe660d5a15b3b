use std::future::ready;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use milkit::{app, initialize_state, retention, telemetry};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let state = initialize_state().await?;

    // purge old records once a day.
    retention::spawn(
        state.db.records.clone(),
        Arc::clone(&state.clock),
        state.config.retention.clone(),
    );

    let mut router = app(state.clone());
    match telemetry::setup_metrics_recorder() {
        Ok(handle) => {
            // `GET /metrics` goes to Prometheus scrape.
            router = router.route("/metrics", get(move || ready(handle.render())));
        },
        Err(err) => tracing::warn!(error = %err, "metrics recorder not installed"),
    }

    let addr = format!("{}:{}", state.config.address, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, name = %state.config.name, version = state.config.version(), "server started");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
