//! MilkIt tracks daily milk deliveries: every day is assumed delivered
//! until the user says otherwise.

#![forbid(unsafe_code)]
pub mod clock;
pub mod config;
mod crypto;
pub mod database;
pub mod error;
pub mod export;
mod limits;
mod middleware;
pub mod record;
pub mod retention;
mod router;
pub mod stats;
pub mod telemetry;
mod token;
pub mod user;
pub mod validation;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::http::{Method, StatusCode, header};
use axum::routing::get;
use axum::{Router, middleware as AxumMiddleware};
use error::ServerError;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};

use crate::clock::{Clock, SystemClock};
use crate::config::Configuration;
use crate::crypto::{CryptoError, PasswordManager};
use crate::database::Database;
use crate::limits::RateLimiter;
use crate::record::RecordService;
use crate::token::TokenManager;
use crate::user::UserService;

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    token: Option<&str>,
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    let mut request = Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    app.oneshot(request.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Configuration>,
    pub db: Database,
    pub records: RecordService,
    pub users: UserService,
    pub clock: Arc<dyn Clock>,
    pub started_at: Instant,
}

impl AppState {
    /// Wire services over `db`.
    pub fn new(
        config: Arc<Configuration>,
        db: Database,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, CryptoError> {
        let pwd = Arc::new(PasswordManager::new(config.argon2.clone())?);
        let token = TokenManager::new(&config.token);

        Ok(Self {
            records: RecordService::new(Arc::clone(&db.records), Arc::clone(&clock)),
            users: UserService::new(Arc::clone(&db.users), pwd, token, Arc::clone(&clock)),
            config,
            db,
            clock,
            started_at: Instant::now(),
        })
    }
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(10)))
        // Remove sensitive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]))
        // Add CORS preflight support.
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
                .allow_headers(Any)
                .vary([header::AUTHORIZATION]),
        );

    let mut router = Router::new()
        // `GET /api/health` goes to `health`.
        .route("/api/health", get(router::status::health))
        .nest("/api/auth", router::auth::router(state.clone()))
        .nest("/api/milk", router::milk::router(state.clone()))
        .nest("/api/export", router::export::router(state.clone()))
        .fallback(|| async { ServerError::NotFound("Route not found") })
        .with_state(state.clone());

    if let Some(limits) = &state.config.rate_limit {
        let limiter = Arc::new(RateLimiter::new(
            limits.max_requests as usize,
            Duration::from_secs(limits.window_secs),
        )
        .trust_proxy(limits.trust_proxy));
        router = router.layer(AxumMiddleware::from_fn_with_state(
            limiter,
            middleware::rate_limit,
        ));
    }

    router
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub async fn initialize_state() -> Result<AppState, Box<dyn std::error::Error>> {
    // read configuration file. let it in memory.
    let mut config = Configuration::default();
    if let Ok(path) = std::env::var("CONFIG_PATH") {
        config = config.path(PathBuf::from(path));
    }
    let config = config.read();

    let db = match &config.postgres {
        Some(postgres) => Database::postgres(postgres).await?,
        None => {
            tracing::warn!("missing `postgres` entry on `config.yaml` file, records are kept in memory");
            Database::memory()
        },
    };

    Ok(AppState::new(config, db, Arc::new(SystemClock))?)
}

#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};

    use super::*;

    #[tokio::test]
    async fn test_unknown_route() {
        let app = app(router::state());
        let response = make_request(None, app, Method::GET, "/api/unknown", String::new()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_global_rate_limit() {
        let mut state = router::state();
        let mut config = (*state.config).clone();
        config.rate_limit = Some(config::RateLimit {
            max_requests: 2,
            ..Default::default()
        });
        state.config = Arc::new(config);
        let app = app(state);

        for _ in 0..2 {
            let response =
                make_request(None, app.clone(), Method::GET, "/api/health", String::new()).await;
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = make_request(None, app, Method::GET, "/api/health", String::new()).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_rotating_forwarded_for_still_limited() {
        use axum::extract::Request;
        use tower::util::ServiceExt;

        let mut state = router::state();
        let mut config = (*state.config).clone();
        config.rate_limit = Some(config::RateLimit {
            max_requests: 2,
            ..Default::default()
        });
        state.config = Arc::new(config);
        let app = app(state);

        let mut statuses = Vec::new();
        for i in 0..10 {
            let request = Request::builder()
                .uri("/api/health")
                .header("x-forwarded-for", format!("10.0.0.{i}"))
                .body(axum::body::Body::empty())
                .unwrap();
            statuses.push(app.clone().oneshot(request).await.unwrap().status());
        }

        assert_eq!(statuses[..2], [StatusCode::OK; 2]);
        assert!(statuses[2..].iter().all(|s| *s == StatusCode::TOO_MANY_REQUESTS));
    }
}
