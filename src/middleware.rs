//! Middlewares for routes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::{Result, ServerError};
use crate::limits::RateLimiter;
use crate::AppState;

const BEARER: &str = "Bearer ";
const FORWARDED_FOR: &str = "x-forwarded-for";

/// Resolve `Authorization: Bearer <jwt>` to an active user, inserted into
/// request extensions.
pub async fn authenticate(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix(BEARER))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(ServerError::Unauthorized)?;

    let user = state.users.authenticate(token).await?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}

/// Peer address, or the first `X-Forwarded-For` entry when the proxy is
/// trusted.
fn client_ip(req: &Request, trust_proxy: bool) -> String {
    let forwarded = trust_proxy
        .then(|| req.headers().get(FORWARDED_FOR))
        .flatten()
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    match forwarded {
        Some(ip) => ip.to_owned(),
        None => req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".to_owned()),
    }
}

/// Reject clients above the limiter's quota with `429`.
pub async fn rate_limit(State(limiter): State<Arc<RateLimiter>>, req: Request, next: Next) -> Result<Response> {
    let ip = client_ip(&req, limiter.trusts_proxy());
    if !limiter.check(&ip) {
        tracing::warn!(%ip, "rate limit exceeded");
        return Err(ServerError::RateLimited);
    }

    Ok(next.run(req).await)
}
