//! HTTP API.
pub mod auth;
pub mod export;
pub mod milk;
pub mod status;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::Json;
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::ServerError;
use crate::record::DateRange;
use crate::validation::parse_date;

/// JSON body checked with [`Validate`] before reaching the handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct Valid<T>(pub T);

impl<T, S> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}

/// Range from optional `startDate` and `endDate` query values.
pub(crate) fn date_range(start: Option<&str>, end: Option<&str>) -> Result<DateRange, ServerError> {
    let bound = |value: Option<&str>, name: &str| match value.filter(|v| !v.trim().is_empty()) {
        None => Ok(None),
        Some(value) => parse_date(value).map(Some).ok_or_else(|| {
            ServerError::invalid("Invalid date range.", vec![format!("Invalid {name}")])
        }),
    };

    Ok(DateRange::new(bound(start, "startDate")?, bound(end, "endDate")?))
}

/// MUST NEVER be used in production.
#[cfg(test)]
pub(crate) fn state() -> crate::AppState {
    use std::sync::Arc;

    use crate::clock::FixedClock;

    let mut config = crate::config::Configuration::default();
    config.argon2 = Some(crate::config::Argon2 {
        memory_cost: 1024,
        iterations: 1,
        parallelism: 1,
        hash_length: 32,
    });
    config.token.secret = Some("test".into());
    crate::AppState::new(
        Arc::new(config),
        crate::database::Database::memory(),
        Arc::new(FixedClock::at("2024-03-15T09:30:00Z")),
    )
    .expect("cannot build test state")
}
