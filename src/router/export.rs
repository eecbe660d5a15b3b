//! Downloadable exports and share summaries.

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Json, Router, middleware};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServerError};
use crate::export::{self, ExportFormat};
use crate::user::User;
use crate::AppState;

const SHARE_INTRO: &str = "Check out my milk delivery summary:\n\n";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub format: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareLink {
    pub summary: String,
    pub share_text: String,
    pub filename: String,
}

fn format(value: Option<&str>) -> Result<ExportFormat> {
    match value.map(str::trim) {
        None | Some("") | Some("text") => Ok(ExportFormat::Text),
        Some("csv") => Ok(ExportFormat::Csv),
        Some(_) => Err(ServerError::invalid(
            "Invalid export format.",
            vec!["Invalid format. Use 'csv' or 'text'".to_owned()],
        )),
    }
}

pub async fn records(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<ExportQuery>,
) -> Result<impl IntoResponse> {
    let format = format(query.format.as_deref())?;
    let range = super::date_range(query.start_date.as_deref(), query.end_date.as_deref())?;

    let records = state.records.history(user.id, range).await?;
    let file = export::render(&records, range, format)?;
    tracing::debug!(user_id = %user.id, count = records.len(), filename = %file.filename, "records exported");

    Ok((
        [
            (header::CONTENT_TYPE, file.format.content_type().to_owned()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file.filename),
            ),
        ],
        file.data,
    ))
}

pub async fn share_link(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Query(query): Query<ExportQuery>,
) -> Result<Json<ShareLink>> {
    let range = super::date_range(query.start_date.as_deref(), query.end_date.as_deref())?;

    let records = state.records.history(user.id, range).await?;
    let file = export::render(&records, range, ExportFormat::Text)?;

    Ok(Json(ShareLink {
        share_text: format!("{SHARE_INTRO}{}", file.data),
        summary: file.data,
        filename: file.filename,
    }))
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/records", get(records))
        .route("/share-link", get(share_link))
        .route_layer(middleware::from_fn_with_state(
            state,
            crate::middleware::authenticate,
        ))
}
