//! Error handler for MilkIt.

use axum::extract::rejection::JsonRejection;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use sqlx::Error as SQLxError;
use thiserror::Error;
use validator::ValidationErrors;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Errors surfaced by a record or user store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique key already holds a value: `(user, date)`, `username` or
    /// `phone`.
    #[error("duplicate value for unique key `{0}`")]
    Conflict(&'static str),

    #[error("row not found")]
    NotFound,

    #[error("SQL request failed: {0}")]
    Sql(#[from] SQLxError),
}

impl StoreError {
    /// Map unique violations to [`StoreError::Conflict`] using the
    /// constraint name.
    pub fn from_sql(err: SQLxError, constraints: &[(&str, &'static str)]) -> Self {
        if let SQLxError::Database(db) = &err {
            if db.is_unique_violation() {
                let key = db
                    .constraint()
                    .and_then(|name| {
                        constraints.iter().find(|(c, _)| *c == name).map(|(_, k)| *k)
                    })
                    .unwrap_or("unique");
                return StoreError::Conflict(key);
            }
        }
        StoreError::Sql(err)
    }
}

/// Validation errors of one entry of a batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryErrors {
    pub index: usize,
    pub errors: Vec<String>,
}

/// Enum representing server-side errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("validation error occurred")]
    Validation(#[from] ValidationErrors),

    /// Rule violations, each reason kept.
    #[error("{title}")]
    Invalid { title: String, reasons: Vec<String> },

    /// Batch refused as a whole because some entries are invalid.
    #[error("validation errors in records")]
    BatchRejected(Vec<EntryErrors>),

    #[error(transparent)]
    Axum(#[from] JsonRejection),

    #[error("{0}")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid 'Authorization' header")]
    Unauthorized,

    #[error("{0}")]
    InvalidCredentials(&'static str),

    #[error("too many requests, please try again later")]
    RateLimited,

    #[error("internal server error, {details}")]
    Internal {
        details: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl ServerError {
    pub fn invalid(title: &str, reasons: Vec<String>) -> Self {
        ServerError::Invalid {
            title: title.to_owned(),
            reasons,
        }
    }

    pub fn internal<E>(details: &str, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ServerError::Internal {
            details: details.to_owned(),
            source: Some(Box::new(err)),
        }
    }
}

/// Structure for detailed error responses.
#[derive(Debug, Serialize)]
pub struct ResponseError {
    r#type: Option<String>,
    title: String,
    status: u16,
    detail: String,
    instance: Option<String>,
    errors: Option<ErrorDetails>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ErrorDetails {
    Fields(Vec<FieldError>),
    Reasons(Vec<String>),
    Entries(Vec<EntryErrors>),
}

impl ResponseError {
    /// Update error status code.
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code.as_u16();
        self
    }

    /// Update `title` field.
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    /// Add detailed error.
    pub fn details(mut self, description: &str) -> Self {
        self.detail = description.into();
        self
    }

    /// Automatically add errors field.
    fn errors(mut self, errors: ErrorDetails) -> Self {
        self.errors = Some(errors);
        self
    }

    /// Transform [`ResponseError`] into axum [`Response`].
    pub fn into_response(self) -> std::result::Result<Response, axum::http::Error> {
        if let Ok(body) = serde_json::to_string(&self) {
            Response::builder()
                .status(self.status)
                .header(header::CONTENT_TYPE, "application/json")
                .body(body.into())
        } else {
            Ok(internal_server_error())
        }
    }
}

impl Default for ResponseError {
    fn default() -> Self {
        Self {
            r#type: None,
            title: "Internal server error.".to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            detail: String::default(),
            instance: None,
            errors: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct FieldError {
    field: String,
    message: String,
}

fn parse_validation_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    errors
        .field_errors()
        .iter()
        .flat_map(|(field, issues)| {
            issues.iter().map(move |issue| FieldError {
                field: field.to_string(),
                message: issue
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| issue.to_string()),
            })
        })
        .collect()
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let response = ResponseError::default()
            .title("There were validation errors with your request.")
            .details(&self.to_string())
            .status(StatusCode::BAD_REQUEST);

        let response = match &self {
            ServerError::Validation(validation_errors) => {
                response.errors(ErrorDetails::Fields(parse_validation_errors(validation_errors)))
            },

            ServerError::Invalid { title, reasons } => response
                .title(title)
                .errors(ErrorDetails::Reasons(reasons.clone())),

            ServerError::BatchRejected(entries) => response
                .title("Validation errors in records.")
                .errors(ErrorDetails::Entries(entries.clone())),

            ServerError::NotFound(_) => response
                .title("Resource not found.")
                .status(StatusCode::NOT_FOUND),

            ServerError::Conflict(_) | ServerError::Store(StoreError::Conflict(_)) => response
                .title("Resource already exists.")
                .status(StatusCode::CONFLICT),

            ServerError::Store(StoreError::NotFound) => response
                .title("Resource not found.")
                .status(StatusCode::NOT_FOUND),

            ServerError::Store(StoreError::Sql(err)) => {
                tracing::error!(error = %err, "store request failed");

                ResponseError::default()
            },

            ServerError::Unauthorized => response
                .title("Missing or invalid 'Authorization' header.")
                .status(StatusCode::UNAUTHORIZED),

            ServerError::InvalidCredentials(_) => response
                .title("Invalid credentials.")
                .status(StatusCode::UNAUTHORIZED),

            ServerError::RateLimited => response
                .title("Rate limit exceeded.")
                .status(StatusCode::TOO_MANY_REQUESTS),

            ServerError::Internal { details, source } => {
                tracing::error!(err = ?source, %details, "server returned 500 status");

                ResponseError::default()
            },

            ServerError::Axum(_) => response,
        };

        response
            .into_response()
            .unwrap_or_else(|_| internal_server_error())
    }
}

fn internal_server_error() -> Response {
    Response::builder()
        .status(StatusCode::INTERNAL_SERVER_ERROR)
        .header(header::CONTENT_TYPE, "application/json")
        .body(
            serde_json::json!({
                "type": null,
                "title": "Internal server error.",
                "status": StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
                "detail": null,
                "instance": null,
                "errors": null,
            })
            .to_string()
            .into(),
        )
        .unwrap_or_else(|_| Response::new("Internal server error".into()))
}
