//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use query::QueryError;
use thiserror::Error;

/// Message returned for every internal failure. Details only go to the logs.
pub const INTERNAL_MESSAGE: &str = "An internal error occurred";

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found.
    #[error("{0}")]
    NotFound(String),
    /// Bad request from the client.
    #[error("{message}")]
    BadRequest {
        message: String,
        details: Vec<String>,
    },
    /// Internal server error. The payload is logged, never returned.
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest {
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code of the envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest { .. } => "BAD_REQUEST",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// The message shown to the client.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Internal(_) => INTERNAL_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }

    pub fn details(&self) -> &[String] {
        match self {
            ApiError::BadRequest { details, .. } => details,
            _ => &[],
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            QueryError::InvalidTags(parse) => ApiError::BadRequest {
                message: "Invalid tags parameter".to_string(),
                details: vec![parse.to_string()],
            },
            other => ApiError::Internal(other.to_string()),
        }
    }
}
