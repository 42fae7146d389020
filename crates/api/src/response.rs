//! The JSON envelope wrapped around every query response.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ApiError;

/// Response body shared by successes and failures.
///
/// Successes carry `data`; failures carry `error`, `message`, `details` and
/// the request `path`.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub timestamp: DateTime<Utc>,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            timestamp: Utc::now(),
            status: StatusCode::OK.as_u16(),
            error: None,
            message: None,
            details: Vec::new(),
            path: None,
            data: Some(data),
        }
    }
}

impl Envelope<()> {
    pub fn failure(err: &ApiError, path: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            status: err.status().as_u16(),
            error: Some(err.code()),
            message: Some(err.public_message()),
            details: err.details().to_vec(),
            path: Some(path.to_string()),
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// Wraps a handler result in the envelope, logging failures by severity.
pub fn respond<T: Serialize>(path: &str, result: Result<T, ApiError>) -> Response {
    match result {
        Ok(data) => Envelope::success(data).into_response(),
        Err(err) => {
            match &err {
                ApiError::Internal(detail) => {
                    tracing::error!(%path, error = %detail, "internal server error");
                }
                ApiError::BadRequest { message, .. } => {
                    tracing::debug!(%path, %message, "rejected request");
                }
                ApiError::NotFound(_) => {}
            }
            Envelope::failure(&err, path).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_omits_error_fields() {
        let json = serde_json::to_value(Envelope::success(vec![1, 2])).unwrap();
        assert_eq!(json["status"], 200);
        assert_eq!(json["data"], serde_json::json!([1, 2]));
        for field in ["error", "message", "details", "path"] {
            assert!(json.get(field).is_none(), "{field}");
        }
        assert!(json["timestamp"].as_str().is_some());
    }

    #[test]
    fn failure_omits_data() {
        let err = ApiError::bad_request("Tags parameter is required");
        let json = serde_json::to_value(Envelope::failure(&err, "/products/search")).unwrap();
        assert_eq!(json["status"], 400);
        assert_eq!(json["error"], "BAD_REQUEST");
        assert_eq!(json["message"], "Tags parameter is required");
        assert_eq!(json["path"], "/products/search");
        assert!(json.get("data").is_none());
    }
}
