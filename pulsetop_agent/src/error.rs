//! Error types for collectors and the HTTP pass-through routes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Failures a collector can report. The aggregator turns these into snapshot error strings.
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}")]
    ExitStatus { command: String, status: String },

    #[error("`{command}` produced no usable rows")]
    NoRows { command: String },

    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("all process listing commands failed: {}", .0.join("; "))]
    Exhausted(Vec<String>),

    #[error("{collector} collector task failed: {reason}")]
    Task {
        collector: &'static str,
        reason: String,
    },
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
}

/// Errors surfaced by the HTTP routes.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Collector(#[from] CollectorError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Collector(_) => (StatusCode::SERVICE_UNAVAILABLE, "collector_unavailable"),
        };
        let body = ErrorResponse {
            error: kind,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausted_lists_every_attempt() {
        let e = CollectorError::Exhausted(vec!["ps -eo: boom".into(), "ps aux: nope".into()]);
        assert_eq!(
            e.to_string(),
            "all process listing commands failed: ps -eo: boom; ps aux: nope"
        );
    }

    #[test]
    fn api_errors_map_to_status_codes() {
        let bad = ApiError::BadRequest("unknown sort key".into()).into_response();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
        let down = ApiError::from(CollectorError::Exhausted(vec![])).into_response();
        assert_eq!(down.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
