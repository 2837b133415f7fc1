//!
//! src/errors.rs  Andrew Belles  Oct 2025
//!
//! Defines enums and methods of error conversion
//! for errors the sorter uses, plus their mapping onto http responses
//!
//!

use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::llm::LlmError;

#[derive(Error, Debug)]
pub enum SorterError {
    #[error("config error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("rate limited: retry {0:?}")]
    RateLimited(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("db error: {0}")]
    Db(String),
    #[error("model error: {0}")]
    Model(String),
    #[error("classification failed: {0}")]
    ClassificationFailed(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error)
}

impl From<reqwest::Error> for SorterError {
    fn from(e: reqwest::Error) -> Self { SorterError::Http(e.to_string()) }
}

impl From<serde_json::Error> for SorterError {
    fn from(e: serde_json::Error) -> Self { SorterError::Parse(e.to_string()) }
}

impl From<sqlx::Error> for SorterError {
    fn from(e: sqlx::Error) -> Self { SorterError::Db(e.to_string()) }
}

impl From<LlmError> for SorterError {
    fn from(e: LlmError) -> Self { SorterError::Model(e.to_string()) }
}

impl From<JsonRejection> for SorterError {
    fn from(e: JsonRejection) -> Self { SorterError::BadRequest(e.body_text()) }
}

impl From<QueryRejection> for SorterError {
    fn from(e: QueryRejection) -> Self { SorterError::BadRequest(e.body_text()) }
}

impl SorterError {
    pub fn status(&self) -> StatusCode {
        match self {
            SorterError::BadRequest(_) => StatusCode::BAD_REQUEST,
            SorterError::NotFound(_) => StatusCode::NOT_FOUND,
            SorterError::Http(_)
                | SorterError::RateLimited(_)
                | SorterError::Model(_)
                | SorterError::ClassificationFailed(_) => StatusCode::BAD_GATEWAY,
            SorterError::Config(_)
                | SorterError::Parse(_)
                | SorterError::Db(_)
                | SorterError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl IntoResponse for SorterError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = %status, "api.error");
        } else {
            tracing::warn!(error = %self, status = %status, "api.error");
        }
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_failures_map_to_bad_gateway() {
        assert_eq!(SorterError::Http("boom".into()).status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            SorterError::from(LlmError::Timeout).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            SorterError::BadRequest("num_categories".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn error_body_is_json() {
        let response = SorterError::NotFound("playlist-x".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "not found: playlist-x");
    }
}
