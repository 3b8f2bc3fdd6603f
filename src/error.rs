//! Error taxonomy for the relay.
//!
//! Every variant maps to a generic 500 on the wire. The detailed cause goes
//! to the log, never to the caller.

use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Daemon unreachable: {0}")]
    Unreachable(#[source] reqwest::Error),

    #[error("Daemon returned {status}: {body}")]
    UpstreamStatus { status: StatusCode, body: String },

    #[error("Failed to decode daemon response: {0}")]
    Decode(#[source] reqwest::Error),

    #[error("Failed to spawn {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

/// A [`RelayError`] paired with the message the caller is allowed to see.
#[derive(Debug)]
pub struct ApiError {
    pub source: RelayError,
    pub detail: &'static str,
}

impl ApiError {
    pub fn new(source: RelayError, detail: &'static str) -> Self {
        Self { source, detail }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.source, "{}", self.detail);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody {
                detail: self.detail.to_string(),
            }),
        )
            .into_response()
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        ApiError::new(self, "Internal server error").into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_detail_is_generic() {
        let err = RelayError::UpstreamStatus {
            status: StatusCode::NOT_FOUND,
            body: "model 'nope' not found".to_string(),
        };
        let resp = ApiError::new(err, "Failed to retrieve models").into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["detail"], "Failed to retrieve models");
    }

    #[tokio::test]
    async fn test_spawn_error_maps_to_500() {
        let err = RelayError::Spawn {
            program: PathBuf::from("/no/such/ollama"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.to_string().contains("/no/such/ollama"));

        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(resp.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], br#"{"detail":"Internal server error"}"#);
    }
}
