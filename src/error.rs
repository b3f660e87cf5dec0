use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Failures reported by the extraction engine itself.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {limit:?}")]
    Timeout {
        program: String,
        limit: std::time::Duration,
    },

    /// Non-zero exit; carries the engine's last diagnostic line.
    #[error("{0}")]
    Failed(String),

    #[error("could not parse engine metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Outcomes of the extraction and download adapters that end a request.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{0}")]
    InvalidInput(&'static str),

    #[error("{0}")]
    Extraction(#[source] EngineError),

    #[error("Download error: {0}")]
    Download(#[source] EngineError),

    #[error("No file produced")]
    NoOutputProduced,

    #[error("scratch directory unavailable: {0}")]
    Scratch(#[source] std::io::Error),
}

impl FetchError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorBody {
    Json,
    Text,
}

#[derive(Debug, Serialize)]
struct JsonErrorBody {
    error: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            body: ErrorBody::Json,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            body: ErrorBody::Json,
        }
    }

    pub fn as_text(mut self) -> Self {
        self.body = ErrorBody::Text;
        self
    }
}

impl From<FetchError> for ApiError {
    fn from(error: FetchError) -> Self {
        Self {
            status: error.status(),
            message: error.to_string(),
            body: ErrorBody::Json,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.body {
            ErrorBody::Json => (
                self.status,
                Json(JsonErrorBody {
                    error: self.message,
                }),
            )
                .into_response(),
            ErrorBody::Text => (
                self.status,
                [(
                    CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                )],
                self.message,
            )
                .into_response(),
        }
    }
}
