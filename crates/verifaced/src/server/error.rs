//! The boundary's error taxonomy and its mapping to HTTP responses.
//!
//! Every failure leaves the service as `{error: <kind>, message}` with a
//! status derived from the kind alone, so clients can dispatch on the kind
//! without parsing messages and the core's internal error types never leak.

use crate::engine::EngineError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use veriface_core::EmbedError;
use veriface_store::{IndexError, StoreError};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("no usable face detected in {0}")]
    NoFaceDetected(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("gallery entry already exists: {0}")]
    DuplicateId(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("embedder timed out")]
    Timeout,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::InvalidImage(_) => "invalid_image",
            ApiError::NoFaceDetected(_) => "no_face_detected",
            ApiError::NotFound(_) => "not_found",
            ApiError::DuplicateId(_) => "duplicate_id",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Storage(_) => "storage_error",
            ApiError::Config(_) => "config_error",
            ApiError::Timeout => "timeout",
            ApiError::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidImage(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NoFaceDetected(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::DuplicateId(_) => StatusCode::CONFLICT,
            ApiError::Timeout => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Storage(_) | ApiError::Config(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::warn!(kind = self.kind(), status = %status, "request failed: {self}");
        (
            status,
            Json(json!({ "error": self.kind(), "message": self.to_string() })),
        )
            .into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateId(id) => ApiError::DuplicateId(id),
            StoreError::NotFound(id) => ApiError::NotFound(id),
            StoreError::InvalidId(id) => ApiError::BadRequest(format!("invalid filename: {id}")),
            StoreError::Storage(_) | StoreError::Sqlite(_) | StoreError::Io(_) => {
                ApiError::Storage(err.to_string())
            }
        }
    }
}

impl From<EmbedError> for ApiError {
    fn from(err: EmbedError) -> Self {
        match err {
            EmbedError::InvalidImage(msg) => ApiError::InvalidImage(msg),
            EmbedError::Detector(_) | EmbedError::Recognizer(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<IndexError> for ApiError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::SchemeMismatch { .. } | IndexError::DimMismatch { .. } => {
                ApiError::Config(err.to_string())
            }
            IndexError::Store(store) => store.into(),
            // A record that failed to embed aborts the enclosing rebuild;
            // at the boundary that is a storage-level failure of the reload.
            IndexError::Embed { .. } => ApiError::Storage(err.to_string()),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Embed(embed) => embed.into(),
            EngineError::Rebuild(index) => index.into(),
            EngineError::Timeout(_) => ApiError::Timeout,
            EngineError::ChannelClosed => ApiError::Internal(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
