//! API error taxonomy and the JSON error envelope.

use crate::asset_store::StoreError;
use crate::credentials::IssuerError;
use crate::cursor::CursorError;
use crate::validation::ValidationError;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

pub type ApiResult<T> = Result<T, ApiError>;

tokio::task_local! {
    /// Id of the request being served, set by the request-id middleware
    pub static REQUEST_ID: String;
}

/// Request id of the current task, empty outside a request
pub fn current_request_id() -> String {
    REQUEST_ID.try_with(Clone::clone).unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),

    #[error("object-store client not available")]
    ObjectStoreUnavailable,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Object store error: {0}")]
    Issuer(#[from] IssuerError),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Public error code; every variant maps to exactly one
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::NotFound(_) => "NotFound",
            ApiError::Conflict(_) => "Conflict",
            ApiError::Internal(_)
            | ApiError::ObjectStoreUnavailable
            | ApiError::Store(_)
            | ApiError::Issuer(_) => "InternalError",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_)
            | ApiError::ObjectStoreUnavailable
            | ApiError::Store(_)
            | ApiError::Issuer(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to clients. Lower-layer details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            ApiError::Store(_) => "Database error".to_string(),
            ApiError::Issuer(_) => "Object store error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        let msg = match e {
            ValidationError::ContentTypeNotAllowed(_) => "Content type not allowed",
            ValidationError::InvalidSize { .. } => "File size exceeds limit",
        };
        ApiError::BadRequest(msg.to_string())
    }
}

impl From<CursorError> for ApiError {
    fn from(_: CursorError) -> Self {
        ApiError::bad_request("Invalid cursor")
    }
}

impl From<JsonRejection> for ApiError {
    fn from(_: JsonRejection) -> Self {
        ApiError::bad_request("Invalid request body")
    }
}

impl From<PathRejection> for ApiError {
    fn from(_: PathRejection) -> Self {
        ApiError::bad_request("Invalid image ID")
    }
}

impl From<QueryRejection> for ApiError {
    fn from(_: QueryRejection) -> Self {
        ApiError::bad_request("Invalid query parameters")
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    pub request_id: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let request_id = current_request_id();

        if status.is_server_error() {
            error!(error = %self, request_id = %request_id, "Request failed");
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                message: self.public_message(),
                request_id,
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::bad_request("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::not_found("x").status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::conflict("x").status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::ObjectStoreUnavailable.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ApiError::ObjectStoreUnavailable.code(), "InternalError");
    }

    #[test]
    fn test_lower_layer_details_hidden() {
        let err: ApiError = StoreError::Database(sqlx::Error::PoolTimedOut).into();
        assert_eq!(err.code(), "InternalError");
        assert_eq!(err.public_message(), "Database error");

        let err: ApiError = IssuerError::Head {
            key: "k".to_string(),
            message: "connection reset".to_string(),
        }
        .into();
        assert_eq!(err.public_message(), "Object store error");
    }

    #[test]
    fn test_validation_maps_to_bad_request() {
        let err: ApiError = ValidationError::ContentTypeNotAllowed("application/pdf".into()).into();
        assert_eq!(err.code(), "BadRequest");
        assert_eq!(err.to_string(), "Content type not allowed");
    }

    #[tokio::test]
    async fn test_request_id_scoped_to_task() {
        assert_eq!(current_request_id(), "");
        let seen = REQUEST_ID
            .scope("req-1".to_string(), async { current_request_id() })
            .await;
        assert_eq!(seen, "req-1");
    }
}
