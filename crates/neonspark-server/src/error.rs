//! HTTP error responses.
//!
//! Expected failures render as `{"detail": "..."}` with their own status.
//! Internal failures are tagged with [`InternalError`] and rewritten by
//! [`internal_error_middleware`] into the full diagnostic body, which needs
//! the request path.

use axum::{
    extract::{
        multipart::MultipartError,
        rejection::{JsonRejection, QueryRejection},
        Request,
    },
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use neonspark_core::{AppConfig, NeonError};
use serde::{Deserialize, Serialize};
use std::any::Any;
use tracing::error;
use utoipa::ToSchema;

/// Body of every expected error response.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    pub detail: String,
}

/// Body returned for unhandled errors and panics.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct InternalErrorBody {
    pub error: String,
    pub detail: String,
    pub timestamp: String,
    pub path: String,
    pub backend_version: String,
}

/// Marker attached to responses for unhandled errors.
#[derive(Debug, Clone)]
pub struct InternalError(pub String);

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
    internal: bool,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
            internal: false,
        }
    }

    /// An unexpected failure, rendered by [`internal_error_middleware`].
    pub fn internal(detail: impl Into<String>) -> Self {
        Self {
            internal: true,
            ..Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail)
    }

    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, detail)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<NeonError> for ApiError {
    fn from(err: NeonError) -> Self {
        match StatusCode::from_u16(err.status_code()) {
            Ok(status) if status != StatusCode::INTERNAL_SERVER_ERROR => {
                Self::new(status, err.to_string())
            }
            _ => Self::internal(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self::new(err.status(), err.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.internal {
            let mut response = self.status.into_response();
            response.extensions_mut().insert(InternalError(self.detail));
            return response;
        }
        (self.status, Json(ErrorDetail { detail: self.detail })).into_response()
    }
}

/// Replace responses tagged with [`InternalError`] by the diagnostic body.
pub async fn internal_error_middleware(request: Request, next: Next) -> Response {
    let path = request.uri().to_string();
    let response = next.run(request).await;

    match response.extensions().get::<InternalError>() {
        Some(InternalError(detail)) => {
            error!("Unhandled error on {}: {}", path, detail);
            internal_error_body(detail, &path)
        }
        None => response,
    }
}

fn internal_error_body(detail: &str, path: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(InternalErrorBody {
            error: "Internal server error".to_string(),
            detail: detail.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            path: path.to_string(),
            backend_version: AppConfig::VERSION.to_string(),
        }),
    )
        .into_response()
}

/// Panic handler for `CatchPanicLayer`; the middleware above adds the path.
pub fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "handler panicked".to_string()
    };

    let mut response = StatusCode::INTERNAL_SERVER_ERROR.into_response();
    response.extensions_mut().insert(InternalError(detail));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_follows_core_error() {
        let err: ApiError = NeonError::RequestNotFound {
            request_id: "abc".into(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err: ApiError = NeonError::Cancelled.into();
        assert_eq!(err.status().as_u16(), 499);
    }

    #[test]
    fn test_internal_errors_are_tagged() {
        let response: Response = ApiError::from(NeonError::Other("boom".into())).into_response();
        let tag = response.extensions().get::<InternalError>().unwrap();
        assert_eq!(tag.0, "boom");

        let response = ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "AI processing failed")
            .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.extensions().get::<InternalError>().is_none());
    }
}
