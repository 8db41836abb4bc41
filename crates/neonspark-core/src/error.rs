//! Error types for NeonSpark.
//!
//! Every fallible operation in the library returns [`NeonError`]. The HTTP
//! layer turns these into responses using [`NeonError::status_code`].

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the NeonSpark library.
#[derive(Debug, Error)]
pub enum NeonError {
    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Rate limited by {service}, retry after {retry_after_secs:?} seconds")]
    RateLimited {
        service: String,
        retry_after_secs: Option<u64>,
    },

    // Generative model errors
    #[error("Gemini API error: {message}")]
    Gemini {
        message: String,
        status_code: Option<u16>,
    },

    #[error("{message}")]
    ServiceUnavailable { message: String },

    // Request lifecycle errors
    #[error("Request {request_id} not found")]
    RequestNotFound { request_id: String },

    #[error("Request was cancelled")]
    Cancelled,

    // Validation errors
    #[error("{message}")]
    Validation { field: String, message: String },

    #[error("Unsupported file type: {extension}")]
    UnsupportedFile { extension: String },

    #[error("File too large: {size} bytes exceeds limit of {max} bytes")]
    PayloadTooLarge { size: u64, max: u64 },

    // OCR errors
    #[error("OCR failed: {message}")]
    Ocr { message: String },

    #[error("OCR engine unavailable: {message}")]
    OcrUnavailable { message: String },

    #[error("Image processing error: {message}")]
    Image { message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for NeonSpark operations.
pub type Result<T> = std::result::Result<T, NeonError>;

impl From<std::io::Error> for NeonError {
    fn from(err: std::io::Error) -> Self {
        NeonError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for NeonError {
    fn from(err: serde_json::Error) -> Self {
        NeonError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for NeonError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NeonError::Timeout(std::time::Duration::from_secs(0))
        } else {
            NeonError::Network {
                message: err.to_string(),
                cause: err.url().map(|u| u.to_string()),
            }
        }
    }
}

impl From<image::ImageError> for NeonError {
    fn from(err: image::ImageError) -> Self {
        NeonError::Image {
            message: err.to_string(),
        }
    }
}

impl NeonError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        NeonError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a validation error for a named field.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        NeonError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a service-unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        NeonError::ServiceUnavailable {
            message: message.into(),
        }
    }

    /// HTTP status code that best describes this error.
    ///
    /// - 400: bad input (validation, unsupported file, undecodable image)
    /// - 404: unknown request id
    /// - 408: timeout
    /// - 413: upload over the size limit
    /// - 429: rate limited
    /// - 499: cancelled by the client
    /// - 502: upstream model or network failure
    /// - 503: AI or OCR not configured
    /// - 500: everything else
    pub fn status_code(&self) -> u16 {
        match self {
            NeonError::Validation { .. }
            | NeonError::UnsupportedFile { .. }
            | NeonError::Image { .. } => 400,

            NeonError::RequestNotFound { .. } => 404,

            NeonError::Timeout(_) => 408,

            NeonError::PayloadTooLarge { .. } => 413,

            NeonError::RateLimited { .. } => 429,

            NeonError::Cancelled => 499,

            NeonError::Gemini { .. } | NeonError::Network { .. } => 502,

            NeonError::ServiceUnavailable { .. } | NeonError::OcrUnavailable { .. } => 503,

            _ => 500,
        }
    }

    /// Check if this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            NeonError::Network { .. } | NeonError::Timeout(_) | NeonError::RateLimited { .. } => {
                true
            }
            NeonError::Gemini {
                status_code: Some(code),
                ..
            } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NeonError::RequestNotFound {
            request_id: "abc".into(),
        };
        assert_eq!(err.to_string(), "Request abc not found");

        let err = NeonError::validation("prompt", "Prompt cannot be empty");
        assert_eq!(err.to_string(), "Prompt cannot be empty");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(NeonError::validation("limit", "too big").status_code(), 400);
        assert_eq!(
            NeonError::RequestNotFound {
                request_id: "x".into()
            }
            .status_code(),
            404
        );
        assert_eq!(NeonError::Cancelled.status_code(), 499);
        assert_eq!(NeonError::unavailable("no key").status_code(), 503);
        assert_eq!(
            NeonError::PayloadTooLarge { size: 10, max: 5 }.status_code(),
            413
        );
        assert_eq!(NeonError::Other("boom".into()).status_code(), 500);
    }

    #[test]
    fn test_retryable_errors() {
        assert!(NeonError::Timeout(std::time::Duration::from_secs(5)).is_retryable());
        assert!(NeonError::Gemini {
            message: "overloaded".into(),
            status_code: Some(503),
        }
        .is_retryable());
        assert!(!NeonError::Gemini {
            message: "bad key".into(),
            status_code: Some(400),
        }
        .is_retryable());
        assert!(!NeonError::Cancelled.is_retryable());
    }
}
