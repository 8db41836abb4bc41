//! HTTP handlers, split by domain.

pub mod ai;
pub mod analyze;
pub mod chat;
pub mod docs;
pub mod health;
pub mod ws;

use crate::error::{ApiError, ApiResult};
use axum::body::Bytes;
use axum::extract::{multipart::MultipartRejection, Multipart};
use chrono::Utc;
use neonspark_core::{AiResponse, AiServiceManager, RequestConfig};
use tracing::debug;

/// RFC 3339 timestamp for response bodies.
pub(crate) fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// The `file` part of a multipart upload.
pub(crate) struct Upload {
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl Upload {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Pull the `file` field out of a multipart body.
pub(crate) async fn read_upload(
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Upload> {
    let mut multipart =
        multipart.map_err(|rejection| ApiError::new(rejection.status(), rejection.body_text()))?;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().map(String::from);
        let content_type = field.content_type().map(String::from);
        let bytes = field.bytes().await?;
        debug!(
            "Received upload {:?} ({:?}, {} bytes)",
            filename,
            content_type,
            bytes.len()
        );
        return Ok(Upload {
            filename,
            content_type,
            bytes,
        });
    }

    Err(ApiError::bad_request("No file uploaded"))
}

/// Wait on a request the way the legacy endpoints do: up to 30 seconds.
pub(crate) async fn wait_legacy(
    manager: &AiServiceManager,
    request_id: &str,
) -> Option<AiResponse> {
    manager
        .wait_for_completion(request_id, RequestConfig::LEGACY_MAX_WAIT)
        .await
}
