//! Upload endpoints: image analysis, OCR, and document analysis.

use super::chat::NOT_CONFIGURED;
use super::{read_upload, wait_legacy};
use crate::error::{ApiError, ApiResult, ErrorDetail};
use crate::server::AppState;
use axum::{
    extract::{multipart::MultipartRejection, Multipart, State},
    http::StatusCode,
    Json,
};
use neonspark_core::{AiRequest, InlineImage, ProcessingStatus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

/// Multipart form with a single `file` part.
#[derive(ToSchema)]
#[allow(dead_code)]
pub struct FileUpload {
    #[schema(value_type = String, format = Binary)]
    file: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ImageAnalysis {
    pub analysis: Option<String>,
    pub filename: String,
    pub processing_time: Option<f64>,
    pub request_id: String,
    pub model: String,
    #[schema(value_type = Object)]
    pub metadata: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OcrResult {
    pub text: String,
    pub filename: Option<String>,
    pub characters: usize,
    /// Only set for PDFs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pages: Option<usize>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DocumentAnalysis {
    pub text: String,
    pub analysis: String,
    pub filename: Option<String>,
}

/// Describe an uploaded image with the vision model.
#[utoipa::path(
    post,
    path = "/api/analyze-image",
    tag = "legacy",
    request_body(content = FileUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Image analysis", body = ImageAnalysis),
        (status = 400, description = "Not an image or unsupported extension", body = ErrorDetail),
        (status = 413, description = "File too large", body = ErrorDetail),
        (status = 500, description = "Analysis failed", body = ErrorDetail),
        (status = 503, description = "GEMINI_API_KEY is not configured", body = ErrorDetail)
    )
)]
pub async fn analyze_image(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<ImageAnalysis>> {
    let upload = read_upload(multipart).await?;
    state.uploads.validate_image(
        upload.filename.as_deref(),
        upload.content_type.as_deref(),
        upload.size(),
    )?;
    if !state.manager.is_configured() {
        return Err(ApiError::unavailable(NOT_CONFIGURED));
    }

    let filename = upload.filename.clone().unwrap_or_default();
    let content_type = upload.content_type.clone().unwrap_or_default();
    let request = AiRequest::new(format!(
        "Analyze this image in detail. Describe what you see, identify objects, text, \
         colors, and any other notable features. Image filename: {}",
        filename
    ))
    .with_parameter("type", json!("image_analysis"))
    .with_parameter("filename", json!(filename))
    .with_parameter("content_type", json!(content_type))
    .with_parameter("size", json!(upload.size()))
    .with_parameter("model", json!(state.manager.model()))
    .with_image(InlineImage {
        mime_type: content_type,
        data: upload.bytes.to_vec(),
    });

    let request_id = state.manager.process_request(request).await?;
    let record = match wait_legacy(&state.manager, &request_id).await {
        Some(record) if record.status == ProcessingStatus::Completed => record,
        Some(record) => {
            let detail = record.error.unwrap_or_else(|| "Analysis failed".to_string());
            return Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, detail));
        }
        None => {
            return Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Analysis failed",
            ))
        }
    };

    Ok(Json(ImageAnalysis {
        analysis: record.result,
        filename,
        processing_time: record.processing_time,
        request_id,
        model: state.manager.model().to_string(),
        metadata: record.metadata,
    }))
}

/// Extract text from an image or PDF.
#[utoipa::path(
    post,
    path = "/api/ocr",
    tag = "documents",
    request_body(content = FileUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Extracted text", body = OcrResult),
        (status = 400, description = "Unsupported file", body = ErrorDetail),
        (status = 503, description = "Tesseract is not available", body = ErrorDetail)
    )
)]
pub async fn ocr(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<OcrResult>> {
    let upload = read_upload(multipart).await?;
    let kind = state.uploads.validate_document(
        upload.filename.as_deref(),
        upload.content_type.as_deref(),
        upload.size(),
    )?;

    let (text, pages) = state.analyzer.extract_text(&upload.bytes, kind).await?;
    let characters = text.chars().count();
    info!(
        "OCR extracted {} characters from {:?}",
        characters, upload.filename
    );

    Ok(Json(OcrResult {
        text,
        filename: upload.filename,
        characters,
        pages,
    }))
}

/// OCR a document, then have the model analyze the text.
#[utoipa::path(
    post,
    path = "/api/analyze-document",
    tag = "documents",
    request_body(content = FileUpload, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Text and analysis", body = DocumentAnalysis),
        (status = 400, description = "Unsupported file", body = ErrorDetail),
        (status = 503, description = "OCR or Gemini is not available", body = ErrorDetail)
    )
)]
pub async fn analyze_document(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<DocumentAnalysis>> {
    let upload = read_upload(multipart).await?;
    let kind = state.uploads.validate_document(
        upload.filename.as_deref(),
        upload.content_type.as_deref(),
        upload.size(),
    )?;
    if !state.manager.is_configured() {
        return Err(ApiError::unavailable(NOT_CONFIGURED));
    }

    let (text, _) = state.analyzer.extract_text(&upload.bytes, kind).await?;
    let analysis = state.analyzer.analyze_content(&text).await?;

    Ok(Json(DocumentAnalysis {
        text,
        analysis,
        filename: upload.filename,
    }))
}
