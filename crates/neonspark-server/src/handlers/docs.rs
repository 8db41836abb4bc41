//! OpenAPI description served at `/api/docs`.

use super::ai::{
    CancelResponse, HistoryResponse, RequestStatusResponse, ServiceStatusResponse,
    SubmitResponse,
};
use super::analyze::{DocumentAnalysis, FileUpload, ImageAnalysis, OcrResult};
use super::chat::{ChatRequest, ChatResponse};
use super::health::HealthStatus;
use crate::error::{ErrorDetail, InternalErrorBody};
use axum::Json;
use neonspark_core::{AiRequest, AiResponse, ProcessingStatus, ServiceStatus};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "NeonSpark AI Backend",
        version = "2.1.0",
        description = "AI-powered backend with Gemini integration and Tesseract OCR"
    ),
    tags(
        (name = "health", description = "Liveness and dependency health"),
        (name = "legacy", description = "Synchronous chat and image analysis"),
        (name = "documents", description = "OCR and document analysis"),
        (name = "ai", description = "Asynchronous AI request processing"),
        (name = "realtime", description = "WebSocket status and request updates")
    ),
    paths(
        super::health::liveness,
        super::health::health,
        super::chat::chat,
        super::analyze::analyze_image,
        super::analyze::ocr,
        super::analyze::analyze_document,
        super::ai::process_request,
        super::ai::service_status,
        super::ai::request_status,
        super::ai::history,
        super::ai::cancel_request,
        super::health::ai_health,
        super::ws::websocket,
    ),
    components(schemas(
        AiRequest,
        AiResponse,
        ProcessingStatus,
        ServiceStatus,
        ChatRequest,
        ChatResponse,
        FileUpload,
        ImageAnalysis,
        OcrResult,
        DocumentAnalysis,
        SubmitResponse,
        ServiceStatusResponse,
        RequestStatusResponse,
        HistoryResponse,
        CancelResponse,
        HealthStatus,
        ErrorDetail,
        InternalErrorBody,
    ))
)]
pub struct ApiDoc;

pub async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
