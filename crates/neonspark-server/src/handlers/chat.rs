//! Legacy synchronous chat endpoint.

use super::wait_legacy;
use crate::error::{ApiError, ApiResult, ErrorDetail};
use crate::server::AppState;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use neonspark_core::{AiRequest, NeonError, ProcessingStatus};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub thinking_mode: bool,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ChatResponse {
    pub response: String,
    #[schema(value_type = Vec<Object>)]
    pub thinking_steps: Vec<Value>,
    pub session_id: Option<String>,
    pub processing_time: Option<f64>,
    pub model: String,
}

pub(crate) const NOT_CONFIGURED: &str = "AI service not configured. Please set GEMINI_API_KEY.";

/// Submit the message and block until the model answers or 30 s pass.
#[utoipa::path(
    post,
    path = "/api/chat",
    tag = "legacy",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Model response", body = ChatResponse),
        (status = 408, description = "No answer within 30 seconds", body = ErrorDetail),
        (status = 499, description = "Request was cancelled", body = ErrorDetail),
        (status = 500, description = "Processing failed", body = ErrorDetail),
        (status = 503, description = "GEMINI_API_KEY is not configured", body = ErrorDetail)
    )
)]
pub async fn chat(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Json<ChatResponse>> {
    let Json(chat) = body?;
    if !state.manager.is_configured() {
        return Err(ApiError::unavailable(NOT_CONFIGURED));
    }

    let request = AiRequest::new(chat.message)
        .with_parameter("thinking_mode", json!(chat.thinking_mode))
        .with_parameter("session_id", json!(chat.session_id))
        .with_parameter("temperature", json!(0.7));
    let request_id = state.manager.process_request(request).await?;

    let record = match wait_legacy(&state.manager, &request_id).await {
        Some(record) if record.status.is_terminal() => record,
        _ => return Err(ApiError::new(StatusCode::REQUEST_TIMEOUT, "Request timeout")),
    };

    match record.status {
        ProcessingStatus::Failed => {
            let detail = record
                .error
                .unwrap_or_else(|| "AI processing failed".to_string());
            error!("Chat request {} failed: {}", request_id, detail);
            Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, detail))
        }
        ProcessingStatus::Cancelled => Err(NeonError::Cancelled.into()),
        _ => {
            let thinking_steps = record
                .metadata
                .get("thinking_steps")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            Ok(Json(ChatResponse {
                response: record
                    .result
                    .unwrap_or_else(|| "No response generated".to_string()),
                thinking_steps,
                session_id: chat.session_id,
                processing_time: record.processing_time,
                model: state.manager.model().to_string(),
            }))
        }
    }
}
