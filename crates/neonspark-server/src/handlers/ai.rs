//! Asynchronous AI request API under `/api/ai`.

use super::timestamp;
use crate::error::{ApiError, ApiResult, ErrorDetail};
use crate::server::AppState;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ConnectInfo, Path, Query, State,
    },
    http::StatusCode,
    Json,
};
use neonspark_core::{AiRequest, AiResponse, ProcessingStatus, RequestConfig, ServiceStatus};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubmitResponse {
    pub success: bool,
    pub request_id: String,
    pub status: String,
    pub message: String,
    pub estimated_completion: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ServiceStatusResponse {
    pub success: bool,
    pub service: ServiceStatus,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RequestStatusResponse {
    pub success: bool,
    pub request: AiResponse,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HistoryResponse {
    pub success: bool,
    pub count: usize,
    pub history: Vec<AiResponse>,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CancelResponse {
    pub success: bool,
    pub message: String,
    pub timestamp: String,
}

/// Submit a request for background processing.
#[utoipa::path(
    post,
    path = "/api/ai/process",
    tag = "ai",
    request_body = AiRequest,
    responses(
        (status = 200, description = "Request accepted", body = SubmitResponse),
        (status = 400, description = "Invalid prompt, priority, or timeout", body = ErrorDetail),
        (status = 429, description = "Rate limit exceeded", body = ErrorDetail),
        (status = 503, description = "AI service not available", body = ErrorDetail)
    )
)]
pub async fn process_request(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    body: Result<Json<AiRequest>, JsonRejection>,
) -> ApiResult<Json<SubmitResponse>> {
    let client_id = connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    if let Err(e) = state.rate_limiter.check(&client_id) {
        warn!("{}", e);
        return Err(ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded. Too many requests.",
        ));
    }

    let Json(request) = body?;
    if request.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("Prompt cannot be empty"));
    }

    let request_id = state.manager.process_request(request).await?;
    info!("AI request {} submitted for processing", request_id);

    Ok(Json(SubmitResponse {
        success: true,
        request_id,
        status: "submitted".to_string(),
        message: "Request submitted for processing".to_string(),
        estimated_completion: "2-5 seconds".to_string(),
    }))
}

/// Overall service counters.
#[utoipa::path(
    get,
    path = "/api/ai/status",
    tag = "ai",
    responses((status = 200, description = "Service status", body = ServiceStatusResponse))
)]
pub async fn service_status(State(state): State<Arc<AppState>>) -> Json<ServiceStatusResponse> {
    Json(ServiceStatusResponse {
        success: true,
        service: state.manager.get_service_status().await,
        timestamp: timestamp(),
    })
}

#[utoipa::path(
    get,
    path = "/api/ai/status/{request_id}",
    tag = "ai",
    params(("request_id" = String, Path, description = "Id returned by /api/ai/process")),
    responses(
        (status = 200, description = "Request record", body = RequestStatusResponse),
        (status = 404, description = "Unknown request", body = ErrorDetail)
    )
)]
pub async fn request_status(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> ApiResult<Json<RequestStatusResponse>> {
    let record = state
        .manager
        .get_request_status(&request_id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("Request {} not found", request_id)))?;

    Ok(Json(RequestStatusResponse {
        success: true,
        request: record,
        timestamp: timestamp(),
    }))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// Maximum records to return (default 50, at most 200)
    limit: Option<usize>,
    /// Only return records in this state
    status: Option<ProcessingStatus>,
}

#[utoipa::path(
    get,
    path = "/api/ai/history",
    tag = "ai",
    params(HistoryQuery),
    responses(
        (status = 200, description = "History records, newest first", body = HistoryResponse),
        (status = 400, description = "Limit above 200", body = ErrorDetail)
    )
)]
pub async fn history(
    State(state): State<Arc<AppState>>,
    query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<Json<HistoryResponse>> {
    let Query(query) = query?;
    let limit = query.limit.unwrap_or(RequestConfig::HISTORY_DEFAULT_LIMIT);
    if limit > RequestConfig::HISTORY_MAX_LIMIT {
        return Err(ApiError::bad_request(format!(
            "Limit cannot exceed {}",
            RequestConfig::HISTORY_MAX_LIMIT
        )));
    }

    let history = state
        .manager
        .get_processing_history(limit, query.status)
        .await;

    Ok(Json(HistoryResponse {
        success: true,
        count: history.len(),
        history,
        timestamp: timestamp(),
    }))
}

#[utoipa::path(
    delete,
    path = "/api/ai/cancel/{request_id}",
    tag = "ai",
    params(("request_id" = String, Path, description = "Id returned by /api/ai/process")),
    responses(
        (status = 200, description = "Cancelled", body = CancelResponse),
        (status = 404, description = "Unknown or finished request", body = ErrorDetail)
    )
)]
pub async fn cancel_request(
    State(state): State<Arc<AppState>>,
    Path(request_id): Path<String>,
) -> ApiResult<Json<CancelResponse>> {
    if !state.manager.cancel_request(&request_id).await {
        return Err(ApiError::not_found(format!(
            "Request {} not found or not active",
            request_id
        )));
    }

    Ok(Json(CancelResponse {
        success: true,
        message: format!("Request {} cancelled successfully", request_id),
        timestamp: timestamp(),
    }))
}
