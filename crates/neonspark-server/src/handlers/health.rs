//! Health endpoints.

use super::timestamp;
use crate::server::AppState;
use axum::{extract::State, Json};
use neonspark_core::AppConfig;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub version: String,
    pub timestamp: String,
}

impl HealthStatus {
    fn healthy(service: &str, version: &str) -> Self {
        Self {
            status: "healthy".to_string(),
            service: service.to_string(),
            version: version.to_string(),
            timestamp: timestamp(),
        }
    }
}

/// Liveness check for the hosting platform.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses((status = 200, description = "Service is up", body = HealthStatus))
)]
pub async fn liveness() -> Json<HealthStatus> {
    Json(HealthStatus::healthy(AppConfig::BACKEND_NAME, AppConfig::VERSION))
}

/// Full health report: AI service, Gemini, WebSocket, OCR, and memory.
#[utoipa::path(
    get,
    path = "/api/health",
    tag = "health",
    responses((status = 200, description = "Health report; `status` is healthy or degraded", body = Value))
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let service = state.manager.get_service_status().await;
    let configured = state.manager.is_configured();

    let ocr = match state.analyzer.ocr() {
        Some(engine) => json!({
            "available": true,
            "engine": engine.name(),
            "version": engine.version(),
            "tessdata": state.tessdata,
        }),
        None => json!({
            "available": false,
            "version": null,
            "tessdata": state.tessdata,
        }),
    };

    Json(json!({
        "status": if service.status == "healthy" { "healthy" } else { "degraded" },
        "timestamp": timestamp(),
        "backend": format!("{} v{}", AppConfig::BACKEND_NAME, AppConfig::VERSION),
        "ai_service": {
            "status": service.status,
            "model": service.model,
            "total_requests": service.total_requests,
            "active_requests": service.active_requests,
            "success_rate": service.success_rate,
            "uptime": service.uptime,
        },
        "gemini": {
            "status": if configured { "configured" } else { "not_configured" },
            "api_key_configured": configured,
            "model": state.settings.gemini_model,
        },
        "websocket": {
            "active_connections": state.hub.connection_count().await,
            "status": "active",
        },
        "ocr": ocr,
        "memory": state.monitor.snapshot(),
    }))
}

/// Health check for the `/api/ai` routes.
#[utoipa::path(
    get,
    path = "/api/ai/health",
    tag = "ai",
    responses((status = 200, description = "Router is up", body = HealthStatus))
)]
pub async fn ai_health() -> Json<HealthStatus> {
    Json(HealthStatus::healthy("AI Service API", AppConfig::AI_ROUTER_VERSION))
}
