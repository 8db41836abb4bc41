//! AI request, response, and status types.

use crate::config::RequestConfig;
use crate::gemini::InlineImage;
use crate::{NeonError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use utoipa::ToSchema;

/// Lifecycle state of a submitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Completed => "completed",
            ProcessingStatus::Failed => "failed",
            ProcessingStatus::Cancelled => "cancelled",
        }
    }

    /// Completed, failed, and cancelled requests never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessingStatus::Completed | ProcessingStatus::Failed | ProcessingStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

fn default_priority() -> u8 {
    RequestConfig::DEFAULT_PRIORITY
}

fn default_timeout() -> u64 {
    RequestConfig::DEFAULT_TIMEOUT_SECS
}

/// A prompt submitted for asynchronous processing.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "prompt": "Summarize the attached notes",
    "parameters": {"temperature": 0.4, "max_tokens": 512},
    "priority": 1,
    "timeout": 30
}))]
pub struct AiRequest {
    #[schema(max_length = 10000)]
    pub prompt: String,
    /// Free-form options; `temperature` and `max_tokens` reach the model.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub parameters: Map<String, Value>,
    #[serde(default = "default_priority")]
    #[schema(minimum = 1, maximum = 5, default = 1)]
    pub priority: u8,
    /// Processing budget in seconds.
    #[serde(default = "default_timeout")]
    #[schema(minimum = 5, maximum = 300, default = 30)]
    pub timeout: u64,
    /// Images sent inline with the prompt. Only set by server-side callers.
    #[serde(skip)]
    pub images: Vec<InlineImage>,
}

impl AiRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            parameters: Map::new(),
            priority: default_priority(),
            timeout: default_timeout(),
            images: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, key: &str, value: Value) -> Self {
        self.parameters.insert(key.to_string(), value);
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout = seconds;
        self
    }

    pub fn with_image(mut self, image: InlineImage) -> Self {
        self.images.push(image);
        self
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Check prompt length, priority, and timeout bounds.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(NeonError::validation("prompt", "Prompt cannot be empty"));
        }
        if self.prompt.chars().count() > RequestConfig::PROMPT_MAX_CHARS {
            return Err(NeonError::validation(
                "prompt",
                format!(
                    "Prompt cannot exceed {} characters",
                    RequestConfig::PROMPT_MAX_CHARS
                ),
            ));
        }

        let (min_priority, max_priority) = RequestConfig::PRIORITY_RANGE;
        if !(min_priority..=max_priority).contains(&self.priority) {
            return Err(NeonError::validation(
                "priority",
                format!("Priority must be between {} and {}", min_priority, max_priority),
            ));
        }

        let (min_timeout, max_timeout) = RequestConfig::TIMEOUT_RANGE_SECS;
        if !(min_timeout..=max_timeout).contains(&self.timeout) {
            return Err(NeonError::validation(
                "timeout",
                format!(
                    "Timeout must be between {} and {} seconds",
                    min_timeout, max_timeout
                ),
            ));
        }

        Ok(())
    }
}

/// The tracked record of a request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AiResponse {
    pub request_id: String,
    pub status: ProcessingStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Seconds spent in the model call.
    pub processing_time: Option<f64>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub metadata: Map<String, Value>,
}

/// Aggregate counters reported by status endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceStatus {
    pub status: String,
    pub model: String,
    pub uptime: String,
    pub total_requests: u64,
    pub active_requests: usize,
    pub completed_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    /// Number of records held in history.
    pub memory_usage: usize,
    pub api_configured: bool,
}

/// Whether the manager can accept work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Healthy,
    ConfigurationError,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Healthy => "healthy",
            ServiceState::ConfigurationError => "configuration_error",
        }
    }
}

/// Published on every status change of a request.
#[derive(Debug, Clone)]
pub struct RequestUpdate {
    pub request_id: String,
    pub status: ProcessingStatus,
    pub record: AiResponse,
}

/// Percentage of submitted requests that completed, rounded to 2 places.
pub fn success_rate(completed: u64, total: u64) -> f64 {
    let rate = completed as f64 / total.max(1) as f64 * 100.0;
    (rate * 100.0).round() / 100.0
}

/// Render an uptime as `H:MM:SS`.
pub fn format_uptime(uptime: Duration) -> String {
    let secs = uptime.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}
