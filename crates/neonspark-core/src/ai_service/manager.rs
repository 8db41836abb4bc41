//! Tracks AI requests from submission to completion.
//!
//! Each accepted request gets a UUID, a history record, and a spawned task
//! that calls the [`TextGenerator`]. Status changes are published on a
//! broadcast channel so that waiters and realtime subscribers need not poll.

use super::types::{
    format_uptime, success_rate, AiRequest, AiResponse, ProcessingStatus, RequestUpdate,
    ServiceState, ServiceStatus,
};
use crate::cancel::CancellationToken;
use crate::config::{GeminiConfig, RequestConfig};
use crate::gemini::{GenerationConfig, Prompt, TextGenerator};
use crate::{NeonError, Result};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tracing::{error, info, warn};

struct HistoryEntry {
    /// Submission order, used to break `created_at` ties.
    seq: u64,
    record: AiResponse,
}

enum Outcome {
    Completed(String),
    Failed(String),
    Cancelled,
}

/// Manages AI request processing, status tracking, and history.
pub struct AiServiceManager {
    generator: Option<Arc<dyn TextGenerator>>,
    state: ServiceState,
    history: RwLock<HashMap<String, HistoryEntry>>,
    active: RwLock<HashMap<String, CancellationToken>>,
    request_count: AtomicU64,
    /// Lifetime outcome counters; unaffected by history eviction.
    completed_count: AtomicU64,
    failed_count: AtomicU64,
    started_at: Instant,
    events: broadcast::Sender<RequestUpdate>,
    retention: usize,
}

impl AiServiceManager {
    /// Create a manager. Without a generator the service reports
    /// `configuration_error` and rejects new requests.
    pub fn new(generator: Option<Arc<dyn TextGenerator>>) -> Self {
        let state = match &generator {
            Some(g) => {
                info!("AI service initialized with model {}", g.model());
                ServiceState::Healthy
            }
            None => {
                error!("GEMINI_API_KEY not configured; AI requests will be rejected");
                ServiceState::ConfigurationError
            }
        };

        let (events, _) = broadcast::channel(RequestConfig::EVENT_CHANNEL_CAPACITY);

        Self {
            generator,
            state,
            history: RwLock::new(HashMap::new()),
            active: RwLock::new(HashMap::new()),
            request_count: AtomicU64::new(0),
            completed_count: AtomicU64::new(0),
            failed_count: AtomicU64::new(0),
            started_at: Instant::now(),
            events,
            retention: RequestConfig::HISTORY_RETENTION,
        }
    }

    /// Cap the number of records kept in history.
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn is_configured(&self) -> bool {
        self.generator.is_some()
    }

    /// Name of the model requests are sent to.
    pub fn model(&self) -> &str {
        self.generator
            .as_ref()
            .map(|g| g.model())
            .unwrap_or(GeminiConfig::DEFAULT_MODEL)
    }

    /// Receive an update for every request status change.
    pub fn subscribe(&self) -> broadcast::Receiver<RequestUpdate> {
        self.events.subscribe()
    }

    /// Validate and enqueue a request. Returns the request id.
    pub async fn process_request(self: &Arc<Self>, request: AiRequest) -> Result<String> {
        let generator = match (&self.generator, self.state) {
            (Some(generator), ServiceState::Healthy) => generator.clone(),
            _ => {
                return Err(NeonError::unavailable(format!(
                    "AI service not available: {}",
                    self.state.as_str()
                )))
            }
        };

        request.validate()?;

        let request_id = uuid::Uuid::new_v4().to_string();
        let seq = self.request_count.fetch_add(1, Ordering::SeqCst);

        let mut metadata = serde_json::Map::new();
        metadata.insert("prompt_length".into(), json!(request.prompt.chars().count()));
        metadata.insert("parameters".into(), Value::Object(request.parameters.clone()));
        metadata.insert("priority".into(), json!(request.priority));
        metadata.insert("timeout".into(), json!(request.timeout));
        metadata.insert("model".into(), json!(generator.model()));
        if !request.images.is_empty() {
            metadata.insert("images".into(), json!(request.images.len()));
        }

        let record = AiResponse {
            request_id: request_id.clone(),
            status: ProcessingStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
            processing_time: None,
            metadata,
        };

        self.history
            .write()
            .await
            .insert(request_id.clone(), HistoryEntry { seq, record: record.clone() });
        self.publish(record);

        let token = CancellationToken::new();
        self.active
            .write()
            .await
            .insert(request_id.clone(), token.clone());

        let manager = Arc::clone(self);
        let task_id = request_id.clone();
        tokio::spawn(async move {
            manager.run_request(task_id, request, generator, token).await;
        });

        info!("Started {} processing for request {}", self.model(), request_id);
        Ok(request_id)
    }

    async fn run_request(
        self: Arc<Self>,
        request_id: String,
        request: AiRequest,
        generator: Arc<dyn TextGenerator>,
        token: CancellationToken,
    ) {
        self.update(&request_id, |r| r.status = ProcessingStatus::Processing)
            .await;

        let started = Instant::now();
        let config = GenerationConfig::default().with_overrides(&request.parameters);
        let word_count = request.prompt.split_whitespace().count();
        let prompt = Prompt {
            text: request.prompt,
            images: request.images,
        };

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Outcome::Cancelled,
            result = tokio::time::timeout(
                Duration::from_secs(request.timeout),
                generator.generate(&prompt, &config),
            ) => match result {
                Err(_) => Outcome::Failed(format!(
                    "Processing timeout after {} seconds",
                    request.timeout
                )),
                Ok(Err(e)) => Outcome::Failed(format!("Gemini API error: {}", upstream_message(&e))),
                Ok(Ok(text)) => Outcome::Completed(text),
            },
        };

        let elapsed = started.elapsed().as_secs_f64();
        self.active.write().await.remove(&request_id);

        match outcome {
            Outcome::Completed(text) => {
                self.completed_count.fetch_add(1, Ordering::SeqCst);
                let response_length = text.chars().count();
                self.update(&request_id, |r| {
                    r.status = ProcessingStatus::Completed;
                    r.result = Some(text);
                    r.completed_at = Some(Utc::now());
                    r.processing_time = Some(elapsed);
                    r.metadata
                        .insert("tokens_processed".into(), json!(word_count));
                    r.metadata
                        .insert("response_length".into(), json!(response_length));
                })
                .await;
                info!(
                    "Completed request {} in {:.2}s",
                    request_id, elapsed
                );
            }
            Outcome::Failed(message) => {
                error!("AI processing error for request {}: {}", request_id, message);
                self.failed_count.fetch_add(1, Ordering::SeqCst);
                self.update(&request_id, |r| {
                    r.status = ProcessingStatus::Failed;
                    r.error = Some(message);
                    r.completed_at = Some(Utc::now());
                })
                .await;
            }
            Outcome::Cancelled => {
                info!("AI processing cancelled for request {}", request_id);
                self.update(&request_id, |r| {
                    r.status = ProcessingStatus::Cancelled;
                    r.completed_at = Some(Utc::now());
                })
                .await;
            }
        }
    }

    /// Apply `f` to a record and publish the result. Finished records may
    /// push older ones out of history.
    async fn update(&self, request_id: &str, f: impl FnOnce(&mut AiResponse)) {
        let updated = {
            let mut history = self.history.write().await;
            let updated = history.get_mut(request_id).map(|entry| {
                f(&mut entry.record);
                entry.record.clone()
            });
            if updated.as_ref().is_some_and(|r| r.status.is_terminal()) {
                evict_finished(&mut history, self.retention);
            }
            updated
        };

        if let Some(record) = updated {
            self.publish(record);
        }
    }

    fn publish(&self, record: AiResponse) {
        // No receivers is the common case; nothing to do then.
        let _ = self.events.send(RequestUpdate {
            request_id: record.request_id.clone(),
            status: record.status,
            record,
        });
    }

    /// Get the record for a request.
    pub async fn get_request_status(&self, request_id: &str) -> Option<AiResponse> {
        self.history
            .read()
            .await
            .get(request_id)
            .map(|entry| entry.record.clone())
    }

    /// Aggregate service counters.
    pub async fn get_service_status(&self) -> ServiceStatus {
        let active_requests = self.active.read().await.len();
        let retained = self.history.read().await.len();
        let completed_requests = self.completed_count.load(Ordering::SeqCst);
        let failed_requests = self.failed_count.load(Ordering::SeqCst);
        let total_requests = self.request_count.load(Ordering::SeqCst);

        ServiceStatus {
            status: self.state.as_str().to_string(),
            model: self.model().to_string(),
            uptime: format_uptime(self.started_at.elapsed()),
            total_requests,
            active_requests,
            completed_requests,
            failed_requests,
            success_rate: success_rate(completed_requests, total_requests),
            memory_usage: retained,
            api_configured: self.is_configured(),
        }
    }

    /// History newest first, optionally filtered by status.
    pub async fn get_processing_history(
        &self,
        limit: usize,
        status_filter: Option<ProcessingStatus>,
    ) -> Vec<AiResponse> {
        let history = self.history.read().await;

        let mut entries: Vec<&HistoryEntry> = history
            .values()
            .filter(|entry| status_filter.map_or(true, |s| entry.record.status == s))
            .collect();
        entries.sort_by(|a, b| {
            b.record
                .created_at
                .cmp(&a.record.created_at)
                .then(b.seq.cmp(&a.seq))
        });

        entries
            .into_iter()
            .take(limit)
            .map(|entry| entry.record.clone())
            .collect()
    }

    /// Cancel an active request. Returns false if it is unknown or finished.
    pub async fn cancel_request(&self, request_id: &str) -> bool {
        match self.active.read().await.get(request_id) {
            Some(token) => {
                token.cancel();
                info!("Cancelled AI processing for request {}", request_id);
                true
            }
            None => false,
        }
    }

    /// Wait until a request reaches a terminal state or `max_wait` elapses.
    ///
    /// Returns `None` for unknown ids, otherwise the latest record, which
    /// may still be non-terminal when the wait timed out.
    pub async fn wait_for_completion(
        &self,
        request_id: &str,
        max_wait: Duration,
    ) -> Option<AiResponse> {
        let mut updates = self.events.subscribe();
        let deadline = tokio::time::Instant::now() + max_wait;

        loop {
            let current = self.get_request_status(request_id).await?;
            if current.status.is_terminal() {
                return Some(current);
            }

            match tokio::time::timeout_at(deadline, updates.recv()).await {
                Ok(Ok(_)) => continue,
                Ok(Err(RecvError::Lagged(skipped))) => {
                    warn!("Request waiter lagged by {} updates", skipped);
                    continue;
                }
                Ok(Err(RecvError::Closed)) | Err(_) => {
                    return self.get_request_status(request_id).await;
                }
            }
        }
    }
}

/// Drop the oldest finished records once history exceeds `retention`.
fn evict_finished(history: &mut HashMap<String, HistoryEntry>, retention: usize) {
    if history.len() <= retention {
        return;
    }

    let mut finished: Vec<(u64, String)> = history
        .iter()
        .filter(|(_, entry)| entry.record.status.is_terminal())
        .map(|(id, entry)| (entry.seq, id.clone()))
        .collect();
    finished.sort_unstable();

    let excess = history.len() - retention;
    for (_, id) in finished.into_iter().take(excess) {
        history.remove(&id);
    }
}

/// Upstream errors already carry a "Gemini API error" prefix; strip it.
fn upstream_message(err: &NeonError) -> String {
    match err {
        NeonError::Gemini { message, .. } => message.clone(),
        other => other.to_string(),
    }
}
