//! Realtime status fan-out to connected clients.
//!
//! The hub is transport-agnostic: each client is an unbounded queue of JSON
//! text frames. The server pumps those queues into WebSocket connections.

use crate::ai_service::{AiServiceManager, RequestUpdate};
use crate::cancel::CancellationToken;
use crate::config::RealtimeConfig;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};

struct ClientHandle {
    connection_id: u64,
    tx: mpsc::UnboundedSender<String>,
    subscriptions: HashSet<String>,
}

/// A registered client's outbound queue.
pub struct ClientConnection {
    /// Distinguishes this connection from a later one reusing the same id.
    pub connection_id: u64,
    pub receiver: mpsc::UnboundedReceiver<String>,
}

/// Tracks connected clients and their request subscriptions.
pub struct RealtimeHub {
    manager: Arc<AiServiceManager>,
    clients: RwLock<HashMap<String, ClientHandle>>,
    next_connection_id: AtomicU64,
}

impl RealtimeHub {
    pub fn new(manager: Arc<AiServiceManager>) -> Self {
        Self {
            manager,
            clients: RwLock::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
        }
    }

    /// Register `client_id` and queue the current service status for it.
    /// An existing connection with the same id is replaced.
    pub async fn connect(&self, client_id: &str) -> ClientConnection {
        let (tx, receiver) = mpsc::unbounded_channel();
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);

        let previous = self.clients.write().await.insert(
            client_id.to_string(),
            ClientHandle {
                connection_id,
                tx,
                subscriptions: HashSet::new(),
            },
        );
        if previous.is_some() {
            warn!("WebSocket client {} reconnected; replacing previous connection", client_id);
        } else {
            info!("WebSocket client {} connected", client_id);
        }

        self.send_status(client_id, "service_status").await;
        ClientConnection {
            connection_id,
            receiver,
        }
    }

    /// Remove `client_id` and its subscriptions.
    pub async fn disconnect(&self, client_id: &str) {
        if self.clients.write().await.remove(client_id).is_some() {
            info!("WebSocket client {} disconnected", client_id);
        }
    }

    /// Remove `client_id` only if it is still bound to `connection_id`.
    pub async fn release(&self, client_id: &str, connection_id: u64) {
        let mut clients = self.clients.write().await;
        if clients
            .get(client_id)
            .is_some_and(|c| c.connection_id == connection_id)
        {
            clients.remove(client_id);
            info!("WebSocket client {} disconnected", client_id);
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn subscriptions(&self, client_id: &str) -> Option<HashSet<String>> {
        self.clients
            .read()
            .await
            .get(client_id)
            .map(|c| c.subscriptions.clone())
    }

    /// Queue `message` for one client. A closed queue drops the client.
    pub async fn send_personal(&self, client_id: &str, message: &Value) {
        let text = message.to_string();
        let failed = match self.clients.read().await.get(client_id) {
            Some(client) => client.tx.send(text).is_err(),
            None => return,
        };
        if failed {
            error!("Failed to send message to {}", client_id);
            self.disconnect(client_id).await;
        }
    }

    /// Queue `message` for every client, dropping those whose queue is closed.
    pub async fn broadcast(&self, message: &Value) {
        let text = message.to_string();
        let failed: Vec<String> = self
            .clients
            .read()
            .await
            .iter()
            .filter(|(_, client)| client.tx.send(text.clone()).is_err())
            .map(|(id, _)| id.clone())
            .collect();

        for client_id in failed {
            error!("Failed to broadcast to {}", client_id);
            self.disconnect(&client_id).await;
        }
    }

    /// Handle one inbound text frame from `client_id`.
    pub async fn handle_text(&self, client_id: &str, text: &str) {
        let message: Value = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(_) => {
                warn!("Invalid JSON from client {}: {}", client_id, text);
                self.send_personal(
                    client_id,
                    &json!({
                        "type": "error",
                        "message": "Invalid JSON format",
                        "timestamp": timestamp(),
                    }),
                )
                .await;
                return;
            }
        };

        let request_id = message.get("request_id").and_then(Value::as_str);
        match message.get("type").and_then(Value::as_str) {
            Some("subscribe") => {
                if let Some(request_id) = request_id {
                    if let Some(client) = self.clients.write().await.get_mut(client_id) {
                        client.subscriptions.insert(request_id.to_string());
                        info!("Client {} subscribed to request {}", client_id, request_id);
                    }
                }
            }
            Some("unsubscribe") => {
                if let Some(request_id) = request_id {
                    if let Some(client) = self.clients.write().await.get_mut(client_id) {
                        if client.subscriptions.remove(request_id) {
                            info!("Client {} unsubscribed from request {}", client_id, request_id);
                        }
                    }
                }
            }
            Some("get_status") => self.send_status(client_id, "service_status").await,
            Some("ping") => {
                self.send_personal(client_id, &json!({"type": "pong", "timestamp": timestamp()}))
                    .await
            }
            other => debug!("Ignoring message type {:?} from {}", other, client_id),
        }
    }

    async fn send_status(&self, client_id: &str, kind: &str) {
        match self.status_message(kind).await {
            Some(message) => self.send_personal(client_id, &message).await,
            None => error!("Failed to send initial status to {}", client_id),
        }
    }

    async fn status_message(&self, kind: &str) -> Option<Value> {
        let status = self.manager.get_service_status().await;
        match serde_json::to_value(status) {
            Ok(data) => Some(json!({"type": kind, "data": data, "timestamp": timestamp()})),
            Err(e) => {
                error!("Failed to serialize service status: {}", e);
                None
            }
        }
    }

    /// Broadcast `service_status_update` every `interval` while any client
    /// is connected, until `cancel` fires.
    pub async fn run_status_broadcast(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            if self.connection_count().await == 0 {
                continue;
            }
            match self.status_message("service_status_update").await {
                Some(message) => self.broadcast(&message).await,
                None => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RealtimeConfig::BROADCAST_RETRY_DELAY) => {}
                    }
                }
            }
        }
        debug!("Status broadcast stopped");
    }

    /// Forward request status changes to subscribed clients until `cancel`
    /// fires. The manager subscription is taken before this returns, so no
    /// update published afterwards is missed.
    pub fn run_request_forwarder(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> impl Future<Output = ()> + Send + 'static {
        let hub = Arc::clone(self);
        let mut updates = self.manager.subscribe();

        async move {
            loop {
                let update = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    update = updates.recv() => update,
                };
                match update {
                    Ok(update) => hub.forward(update).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Request forwarder lagged; skipped {} updates", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("Request forwarder stopped");
        }
    }

    async fn forward(&self, update: RequestUpdate) {
        let subscribers: Vec<String> = self
            .clients
            .read()
            .await
            .iter()
            .filter(|(_, c)| c.subscriptions.contains(&update.request_id))
            .map(|(id, _)| id.clone())
            .collect();
        if subscribers.is_empty() {
            return;
        }

        let data = match serde_json::to_value(&update.record) {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to serialize request {}: {}", update.request_id, e);
                return;
            }
        };
        let message = json!({
            "type": "request_update",
            "request_id": update.request_id,
            "status": update.status,
            "data": data,
            "timestamp": timestamp(),
        });
        for client_id in subscribers {
            self.send_personal(&client_id, &message).await;
        }
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_service::AiRequest;
    use crate::gemini::{GenerationConfig, Prompt, TextGenerator};
    use crate::Result;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    struct Gated {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl TextGenerator for Gated {
        fn model(&self) -> &str {
            "gated"
        }

        async fn generate(&self, prompt: &Prompt, _config: &GenerationConfig) -> Result<String> {
            self.gate.notified().await;
            Ok(prompt.text.to_uppercase())
        }
    }

    fn hub_with_gate() -> (Arc<RealtimeHub>, Arc<AiServiceManager>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let manager = Arc::new(AiServiceManager::new(Some(Arc::new(Gated {
            gate: gate.clone(),
        }))));
        (Arc::new(RealtimeHub::new(manager.clone())), manager, gate)
    }

    fn next(rx: &mut mpsc::UnboundedReceiver<String>) -> Value {
        let text = rx.try_recv().expect("message queued");
        serde_json::from_str(&text).unwrap()
    }

    #[tokio::test]
    async fn test_connect_sends_initial_status() {
        let (hub, _, _) = hub_with_gate();
        let mut conn = hub.connect("alice").await;

        let message = next(&mut conn.receiver);
        assert_eq!(message["type"], "service_status");
        assert_eq!(message["data"]["status"], "healthy");
        assert!(message["timestamp"].is_string());
        assert_eq!(hub.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_ping_and_invalid_json() {
        let (hub, _, _) = hub_with_gate();
        let mut conn = hub.connect("bob").await;
        next(&mut conn.receiver);

        hub.handle_text("bob", r#"{"type":"ping"}"#).await;
        assert_eq!(next(&mut conn.receiver)["type"], "pong");

        hub.handle_text("bob", "{not json").await;
        let err = next(&mut conn.receiver);
        assert_eq!(err["type"], "error");
        assert_eq!(err["message"], "Invalid JSON format");

        hub.handle_text("bob", r#"{"type":"dance"}"#).await;
        assert!(conn.receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_subscribe_and_unsubscribe() {
        let (hub, _, _) = hub_with_gate();
        let _conn = hub.connect("carol").await;

        hub.handle_text("carol", r#"{"type":"subscribe","request_id":"r1"}"#).await;
        hub.handle_text("carol", r#"{"type":"subscribe"}"#).await;
        assert_eq!(hub.subscriptions("carol").await.unwrap().len(), 1);

        hub.handle_text("carol", r#"{"type":"unsubscribe","request_id":"r1"}"#).await;
        assert!(hub.subscriptions("carol").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconnect_replaces_and_release_is_scoped() {
        let (hub, _, _) = hub_with_gate();
        let first = hub.connect("dave").await;
        let second = hub.connect("dave").await;
        assert_eq!(hub.connection_count().await, 1);

        hub.release("dave", first.connection_id).await;
        assert_eq!(hub.connection_count().await, 1);

        hub.release("dave", second.connection_id).await;
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_drops_closed_clients() {
        let (hub, _, _) = hub_with_gate();
        let mut live = hub.connect("live").await;
        let gone = hub.connect("gone").await;
        drop(gone);
        next(&mut live.receiver);

        hub.broadcast(&json!({"type": "notice"})).await;
        assert_eq!(next(&mut live.receiver)["type"], "notice");
        assert_eq!(hub.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_request_updates_reach_subscribers() {
        let (hub, manager, gate) = hub_with_gate();
        let cancel = CancellationToken::new();
        let forwarder = tokio::spawn(hub.run_request_forwarder(cancel.clone()));

        let mut watcher = hub.connect("watcher").await;
        let mut bystander = hub.connect("bystander").await;
        next(&mut watcher.receiver);
        next(&mut bystander.receiver);

        let request_id = manager.process_request(AiRequest::new("hello")).await.unwrap();
        hub.handle_text(
            "watcher",
            &json!({"type": "subscribe", "request_id": request_id}).to_string(),
        )
        .await;
        gate.notify_one();

        let completed = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let text = watcher.receiver.recv().await.unwrap();
                let message: Value = serde_json::from_str(&text).unwrap();
                if message["status"] == "completed" {
                    return message;
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(completed["type"], "request_update");
        assert_eq!(completed["request_id"], request_id.as_str());
        assert_eq!(completed["data"]["result"], "HELLO");
        assert!(bystander.receiver.try_recv().is_err());

        cancel.cancel();
        forwarder.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_broadcast_runs_until_cancelled() {
        let (hub, _, _) = hub_with_gate();
        let mut conn = hub.connect("eve").await;
        next(&mut conn.receiver);

        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            hub.clone()
                .run_status_broadcast(Duration::from_secs(30), cancel.clone()),
        );

        let update: Value = serde_json::from_str(&conn.receiver.recv().await.unwrap()).unwrap();
        assert_eq!(update["type"], "service_status_update");

        cancel.cancel();
        task.await.unwrap();
    }
}
