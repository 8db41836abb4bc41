//! HTTP server implementation using Axum.

use crate::error::{handle_panic, internal_error_middleware};
use crate::handlers::{ai, analyze, chat, docs, health, ws};
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    middleware,
    routing::{delete, get, post},
    Router,
};
use neonspark_core::ocr::{check_tessdata, TessdataStatus};
use neonspark_core::{
    AiServiceManager, CancellationToken, DocumentAnalyzer, GeminiClient, OcrEngine,
    ProcessMonitor, RateLimiter, RealtimeConfig, RealtimeHub, Settings, TesseractOcr,
    TextGenerator, UploadConfig, UploadPolicy,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Application state shared across handlers.
pub struct AppState {
    pub settings: Settings,
    /// AI request tracking
    pub manager: Arc<AiServiceManager>,
    /// WebSocket client registry
    pub hub: Arc<RealtimeHub>,
    /// OCR and document analysis
    pub analyzer: DocumentAnalyzer,
    pub uploads: UploadPolicy,
    /// Limits `/api/ai/process` per client IP
    pub rate_limiter: RateLimiter,
    pub tessdata: TessdataStatus,
    pub monitor: ProcessMonitor,
    /// Fired on shutdown; stops background tasks and open sockets
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Build the Gemini client and look for Tesseract.
    pub async fn initialize(settings: Settings) -> anyhow::Result<Self> {
        let generator: Option<Arc<dyn TextGenerator>> = match settings.api_key() {
            Some(key) => {
                let client =
                    GeminiClient::new(key, &settings.gemini_model, &settings.gemini_base_url)?;
                info!("Gemini configured with model {}", settings.gemini_model);
                Some(Arc::new(client))
            }
            None => {
                error!("GEMINI_API_KEY not found in environment variables");
                error!("Please set GEMINI_API_KEY to enable AI features");
                None
            }
        };

        let binary = TesseractOcr::locate(settings.tesseract_path.as_deref());
        let ocr: Option<Arc<dyn OcrEngine>> =
            match TesseractOcr::detect(binary, settings.tessdata_prefix.clone()).await {
                Ok(engine) => Some(Arc::new(engine)),
                Err(e) => {
                    warn!("Tesseract OCR not found or not accessible: {}", e);
                    warn!("OCR features will be limited");
                    None
                }
            };

        let tessdata = check_tessdata(settings.tessdata_prefix.as_deref());
        match &tessdata.path {
            Some(path) if tessdata.exists => info!(
                "TESSDATA_PREFIX {} ({} languages: {})",
                path.display(),
                tessdata.languages.len(),
                tessdata.languages.join(", ")
            ),
            Some(path) => warn!("TESSDATA_PREFIX {} does not exist", path.display()),
            None => info!("TESSDATA_PREFIX not set; Tesseract will use its built-in path"),
        }

        Self::from_parts(settings, generator, ocr, tessdata)
    }

    /// Assemble state from already-built services.
    pub fn from_parts(
        settings: Settings,
        generator: Option<Arc<dyn TextGenerator>>,
        ocr: Option<Arc<dyn OcrEngine>>,
        tessdata: TessdataStatus,
    ) -> anyhow::Result<Self> {
        let manager = Arc::new(AiServiceManager::new(generator.clone()));
        let hub = Arc::new(RealtimeHub::new(manager.clone()));
        let rate_limiter =
            RateLimiter::new(settings.rate_limit_requests, settings.rate_limit_window)?;
        let uploads = UploadPolicy::new(settings.allowed_extensions.clone(), settings.max_file_size);

        Ok(Self {
            manager,
            hub,
            analyzer: DocumentAnalyzer::new(ocr, generator),
            uploads,
            rate_limiter,
            tessdata,
            monitor: ProcessMonitor::default(),
            shutdown: CancellationToken::new(),
            settings,
        })
    }
}

/// Handle to a running server and its background tasks.
pub struct RunningServer {
    pub addr: SocketAddr,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningServer {
    /// Stop accepting connections and wait for in-flight work to drain.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("Server task failed: {}", e);
            }
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        // A literal wildcard cannot be combined with credentials.
        AllowOrigin::mirror_request()
    } else {
        let parsed: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin {:?}", origin);
                    None
                }
            })
            .collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// Build the router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = usize::try_from(state.settings.max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_add(UploadConfig::MULTIPART_OVERHEAD);

    let ai_routes = Router::new()
        .route("/process", post(ai::process_request))
        .route("/status", get(ai::service_status))
        .route("/status/:request_id", get(ai::request_status))
        .route("/history", get(ai::history))
        .route("/cancel/:request_id", delete(ai::cancel_request))
        .route("/health", get(health::ai_health));

    Router::new()
        .route("/health", get(health::liveness))
        .route("/api/health", get(health::health))
        .route("/api/docs", get(docs::openapi))
        .route("/api/chat", post(chat::chat))
        .route("/api/analyze-image", post(analyze::analyze_image))
        .route("/api/ocr", post(analyze::ocr))
        .route("/api/analyze-document", post(analyze::analyze_document))
        .route("/ws/:client_id", get(ws::websocket))
        .nest("/api/ai", ai_routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(middleware::from_fn(internal_error_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.settings.cors_origins))
        .with_state(state)
}

/// Bind, spawn the server and its background tasks.
///
/// Returns the actual address the server is bound to (useful when port=0).
pub async fn start_server(state: AppState) -> anyhow::Result<RunningServer> {
    let listener =
        tokio::net::TcpListener::bind((state.settings.host.as_str(), state.settings.port)).await?;
    let addr = listener.local_addr()?;
    info!("Server listening on {}", addr);

    let state = Arc::new(state);
    let shutdown = state.shutdown.clone();

    let status_broadcast = tokio::spawn(
        state
            .hub
            .clone()
            .run_status_broadcast(RealtimeConfig::STATUS_BROADCAST_INTERVAL, shutdown.clone()),
    );
    let forwarder = tokio::spawn(state.hub.run_request_forwarder(shutdown.clone()));

    let app = build_router(state);
    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { signal.cancelled().await })
        .await;
        if let Err(e) = result {
            error!("Server error: {}", e);
        }
    });

    Ok(RunningServer {
        addr,
        shutdown,
        tasks: vec![server, status_broadcast, forwarder],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use neonspark_core::{
        GenerationConfig, InlineImage, NeonError, ProcessingStatus, Prompt, Result,
    };
    use serde_json::Value;
    use std::sync::Mutex;
    use std::time::Duration;
    use tower::ServiceExt;

    struct FailingGenerator;

    #[async_trait]
    impl TextGenerator for FailingGenerator {
        fn model(&self) -> &str {
            "failing-model"
        }

        async fn generate(&self, _prompt: &Prompt, _config: &GenerationConfig) -> Result<String> {
            Err(NeonError::Gemini {
                message: "quota exhausted".into(),
                status_code: Some(429),
            })
        }
    }

    struct StalledGenerator;

    #[async_trait]
    impl TextGenerator for StalledGenerator {
        fn model(&self) -> &str {
            "stalled-model"
        }

        async fn generate(&self, _prompt: &Prompt, _config: &GenerationConfig) -> Result<String> {
            std::future::pending().await
        }
    }

    /// Answers every prompt and keeps the images it was sent.
    #[derive(Default)]
    struct RecordingGenerator {
        images: Mutex<Vec<InlineImage>>,
    }

    #[async_trait]
    impl TextGenerator for RecordingGenerator {
        fn model(&self) -> &str {
            "vision-model"
        }

        async fn generate(&self, prompt: &Prompt, _config: &GenerationConfig) -> Result<String> {
            self.images
                .lock()
                .unwrap()
                .extend(prompt.images.iter().cloned());
            Ok("A red square".to_string())
        }
    }

    fn test_state() -> Arc<AppState> {
        let settings = Settings {
            rate_limit_requests: 2,
            ..Settings::default()
        };
        let tessdata = check_tessdata(None);
        Arc::new(AppState::from_parts(settings, None, None, tessdata).unwrap())
    }

    fn state_with(generator: Arc<dyn TextGenerator>) -> Arc<AppState> {
        let state =
            AppState::from_parts(Settings::default(), Some(generator), None, check_tessdata(None))
                .unwrap();
        Arc::new(state)
    }

    fn chat_request(message: &str) -> Request<Body> {
        Request::post("/api/chat")
            .header("content-type", "application/json")
            .body(Body::from(format!(r#"{{"message": "{}"}}"#, message)))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_chat_reports_generator_failure() {
        let app = build_router(state_with(Arc::new(FailingGenerator)));

        let response = app.oneshot(chat_request("hello")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["detail"], "Gemini API error: quota exhausted");
    }

    #[tokio::test]
    async fn test_chat_returns_499_when_cancelled() {
        let state = state_with(Arc::new(StalledGenerator));
        let app = build_router(state.clone());

        let chat = tokio::spawn(app.clone().oneshot(chat_request("wait for me")));

        // Cancellation needs the request to be running.
        let request_id = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let history = state.manager.get_processing_history(1, None).await;
                if let Some(record) = history.first() {
                    if record.status == ProcessingStatus::Processing {
                        break record.request_id.clone();
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let response = app
            .oneshot(
                Request::delete(format!("/api/ai/cancel/{}", request_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = chat.await.unwrap().unwrap();
        assert_eq!(response.status().as_u16(), 499);
        let json = body_json(response).await;
        assert_eq!(json["detail"], "Request was cancelled");
    }

    #[tokio::test]
    async fn test_analyze_image_sends_upload_to_generator() {
        let generator = Arc::new(RecordingGenerator::default());
        let app = build_router(state_with(generator.clone()));

        let image = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 1, 2, 3];
        let boundary = "neonspark-boundary";
        let mut body = format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"photo.png\"\r\n\
             Content-Type: image/png\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(&image);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        let response = app
            .oneshot(
                Request::post("/api/analyze-image")
                    .header(
                        "content-type",
                        format!("multipart/form-data; boundary={boundary}"),
                    )
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["analysis"], "A red square");
        assert_eq!(json["filename"], "photo.png");
        assert_eq!(json["model"], "vision-model");
        assert!(json["request_id"].as_str().is_some_and(|id| !id.is_empty()));
        assert!(json["processing_time"].is_number());
        assert_eq!(json["metadata"]["images"], 1);

        let images = generator.images.lock().unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].mime_type, "image/png");
        assert_eq!(images[0].data, image);
    }

    #[tokio::test]
    async fn test_server_starts_and_stops() {
        let settings = Settings {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Settings::default()
        };
        let state = AppState::from_parts(settings, None, None, check_tessdata(None)).unwrap();

        let running = start_server(state).await.unwrap();
        assert!(running.addr.port() > 0);
        running.shutdown().await;
    }

    #[tokio::test]
    async fn test_liveness() {
        let response = build_router(test_state())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["version"], "2.1.0");
    }

    #[tokio::test]
    async fn test_process_is_rate_limited() {
        let app = build_router(test_state());
        let request = || {
            Request::post("/api/ai/process")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"prompt": "hi"}"#))
                .unwrap()
        };

        // No API key, so accepted requests fail with 503 until the budget runs out.
        for _ in 0..2 {
            let response = app.clone().oneshot(request()).await.unwrap();
            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        }
        let response = app.oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let json = body_json(response).await;
        assert_eq!(json["detail"], "Rate limit exceeded. Too many requests.");
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_configured_origin() {
        let response = build_router(test_state())
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/api/chat")
                    .header("origin", "http://localhost:8080")
                    .header("access-control-request-method", "POST")
                    .header("access-control-request-headers", "content-type")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let headers = response.headers();
        assert_eq!(
            headers.get("access-control-allow-origin").unwrap(),
            "http://localhost:8080"
        );
        assert_eq!(
            headers.get("access-control-allow-credentials").unwrap(),
            "true"
        );
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let response = build_router(test_state())
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
