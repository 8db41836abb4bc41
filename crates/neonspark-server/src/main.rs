//! NeonSpark Server - HTTP and WebSocket backend for the NeonSpark frontend.
//!
//! Wraps the neonspark-core library with an axum router: legacy chat and
//! image analysis, OCR, the asynchronous AI request API, and realtime
//! status over WebSocket.

mod error;
mod handlers;
mod logging;
mod server;

use anyhow::Result;
use clap::Parser;
use neonspark_core::config::{
    parse_extensions, parse_list, AppConfig, Environment, GeminiConfig, RateLimitConfig,
    Settings, UploadConfig, DEFAULT_CORS_ORIGINS,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "neonspark-server")]
#[command(about = "NeonSpark AI backend: Gemini chat, image analysis, and OCR")]
struct Args {
    /// Host to bind to
    #[arg(long, env = "HOST", default_value = AppConfig::DEFAULT_HOST)]
    host: String,

    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, env = "PORT", default_value_t = AppConfig::DEFAULT_PORT)]
    port: u16,

    /// Deployment environment; `production` switches logs to JSON
    #[arg(long, env = "ENVIRONMENT", default_value = "development")]
    environment: String,

    /// Log level or tracing filter directive
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Async worker threads
    #[arg(long, env = "WEB_CONCURRENCY", default_value_t = 1)]
    web_concurrency: usize,

    /// Gemini API key; AI features are disabled without it
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    #[arg(long, env = "GEMINI_MODEL", default_value = GeminiConfig::DEFAULT_MODEL)]
    gemini_model: String,

    /// Gemini REST endpoint root
    #[arg(long, env = "GEMINI_API_BASE", default_value = GeminiConfig::DEFAULT_BASE_URL)]
    gemini_api_base: String,

    /// Maximum upload size in bytes
    #[arg(long, env = "MAX_FILE_SIZE", default_value_t = UploadConfig::DEFAULT_MAX_FILE_SIZE)]
    max_file_size: u64,

    /// Comma-separated image extensions accepted for upload
    #[arg(long, env = "ALLOWED_EXTENSIONS", default_value = UploadConfig::DEFAULT_ALLOWED_EXTENSIONS)]
    allowed_extensions: String,

    /// Comma-separated CORS origins
    #[arg(long, env = "CORS_ORIGINS", default_value = DEFAULT_CORS_ORIGINS)]
    cors_origins: String,

    /// Requests allowed per client per window on /api/ai/process
    #[arg(long, env = "RATE_LIMIT_REQUESTS", default_value_t = RateLimitConfig::DEFAULT_REQUESTS)]
    rate_limit_requests: u32,

    /// Rate limit window in seconds
    #[arg(long, env = "RATE_LIMIT_WINDOW", default_value_t = RateLimitConfig::DEFAULT_WINDOW_SECS)]
    rate_limit_window: u64,

    /// Tesseract language data directory
    #[arg(long, env = "TESSDATA_PREFIX")]
    tessdata_prefix: Option<PathBuf>,

    /// Tesseract binary (auto-detected when unset)
    #[arg(long, env = "TESSERACT_PATH")]
    tesseract_path: Option<PathBuf>,
}

impl Args {
    fn into_settings(self) -> Settings {
        Settings {
            host: self.host,
            port: self.port,
            environment: self.environment.parse().unwrap_or(Environment::Development),
            log_level: self.log_level,
            web_concurrency: self.web_concurrency.max(1),
            gemini_api_key: self.gemini_api_key,
            gemini_model: self.gemini_model,
            gemini_base_url: self.gemini_api_base,
            max_file_size: self.max_file_size,
            allowed_extensions: parse_extensions(&self.allowed_extensions),
            cors_origins: parse_list(&self.cors_origins),
            rate_limit_requests: self.rate_limit_requests,
            rate_limit_window: Duration::from_secs(self.rate_limit_window),
            tessdata_prefix: self.tessdata_prefix,
            tesseract_path: self.tesseract_path,
        }
    }
}

fn main() -> Result<()> {
    let settings = Args::parse().into_settings();
    logging::init(&settings)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(settings.web_concurrency)
        .enable_all()
        .build()?;
    runtime.block_on(run(settings))
}

async fn run(settings: Settings) -> Result<()> {
    info!(
        "Starting {} v{} ({})",
        AppConfig::BACKEND_NAME,
        AppConfig::VERSION,
        settings.environment
    );

    let state = server::AppState::initialize(settings).await?;
    let running = server::start_server(state).await?;

    // Print port for process supervisors and tests to read
    println!("SERVER_PORT={}", running.addr.port());

    info!("Server running on {}", running.addr);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, stopping");
    running.shutdown().await;

    Ok(())
}
