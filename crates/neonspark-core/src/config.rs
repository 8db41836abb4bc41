//! Centralized configuration for NeonSpark.
//!
//! Constants live on unit structs grouped by concern; runtime settings that
//! come from the environment are collected in [`Settings`].

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Service identity.
pub struct AppConfig;

impl AppConfig {
    pub const BACKEND_NAME: &'static str = "NeonSpark AI Backend";
    pub const VERSION: &'static str = "2.1.0";
    pub const AI_ROUTER_VERSION: &'static str = "1.0.0";
    pub const DEFAULT_HOST: &'static str = "0.0.0.0";
    pub const DEFAULT_PORT: u16 = 3000;
}

/// Generative model defaults.
pub struct GeminiConfig;

impl GeminiConfig {
    pub const DEFAULT_MODEL: &'static str = "gemini-1.5-flash";
    pub const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com";
    pub const API_VERSION: &'static str = "v1beta";
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
}

/// AI request lifecycle limits.
pub struct RequestConfig;

impl RequestConfig {
    pub const PROMPT_MAX_CHARS: usize = 10_000;
    pub const PRIORITY_RANGE: (u8, u8) = (1, 5);
    pub const TIMEOUT_RANGE_SECS: (u64, u64) = (5, 300);
    pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
    pub const DEFAULT_PRIORITY: u8 = 1;
    pub const HISTORY_DEFAULT_LIMIT: usize = 50;
    pub const HISTORY_MAX_LIMIT: usize = 200;
    pub const HISTORY_RETENTION: usize = 1000;
    /// How long the legacy endpoints wait for a submitted request.
    pub const LEGACY_MAX_WAIT: Duration = Duration::from_secs(30);
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;
}

/// Realtime hub timing.
pub struct RealtimeConfig;

impl RealtimeConfig {
    pub const STATUS_BROADCAST_INTERVAL: Duration = Duration::from_secs(30);
    pub const BROADCAST_RETRY_DELAY: Duration = Duration::from_secs(5);
}

/// OCR engine defaults.
pub struct OcrConfig;

impl OcrConfig {
    pub const DEFAULT_LANGUAGE: &'static str = "eng";
    pub const COMMON_TESSERACT_PATHS: [&'static str; 3] = [
        "/usr/bin/tesseract",
        "/usr/local/bin/tesseract",
        "/opt/homebrew/bin/tesseract",
    ];
    pub const PAGE_BREAK: &'static str = "\n--- Page Break ---\n";
    pub const PDF_RENDER_DPI: u32 = 300;
    pub const RECOGNIZE_TIMEOUT: Duration = Duration::from_secs(120);
    pub const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Upload defaults.
pub struct UploadConfig;

impl UploadConfig {
    pub const DEFAULT_MAX_FILE_SIZE: u64 = 50_000_000;
    pub const DEFAULT_ALLOWED_EXTENSIONS: &'static str = "jpg,jpeg,png,bmp,tiff,webp,gif";
    /// Extra room on top of `max_file_size` for multipart framing.
    pub const MULTIPART_OVERHEAD: usize = 64 * 1024;
}

/// Rate limiting defaults.
pub struct RateLimitConfig;

impl RateLimitConfig {
    pub const DEFAULT_REQUESTS: u32 = 100;
    pub const DEFAULT_WINDOW_SECS: u64 = 3600;
}

/// Default CORS origins, matching the local frontend dev servers.
pub const DEFAULT_CORS_ORIGINS: &str =
    "http://localhost:8080,http://127.0.0.1:8080,http://localhost:3000,http://127.0.0.1:3000";

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl FromStr for Environment {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            _ => Ok(Environment::Development),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Runtime settings resolved at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    pub log_level: String,
    pub web_concurrency: usize,
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub max_file_size: u64,
    pub allowed_extensions: Vec<String>,
    pub cors_origins: Vec<String>,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
    pub tessdata_prefix: Option<PathBuf>,
    pub tesseract_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: AppConfig::DEFAULT_HOST.to_string(),
            port: AppConfig::DEFAULT_PORT,
            environment: Environment::Development,
            log_level: "info".to_string(),
            web_concurrency: 1,
            gemini_api_key: None,
            gemini_model: GeminiConfig::DEFAULT_MODEL.to_string(),
            gemini_base_url: GeminiConfig::DEFAULT_BASE_URL.to_string(),
            max_file_size: UploadConfig::DEFAULT_MAX_FILE_SIZE,
            allowed_extensions: parse_extensions(UploadConfig::DEFAULT_ALLOWED_EXTENSIONS),
            cors_origins: parse_list(DEFAULT_CORS_ORIGINS),
            rate_limit_requests: RateLimitConfig::DEFAULT_REQUESTS,
            rate_limit_window: Duration::from_secs(RateLimitConfig::DEFAULT_WINDOW_SECS),
            tessdata_prefix: None,
            tesseract_path: None,
        }
    }
}

impl Settings {
    /// The API key, treating an empty or whitespace-only value as unset.
    pub fn api_key(&self) -> Option<&str> {
        self.gemini_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
    }
}

/// Split a comma-separated value into trimmed, non-empty items.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Parse an extension list: lower-cased, leading dots removed.
pub fn parse_extensions(raw: &str) -> Vec<String> {
    parse_list(raw)
        .into_iter()
        .map(|ext| ext.trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}
