//! NeonSpark Core - Headless library behind the NeonSpark AI backend.
//!
//! This crate holds everything the HTTP server needs except the HTTP layer
//! itself: Gemini requests with retry, asynchronous request tracking,
//! Tesseract OCR with image preprocessing, upload validation, rate limiting,
//! and realtime status fan-out.
//!
//! # Example
//!
//! ```rust,ignore
//! use neonspark_core::{AiRequest, AiServiceManager, GeminiClient, RequestConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> neonspark_core::Result<()> {
//!     let client = GeminiClient::new("api-key", "gemini-1.5-flash", "https://generativelanguage.googleapis.com")?;
//!     let manager = Arc::new(AiServiceManager::new(Some(Arc::new(client))));
//!
//!     let id = manager.process_request(AiRequest::new("Hello")).await?;
//!     let record = manager
//!         .wait_for_completion(&id, RequestConfig::LEGACY_MAX_WAIT)
//!         .await;
//!     println!("{:?}", record.and_then(|r| r.result));
//!
//!     Ok(())
//! }
//! ```

pub mod ai_service;
pub mod cancel;
pub mod config;
pub mod document;
pub mod error;
pub mod gemini;
pub mod network;
pub mod ocr;
pub mod rate_limit;
pub mod realtime;
pub mod system;
pub mod upload;

// Re-export commonly used types
pub use ai_service::{
    AiRequest, AiResponse, AiServiceManager, ProcessingStatus, ServiceState, ServiceStatus,
};
pub use cancel::{CancellationToken, CancelledError};
pub use config::{
    AppConfig, Environment, GeminiConfig, OcrConfig, RateLimitConfig, RealtimeConfig,
    RequestConfig, Settings, UploadConfig,
};
pub use document::DocumentAnalyzer;
pub use error::{NeonError, Result};
pub use gemini::{GeminiClient, GenerationConfig, InlineImage, Prompt, TextGenerator};
pub use ocr::{OcrEngine, PdfRasterizer, TessdataStatus, TesseractOcr};
pub use rate_limit::RateLimiter;
pub use realtime::{ClientConnection, RealtimeHub};
pub use system::{MemorySnapshot, ProcessMonitor};
pub use upload::{DocumentKind, UploadPolicy};
