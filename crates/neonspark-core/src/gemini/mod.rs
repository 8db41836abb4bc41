//! Generative model access.
//!
//! [`TextGenerator`] is the seam between request processing and the model
//! provider; [`GeminiClient`] is the production implementation.

mod client;
mod types;

pub use client::GeminiClient;
pub use types::{GenerationConfig, InlineImage, Prompt};

use crate::Result;
use async_trait::async_trait;

/// A model that turns a prompt into text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Model identifier reported in metadata and status payloads.
    fn model(&self) -> &str;

    /// Generate a single response for `prompt`.
    async fn generate(&self, prompt: &Prompt, config: &GenerationConfig) -> Result<String>;
}
