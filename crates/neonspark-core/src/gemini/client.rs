//! HTTP client for the Gemini REST API.
//!
//! Only the single-turn `generateContent` call is used:
//! `POST {base}/v1beta/models/{model}:generateContent` with the API key in
//! the `x-goog-api-key` header.

use super::types::{
    Blob, Content, ErrorEnvelope, GenerateContentRequest, GenerateContentResponse,
    GenerationConfig, Part, Prompt,
};
use super::TextGenerator;
use crate::config::GeminiConfig;
use crate::network::{extract_domain, retry_async, RetryConfig, RetryDecision};
use crate::{NeonError, Result};
use async_trait::async_trait;
use base64::Engine as _;
use reqwest::{header, StatusCode};
use tracing::{debug, info};

/// Client for a Gemini model.
pub struct GeminiClient {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
    retry: RetryConfig,
}

impl GeminiClient {
    /// Create a client for `model` at `base_url`.
    pub fn new(api_key: &str, model: &str, base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(GeminiConfig::CONNECT_TIMEOUT)
            .timeout(GeminiConfig::REQUEST_TIMEOUT)
            .user_agent(concat!("neonspark/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| NeonError::Config {
                message: format!("Failed to create Gemini HTTP client: {}", e),
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
            retry: RetryConfig::default(),
        })
    }

    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}/models/{}:generateContent",
            self.base_url,
            GeminiConfig::API_VERSION,
            self.model
        )
    }

    async fn generate_once(&self, body: &GenerateContentRequest<'_>) -> Result<String> {
        let url = self.endpoint();

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NeonError::Timeout(GeminiConfig::REQUEST_TIMEOUT)
                } else {
                    NeonError::Network {
                        message: format!("Failed to reach Gemini at {}: {}", extract_domain(&url), e),
                        cause: Some(e.to_string()),
                    }
                }
            })?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok());
            return Err(NeonError::RateLimited {
                service: extract_domain(&url),
                retry_after_secs: retry_after,
            });
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<ErrorEnvelope>(&text) {
                Ok(envelope) => match envelope.error.status {
                    Some(kind) => format!("{} ({})", envelope.error.message, kind),
                    None => envelope.error.message,
                },
                Err(_) if text.is_empty() => status.to_string(),
                Err(_) => text,
            };
            return Err(NeonError::Gemini {
                message,
                status_code: Some(status.as_u16()),
            });
        }

        let parsed: GenerateContentResponse =
            response.json().await.map_err(|e| NeonError::Gemini {
                message: format!("Failed to parse generateContent response: {}", e),
                status_code: None,
            })?;

        extract_text(parsed)
    }
}

/// Concatenate the text parts of the first candidate.
fn extract_text(response: GenerateContentResponse) -> Result<String> {
    if let Some(reason) = response
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason)
    {
        return Err(NeonError::Gemini {
            message: format!("Prompt blocked: {}", reason),
            status_code: None,
        });
    }

    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| NeonError::Gemini {
            message: "Model returned no candidates".to_string(),
            status_code: None,
        })?;

    let text: String = candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    if text.is_empty() {
        return Err(NeonError::Gemini {
            message: format!(
                "Model returned an empty response (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            ),
            status_code: None,
        });
    }

    Ok(text)
}

#[async_trait]
impl TextGenerator for GeminiClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &Prompt, config: &GenerationConfig) -> Result<String> {
        let mut parts = vec![Part::Text {
            text: prompt.text.clone(),
        }];
        for image in &prompt.images {
            parts.push(Part::InlineData {
                inline_data: Blob {
                    mime_type: image.mime_type.clone(),
                    data: base64::engine::general_purpose::STANDARD.encode(&image.data),
                },
            });
        }

        let body = GenerateContentRequest {
            contents: vec![Content {
                role: "user",
                parts,
            }],
            generation_config: config,
        };

        debug!(
            "Calling {} with {} chars and {} image(s)",
            self.model,
            prompt.text.len(),
            prompt.images.len()
        );

        let (result, stats) =
            retry_async(&self.retry, || self.generate_once(&body), RetryDecision::for_error).await;

        if stats.attempts > 1 {
            info!(
                "Gemini call finished after {} attempts ({:?} backoff)",
                stats.attempts, stats.total_delay
            );
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gemini::InlineImage;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const GENERATE_PATH: &str = "/v1beta/models/gemini-1.5-flash:generateContent";

    fn client_for(server: &MockServer) -> GeminiClient {
        GeminiClient::new("test-key", "gemini-1.5-flash", &server.uri())
            .unwrap()
            .with_retry(
                RetryConfig::new()
                    .with_base_delay(Duration::ZERO)
                    .with_jitter(false),
            )
    }

    fn candidate_body(text: &str) -> serde_json::Value {
        json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": text}]},
                "finishReason": "STOP"
            }]
        })
    }

    #[tokio::test]
    async fn test_generate_returns_candidate_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .and(header_eq("x-goog-api-key", "test-key"))
            .and(body_partial_json(json!({
                "contents": [{"role": "user", "parts": [{"text": "Hello"}]}],
                "generationConfig": {"topK": 40}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(candidate_body("Hi there")))
            .expect(1)
            .mount(&server)
            .await;

        let text = client_for(&server)
            .generate(&Prompt::text("Hello"), &GenerationConfig::default())
            .await
            .unwrap();
        assert_eq!(text, "Hi there");
    }

    #[tokio::test]
    async fn test_generate_sends_inline_images() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .and(body_partial_json(json!({
                "contents": [{"parts": [
                    {"text": "Describe"},
                    {"inlineData": {"mimeType": "image/png", "data": "AQID"}}
                ]}]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(candidate_body("A square")))
            .mount(&server)
            .await;

        let prompt = Prompt::text("Describe").with_image(InlineImage {
            mime_type: "image/png".into(),
            data: vec![1, 2, 3],
        });
        let text = client_for(&server)
            .generate(&prompt, &GenerationConfig::default())
            .await
            .unwrap();
        assert_eq!(text, "A square");
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": {"code": 400, "message": "API key not valid", "status": "INVALID_ARGUMENT"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate(&Prompt::text("Hello"), &GenerationConfig::default())
            .await
            .unwrap_err();
        match err {
            NeonError::Gemini {
                message,
                status_code,
            } => {
                assert_eq!(status_code, Some(400));
                assert_eq!(message, "API key not valid (INVALID_ARGUMENT)");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(candidate_body("Recovered")))
            .mount(&server)
            .await;

        let text = client_for(&server)
            .generate(&Prompt::text("Hello"), &GenerationConfig::default())
            .await
            .unwrap();
        assert_eq!(text, "Recovered");
    }

    #[tokio::test]
    async fn test_rate_limit_reports_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "3"))
            .mount(&server)
            .await;

        let client = client_for(&server).with_retry(RetryConfig::new().with_max_attempts(1));
        let err = client
            .generate(&Prompt::text("Hello"), &GenerationConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            NeonError::RateLimited {
                retry_after_secs: Some(3),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_blocked_prompt_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "promptFeedback": {"blockReason": "SAFETY"}
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate(&Prompt::text("Hello"), &GenerationConfig::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Gemini API error: Prompt blocked: SAFETY");
    }
}
