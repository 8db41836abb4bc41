//! Request and response types for the Gemini `generateContent` API.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sampling parameters sent with every generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f64,
    pub top_p: f64,
    pub top_k: u32,
    pub max_output_tokens: u32,
    pub candidate_count: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            top_p: 0.8,
            top_k: 40,
            max_output_tokens: 2048,
            candidate_count: 1,
        }
    }
}

impl GenerationConfig {
    /// Apply `temperature` and `max_tokens` from a request's free-form
    /// parameters. Values of the wrong JSON type are ignored.
    pub fn with_overrides(mut self, parameters: &Map<String, Value>) -> Self {
        if let Some(temperature) = parameters.get("temperature").and_then(Value::as_f64) {
            self.temperature = temperature;
        }
        if let Some(max_tokens) = parameters.get("max_tokens").and_then(Value::as_u64) {
            self.max_output_tokens = u32::try_from(max_tokens).unwrap_or(u32::MAX);
        }
        self
    }
}

/// Raw image bytes attached to a prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Text plus optional images for a single-turn generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prompt {
    pub text: String,
    pub images: Vec<InlineImage>,
}

impl Prompt {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn with_image(mut self, image: InlineImage) -> Self {
        self.images.push(image);
        self
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentRequest<'a> {
    pub contents: Vec<Content>,
    pub generation_config: &'a GenerationConfig,
}

#[derive(Debug, Serialize)]
pub(crate) struct Content {
    pub role: &'static str,
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum Part {
    Text {
        text: String,
    },
    #[serde(rename_all = "camelCase")]
    InlineData { inline_data: Blob },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Blob {
    pub mime_type: String,
    /// Base64-encoded bytes.
    pub data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Candidate {
    #[serde(default)]
    pub content: Option<CandidateContent>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponsePart {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorBody {
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_generation_config_serializes_camel_case() {
        let value = serde_json::to_value(GenerationConfig::default()).unwrap();
        assert_eq!(value["topK"], 40);
        assert_eq!(value["maxOutputTokens"], 2048);
        assert_eq!(value["candidateCount"], 1);
    }

    #[test]
    fn test_overrides_apply_known_parameters() {
        let params = json!({"temperature": 0.2, "max_tokens": 512, "session_id": "s1"});
        let config = GenerationConfig::default().with_overrides(params.as_object().unwrap());
        assert_eq!(config.temperature, 0.2);
        assert_eq!(config.max_output_tokens, 512);
        assert_eq!(config.top_k, 40);
    }

    #[test]
    fn test_overrides_ignore_wrong_types() {
        let params = json!({"temperature": "hot", "max_tokens": -4});
        let config = GenerationConfig::default().with_overrides(params.as_object().unwrap());
        assert_eq!(config, GenerationConfig::default());
    }

    #[test]
    fn test_inline_part_shape() {
        let part = Part::InlineData {
            inline_data: Blob {
                mime_type: "image/png".into(),
                data: "AAAA".into(),
            },
        };
        assert_eq!(
            serde_json::to_value(part).unwrap(),
            json!({"inlineData": {"mimeType": "image/png", "data": "AAAA"}})
        );
    }
}
