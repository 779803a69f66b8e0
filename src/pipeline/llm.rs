//! Model backends: one prompt in, one completion out.
//!
//! The rewrite engine talks to [`ModelBackend`] only. Two implementations:
//!
//! * [`GeminiBackend`] calls the Gemini `generateContent` REST endpoint with
//!   an explicit API key.
//! * [`LlmProviderBackend`] goes through `edgequake-llm`'s
//!   [`ProviderFactory`], so any provider it knows (OpenAI, Anthropic,
//!   Ollama, ...) can serve as a candidate. Keys come from that crate's own
//!   environment lookup.
//!
//! Retries, probing and timeouts live in [`crate::pipeline::rewrite`]; a
//! backend makes exactly one attempt per call.

use crate::error::ModelError;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// A text-generation service addressed by model name.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, ModelError>;
}

// ── Gemini REST ──────────────────────────────────────────────────────────

/// Direct client for the Gemini REST API.
#[derive(Clone)]
pub struct GeminiBackend {
    endpoint: String,
    api_key: String,
    temperature: f32,
    max_tokens: usize,
    timeout_secs: u64,
}

impl GeminiBackend {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            temperature: 0.7,
            max_tokens: 8192,
            timeout_secs: 60,
        }
    }

    pub fn with_generation(mut self, temperature: f32, max_tokens: usize) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, model)
    }
}

impl std::fmt::Debug for GeminiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiBackend")
            .field("endpoint", &self.endpoint)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: usize,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<ApiErrorBody>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: String,
}

#[async_trait]
impl ModelBackend for GeminiBackend {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, ModelError> {
        let request = GenerateRequest {
            contents: [Content {
                role: "user",
                parts: [Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
            },
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| ModelError::Transport {
                model: model.to_string(),
                detail: e.to_string(),
            })?;

        let response = client
            .post(self.url(model))
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout {
                        model: model.to_string(),
                        secs: self.timeout_secs,
                    }
                } else {
                    ModelError::Transport {
                        model: model.to_string(),
                        detail: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| ModelError::Transport {
            model: model.to_string(),
            detail: e.to_string(),
        })?;
        debug!("{}: HTTP {}, {} bytes", model, status, body.len());

        parse_generate_response(model, status.as_u16(), &body)
    }
}

/// Text of the first candidate, or the error the service reported.
pub fn parse_generate_response(model: &str, status: u16, body: &str) -> Result<String, ModelError> {
    let api_error = |message: String| ModelError::Api {
        model: model.to_string(),
        status: Some(status),
        message,
    };

    let parsed: GenerateResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(e) if (200..300).contains(&status) => {
            return Err(api_error(format!("malformed response: {e}")))
        }
        Err(_) => return Err(api_error(body.chars().take(200).collect())),
    };

    if let Some(err) = parsed.error {
        return Err(api_error(err.message));
    }
    if !(200..300).contains(&status) {
        return Err(api_error("request rejected".to_string()));
    }

    let text: String = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ModelError::EmptyResponse {
            model: model.to_string(),
        });
    }
    Ok(text)
}

// ── edgequake-llm providers ──────────────────────────────────────────────

/// Backend that resolves each model name to an `edgequake-llm` provider.
///
/// Providers are created on first use and cached per model.
pub struct LlmProviderBackend {
    provider_name: String,
    options: CompletionOptions,
    providers: Mutex<HashMap<String, Arc<dyn LLMProvider>>>,
}

impl LlmProviderBackend {
    pub fn new(provider_name: impl Into<String>, temperature: f32, max_tokens: usize) -> Self {
        Self {
            provider_name: provider_name.into(),
            options: build_options(temperature, max_tokens),
            providers: Mutex::new(HashMap::new()),
        }
    }

    fn provider(&self, model: &str) -> Result<Arc<dyn LLMProvider>, ModelError> {
        let mut cache = self.providers.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(p) = cache.get(model) {
            return Ok(Arc::clone(p));
        }

        debug!("Creating {} provider for {}", self.provider_name, model);
        let provider = ProviderFactory::create_llm_provider(&self.provider_name, model).map_err(
            |e| ModelError::Api {
                model: model.to_string(),
                status: None,
                message: format!("provider '{}' not available: {e}", self.provider_name),
            },
        )?;
        cache.insert(model.to_string(), Arc::clone(&provider));
        Ok(provider)
    }
}

impl std::fmt::Debug for LlmProviderBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmProviderBackend")
            .field("provider_name", &self.provider_name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ModelBackend for LlmProviderBackend {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, ModelError> {
        let provider = self.provider(model)?;
        let messages = prompt_messages(prompt);

        let response = provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| ModelError::Transport {
                model: model.to_string(),
                detail: e.to_string(),
            })?;
        debug!(
            "{}: {} input tokens, {} output tokens",
            model, response.prompt_tokens, response.completion_tokens
        );

        if response.content.trim().is_empty() {
            return Err(ModelError::EmptyResponse {
                model: model.to_string(),
            });
        }
        Ok(response.content)
    }
}

/// A rewrite is a single text-only user turn.
fn prompt_messages(prompt: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::user(prompt)]
}

fn build_options(temperature: f32, max_tokens: usize) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(temperature),
        max_tokens: Some(max_tokens),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_is_one_plain_user_message() {
        let messages = prompt_messages("Rewrite this");
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "Rewrite this");
    }

    #[test]
    fn build_options_carries_generation_settings() {
        let opts = build_options(0.7, 8192);
        assert_eq!(opts.temperature, Some(0.7));
        assert_eq!(opts.max_tokens, Some(8192));
    }

    #[test]
    fn request_body_shape() {
        let req = GenerateRequest {
            contents: [Content {
                role: "user",
                parts: [Part { text: "hi" }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.5,
                max_output_tokens: 100,
            },
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 100);
    }

    #[test]
    fn url_per_model() {
        let b = GeminiBackend::new("https://generativelanguage.googleapis.com/v1beta/", "k");
        assert_eq!(
            b.url("gemini-2.0-flash"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent"
        );
        assert!(!format!("{b:?}").contains("\"k\""));
    }

    #[test]
    fn parses_candidate_parts() {
        let body = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Hello "},{"text":"world"}]}}]}"#;
        assert_eq!(parse_generate_response("m", 200, body).unwrap(), "Hello world");
    }

    #[test]
    fn api_error_with_status() {
        let body = r#"{"error":{"code":429,"message":"Resource has been exhausted","status":"RESOURCE_EXHAUSTED"}}"#;
        match parse_generate_response("gemini-pro", 429, body).unwrap_err() {
            ModelError::Api { status, message, .. } => {
                assert_eq!(status, Some(429));
                assert!(message.contains("exhausted"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn blocked_or_empty_candidate_is_empty_response() {
        let body = r#"{"candidates":[{"finishReason":"SAFETY"}]}"#;
        assert!(matches!(
            parse_generate_response("m", 200, body),
            Err(ModelError::EmptyResponse { .. })
        ));
        assert!(matches!(
            parse_generate_response("m", 200, r#"{"candidates":[]}"#),
            Err(ModelError::EmptyResponse { .. })
        ));
    }

    #[test]
    fn non_json_error_page() {
        let err = parse_generate_response("m", 502, "<html>Bad Gateway</html>").unwrap_err();
        assert!(err.to_string().contains("HTTP 502"));
    }
}
