//! Blocking client for OpenAI-compatible chat and embedding endpoints.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{Completion, Embedder, LlmError, Message, Result};
use crate::config::LlmConfig;

/// One HTTP client serving both capabilities.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    completion_model: String,
    embedding_model: String,
    embedding_query: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    n: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(LlmError::Unavailable(format!(
                "URL must start with http:// or https://: {}",
                base_url
            )));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(key) = config.api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            let auth = format!("Bearer {}", key.trim());
            let value = HeaderValue::from_str(&auth)
                .map_err(|_| LlmError::Unavailable("API key is not a valid header".to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(config.insecure)
            .build()?;

        Ok(Self {
            client,
            base_url,
            completion_model: config.completion_model.clone(),
            embedding_model: config.embedding_model.clone(),
            embedding_query: config.embedding_query.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    fn post<T: Serialize, R: for<'de> Deserialize<'de>>(&self, path: &str, body: &T) -> Result<R> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.post(&url).json(body).send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<R>()
            .map_err(|e| LlmError::BadResponse(format!("{}: {}", path, e)))
    }
}

impl Completion for OpenAiClient {
    fn complete(&self, messages: &[Message]) -> Result<String> {
        let request = CompletionRequest {
            model: &self.completion_model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: 1.0,
            n: 1,
        };
        let response: CompletionResponse = self.post("/v1/chat/completions", &request)?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LlmError::BadResponse("completion without message content".to_string()))
    }
}

impl Embedder for OpenAiClient {
    fn embed(&self, input: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input: format!("{}{}", self.embedding_query, input),
        };
        let response: EmbeddingResponse = self.post("/v1/embeddings", &request)?;

        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| LlmError::BadResponse("embedding response without data".to_string()))
    }
}
