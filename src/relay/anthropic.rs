//! Anthropic Messages API backend.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::sse::{SseDecoder, SseEvent};
use super::{GenerationRequest, ModelBackend, ModelInfo, RelayError, TextStream};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_MODEL_NAME: &str = "Claude Sonnet 4";
pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Provide clear, accurate, and concise answers.";

const ANTHROPIC_VERSION: &str = "2023-06-01";

impl ModelInfo {
    /// The model offered when the upstream list is unavailable.
    pub fn default_model() -> Self {
        Self {
            id: DEFAULT_MODEL.to_string(),
            name: DEFAULT_MODEL_NAME.to_string(),
        }
    }
}

/// Upstream connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct AnthropicConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub max_tokens: u32,
    pub system_prompt: String,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    stream: bool,
    system: &'a str,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ModelsPage {
    data: Vec<WireModel>,
}

#[derive(Debug, Deserialize)]
struct WireModel {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    display_name: Option<String>,
}

/// Streams generations from the Anthropic Messages API.
pub struct AnthropicBackend {
    client: reqwest::Client,
    config: AnthropicConfig,
}

impl AnthropicBackend {
    pub fn new(config: AnthropicConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn config(&self) -> &AnthropicConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn api_key(&self) -> Result<&str, RelayError> {
        self.config
            .api_key
            .as_deref()
            .ok_or_else(|| RelayError::Config("Anthropic API key not configured".to_string()))
    }

    async fn fetch_models(&self, api_key: &str) -> Result<Vec<ModelInfo>, RelayError> {
        let response = self
            .client
            .get(self.endpoint("/v1/models"))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await
            .map_err(|e| RelayError::UpstreamUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RelayError::UpstreamUnavailable(format!(
                "models endpoint returned {}",
                response.status()
            )));
        }

        let page: ModelsPage = response
            .json()
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))?;
        Ok(models_from_page(page))
    }
}

fn request_body<'a>(config: &'a AnthropicConfig, request: &'a GenerationRequest) -> MessagesRequest<'a> {
    MessagesRequest {
        model: &request.model,
        max_tokens: config.max_tokens,
        stream: true,
        system: &config.system_prompt,
        messages: request
            .turns
            .iter()
            .map(|turn| WireMessage {
                role: turn.role.as_str(),
                content: &turn.content,
            })
            .collect(),
    }
}

fn models_from_page(page: ModelsPage) -> Vec<ModelInfo> {
    page.data
        .into_iter()
        .filter(|m| m.kind == "model")
        .map(|m| ModelInfo {
            name: m.display_name.unwrap_or_else(|| m.id.clone()),
            id: m.id,
        })
        .collect()
}

/// Extract the text carried by one stream event.
///
/// Unparseable payloads are skipped; an `error` event ends the stream.
pub fn delta_text(event: &SseEvent) -> Result<Option<String>, RelayError> {
    if event.is_done() {
        return Ok(None);
    }
    let data: Value = match serde_json::from_str(&event.data) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "Skipping malformed stream event");
            return Ok(None);
        }
    };

    let event_type = event
        .event_type
        .as_deref()
        .or_else(|| data["type"].as_str());

    match event_type {
        Some("content_block_delta") => {
            let delta = &data["delta"];
            match delta["type"].as_str() {
                Some("text_delta") | None => Ok(delta["text"]
                    .as_str()
                    .filter(|t| !t.is_empty())
                    .map(String::from)),
                _ => Ok(None),
            }
        }
        Some("error") => {
            let message = data["error"]["message"]
                .as_str()
                .unwrap_or("Unknown error");
            Err(RelayError::Upstream(message.to_string()))
        }
        _ => Ok(None),
    }
}

#[async_trait]
impl ModelBackend for AnthropicBackend {
    async fn open(&self, request: GenerationRequest) -> Result<TextStream, RelayError> {
        let api_key = self.api_key()?;
        let body = request_body(&self.config, &request);

        debug!(model = %request.model, "Anthropic stream request");
        let response = self
            .client
            .post(self.endpoint("/v1/messages"))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::UpstreamUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %detail, "Anthropic API error");
            return Err(RelayError::UpstreamUnavailable(format!(
                "Anthropic API returned {}",
                status
            )));
        }

        let stream = response
            .bytes_stream()
            .scan(SseDecoder::new(), |decoder, chunk| {
                let items: Vec<Result<String, RelayError>> = match chunk {
                    Ok(bytes) => decoder
                        .feed(&bytes)
                        .iter()
                        .filter_map(|event| delta_text(event).transpose())
                        .collect(),
                    Err(e) => vec![Err(RelayError::Transport(e.to_string()))],
                };
                futures::future::ready(Some(futures::stream::iter(items)))
            })
            .flatten();

        Ok(Box::pin(stream))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, RelayError> {
        let Ok(api_key) = self.api_key() else {
            return Ok(vec![ModelInfo::default_model()]);
        };

        match self.fetch_models(api_key).await {
            Ok(models) if !models.is_empty() => Ok(models),
            Ok(_) => Ok(vec![ModelInfo::default_model()]),
            Err(e) => {
                warn!(error = %e, "Falling back to default model list");
                Ok(vec![ModelInfo::default_model()])
            }
        }
    }
}
