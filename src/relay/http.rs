//! Model backend that relays through a running `offshoot serve` instance.
//!
//! `POST /chat` answers with a chunked plain-text body; each chunk is the
//! next slice of generated text.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::json;
use tracing::debug;

use super::sse::Utf8Buffer;
use super::{GenerationRequest, ModelBackend, ModelInfo, RelayError, TextStream};
use crate::server::OWNER_HEADER;

pub struct HttpRelayBackend {
    client: reqwest::Client,
    base_url: String,
    owner: String,
}

impl HttpRelayBackend {
    pub fn new(base_url: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            owner: owner.into(),
        }
    }
}

#[async_trait]
impl ModelBackend for HttpRelayBackend {
    async fn open(&self, request: GenerationRequest) -> Result<TextStream, RelayError> {
        let response = self
            .client
            .post(format!("{}/chat", self.base_url))
            .header(OWNER_HEADER, &self.owner)
            .json(&json!({ "messages": request.turns, "model": request.model }))
            .send()
            .await
            .map_err(|e| RelayError::UpstreamUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            debug!(status = %status, body = %detail, "Relay request rejected");
            return Err(RelayError::UpstreamUnavailable(format!(
                "server returned {}",
                status
            )));
        }

        // Chunks may split a UTF-8 sequence; the buffer carries it over.
        let body = response.bytes_stream().boxed();
        let stream = futures::stream::unfold(
            (body, Utf8Buffer::new(), false),
            |(mut body, mut utf8, finished)| async move {
                if finished {
                    return None;
                }
                match body.next().await {
                    Some(Ok(bytes)) => {
                        let text = utf8.push(&bytes);
                        Some((Ok(text), (body, utf8, false)))
                    }
                    Some(Err(e)) => Some((
                        Err(RelayError::Transport(e.to_string())),
                        (body, utf8, true),
                    )),
                    None => {
                        let rest = utf8.finish();
                        if rest.is_empty() {
                            None
                        } else {
                            Some((Ok(rest), (body, utf8, true)))
                        }
                    }
                }
            },
        );

        Ok(Box::pin(stream))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, RelayError> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .header(OWNER_HEADER, &self.owner)
            .send()
            .await
            .map_err(|e| RelayError::UpstreamUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RelayError::UpstreamUnavailable(format!(
                "server returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| RelayError::Upstream(e.to_string()))
    }
}
