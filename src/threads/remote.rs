//! Thread operations against a running `offshoot serve` instance.

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{CreateThread, NewMessage, ThreadDetail, ThreadError, ThreadService};
use crate::db::{Message, RootThread, Thread};
use crate::server::OWNER_HEADER;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// REST client implementing [`ThreadService`] for one identity.
#[derive(Clone)]
pub struct RemoteThreadService {
    client: reqwest::Client,
    base_url: String,
    owner: String,
}

impl RemoteThreadService {
    pub fn new(base_url: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            owner: owner.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(OWNER_HEADER, &self.owner)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ThreadError> {
        let response = self
            .authed(request)
            .send()
            .await
            .map_err(|e| ThreadError::Transport(e.to_string()))?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ThreadError> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .map_err(|e| ThreadError::Transport(e.to_string()));
    }

    let detail = response
        .json::<ErrorBody>()
        .await
        .map(|body| body.error)
        .unwrap_or_default();
    debug!(status = %status, error = %detail, "Thread request rejected");

    Err(match status {
        StatusCode::UNAUTHORIZED => ThreadError::Unauthorized,
        StatusCode::NOT_FOUND => ThreadError::NotFound("Thread"),
        _ => ThreadError::Transport(format!("{}: {}", status, detail)),
    })
}

#[async_trait]
impl ThreadService for RemoteThreadService {
    async fn create_thread(&self, request: CreateThread) -> Result<Thread, ThreadError> {
        self.send(self.client.post(self.url("/threads")).json(&request))
            .await
    }

    async fn get_thread(&self, id: &str) -> Result<ThreadDetail, ThreadError> {
        self.send(self.client.get(self.url(&format!("/threads/{}", id))))
            .await
    }

    async fn list_roots(&self) -> Result<Vec<RootThread>, ThreadError> {
        self.send(self.client.get(self.url("/threads"))).await
    }

    async fn rename_thread(&self, id: &str, title: &str) -> Result<Thread, ThreadError> {
        self.send(
            self.client
                .patch(self.url(&format!("/threads/{}", id)))
                .json(&json!({ "title": title })),
        )
        .await
    }

    async fn delete_thread(&self, id: &str) -> Result<(), ThreadError> {
        let _: serde_json::Value = self
            .send(self.client.delete(self.url(&format!("/threads/{}", id))))
            .await?;
        Ok(())
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message, ThreadError> {
        self.send(self.client.post(self.url("/messages")).json(&message))
            .await
    }
}
