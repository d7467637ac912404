//! Live-response relay.
//!
//! One [`StreamRelay::begin`] call drives one model invocation and hands back
//! a cancellable [`RelayHandle`] plus the [`Increments`] it produces. Each
//! invocation moves through
//!
//! ```text
//! Idle -> Streaming -> Completed | Aborted | Failed
//! ```
//!
//! and never leaves a terminal state. Increments are appended text: a consumer
//! rebuilds the answer by concatenation (see [`StreamAccumulator`]).

pub mod anthropic;
pub mod http;
pub mod sse;

pub use anthropic::{AnthropicBackend, AnthropicConfig};
pub use http::HttpRelayBackend;

use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::db::Role;

/// Upstream text increments; an `Err` item ends the stream abnormally.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, RelayError>> + Send>>;

/// Errors that end an invocation (or prevent it from starting).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RelayError {
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("Stream transport error: {0}")]
    Transport(String),
    #[error("Upstream error: {0}")]
    Upstream(String),
    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Lifecycle of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Streaming,
    Completed,
    Aborted,
    Failed(String),
}

impl RelayState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RelayState::Completed | RelayState::Aborted | RelayState::Failed(_)
        )
    }
}

/// One role-tagged turn of conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Everything a backend needs to start generating.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    /// Full ordered history, ending with the newest user turn.
    pub turns: Vec<ChatTurn>,
}

/// A model the backend can generate with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
}

/// The opaque generation capability.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Open an upstream generation and return its increment stream.
    async fn open(&self, request: GenerationRequest) -> Result<TextStream, RelayError>;

    /// Models available for generation.
    async fn list_models(&self) -> Result<Vec<ModelInfo>, RelayError>;
}

// =========================================================================
// Handle
// =========================================================================

#[derive(Debug)]
struct HandleInner {
    state: Mutex<RelayState>,
    token: CancellationToken,
}

/// Cancellable view of one invocation. Clones share the same invocation.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    inner: Arc<HandleInner>,
}

impl RelayHandle {
    fn new() -> Self {
        Self {
            inner: Arc::new(HandleInner {
                state: Mutex::new(RelayState::Idle),
                token: CancellationToken::new(),
            }),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RelayState {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Tear down the upstream and stop delivering increments.
    ///
    /// Idempotent; a no-op once the invocation has completed or failed.
    /// Text already delivered is left with the consumer.
    pub fn cancel(&self) {
        let aborted = {
            let mut state = self
                .inner
                .state
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if matches!(*state, RelayState::Idle | RelayState::Streaming) {
                *state = RelayState::Aborted;
                true
            } else {
                false
            }
        };
        // A finished invocation keeps its buffered increments.
        if aborted {
            debug!("Relay aborted");
            self.inner.token.cancel();
        }
    }

    /// True once the invocation was aborted.
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    fn transition(&self, from: RelayState, to: RelayState) -> bool {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    fn finish(&self, outcome: RelayState) {
        if self.transition(RelayState::Streaming, outcome.clone()) {
            match outcome {
                RelayState::Failed(ref reason) => warn!(reason = %reason, "Relay failed"),
                ref other => debug!(state = ?other, "Relay finished"),
            }
        }
    }
}

// =========================================================================
// Increments
// =========================================================================

/// Lazy, finite, non-restartable sequence of text increments.
///
/// Ends when the invocation reaches a terminal state; inspect
/// [`RelayHandle::state`] afterwards to tell the outcomes apart. Dropping it
/// before the end cancels the invocation.
pub struct Increments {
    rx: mpsc::Receiver<String>,
    handle: RelayHandle,
}

impl Increments {
    pub fn handle(&self) -> &RelayHandle {
        &self.handle
    }
}

impl Stream for Increments {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.handle.is_cancelled() {
            return Poll::Ready(None);
        }
        match this.rx.poll_recv(cx) {
            // An increment buffered before a cancel is never handed out.
            Poll::Ready(Some(_)) if this.handle.is_cancelled() => Poll::Ready(None),
            other => other,
        }
    }
}

impl Drop for Increments {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}

// =========================================================================
// Relay
// =========================================================================

/// Drives model invocations against one backend.
#[derive(Clone)]
pub struct StreamRelay {
    backend: Arc<dyn ModelBackend>,
    generation_timeout: Option<Duration>,
}

impl StreamRelay {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self {
            backend,
            generation_timeout: None,
        }
    }

    /// Cap the wall-clock duration of each invocation.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.generation_timeout = timeout;
        self
    }

    pub fn backend(&self) -> &Arc<dyn ModelBackend> {
        &self.backend
    }

    /// Open an upstream generation for `turns` and start relaying it.
    ///
    /// Fails without producing a handle if the upstream cannot be opened.
    pub async fn begin(
        &self,
        turns: Vec<ChatTurn>,
        model: &str,
    ) -> Result<(RelayHandle, Increments), RelayError> {
        let request = GenerationRequest {
            model: model.to_string(),
            turns,
        };
        let deadline = self
            .generation_timeout
            .map(|limit| (Instant::now() + limit, limit));

        info!(model = %request.model, turns = request.turns.len(), "Opening generation");
        let upstream = match deadline {
            Some((at, limit)) => tokio::time::timeout_at(at, self.backend.open(request))
                .await
                .map_err(|_| RelayError::Timeout(limit))??,
            None => self.backend.open(request).await?,
        };

        let handle = RelayHandle::new();
        handle.transition(RelayState::Idle, RelayState::Streaming);

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(pump(upstream, tx, handle.clone(), deadline));

        Ok((
            handle.clone(),
            Increments {
                rx,
                handle,
            },
        ))
    }
}

/// Forward upstream increments to the subscriber until a terminal state.
///
/// Returning drops `upstream`, which tears down the connection.
async fn pump(
    mut upstream: TextStream,
    tx: mpsc::Sender<String>,
    handle: RelayHandle,
    deadline: Option<(Instant, Duration)>,
) {
    let token = handle.inner.token.clone();
    let expired = async {
        match deadline {
            Some((at, _)) => tokio::time::sleep_until(at).await,
            None => futures::future::pending::<()>().await,
        }
    };
    tokio::pin!(expired);

    let mut delivered = 0usize;
    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = &mut expired => {
                let limit = deadline.map(|(_, limit)| limit).unwrap_or_default();
                handle.finish(RelayState::Failed(RelayError::Timeout(limit).to_string()));
                return;
            }
            item = upstream.next() => item,
        };

        match next {
            Some(Ok(text)) => {
                if text.is_empty() {
                    continue;
                }
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    sent = tx.send(text) => {
                        if sent.is_err() {
                            // Subscriber went away without cancelling.
                            handle.cancel();
                            return;
                        }
                        delivered += 1;
                    }
                }
            }
            Some(Err(e)) => {
                handle.finish(RelayState::Failed(e.to_string()));
                return;
            }
            None => {
                debug!(increments = delivered, "Upstream exhausted");
                handle.finish(RelayState::Completed);
                return;
            }
        }
    }
}

// =========================================================================
// Accumulator
// =========================================================================

/// Running accumulation of one invocation's output.
///
/// Keeps the increments as a replayable log next to the concatenated text so
/// that several observers (a live view, a persistence sink) can each consume
/// the same output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamAccumulator {
    increments: Vec<String>,
    text: String,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one increment and return the text so far.
    pub fn push(&mut self, increment: &str) -> &str {
        self.text.push_str(increment);
        self.increments.push(increment.to_string());
        &self.text
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Increments in arrival order.
    pub fn increments(&self) -> &[String] {
        &self.increments
    }

    pub fn is_empty(&self) -> bool {
        self.increments.is_empty()
    }

    pub fn into_text(self) -> String {
        self.text
    }
}
