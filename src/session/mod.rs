//! Conversation sessions.
//!
//! A [`ConversationSession`] drives one active thread: it keeps the message
//! list in memory, runs assistant turns through the [`StreamRelay`], and
//! mirrors changes to the thread service in the background. The in-memory
//! list is the source of truth for the current view; it is reconciled with
//! the store on [`load`](ConversationSession::load).
//!
//! ```ignore
//! let mut session = ConversationSession::start(service, relay, options).await?;
//! let mut events = session.subscribe();
//! session.submit("Explain recursion").await?;
//! ```

mod bus;
mod persist;

pub use bus::{BusError, EventReceiver, EventSender, SessionBus, SessionEvent};
pub use persist::PersistQueue;

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::{Breadcrumb, ChildThread, Message, Role, Thread};
use crate::relay::{ChatTurn, RelayHandle, RelayState, StreamAccumulator, StreamRelay};
use crate::threads::{self, CreateThread, NewMessage, ThreadError, ThreadService};

/// Shown in place of an answer whose generation failed.
pub const APOLOGY: &str = "Sorry, something went wrong. Please try again.";

/// Characters of the first message kept in the thread title.
pub const TITLE_CHARS: usize = 50;

/// What happens to an assistant turn whose generation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Replace whatever streamed with [`APOLOGY`].
    #[default]
    ReplaceWithApology,
    /// Keep the partial text (the apology only if nothing streamed).
    KeepPartial,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::ReplaceWithApology => "apology",
            FailurePolicy::KeepPartial => "keep_partial",
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "apology" | "replace_with_apology" => Ok(FailurePolicy::ReplaceWithApology),
            "keep_partial" | "partial" => Ok(FailurePolicy::KeepPartial),
            other => Err(format!(
                "unknown failure policy: {} (expected apology or keep_partial)",
                other
            )),
        }
    }
}

/// Title for a thread whose first message is `text`.
pub fn first_message_title(text: &str) -> String {
    let mut chars = text.chars();
    let prefix: String = chars.by_ref().take(TITLE_CHARS).collect();
    if chars.next().is_some() {
        format!("{}...", prefix)
    } else {
        prefix
    }
}

/// A message as held by a session.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub selected_text: Option<String>,
    pub is_streaming: bool,
    /// Stored, or queued to be stored, under `id`.
    pub persisted: bool,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.into(),
            selected_text: None,
            is_streaming: false,
            persisted: false,
        }
    }

    /// Empty placeholder for an assistant turn about to stream.
    pub fn assistant() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: String::new(),
            selected_text: None,
            is_streaming: true,
            persisted: false,
        }
    }

    pub fn finish_streaming(&mut self) {
        self.is_streaming = false;
    }

    pub fn to_turn(&self) -> ChatTurn {
        ChatTurn::new(self.role, self.content.clone())
    }
}

impl From<Message> for ChatMessage {
    fn from(message: Message) -> Self {
        Self {
            id: message.id,
            role: message.role,
            content: message.content,
            selected_text: message.selected_text,
            is_streaming: false,
            persisted: true,
        }
    }
}

/// How a submit ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Nothing happened: empty input or a turn already in flight.
    Ignored,
    Completed,
    Aborted,
    Failed(String),
}

/// Per-session generation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    pub model: String,
    pub failure_policy: FailurePolicy,
    pub persist_failed_turns: bool,
}

impl SessionOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            failure_policy: FailurePolicy::default(),
            persist_failed_turns: false,
        }
    }
}

impl From<&AppConfig> for SessionOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            model: config.default_model.clone(),
            failure_policy: config.failure_policy,
            persist_failed_turns: config.persist_failed_turns,
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Thread(#[from] ThreadError),
}

/// Lets another task abort the in-flight turn of a session.
#[derive(Clone, Default)]
pub struct TurnController {
    current: Arc<Mutex<Option<RelayHandle>>>,
}

impl TurnController {
    /// Abort the in-flight turn, if any. Returns whether one was running.
    pub fn abort(&self) -> bool {
        match self.slot().take() {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.slot().is_some()
    }

    fn set(&self, handle: RelayHandle) {
        *self.slot() = Some(handle);
    }

    fn clear(&self) {
        self.slot().take();
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<RelayHandle>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Orchestrates one active thread.
pub struct ConversationSession {
    service: Arc<dyn ThreadService>,
    relay: StreamRelay,
    persist: PersistQueue,
    bus: SessionBus,
    events: EventSender,
    options: SessionOptions,
    controller: TurnController,
    thread: Thread,
    messages: Vec<ChatMessage>,
    branches: Vec<ChildThread>,
    breadcrumbs: Vec<Breadcrumb>,
    pending_context: Option<String>,
}

impl ConversationSession {
    /// Open an existing thread.
    pub async fn open(
        service: Arc<dyn ThreadService>,
        relay: StreamRelay,
        options: SessionOptions,
        thread_id: &str,
    ) -> Result<Self, SessionError> {
        let detail = service.get_thread(thread_id).await?;
        let persist = PersistQueue::spawn(service.clone());
        let bus = SessionBus::new();
        let events = bus.sender();

        let mut session = Self {
            service,
            relay,
            persist,
            bus,
            events,
            options,
            controller: TurnController::default(),
            thread: detail.thread.clone(),
            messages: Vec::new(),
            branches: Vec::new(),
            breadcrumbs: Vec::new(),
            pending_context: None,
        };
        session.reconcile(detail);
        Ok(session)
    }

    /// Create a new root thread and open it.
    pub async fn start(
        service: Arc<dyn ThreadService>,
        relay: StreamRelay,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let thread = service.create_thread(CreateThread::default()).await?;
        Self::open(service, relay, options, &thread.id).await
    }

    /// Switch to `thread_id`, replacing all local state with the stored one.
    ///
    /// Pending writes are flushed first so the reload sees them.
    pub async fn load(&mut self, thread_id: &str) -> Result<(), SessionError> {
        self.controller.abort();
        self.persist.flush().await;

        let detail = self.service.get_thread(thread_id).await?;
        if detail.thread.id != self.thread.id {
            self.pending_context = None;
        }
        self.reconcile(detail);
        Ok(())
    }

    fn reconcile(&mut self, detail: threads::ThreadDetail) {
        debug!(
            thread = %detail.thread.id,
            messages = detail.messages.len(),
            branches = detail.children.len(),
            "Loaded thread"
        );
        self.thread = detail.thread;
        self.messages = detail.messages.into_iter().map(ChatMessage::from).collect();
        self.branches = detail.children;
        self.breadcrumbs = detail.breadcrumbs;
    }

    pub fn thread(&self) -> &Thread {
        &self.thread
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Direct branches of the active thread, newest first.
    pub fn branches(&self) -> &[ChildThread] {
        &self.branches
    }

    pub fn breadcrumbs(&self) -> &[Breadcrumb] {
        &self.breadcrumbs
    }

    pub fn pending_context(&self) -> Option<&str> {
        self.pending_context.as_deref()
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.options.model = model.into();
    }

    pub fn service(&self) -> &Arc<dyn ThreadService> {
        &self.service
    }

    pub fn relay(&self) -> &StreamRelay {
        &self.relay
    }

    pub fn controller(&self) -> TurnController {
        self.controller.clone()
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.bus.subscribe()
    }

    /// Wait for queued writes to be attempted.
    pub async fn flush(&self) {
        self.persist.flush().await;
    }

    /// Quote `span` in front of the next submitted message.
    pub fn ask_in_thread(&mut self, span: &str) -> Result<(), SessionError> {
        if span.trim().is_empty() {
            return Err(ThreadError::EmptySelection.into());
        }
        self.pending_context = Some(span.to_string());
        self.events.emit(SessionEvent::ContextAttached(span.to_string()));
        Ok(())
    }

    pub fn clear_context(&mut self) {
        if self.pending_context.take().is_some() {
            self.events.emit(SessionEvent::ContextCleared);
        }
    }

    /// Branch the active thread from `span`, anchored to the latest stored
    /// assistant message. The new branch goes to the head of
    /// [`branches`](Self::branches); the session stays on the current thread.
    pub async fn create_branch(&mut self, span: &str) -> Result<ChildThread, SessionError> {
        // The anchor must exist in the store before the branch refers to it.
        self.persist.flush().await;

        let anchor = self
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && m.persisted)
            .map(|m| m.id.clone());

        let branch =
            threads::create_branch(self.service.as_ref(), &self.thread.id, span, anchor.as_deref())
                .await?;

        self.branches.insert(0, branch.clone());
        self.events.emit(SessionEvent::BranchCreated(branch.clone()));
        Ok(branch)
    }

    /// Delete a direct branch of the active thread and drop it locally.
    pub async fn remove_branch(&mut self, branch_id: &str) -> Result<(), SessionError> {
        self.service.delete_thread(branch_id).await?;
        self.branches.retain(|b| b.id != branch_id);
        Ok(())
    }

    /// Rename the active thread.
    pub async fn rename(&mut self, title: &str) -> Result<(), SessionError> {
        let thread = self.service.rename_thread(&self.thread.id, title).await?;
        self.thread.title = thread.title.clone();
        self.events.emit(SessionEvent::ThreadRenamed {
            title: thread.title,
        });
        Ok(())
    }

    /// Send `text` as a user turn and stream the assistant's answer.
    ///
    /// Returns once the answer reaches a terminal state.
    pub async fn submit(&mut self, text: &str) -> Result<TurnOutcome, SessionError> {
        if text.trim().is_empty() || self.options.model.is_empty() || self.controller.is_active() {
            return Ok(TurnOutcome::Ignored);
        }

        let span = self.pending_context.take();
        let content = match &span {
            Some(span) => {
                self.events.emit(SessionEvent::ContextCleared);
                threads::quote_context(span, text)
            }
            None => text.to_string(),
        };
        let is_first = self.messages.is_empty();

        let mut user = ChatMessage::user(content);
        user.selected_text = span;
        self.persist_message(&mut user);
        self.push(user);

        if is_first {
            let title = first_message_title(text);
            self.persist.rename(&self.thread.id, &title);
            self.thread.title = title.clone();
            self.events.emit(SessionEvent::ThreadRenamed { title });
        }

        let turns: Vec<ChatTurn> = self.messages.iter().map(ChatMessage::to_turn).collect();
        let placeholder = ChatMessage::assistant();
        let reply_id = placeholder.id.clone();
        self.push(placeholder);

        let outcome = self.stream_reply(turns).await;
        info!(thread = %self.thread.id, outcome = ?outcome, "Turn finished");
        self.events.emit(SessionEvent::TurnFinished {
            id: reply_id,
            outcome: outcome.clone(),
        });
        Ok(outcome)
    }

    async fn stream_reply(&mut self, turns: Vec<ChatTurn>) -> TurnOutcome {
        let model = self.options.model.clone();
        let mut accumulated = StreamAccumulator::new();

        let state = match self.relay.begin(turns, &model).await {
            Ok((handle, mut increments)) => {
                self.controller.set(handle.clone());
                while let Some(increment) = increments.next().await {
                    let text = accumulated.push(&increment).to_string();
                    self.update_reply(text);
                }
                self.controller.clear();
                handle.state()
            }
            Err(e) => RelayState::Failed(e.to_string()),
        };

        let Some(mut reply) = self.messages.pop() else {
            return TurnOutcome::Failed("reply placeholder missing".to_string());
        };
        reply.finish_streaming();

        let outcome = match state {
            RelayState::Completed => {
                self.persist_message(&mut reply);
                TurnOutcome::Completed
            }
            RelayState::Aborted => TurnOutcome::Aborted,
            RelayState::Failed(reason) => {
                reply.content = match self.options.failure_policy {
                    FailurePolicy::KeepPartial if !accumulated.is_empty() => accumulated.into_text(),
                    _ => APOLOGY.to_string(),
                };
                self.events.emit(SessionEvent::MessageUpdated {
                    id: reply.id.clone(),
                    content: reply.content.clone(),
                });
                if self.options.persist_failed_turns {
                    self.persist_message(&mut reply);
                }
                TurnOutcome::Failed(reason)
            }
            other => TurnOutcome::Failed(format!("stream ended in state {:?}", other)),
        };

        self.messages.push(reply);
        outcome
    }

    fn update_reply(&mut self, text: String) {
        if let Some(reply) = self.messages.last_mut() {
            reply.content = text;
            self.events.emit(SessionEvent::MessageUpdated {
                id: reply.id.clone(),
                content: reply.content.clone(),
            });
        }
    }

    fn push(&mut self, message: ChatMessage) {
        self.events.emit(SessionEvent::MessageAdded(message.clone()));
        self.messages.push(message);
    }

    fn persist_message(&self, message: &mut ChatMessage) {
        self.persist.append(NewMessage {
            id: Some(message.id.clone()),
            thread_id: self.thread.id.clone(),
            role: message.role,
            content: message.content.clone(),
            selected_text: message.selected_text.clone(),
        });
        message.persisted = true;
    }
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        self.controller.abort();
    }
}
