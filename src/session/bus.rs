//! Event bus carrying session changes to whoever renders them.

use tokio::sync::broadcast;

use super::{ChatMessage, TurnOutcome};
use crate::db::ChildThread;

/// Something that changed in a session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A message was appended to the local list.
    MessageAdded(ChatMessage),
    /// A message's content changed; `content` is the full new text.
    MessageUpdated { id: String, content: String },
    /// The assistant turn `id` reached a terminal state.
    TurnFinished { id: String, outcome: TurnOutcome },
    /// The active thread got a new title.
    ThreadRenamed { title: String },
    BranchCreated(ChildThread),
    ContextAttached(String),
    ContextCleared,
}

/// Sender half of the session bus.
#[derive(Clone)]
pub struct EventSender {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventSender {
    /// Send an event.
    pub fn send(&self, event: SessionEvent) -> Result<(), BusError> {
        self.tx.send(event).map_err(|_| BusError::Closed)?;
        Ok(())
    }

    /// Send an event, ignoring the absence of subscribers.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.send(event);
    }
}

/// Receiver half of the session bus.
pub struct EventReceiver {
    rx: broadcast::Receiver<SessionEvent>,
}

impl EventReceiver {
    /// Receive the next event.
    pub async fn recv(&mut self) -> Result<SessionEvent, BusError> {
        self.rx.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => BusError::Closed,
            broadcast::error::RecvError::Lagged(n) => BusError::Lagged(n),
        })
    }

    /// Try to receive an event without waiting.
    pub fn try_recv(&mut self) -> Result<Option<SessionEvent>, BusError> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Closed) => Err(BusError::Closed),
            Err(broadcast::error::TryRecvError::Lagged(n)) => Err(BusError::Lagged(n)),
        }
    }
}

/// Broadcast bus for session events.
pub struct SessionBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl SessionBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn sender(&self) -> EventSender {
        EventSender {
            tx: self.tx.clone(),
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for SessionBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Bus errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Channel closed")]
    Closed,
    #[error("Lagged behind by {0} events")]
    Lagged(u64),
}
