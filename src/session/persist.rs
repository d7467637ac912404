//! Ordered fire-and-forget persistence for a session.
//!
//! Writes are queued to a background task and applied one at a time in
//! submission order. A failed write is logged and dropped; it is never
//! retried and never reported to the caller.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::threads::{NewMessage, ThreadService};

enum Op {
    Append(NewMessage),
    Rename { thread_id: String, title: String },
    Flush(oneshot::Sender<()>),
}

/// Handle to a session's persistence worker.
#[derive(Clone)]
pub struct PersistQueue {
    tx: mpsc::UnboundedSender<Op>,
}

impl PersistQueue {
    /// Start the worker. It stops once every handle is dropped.
    pub fn spawn(service: Arc<dyn ThreadService>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker(service, rx));
        Self { tx }
    }

    pub fn append(&self, message: NewMessage) {
        self.enqueue(Op::Append(message));
    }

    pub fn rename(&self, thread_id: &str, title: &str) {
        self.enqueue(Op::Rename {
            thread_id: thread_id.to_string(),
            title: title.to_string(),
        });
    }

    /// Wait until everything queued so far has been attempted.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        self.enqueue(Op::Flush(done));
        let _ = wait.await;
    }

    fn enqueue(&self, op: Op) {
        if self.tx.send(op).is_err() {
            warn!("Persistence worker is gone; dropping write");
        }
    }
}

async fn worker(service: Arc<dyn ThreadService>, mut rx: mpsc::UnboundedReceiver<Op>) {
    while let Some(op) = rx.recv().await {
        match op {
            Op::Append(message) => {
                let thread_id = message.thread_id.clone();
                match service.append_message(message).await {
                    Ok(stored) => debug!(thread = %thread_id, message = %stored.id, "Persisted message"),
                    Err(e) => warn!(thread = %thread_id, error = %e, "Failed to persist message"),
                }
            }
            Op::Rename { thread_id, title } => {
                if let Err(e) = service.rename_thread(&thread_id, &title).await {
                    warn!(thread = %thread_id, error = %e, "Failed to persist title");
                }
            }
            Op::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Persistence worker stopped");
}
