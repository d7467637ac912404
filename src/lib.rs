//! Offshoot Library
//!
//! Branching LLM conversations: any span of an answer can be forked into a
//! child thread, building a tree of conversations per owner.
//!
//! ## Main Components
//!
//! - [`db`] - SQLite persistence for threads, messages and settings
//! - [`threads`] - The thread tree and branch workflow
//! - [`relay`] - Streaming generation from a model backend
//! - [`session`] - Client-side conversation state
//! - [`server`] - REST API
//! - [`cli`] - Command-line interface (server, REPL)
//! - [`config`] - Runtime configuration
//!
//! ## Quick Start
//!
//! ```ignore
//! use offshoot::{Store, ThreadTree, CreateThread};
//!
//! let tree = ThreadTree::new(Store::in_memory()?);
//! let root = tree.create_thread("alice", CreateThread::root(Some("Recursion".into())))?;
//! ```

pub mod cli;
pub mod config;
pub mod db;
pub mod relay;
pub mod server;
pub mod session;
pub mod threads;

pub use config::{AppConfig, ConfigOverrides, Settings};
pub use db::{Database, Store};
pub use relay::{ModelBackend, RelayError, RelayHandle, StreamRelay};
pub use server::{router, AppState};
pub use session::{ConversationSession, SessionEvent, SessionOptions};
pub use threads::{CreateThread, NewMessage, ThreadError, ThreadService, ThreadTree};
