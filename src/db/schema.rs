//! Database schema types.
//!
//! Rows serialize with camelCase field names because they double as the JSON
//! shapes of the REST surface.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Title given to threads created without one.
pub const DEFAULT_THREAD_TITLE: &str = "New Chat";

/// Current time in the store's resolution (milliseconds since the epoch).
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert a stored millisecond timestamp back to a UTC datetime.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_default()
}

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// A stored thread (root or branch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub parent_thread_id: Option<String>,
    pub parent_message_id: Option<String>,
    pub selected_context: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Thread {
    pub fn is_root(&self) -> bool {
        self.parent_thread_id.is_none()
    }
}

/// A stored message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub thread_id: String,
    pub role: Role,
    pub content: String,
    pub selected_text: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Direct child of a thread, as listed alongside its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildThread {
    pub id: String,
    pub title: String,
    pub selected_context: Option<String>,
    pub parent_message_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Number of this child's own direct children.
    pub child_count: i64,
}

impl ChildThread {
    /// Summarize a freshly created branch, which has no children yet.
    pub fn fresh(thread: &Thread) -> Self {
        Self {
            id: thread.id.clone(),
            title: thread.title.clone(),
            selected_context: thread.selected_context.clone(),
            parent_message_id: thread.parent_message_id.clone(),
            created_at: thread.created_at,
            child_count: 0,
        }
    }
}

/// Root thread entry for the thread list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootThread {
    pub id: String,
    pub title: String,
    pub updated_at: DateTime<Utc>,
    pub child_count: i64,
}

/// One hop of the root-to-parent path of a thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breadcrumb {
    pub id: String,
    pub title: String,
    pub selected_context: Option<String>,
}

impl From<&Thread> for Breadcrumb {
    fn from(thread: &Thread) -> Self {
        Self {
            id: thread.id.clone(),
            title: thread.title.clone(),
            selected_context: thread.selected_context.clone(),
        }
    }
}
