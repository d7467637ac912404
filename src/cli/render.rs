//! Terminal rendering of session events and thread listings.

use chrono::{DateTime, Utc};

use crate::db::{Breadcrumb, ChildThread, Role, RootThread};
use crate::relay::ModelInfo;
use crate::session::{ChatMessage, SessionEvent, TurnOutcome};

/// Characters of a quoted span shown in listings.
const SNIPPET_CHARS: usize = 48;

/// Turns session events into terminal output.
///
/// Streaming updates carry the full text so far; only the unseen tail is
/// printed.
#[derive(Debug, Default)]
pub struct TurnPrinter {
    /// Reply being streamed and the text already printed for it.
    current: Option<(String, String)>,
}

impl TurnPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&mut self, event: &SessionEvent) -> Option<String> {
        match event {
            SessionEvent::MessageAdded(message)
                if message.role == Role::Assistant && message.is_streaming =>
            {
                self.current = Some((message.id.clone(), String::new()));
                Some("\n".to_string())
            }
            SessionEvent::MessageAdded(_) => None,
            SessionEvent::MessageUpdated { id, content } => {
                let (current_id, printed) = self.current.as_mut()?;
                if current_id.as_str() != id.as_str() {
                    return None;
                }
                let out = match content.strip_prefix(printed.as_str()) {
                    Some(tail) => tail.to_string(),
                    None => format!("\n\x1b[31m{}\x1b[0m", content),
                };
                *printed = content.clone();
                (!out.is_empty()).then_some(out)
            }
            SessionEvent::TurnFinished { outcome, .. } => {
                self.current = None;
                match outcome {
                    TurnOutcome::Ignored => None,
                    TurnOutcome::Completed => Some("\n\n".to_string()),
                    TurnOutcome::Aborted => Some("\n\x1b[2m(stopped)\x1b[0m\n\n".to_string()),
                    TurnOutcome::Failed(reason) => {
                        Some(format!("\n\x1b[31m✗ {}\x1b[0m\n\n", reason))
                    }
                }
            }
            SessionEvent::ThreadRenamed { title } => {
                Some(format!("\x1b[2m» {}\x1b[0m\n", title))
            }
            SessionEvent::BranchCreated(branch) => Some(format!(
                "\x1b[35m⑂\x1b[0m {} \x1b[2m({})\x1b[0m\n",
                branch.title, branch.id
            )),
            SessionEvent::ContextAttached(span) => Some(format!(
                "\x1b[36m❝\x1b[0m Next message quotes \"{}\"\n",
                snippet(span)
            )),
            SessionEvent::ContextCleared => None,
        }
    }
}

/// Shorten `text` to one line of at most [`SNIPPET_CHARS`] characters.
pub fn snippet(text: &str) -> String {
    let line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if line.chars().count() > SNIPPET_CHARS {
        let cut: String = line.chars().take(SNIPPET_CHARS - 1).collect();
        format!("{}…", cut)
    } else {
        line
    }
}

pub fn format_relative_time(dt: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let diff = now.signed_duration_since(dt);

    if diff.num_seconds() < 60 {
        "just now".to_string()
    } else if diff.num_minutes() < 60 {
        let mins = diff.num_minutes();
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if diff.num_hours() < 24 {
        let hours = diff.num_hours();
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if diff.num_days() < 7 {
        let days = diff.num_days();
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        dt.format("%Y-%m-%d").to_string()
    }
}

fn plural(n: i64, word: &str) -> String {
    format!("{} {}{}", n, word, if n == 1 { "" } else { "es" })
}

/// Numbered root thread list, most recently active first.
pub fn format_roots(roots: &[RootThread], now: DateTime<Utc>) -> String {
    if roots.is_empty() {
        return "No threads yet.\n".to_string();
    }
    let mut out = String::new();
    for (i, root) in roots.iter().enumerate() {
        out.push_str(&format!(
            "  \x1b[1m{:>2}.\x1b[0m {}  \x1b[2m{} · {} · {}\x1b[0m\n",
            i + 1,
            root.title,
            plural(root.child_count, "branch"),
            format_relative_time(root.updated_at, now),
            root.id
        ));
    }
    out
}

/// Numbered branch list of the active thread.
pub fn format_branches(branches: &[ChildThread]) -> String {
    if branches.is_empty() {
        return "No branches. Use /branch <text> to start one.\n".to_string();
    }
    let mut out = String::new();
    for (i, branch) in branches.iter().enumerate() {
        out.push_str(&format!(
            "  \x1b[1m{:>2}.\x1b[0m \x1b[35m⑂\x1b[0m {}  \x1b[2m{} · {}\x1b[0m\n",
            i + 1,
            branch.title,
            plural(branch.child_count, "branch"),
            branch.id
        ));
        if let Some(context) = &branch.selected_context {
            out.push_str(&format!("      \x1b[2m❝ {}\x1b[0m\n", snippet(context)));
        }
    }
    out
}

/// Root-to-current path, e.g. `Recursion › Branch: base case...`.
pub fn format_path(breadcrumbs: &[Breadcrumb], title: &str) -> String {
    let mut parts: Vec<String> = breadcrumbs
        .iter()
        .map(|crumb| format!("\x1b[2m{}\x1b[0m", crumb.title))
        .collect();
    parts.push(format!("\x1b[1m{}\x1b[0m", title));
    format!("{}\n", parts.join(" › "))
}

/// Replay of a thread's messages.
pub fn format_transcript(messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    for message in messages {
        match message.role {
            Role::User => out.push_str(&format!("\x1b[1;36m›\x1b[0m {}\n\n", message.content)),
            Role::Assistant => out.push_str(&format!("{}\n\n", message.content)),
        }
    }
    out
}

pub fn format_models(models: &[ModelInfo], current: &str) -> String {
    let mut out = String::new();
    for model in models {
        let marker = if model.id == current { "\x1b[32m●\x1b[0m" } else { " " };
        out.push_str(&format!(
            "  {} {}  \x1b[2m{}\x1b[0m\n",
            marker, model.id, model.name
        ));
    }
    out
}
