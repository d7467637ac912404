//! ThreadPrompt for Reedline.

use reedline::{Prompt, PromptEditMode, PromptHistorySearch, PromptHistorySearchStatus};
use std::borrow::Cow;

/// Longest title shown in the prompt, in characters.
const PROMPT_TITLE_CHARS: usize = 32;

/// Shows where the user is: thread title, branch depth, model.
pub struct ThreadPrompt {
    pub title: String,
    pub model: String,
    /// Number of ancestors of the active thread; 0 for a root.
    pub depth: usize,
    /// A quoted span is waiting for the next message.
    pub has_context: bool,
}

impl ThreadPrompt {
    pub fn new(title: &str, model: &str) -> Self {
        Self {
            title: title.to_string(),
            model: model.to_string(),
            depth: 0,
            has_context: false,
        }
    }

    fn short_title(&self) -> String {
        if self.title.chars().count() > PROMPT_TITLE_CHARS {
            let cut: String = self.title.chars().take(PROMPT_TITLE_CHARS - 1).collect();
            format!("{}…", cut)
        } else {
            self.title.clone()
        }
    }
}

impl Prompt for ThreadPrompt {
    fn render_prompt_left(&self) -> Cow<'_, str> {
        let branch = if self.depth > 0 {
            format!("\x1b[35m⑂{}\x1b[0m ", self.depth)
        } else {
            String::new()
        };
        Cow::Owned(format!(
            "{}\x1b[1;33m{}\x1b[0m \x1b[2m[{}]\x1b[0m",
            branch,
            self.short_title(),
            self.model
        ))
    }

    fn render_prompt_right(&self) -> Cow<'_, str> {
        Cow::Borrowed("")
    }

    fn render_prompt_indicator(&self, _mode: PromptEditMode) -> Cow<'_, str> {
        if self.has_context {
            Cow::Borrowed(" \x1b[36m❝\x1b[0m ")
        } else {
            Cow::Borrowed(" › ")
        }
    }

    fn render_prompt_multiline_indicator(&self) -> Cow<'_, str> {
        Cow::Borrowed("... ")
    }

    fn render_prompt_history_search_indicator(&self, hs: PromptHistorySearch) -> Cow<'_, str> {
        let prefix = match hs.status {
            PromptHistorySearchStatus::Passing => "",
            PromptHistorySearchStatus::Failing => "failing ",
        };
        Cow::Owned(format!("({}search: {}) ", prefix, hs.term))
    }
}
