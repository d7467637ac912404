//! Reedline completion with Tab-triggered menu.
//!
//! Type "/" then Tab to see commands. Menu filters as you type.

use std::sync::{Arc, Mutex, PoisonError};

use nu_ansi_term::{Color, Style};
use reedline::{
    ColumnarMenu, Completer, Emacs, Highlighter, KeyCode, KeyModifiers, MenuBuilder, Reedline,
    ReedlineEvent, ReedlineMenu, Span, StyledText, Suggestion,
};

use super::commands::COMMANDS;

#[derive(Default)]
struct Candidates {
    /// `(id, title)` of threads worth suggesting for `/open` and `/delete`.
    threads: Vec<(String, String)>,
    models: Vec<String>,
}

/// Completer for slash commands, thread ids and models.
///
/// Clones share their candidates, so the REPL can keep a handle and refresh
/// them while the line editor owns another.
#[derive(Clone, Default)]
pub struct ChatCompleter {
    candidates: Arc<Mutex<Candidates>>,
}

impl ChatCompleter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_threads(&self, threads: Vec<(String, String)>) {
        self.lock().threads = threads;
    }

    pub fn set_models(&self, models: Vec<String>) {
        self.lock().models = models;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Candidates> {
        self.candidates.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn argument(input: &str) -> (usize, String) {
        let start = input.find(' ').map(|i| i + 1).unwrap_or(input.len());
        (start, input[start..].trim_start().to_lowercase())
    }
}

impl Completer for ChatCompleter {
    fn complete(&mut self, line: &str, pos: usize) -> Vec<Suggestion> {
        if pos > line.len() || !line.is_char_boundary(pos) {
            return Vec::new();
        }

        let input = &line[..pos];
        if !input.starts_with('/') {
            return Vec::new();
        }

        if !input.contains(' ') {
            let prefix = input.to_lowercase();
            return COMMANDS
                .iter()
                .filter(|(cmd, _)| cmd.starts_with(&prefix))
                .map(|(cmd, desc)| Suggestion {
                    value: cmd.to_string(),
                    description: Some(desc.to_string()),
                    extra: None,
                    span: Span::new(0, pos),
                    append_whitespace: true,
                    style: None,
                })
                .collect();
        }

        if input.starts_with("/open ") || input.starts_with("/delete ") {
            let (start, prefix) = Self::argument(input);
            return self
                .lock()
                .threads
                .iter()
                .filter(|(id, title)| {
                    id.starts_with(&prefix) || title.to_lowercase().starts_with(&prefix)
                })
                .take(12)
                .map(|(id, title)| Suggestion {
                    value: id.clone(),
                    description: Some(title.clone()),
                    extra: None,
                    span: Span::new(start, pos),
                    append_whitespace: false,
                    style: None,
                })
                .collect();
        }

        if input.starts_with("/model ") || input.starts_with("/m ") {
            let (start, prefix) = Self::argument(input);
            return self
                .lock()
                .models
                .iter()
                .filter(|m| m.to_lowercase().starts_with(&prefix))
                .take(12)
                .map(|m| Suggestion {
                    value: m.clone(),
                    description: None,
                    extra: None,
                    span: Span::new(start, pos),
                    append_whitespace: false,
                    style: None,
                })
                .collect();
        }

        Vec::new()
    }
}

/// Syntax highlighter for slash commands
#[derive(Clone)]
pub struct CommandHighlighter;

impl Highlighter for CommandHighlighter {
    fn highlight(&self, line: &str, _cursor: usize) -> StyledText {
        let mut styled = StyledText::new();

        if line.starts_with('/') {
            let cmd_end = line.find(' ').unwrap_or(line.len());
            let cmd = &line[..cmd_end];
            let is_valid = COMMANDS.iter().any(|(c, _)| *c == cmd);

            if is_valid {
                styled.push((Style::new().fg(Color::Cyan).bold(), cmd.to_string()));
            } else {
                styled.push((Style::new().fg(Color::Yellow), cmd.to_string()));
            }

            if cmd_end < line.len() {
                styled.push((Style::default(), line[cmd_end..].to_string()));
            }
        } else {
            styled.push((Style::default(), line.to_string()));
        }

        styled
    }
}

/// Build the line editor with the completion menu wired to Tab.
pub fn create_reedline(completer: ChatCompleter) -> Reedline {
    let completion_menu = Box::new(
        ColumnarMenu::default()
            .with_name("completion_menu")
            .with_columns(1)
            .with_column_padding(2)
            .with_text_style(Style::new().fg(Color::Default))
            .with_selected_text_style(Style::new().fg(Color::Black).on(Color::Cyan))
            .with_description_text_style(Style::new().fg(Color::DarkGray)),
    );

    let mut keybindings = reedline::default_emacs_keybindings();
    keybindings.add_binding(
        KeyModifiers::NONE,
        KeyCode::Tab,
        ReedlineEvent::UntilFound(vec![
            ReedlineEvent::Menu("completion_menu".to_string()),
            ReedlineEvent::MenuNext,
        ]),
    );
    keybindings.add_binding(
        KeyModifiers::SHIFT,
        KeyCode::BackTab,
        ReedlineEvent::MenuPrevious,
    );

    Reedline::create()
        .with_completer(Box::new(completer))
        .with_menu(ReedlineMenu::EngineCompleter(completion_menu))
        .with_quick_completions(true)
        .with_partial_completions(true)
        .with_highlighter(Box::new(CommandHighlighter))
        .with_edit_mode(Box::new(Emacs::new(keybindings)))
}
