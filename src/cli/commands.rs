//! Slash command parsing for the chat REPL.

/// All slash commands with descriptions
pub const COMMANDS: &[(&str, &str)] = &[
    ("/ask", "Quote text in your next message"),
    ("/branch", "Branch from text and enter it"),
    ("/branches", "List branches of this thread"),
    ("/delete", "Delete a thread and its branches"),
    ("/exit", "Exit"),
    ("/help", "Show help"),
    ("/model", "Show or set the model"),
    ("/models", "List available models"),
    ("/new", "New root thread"),
    ("/open", "Open a thread"),
    ("/path", "Show the path to this thread"),
    ("/quit", "Exit"),
    ("/rename", "Rename this thread"),
    ("/threads", "List root threads"),
    ("/up", "Go to the parent thread"),
];

/// A parsed slash command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Threads,
    /// Thread id, or a number from the last listing.
    Open(String),
    New,
    Branch(String),
    /// `None` clears the attached context.
    Ask(Option<String>),
    Branches,
    Up,
    Path,
    Rename(String),
    /// `None` deletes the active thread.
    Delete(Option<String>),
    /// `None` shows the current model.
    Model(Option<String>),
    Models,
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown command: /{0} (try /help)")]
    Unknown(String),

    #[error("Usage: {0}")]
    MissingArgument(&'static str),
}

impl Command {
    /// Parse a line of input.
    ///
    /// Returns `None` when the line is not a slash command.
    pub fn parse(input: &str) -> Option<Result<Self, CommandError>> {
        let rest = input.trim().strip_prefix('/')?;
        let (name, args) = match rest.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (rest, ""),
        };
        let arg = (!args.is_empty()).then(|| args.to_string());

        let required = |usage: &'static str| arg.clone().ok_or(CommandError::MissingArgument(usage));

        let command = match name.to_lowercase().as_str() {
            "threads" | "t" => Ok(Command::Threads),
            "open" | "o" => required("/open <id|n>").map(Command::Open),
            "new" => Ok(Command::New),
            "branch" | "b" => required("/branch <text>").map(Command::Branch),
            "ask" => Ok(Command::Ask(arg)),
            "branches" => Ok(Command::Branches),
            "up" => Ok(Command::Up),
            "path" => Ok(Command::Path),
            "rename" => required("/rename <title>").map(Command::Rename),
            "delete" => Ok(Command::Delete(arg)),
            "model" | "m" => Ok(Command::Model(arg)),
            "models" => Ok(Command::Models),
            "help" | "h" | "?" => Ok(Command::Help),
            "quit" | "exit" | "q" => Ok(Command::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        };
        Some(command)
    }
}

/// Render the command table.
pub fn help_text() -> String {
    let mut out = String::from("\n\x1b[1mCommands\x1b[0m\n\n");
    for (cmd, desc) in COMMANDS {
        out.push_str(&format!("  \x1b[36m{:<10}\x1b[0m {}\n", cmd, desc));
    }
    out.push_str("\nAnything else is sent to the model. Ctrl-C stops a reply.\n");
    out
}
