//! CLI components.

pub mod commands;
pub mod completion;
pub mod prompt;
pub mod render;
pub mod repl;
pub mod serve;

pub use commands::{Command, CommandError, COMMANDS};
pub use completion::{create_reedline, ChatCompleter, CommandHighlighter};
pub use prompt::ThreadPrompt;
pub use repl::{run_chat, ChatOptions, Repl};
pub use serve::{anthropic_relay, run_serve};
