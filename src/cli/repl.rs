//! Interactive chat REPL.
//!
//! Wraps a [`ConversationSession`] in a reedline loop: plain lines are sent
//! to the model and streamed back, slash commands move around the tree.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use reedline::{FileBackedHistory, Signal};
use tracing::{debug, warn};

use super::commands::{help_text, Command};
use super::completion::{create_reedline, ChatCompleter};
use super::prompt::ThreadPrompt;
use super::render::{self, TurnPrinter};
use super::serve::anthropic_relay;
use crate::config::AppConfig;
use crate::db::Store;
use crate::relay::{HttpRelayBackend, ModelInfo, StreamRelay};
use crate::session::{
    ConversationSession, EventReceiver, SessionError, SessionOptions, TurnOutcome,
};
use crate::threads::{
    CreateThread, LocalThreadService, RemoteThreadService, ThreadService, ThreadTree,
};

/// How `offshoot chat` was invoked.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub owner: String,
    /// Thread to open; a new root is created when absent.
    pub thread: Option<String>,
    /// Base URL of a running `offshoot serve`; the local store is used when absent.
    pub server: Option<String>,
}

/// Whether the loop should keep reading input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

fn history_path() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join("offshoot").join("history.txt"))
}

/// Open a session as described by `options` and run the REPL on stdout.
pub async fn run_chat(store: Store, config: AppConfig, options: ChatOptions) -> anyhow::Result<()> {
    let (service, relay): (Arc<dyn ThreadService>, StreamRelay) = match &options.server {
        Some(url) => {
            debug!(server = %url, "Using remote thread service");
            let backend = HttpRelayBackend::new(url.as_str(), options.owner.as_str());
            (
                Arc::new(RemoteThreadService::new(url.as_str(), options.owner.as_str())),
                StreamRelay::new(Arc::new(backend)).with_timeout(config.generation_timeout),
            )
        }
        None => (
            Arc::new(LocalThreadService::new(
                ThreadTree::new(store),
                options.owner.as_str(),
            )),
            anthropic_relay(&config),
        ),
    };

    let session_options = SessionOptions::from(&config);
    let (session, fresh) = match &options.thread {
        Some(id) => (
            ConversationSession::open(service, relay, session_options, id).await?,
            false,
        ),
        None => (
            ConversationSession::start(service, relay, session_options).await?,
            true,
        ),
    };

    let mut repl = Repl::new(session, std::io::stdout());
    if fresh {
        repl.fresh = Some(repl.session.thread().id.clone());
    }
    repl.run().await
}

/// REPL state.
pub struct Repl<W: Write> {
    session: ConversationSession,
    events: EventReceiver,
    printer: TurnPrinter,
    completer: ChatCompleter,
    out: W,
    /// Ids from the last numbered listing, for `/open <n>`.
    listing: Vec<String>,
    /// Thread this REPL created and has not used yet.
    fresh: Option<String>,
}

impl<W: Write> Repl<W> {
    pub fn new(session: ConversationSession, out: W) -> Self {
        let events = session.subscribe();
        Self {
            session,
            events,
            printer: TurnPrinter::new(),
            completer: ChatCompleter::new(),
            out,
            listing: Vec::new(),
            fresh: None,
        }
    }

    pub fn session(&self) -> &ConversationSession {
        &self.session
    }

    /// Run the REPL loop.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let mut line_editor = create_reedline(self.completer.clone());
        if let Some(path) = history_path() {
            if let Some(parent) = path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            if let Ok(h) = FileBackedHistory::with_file(500, path) {
                line_editor = line_editor.with_history(Box::new(h));
            }
        }

        self.refresh_threads().await;
        self.show_thread()?;
        writeln!(self.out, "\x1b[2mType /help for commands.\x1b[0m")?;

        loop {
            self.drain()?;
            let prompt = self.prompt();
            match line_editor.read_line(&prompt) {
                Ok(Signal::Success(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match self.dispatch(line).await {
                        Ok(Flow::Exit) => break,
                        Ok(Flow::Continue) => {}
                        Err(e) => writeln!(self.out, "\x1b[31m✗ {}\x1b[0m", e)?,
                    }
                }
                Ok(Signal::CtrlC) => {
                    writeln!(self.out, "^C")?;
                    continue;
                }
                Ok(Signal::CtrlD) => break,
                Err(e) => {
                    self.finish().await;
                    return Err(e.into());
                }
            }
        }

        self.finish().await;
        Ok(())
    }

    fn prompt(&self) -> ThreadPrompt {
        let mut prompt = ThreadPrompt::new(&self.session.thread().title, &self.session.options().model);
        prompt.depth = self.session.breadcrumbs().len();
        prompt.has_context = self.session.pending_context().is_some();
        prompt
    }

    /// Handle one line of input.
    pub async fn dispatch(&mut self, line: &str) -> anyhow::Result<Flow> {
        match Command::parse(line) {
            Some(Ok(command)) => self.handle(command).await,
            Some(Err(e)) => {
                writeln!(self.out, "{}", e)?;
                Ok(Flow::Continue)
            }
            None => {
                self.send(line).await?;
                Ok(Flow::Continue)
            }
        }
    }

    /// Submit `text` and print the reply as it streams. Ctrl-C stops it.
    pub async fn send(&mut self, text: &str) -> anyhow::Result<TurnOutcome> {
        let controller = self.session.controller();
        let watcher = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                controller.abort();
            }
        });

        // The submit future borrows the session until this block ends.
        let result = {
            let submit = self.session.submit(text);
            tokio::pin!(submit);
            loop {
                tokio::select! {
                    result = &mut submit => break result,
                    event = self.events.recv() => {
                        if let Some(out) = event.ok().and_then(|e| self.printer.render(&e)) {
                            write!(self.out, "{}", out)?;
                            self.out.flush()?;
                        }
                    }
                }
            }
        };
        watcher.abort();
        self.drain()?;

        let outcome = result?;
        if outcome != TurnOutcome::Ignored {
            self.fresh = None;
        }
        Ok(outcome)
    }

    /// Print events that arrived outside a turn.
    fn drain(&mut self) -> anyhow::Result<()> {
        while let Ok(Some(event)) = self.events.try_recv() {
            if let Some(out) = self.printer.render(&event) {
                write!(self.out, "{}", out)?;
            }
        }
        self.out.flush()?;
        Ok(())
    }

    async fn handle(&mut self, command: Command) -> anyhow::Result<Flow> {
        match command {
            Command::Threads => {
                let roots = self.session.service().list_roots().await?;
                self.listing = roots.iter().map(|r| r.id.clone()).collect();
                self.completer.set_threads(
                    roots
                        .iter()
                        .map(|r| (r.id.clone(), r.title.clone()))
                        .collect(),
                );
                write!(self.out, "{}", render::format_roots(&roots, Utc::now()))?;
            }
            Command::Open(target) => {
                let id = self.resolve(&target);
                self.switch_to(&id).await?;
            }
            Command::New => {
                let thread = self
                    .session
                    .service()
                    .create_thread(CreateThread::default())
                    .await?;
                self.switch_to(&thread.id).await?;
                self.fresh = Some(thread.id);
            }
            Command::Branch(span) => {
                let branch = self.session.create_branch(&span).await?;
                self.fresh = None;
                self.switch_to(&branch.id).await?;
            }
            Command::Ask(Some(span)) => self.session.ask_in_thread(&span)?,
            Command::Ask(None) => {
                self.session.clear_context();
                writeln!(self.out, "Context cleared.")?;
            }
            Command::Branches => self.list_branches()?,
            Command::Up => match self.session.thread().parent_thread_id.clone() {
                Some(parent) => self.switch_to(&parent).await?,
                None => writeln!(self.out, "Already at a root thread.")?,
            },
            Command::Path => {
                let path =
                    render::format_path(self.session.breadcrumbs(), &self.session.thread().title);
                write!(self.out, "{}", path)?;
            }
            Command::Rename(title) => {
                self.session.rename(&title).await?;
                self.fresh = None;
            }
            Command::Delete(target) => {
                let target = target.map(|t| self.resolve(&t));
                self.delete(target).await?;
            }
            Command::Model(None) => {
                writeln!(self.out, "Model: {}", self.session.options().model)?;
            }
            Command::Model(Some(model)) => {
                self.session.set_model(model.as_str());
                writeln!(self.out, "Model: {}", model)?;
            }
            Command::Models => {
                let models = match self.session.relay().backend().list_models().await {
                    Ok(models) if !models.is_empty() => models,
                    Ok(_) => vec![ModelInfo::default_model()],
                    Err(e) => {
                        warn!(error = %e, "Model list unavailable, using default");
                        vec![ModelInfo::default_model()]
                    }
                };
                self.completer
                    .set_models(models.iter().map(|m| m.id.clone()).collect());
                let listing = render::format_models(&models, &self.session.options().model);
                write!(self.out, "{}", listing)?;
            }
            Command::Help => write!(self.out, "{}", help_text())?,
            Command::Quit => return Ok(Flow::Exit),
        }
        Ok(Flow::Continue)
    }

    /// Map a number from the last listing to its id; anything else is an id.
    fn resolve(&self, target: &str) -> String {
        target
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| self.listing.get(i))
            .cloned()
            .unwrap_or_else(|| target.to_string())
    }

    /// Offer the owner's root threads to `/open` completion.
    async fn refresh_threads(&mut self) {
        match self.session.service().list_roots().await {
            Ok(roots) => self
                .completer
                .set_threads(roots.into_iter().map(|r| (r.id, r.title)).collect()),
            Err(e) => debug!(error = %e, "Could not list threads for completion"),
        }
    }

    fn list_branches(&mut self) -> anyhow::Result<()> {
        let branches = self.session.branches();
        self.listing = branches.iter().map(|b| b.id.clone()).collect();
        self.completer.set_threads(
            branches
                .iter()
                .map(|b| (b.id.clone(), b.title.clone()))
                .collect(),
        );
        write!(self.out, "{}", render::format_branches(branches))?;
        Ok(())
    }

    /// Leave the current thread for `id` and show it.
    async fn switch_to(&mut self, id: &str) -> Result<(), SessionError> {
        let unused = if id != self.session.thread().id {
            self.unused_thread()
        } else {
            None
        };
        self.session.load(id).await?;
        if let Some(unused) = unused {
            self.discard(&unused).await;
        }
        self.printer = TurnPrinter::new();
        // Rendering problems are not session errors.
        let _ = self.show_thread();
        Ok(())
    }

    fn show_thread(&mut self) -> anyhow::Result<()> {
        let thread = self.session.thread();
        writeln!(self.out)?;
        write!(
            self.out,
            "{}",
            render::format_path(self.session.breadcrumbs(), &thread.title)
        )?;
        if let Some(context) = &thread.selected_context {
            writeln!(self.out, "\x1b[36m❝\x1b[0m {}", render::snippet(context))?;
        }
        writeln!(self.out)?;
        write!(self.out, "{}", render::format_transcript(self.session.messages()))?;
        let branches = self.session.branches().len();
        if branches > 0 {
            writeln!(
                self.out,
                "\x1b[2m{} branch{} (/branches)\x1b[0m",
                branches,
                if branches == 1 { "" } else { "es" }
            )?;
        }
        Ok(())
    }

    /// Delete `target` (the active thread when `None`) and its subtree.
    ///
    /// Deleting the active thread or one of its ancestors moves the session
    /// to the nearest surviving ancestor, or to a new root.
    async fn delete(&mut self, target: Option<String>) -> anyhow::Result<()> {
        let current = self.session.thread().clone();
        let target = target.unwrap_or_else(|| current.id.clone());

        let crumbs = self.session.breadcrumbs();
        let fallback = if target == current.id {
            Some(current.parent_thread_id.clone())
        } else {
            crumbs
                .iter()
                .position(|c| c.id == target)
                .map(|i| i.checked_sub(1).map(|p| crumbs[p].id.clone()))
        };

        match fallback {
            Some(landing) => {
                self.session.flush().await;
                self.session.service().delete_thread(&target).await?;
                if self.fresh.as_deref() == Some(target.as_str()) {
                    self.fresh = None;
                }
                match landing {
                    Some(parent) => self.switch_to(&parent).await?,
                    None => {
                        let thread = self
                            .session
                            .service()
                            .create_thread(CreateThread::default())
                            .await?;
                        self.switch_to(&thread.id).await?;
                        self.fresh = Some(thread.id);
                    }
                }
            }
            None if self.session.branches().iter().any(|b| b.id == target) => {
                self.session.remove_branch(&target).await?;
            }
            None => self.session.service().delete_thread(&target).await?,
        }

        self.listing.retain(|id| *id != target);
        writeln!(self.out, "Deleted.")?;
        Ok(())
    }

    /// The active thread, if this REPL created it and it never got a
    /// message or branch.
    fn unused_thread(&self) -> Option<String> {
        let fresh = self.fresh.as_deref()?;
        let unused = self.session.thread().id == fresh
            && self.session.messages().is_empty()
            && self.session.branches().is_empty();
        unused.then(|| fresh.to_string())
    }

    async fn discard(&mut self, id: &str) {
        if self.fresh.as_deref() == Some(id) {
            self.fresh = None;
        }
        if let Err(e) = self.session.service().delete_thread(id).await {
            debug!(thread = %id, error = %e, "Could not discard unused thread");
        }
    }

    /// Settle pending writes before exit.
    pub async fn finish(&mut self) {
        self.session.controller().abort();
        self.session.flush().await;
        if let Some(unused) = self.unused_thread() {
            self.discard(&unused).await;
        }
    }

    #[cfg(test)]
    fn output(&self) -> String
    where
        W: AsRef<[u8]>,
    {
        String::from_utf8_lossy(self.out.as_ref()).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::testing::ScriptedBackend;

    // =========================================================================
    // Test Helpers
    // =========================================================================

    fn service() -> Arc<LocalThreadService> {
        Arc::new(LocalThreadService::new(
            ThreadTree::new(Store::in_memory().unwrap()),
            "alice",
        ))
    }

    async fn repl_with(backend: ScriptedBackend) -> (Repl<Vec<u8>>, Arc<LocalThreadService>) {
        let svc = service();
        let relay = StreamRelay::new(Arc::new(backend));
        let session = ConversationSession::start(svc.clone(), relay, SessionOptions::new("scripted"))
            .await
            .unwrap();
        let mut repl = Repl::new(session, Vec::new());
        repl.fresh = Some(repl.session.thread().id.clone());
        (repl, svc)
    }

    async fn repl() -> (Repl<Vec<u8>>, Arc<LocalThreadService>) {
        repl_with(ScriptedBackend::new(&["Recursion is ", "self-reference."])).await
    }

    async fn run(repl: &mut Repl<Vec<u8>>, line: &str) -> Flow {
        repl.dispatch(line).await.unwrap()
    }

    // =========================================================================
    // Messages
    // =========================================================================

    #[tokio::test]
    async fn plain_lines_stream_a_reply() {
        let (mut repl, svc) = repl().await;
        run(&mut repl, "What is recursion?").await;

        let out = repl.output();
        assert!(out.contains("Recursion is self-reference."));

        repl.session.flush().await;
        let stored = svc.get_thread(&repl.session.thread().id).await.unwrap();
        assert_eq!(stored.messages.len(), 2);
        assert_eq!(stored.thread.title, "What is recursion?");
        assert!(repl.fresh.is_none());
    }

    #[tokio::test]
    async fn failed_turn_is_reported() {
        let backend = ScriptedBackend::unavailable();
        let (mut repl, _svc) = repl_with(backend).await;
        let outcome = repl.send("hello").await.unwrap();
        assert!(matches!(outcome, TurnOutcome::Failed(_)));
        assert!(repl.output().contains('✗'));
    }

    // =========================================================================
    // Commands
    // =========================================================================

    #[tokio::test]
    async fn unknown_command_is_reported_not_fatal() {
        let (mut repl, _svc) = repl().await;
        assert_eq!(run(&mut repl, "/nope").await, Flow::Continue);
        assert!(repl.output().contains("Unknown command: /nope"));
    }

    #[tokio::test]
    async fn quit_exits() {
        let (mut repl, _svc) = repl().await;
        assert_eq!(run(&mut repl, "/quit").await, Flow::Exit);
    }

    #[tokio::test]
    async fn branch_open_up_round_trip() {
        let (mut repl, _svc) = repl().await;
        run(&mut repl, "What is recursion?").await;
        let root_id = repl.session.thread().id.clone();

        run(&mut repl, "/branch self-reference").await;
        let branch_id = repl.session.thread().id.clone();
        assert_ne!(branch_id, root_id, "a new branch is entered");
        assert_eq!(
            repl.session.thread().parent_thread_id.as_deref(),
            Some(root_id.as_str())
        );
        assert_eq!(repl.prompt().depth, 1);
        assert!(repl.output().contains("Branch: self-reference"));

        run(&mut repl, "/path").await;
        let out = repl.output();
        assert!(out.contains("What is recursion?"));

        run(&mut repl, "/up").await;
        assert_eq!(repl.session.thread().id, root_id);
        run(&mut repl, "/up").await;
        assert!(repl.output().contains("Already at a root thread."));

        run(&mut repl, "/branches").await;
        assert_eq!(repl.listing.len(), 1);
        run(&mut repl, "/open 1").await;
        assert_eq!(repl.session.thread().id, branch_id);
    }

    #[tokio::test]
    async fn ask_attaches_and_clears_context() {
        let (mut repl, _svc) = repl().await;
        run(&mut repl, "/ask the base case").await;
        assert!(repl.prompt().has_context);

        run(&mut repl, "/ask").await;
        assert!(!repl.prompt().has_context);
        assert!(repl.output().contains("Context cleared."));
    }

    #[tokio::test]
    async fn threads_lists_roots_for_open() {
        let (mut repl, svc) = repl().await;
        run(&mut repl, "First question").await;
        let other = svc
            .create_thread(CreateThread::root(Some("Ownership".into())))
            .await
            .unwrap();

        run(&mut repl, "/threads").await;
        assert!(repl.output().contains("Ownership"));
        assert_eq!(repl.listing.len(), 2);

        let n = repl.listing.iter().position(|id| *id == other.id).unwrap() + 1;
        run(&mut repl, &format!("/open {}", n)).await;
        assert_eq!(repl.session.thread().id, other.id);
    }

    #[tokio::test]
    async fn switching_away_discards_unused_new_thread() {
        let (mut repl, svc) = repl().await;
        let unused = repl.session.thread().id.clone();
        let kept = svc
            .create_thread(CreateThread::root(Some("Kept".into())))
            .await
            .unwrap();

        run(&mut repl, &format!("/open {}", kept.id)).await;
        assert!(svc.get_thread(&unused).await.is_err());
        assert!(svc.get_thread(&kept.id).await.is_ok());
    }

    #[tokio::test]
    async fn rename_updates_title() {
        let (mut repl, svc) = repl().await;
        run(&mut repl, "/rename Recursion notes").await;
        let id = repl.session.thread().id.clone();
        assert_eq!(svc.get_thread(&id).await.unwrap().thread.title, "Recursion notes");
        assert!(repl.fresh.is_none());
    }

    #[tokio::test]
    async fn deleting_current_branch_returns_to_parent() {
        let (mut repl, svc) = repl().await;
        run(&mut repl, "What is recursion?").await;
        let root_id = repl.session.thread().id.clone();
        let branch = repl.session.create_branch("self-reference").await.unwrap();

        run(&mut repl, &format!("/open {}", branch.id)).await;
        run(&mut repl, "/delete").await;

        assert_eq!(repl.session.thread().id, root_id);
        assert!(repl.session.branches().is_empty());
        assert!(svc.get_thread(&branch.id).await.is_err());
    }

    #[tokio::test]
    async fn deleting_a_listed_branch_keeps_position() {
        let (mut repl, _svc) = repl().await;
        run(&mut repl, "What is recursion?").await;
        let root_id = repl.session.thread().id.clone();
        run(&mut repl, "/branch self-reference").await;
        run(&mut repl, "/up").await;
        run(&mut repl, "/branches").await;

        run(&mut repl, "/delete 1").await;
        assert_eq!(repl.session.thread().id, root_id);
        assert!(repl.session.branches().is_empty());
        assert!(repl.listing.is_empty());
    }

    #[tokio::test]
    async fn deleting_a_root_moves_to_a_new_root() {
        let (mut repl, svc) = repl().await;
        run(&mut repl, "What is recursion?").await;
        let old = repl.session.thread().id.clone();

        run(&mut repl, "/delete").await;
        assert_ne!(repl.session.thread().id, old);
        assert!(svc.get_thread(&old).await.is_err());
        assert!(repl.session.messages().is_empty());
    }

    #[tokio::test]
    async fn model_commands() {
        let (mut repl, _svc) = repl().await;
        run(&mut repl, "/model").await;
        assert!(repl.output().contains("Model: scripted"));

        run(&mut repl, "/model other").await;
        assert_eq!(repl.session.options().model, "other");

        run(&mut repl, "/models").await;
        assert!(repl.output().contains("Scripted"));
    }

    #[tokio::test]
    async fn open_unknown_thread_fails_and_stays() {
        let (mut repl, _svc) = repl().await;
        let id = repl.session.thread().id.clone();
        assert!(repl.dispatch("/open missing").await.is_err());
        assert_eq!(repl.session.thread().id, id);
    }

    #[tokio::test]
    async fn finish_discards_unused_start_thread() {
        let (mut repl, svc) = repl().await;
        let id = repl.session.thread().id.clone();
        repl.finish().await;
        assert!(svc.get_thread(&id).await.is_err());
    }
}
