//! Turning a highlighted span into a branch, or into context for the next
//! question in the same thread.

use tracing::info;

use super::{CreateThread, ThreadError, ThreadService};
use crate::db::ChildThread;

/// Characters of the span kept in a branch title.
pub const BRANCH_TITLE_CHARS: usize = 30;

/// Title of a branch created from `span`.
pub fn branch_title(span: &str) -> String {
    let prefix: String = span.chars().take(BRANCH_TITLE_CHARS).collect();
    format!("Branch: {}...", prefix)
}

/// Prefix `text` with a quoted reference to `span`.
pub fn quote_context(span: &str, text: &str) -> String {
    format!("Regarding this text: \"{}\"\n\n{}", span, text)
}

/// Create a branch of `source_thread_id` carrying `span` as its context.
///
/// `anchor` is the parent-thread message the branch hangs off, normally the
/// latest assistant message. The result has no children yet, so callers can
/// splice it into a cached branch list directly.
pub async fn create_branch(
    service: &dyn ThreadService,
    source_thread_id: &str,
    span: &str,
    anchor: Option<&str>,
) -> Result<ChildThread, ThreadError> {
    if span.trim().is_empty() {
        return Err(ThreadError::EmptySelection);
    }

    let thread = service
        .create_thread(CreateThread {
            title: Some(branch_title(span)),
            selected_context: Some(span.to_string()),
            parent_thread_id: Some(source_thread_id.to_string()),
            parent_message_id: anchor.map(String::from),
        })
        .await?;

    info!(branch = %thread.id, source = %source_thread_id, "Branched from selection");
    Ok(ChildThread::fresh(&thread))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Role, Store};
    use crate::threads::{LocalThreadService, NewMessage, ThreadTree};

    fn service() -> LocalThreadService {
        LocalThreadService::new(ThreadTree::new(Store::in_memory().unwrap()), "alice")
    }

    // ==================== titles and quoting ====================

    #[test]
    fn title_keeps_thirty_chars() {
        assert_eq!(branch_title("foo"), "Branch: foo...");
        assert_eq!(
            branch_title("abcdefghijklmnopqrstuvwxyz0123456789"),
            "Branch: abcdefghijklmnopqrstuvwxyz0123..."
        );
    }

    #[test]
    fn title_never_splits_a_character() {
        let span = "é".repeat(40);
        assert_eq!(branch_title(&span), format!("Branch: {}...", "é".repeat(30)));
    }

    #[test]
    fn quoted_context_format() {
        assert_eq!(
            quote_context("base case", "Why?"),
            "Regarding this text: \"base case\"\n\nWhy?"
        );
    }

    // ==================== create_branch ====================

    #[tokio::test]
    async fn branch_from_span() {
        let svc = service();
        let a = svc.create_thread(CreateThread::default()).await.unwrap();

        let b = create_branch(&svc, &a.id, "foo", None).await.unwrap();

        let stored = svc.get_thread(&b.id).await.unwrap();
        assert_eq!(stored.thread.parent_thread_id.as_deref(), Some(a.id.as_str()));
        assert_eq!(stored.thread.selected_context.as_deref(), Some("foo"));
        assert_eq!(b.child_count, 0);
        assert!(stored.children.is_empty());
    }

    #[tokio::test]
    async fn branch_anchored_to_assistant_message() {
        let svc = service();
        let a = svc.create_thread(CreateThread::default()).await.unwrap();
        let answer = svc
            .append_message(NewMessage {
                id: None,
                thread_id: a.id.clone(),
                role: Role::Assistant,
                content: "Every recursion needs a base case.".into(),
                selected_text: None,
            })
            .await
            .unwrap();

        let b = create_branch(&svc, &a.id, "base case", Some(&answer.id))
            .await
            .unwrap();

        assert_eq!(b.parent_message_id.as_deref(), Some(answer.id.as_str()));
        let parent = svc.get_thread(&a.id).await.unwrap();
        assert_eq!(parent.children.len(), 1);
        assert_eq!(parent.children[0].id, b.id);
    }

    #[tokio::test]
    async fn empty_selection_is_rejected() {
        let svc = service();
        let a = svc.create_thread(CreateThread::default()).await.unwrap();

        assert!(matches!(
            create_branch(&svc, &a.id, "  \n", None).await,
            Err(ThreadError::EmptySelection)
        ));
        assert!(svc.get_thread(&a.id).await.unwrap().children.is_empty());
    }

    #[tokio::test]
    async fn unknown_source_is_not_found() {
        let svc = service();

        assert!(matches!(
            create_branch(&svc, "missing", "span", None).await,
            Err(ThreadError::NotFound(_))
        ));
    }
}
