//! Thread tree: lifecycle of root threads and branches.
//!
//! Every operation is scoped to an owner. A thread owned by somebody else is
//! indistinguishable from a missing one.

pub mod branch;
pub mod remote;
pub mod service;

pub use branch::{branch_title, create_branch, quote_context};
pub use remote::RemoteThreadService;
pub use service::{LocalThreadService, ThreadService};

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{
    Breadcrumb, ChildThread, Message, Role, RootThread, Store, Thread, ThreadRepository,
    DEFAULT_THREAD_TITLE,
};

#[derive(Debug, Error)]
pub enum ThreadError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("Selection is empty")]
    EmptySelection,
    #[error("Title must not be empty")]
    EmptyTitle,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Parameters of `create_thread`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateThread {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
}

impl CreateThread {
    /// A root thread with the given title.
    pub fn root(title: Option<String>) -> Self {
        Self {
            title,
            ..Default::default()
        }
    }
}

/// Parameters of `append_message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    /// Client-generated id; a fresh one is assigned when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub thread_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_text: Option<String>,
}

/// A thread with everything needed to display it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadDetail {
    #[serde(flatten)]
    pub thread: Thread,
    pub messages: Vec<Message>,
    /// Direct children, newest first.
    #[serde(rename = "childThreads")]
    pub children: Vec<ChildThread>,
    /// Root-first path to the thread's parent.
    pub breadcrumbs: Vec<Breadcrumb>,
}

/// Owner-scoped operations over the thread forest.
#[derive(Clone)]
pub struct ThreadTree {
    store: Store,
}

impl ThreadTree {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Create an empty root thread or branch.
    ///
    /// A branch's parent must belong to `owner`, and its anchor message (if
    /// any) must belong to the parent.
    pub fn create_thread(&self, owner: &str, request: CreateThread) -> Result<Thread, ThreadError> {
        let title = request
            .title
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_THREAD_TITLE)
            .to_string();

        self.store.with(|db| {
            let repo = ThreadRepository::new(db);

            match (&request.parent_thread_id, &request.parent_message_id) {
                (Some(parent), anchor) => {
                    if repo.find_thread(parent, owner)?.is_none() {
                        return Err(ThreadError::NotFound("Parent thread"));
                    }
                    if let Some(anchor) = anchor {
                        if !repo.message_in_thread(anchor, parent)? {
                            return Err(ThreadError::NotFound("Anchor message"));
                        }
                    }
                }
                (None, Some(_)) => return Err(ThreadError::NotFound("Parent thread")),
                (None, None) => {}
            }

            let id = Uuid::new_v4().to_string();
            let thread = repo.insert_thread(
                &id,
                owner,
                &title,
                request.parent_thread_id.as_deref(),
                request.parent_message_id.as_deref(),
                request.selected_context.as_deref(),
            )?;

            info!(thread = %thread.id, parent = ?thread.parent_thread_id, "Created thread");
            Ok(thread)
        })
    }

    /// A thread with its messages, direct children and breadcrumbs.
    pub fn get_thread(&self, id: &str, owner: &str) -> Result<ThreadDetail, ThreadError> {
        self.store.with(|db| {
            let repo = ThreadRepository::new(db);
            let thread = repo
                .find_thread(id, owner)?
                .ok_or(ThreadError::NotFound("Thread"))?;

            let messages = repo.messages(id)?;
            let children = repo.children(id, owner)?;
            let breadcrumbs = ancestry(&repo, &thread, owner);

            Ok(ThreadDetail {
                thread,
                messages,
                children,
                breadcrumbs,
            })
        })
    }

    /// Root threads of `owner`, most recently updated first.
    pub fn list_roots(&self, owner: &str) -> Result<Vec<RootThread>, ThreadError> {
        Ok(self
            .store
            .with(|db| ThreadRepository::new(db).roots(owner))?)
    }

    pub fn rename_thread(&self, id: &str, owner: &str, title: &str) -> Result<Thread, ThreadError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ThreadError::EmptyTitle);
        }

        self.store
            .with(|db| ThreadRepository::new(db).rename(id, owner, title))?
            .ok_or(ThreadError::NotFound("Thread"))
    }

    /// Delete a thread with all descendants and their messages.
    ///
    /// Returns the number of threads removed.
    pub fn delete_thread(&self, id: &str, owner: &str) -> Result<usize, ThreadError> {
        let removed = self
            .store
            .with(|db| ThreadRepository::new(db).delete_subtree(id, owner))?
            .ok_or(ThreadError::NotFound("Thread"))?;

        info!(thread = %id, removed, "Deleted thread");
        Ok(removed)
    }

    /// Root-first path to the parent of `thread_id`, excluding the thread.
    ///
    /// Never fails: a missing, foreign, or unreadable link ends the path.
    pub fn breadcrumbs(&self, thread_id: &str, owner: &str) -> Vec<Breadcrumb> {
        self.store.with(|db| {
            let repo = ThreadRepository::new(db);
            match repo.find_thread(thread_id, owner) {
                Ok(Some(thread)) => ancestry(&repo, &thread, owner),
                Ok(None) => Vec::new(),
                Err(e) => {
                    warn!(thread = %thread_id, error = %e, "Breadcrumb lookup failed");
                    Vec::new()
                }
            }
        })
    }

    /// Persist a message and bump its thread's `updated_at`.
    pub fn append_message(&self, owner: &str, message: NewMessage) -> Result<Message, ThreadError> {
        let id = message
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        self.store.with(|db| {
            let repo = ThreadRepository::new(db);
            if repo.find_thread(&message.thread_id, owner)?.is_none() {
                return Err(ThreadError::NotFound("Thread"));
            }

            let stored = repo.insert_message(
                &id,
                &message.thread_id,
                message.role,
                &message.content,
                message.selected_text.as_deref(),
            )?;
            debug!(thread = %stored.thread_id, message = %stored.id, role = %stored.role, "Appended message");
            Ok(stored)
        })
    }
}

/// Walk parent links upward from `thread`, one owner-checked lookup per hop.
fn ancestry(repo: &ThreadRepository<'_>, thread: &Thread, owner: &str) -> Vec<Breadcrumb> {
    let mut path = VecDeque::new();
    let mut seen = HashSet::from([thread.id.clone()]);
    let mut next = thread.parent_thread_id.clone();

    while let Some(id) = next.take() {
        if !seen.insert(id.clone()) {
            warn!(thread = %thread.id, at = %id, "Cycle in thread ancestry");
            break;
        }
        match repo.find_thread(&id, owner) {
            Ok(Some(parent)) => {
                path.push_front(Breadcrumb::from(&parent));
                next = parent.parent_thread_id;
            }
            Ok(None) => break,
            Err(e) => {
                warn!(thread = %id, error = %e, "Breadcrumb lookup failed");
                break;
            }
        }
    }

    path.into()
}

#[cfg(test)]
mod tests {
    //! Unit tests for ThreadTree.
    //!
    //! Coverage:
    //! - Creation with parent/anchor validation and owner scoping
    //! - Breadcrumb paths (including truncation on foreign links)
    //! - Root listing, renaming, cascading deletion
    //! - Message appends

    use super::*;
    use std::time::Duration;

    // =========================================================================
    // Test Helpers
    // =========================================================================

    const ALICE: &str = "alice";
    const BOB: &str = "bob";

    fn tree() -> ThreadTree {
        ThreadTree::new(Store::in_memory().unwrap())
    }

    fn root(tree: &ThreadTree, title: &str) -> Thread {
        tree.create_thread(ALICE, CreateThread::root(Some(title.to_string())))
            .unwrap()
    }

    fn branch(tree: &ThreadTree, parent: &Thread, span: &str, anchor: Option<&str>) -> Thread {
        tree.create_thread(
            ALICE,
            CreateThread {
                title: Some(branch_title(span)),
                selected_context: Some(span.to_string()),
                parent_thread_id: Some(parent.id.clone()),
                parent_message_id: anchor.map(String::from),
            },
        )
        .unwrap()
    }

    fn say(tree: &ThreadTree, thread: &Thread, role: Role, content: &str) -> Message {
        tree.append_message(
            ALICE,
            NewMessage {
                id: None,
                thread_id: thread.id.clone(),
                role,
                content: content.to_string(),
                selected_text: None,
            },
        )
        .unwrap()
    }

    fn tick() {
        std::thread::sleep(Duration::from_millis(3));
    }

    // =========================================================================
    // create_thread
    // =========================================================================

    #[test]
    fn blank_title_defaults_to_new_chat() {
        let tree = tree();

        let untitled = tree.create_thread(ALICE, CreateThread::default()).unwrap();
        let blank = tree
            .create_thread(ALICE, CreateThread::root(Some("   ".into())))
            .unwrap();

        assert_eq!(untitled.title, "New Chat");
        assert_eq!(blank.title, "New Chat");
        assert!(untitled.is_root());
    }

    #[test]
    fn branch_records_parent_anchor_and_context() {
        let tree = tree();
        let a = root(&tree, "A");
        let answer = say(&tree, &a, Role::Assistant, "... the base case ...");

        let b = branch(&tree, &a, "base case", Some(&answer.id));

        assert_eq!(b.parent_thread_id.as_deref(), Some(a.id.as_str()));
        assert_eq!(b.parent_message_id.as_deref(), Some(answer.id.as_str()));
        assert_eq!(b.selected_context.as_deref(), Some("base case"));
        assert!(tree.get_thread(&b.id, ALICE).unwrap().children.is_empty());
    }

    #[test]
    fn foreign_parent_is_not_found() {
        let tree = tree();
        let a = root(&tree, "A");

        let err = tree
            .create_thread(
                BOB,
                CreateThread {
                    parent_thread_id: Some(a.id.clone()),
                    ..Default::default()
                },
            )
            .unwrap_err();

        assert!(matches!(err, ThreadError::NotFound(_)));
    }

    #[test]
    fn anchor_must_belong_to_parent() {
        let tree = tree();
        let a = root(&tree, "A");
        let other = root(&tree, "Other");
        let elsewhere = say(&tree, &other, Role::Assistant, "not in A");

        let err = tree
            .create_thread(
                ALICE,
                CreateThread {
                    parent_thread_id: Some(a.id.clone()),
                    parent_message_id: Some(elsewhere.id),
                    ..Default::default()
                },
            )
            .unwrap_err();

        assert!(matches!(err, ThreadError::NotFound("Anchor message")));
    }

    #[test]
    fn anchor_without_parent_is_rejected() {
        let tree = tree();
        let a = root(&tree, "A");
        let msg = say(&tree, &a, Role::Assistant, "hi");

        let err = tree
            .create_thread(
                ALICE,
                CreateThread {
                    parent_message_id: Some(msg.id),
                    ..Default::default()
                },
            )
            .unwrap_err();

        assert!(matches!(err, ThreadError::NotFound(_)));
    }

    // =========================================================================
    // get_thread / breadcrumbs
    // =========================================================================

    #[test]
    fn get_thread_returns_messages_in_order() {
        let tree = tree();
        let a = root(&tree, "A");
        say(&tree, &a, Role::User, "Explain recursion");
        say(&tree, &a, Role::Assistant, "A function that calls itself.");

        let detail = tree.get_thread(&a.id, ALICE).unwrap();
        let roles: Vec<_> = detail.messages.iter().map(|m| m.role).collect();

        assert_eq!(roles, [Role::User, Role::Assistant]);
        assert!(detail.breadcrumbs.is_empty());
    }

    #[test]
    fn get_thread_is_owner_scoped() {
        let tree = tree();
        let a = root(&tree, "A");

        assert!(matches!(
            tree.get_thread(&a.id, BOB),
            Err(ThreadError::NotFound("Thread"))
        ));
        assert!(matches!(
            tree.get_thread("missing", ALICE),
            Err(ThreadError::NotFound("Thread"))
        ));
    }

    #[test]
    fn children_are_newest_first_with_counts() {
        let tree = tree();
        let a = root(&tree, "A");
        let first = branch(&tree, &a, "one", None);
        tick();
        let second = branch(&tree, &a, "two", None);
        branch(&tree, &first, "nested", None);

        let children = tree.get_thread(&a.id, ALICE).unwrap().children;
        let ids: Vec<_> = children.iter().map(|c| c.id.as_str()).collect();

        assert_eq!(ids, [second.id.as_str(), first.id.as_str()]);
        assert_eq!(children[0].child_count, 0);
        assert_eq!(children[1].child_count, 1);
    }

    #[test]
    fn breadcrumbs_of_three_level_chain_are_root_first() {
        let tree = tree();
        let r = root(&tree, "root");
        let a = branch(&tree, &r, "a", None);
        let b = branch(&tree, &a, "b", None);

        let crumbs = tree.breadcrumbs(&b.id, ALICE);
        let ids: Vec<_> = crumbs.iter().map(|c| c.id.as_str()).collect();

        assert_eq!(ids, [r.id.as_str(), a.id.as_str()]);
        assert_eq!(crumbs[1].selected_context.as_deref(), Some("a"));
        assert_eq!(tree.get_thread(&b.id, ALICE).unwrap().breadcrumbs, crumbs);
    }

    #[test]
    fn breadcrumbs_of_root_or_missing_are_empty() {
        let tree = tree();
        let r = root(&tree, "root");

        assert!(tree.breadcrumbs(&r.id, ALICE).is_empty());
        assert!(tree.breadcrumbs("missing", ALICE).is_empty());
        assert!(tree.breadcrumbs(&r.id, BOB).is_empty());
    }

    #[test]
    fn breadcrumbs_stop_at_foreign_link() {
        let tree = tree();
        // A thread of Bob's sitting above Alice's thread; only reachable by a
        // raw insert since the tree refuses cross-owner parents.
        let foreign = tree
            .create_thread(BOB, CreateThread::root(Some("Bob's".into())))
            .unwrap();
        let mine = tree.store().with(|db| {
            ThreadRepository::new(db)
                .insert_thread("mine", ALICE, "Mine", Some(foreign.id.as_str()), None, None)
                .unwrap()
        });
        let child = branch(&tree, &mine, "deeper", None);

        let crumbs = tree.breadcrumbs(&child.id, ALICE);
        let ids: Vec<_> = crumbs.iter().map(|c| c.id.as_str()).collect();

        assert_eq!(ids, ["mine"]);
    }

    // =========================================================================
    // list_roots / rename / delete
    // =========================================================================

    #[test]
    fn list_roots_excludes_branches_and_other_owners() {
        let tree = tree();
        let a = root(&tree, "A");
        branch(&tree, &a, "span", None);
        tree.create_thread(BOB, CreateThread::default()).unwrap();

        let roots = tree.list_roots(ALICE).unwrap();

        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].id, a.id);
        assert_eq!(roots[0].child_count, 1);
    }

    #[test]
    fn appending_moves_thread_to_top() {
        let tree = tree();
        let older = root(&tree, "older");
        tick();
        let newer = root(&tree, "newer");
        tick();

        say(&tree, &older, Role::User, "bump");

        let roots = tree.list_roots(ALICE).unwrap();
        assert_eq!(roots[0].id, older.id);
        assert_eq!(roots[1].id, newer.id);
    }

    #[test]
    fn rename_updates_title() {
        let tree = tree();
        let a = root(&tree, "A");
        tick();

        let renamed = tree.rename_thread(&a.id, ALICE, " Explain recursion ").unwrap();

        assert_eq!(renamed.title, "Explain recursion");
        assert!(renamed.updated_at > a.updated_at);
    }

    #[test]
    fn rename_rejects_blank_and_foreign() {
        let tree = tree();
        let a = root(&tree, "A");

        assert!(matches!(
            tree.rename_thread(&a.id, ALICE, "  "),
            Err(ThreadError::EmptyTitle)
        ));
        assert!(matches!(
            tree.rename_thread(&a.id, BOB, "mine now"),
            Err(ThreadError::NotFound(_))
        ));
    }

    #[test]
    fn delete_cascades_through_subtree() {
        let tree = tree();
        let r = root(&tree, "root");
        let a = branch(&tree, &r, "a", None);
        let b = branch(&tree, &a, "b", None);
        let keep = root(&tree, "keep");
        say(&tree, &a, Role::User, "in a");
        say(&tree, &b, Role::Assistant, "in b");
        say(&tree, &keep, Role::User, "survives");

        assert_eq!(tree.delete_thread(&r.id, ALICE).unwrap(), 3);

        for id in [&r.id, &a.id, &b.id] {
            assert!(matches!(
                tree.get_thread(id, ALICE),
                Err(ThreadError::NotFound(_))
            ));
        }
        let orphans: i64 = tree.store().with(|db| {
            db.conn()
                .query_row(
                    "SELECT COUNT(*) FROM messages m
                     WHERE NOT EXISTS (SELECT 1 FROM threads t WHERE t.id = m.thread_id)",
                    [],
                    |row| row.get(0),
                )
                .unwrap()
        });
        assert_eq!(orphans, 0);
        assert_eq!(tree.get_thread(&keep.id, ALICE).unwrap().messages.len(), 1);
    }

    #[test]
    fn delete_of_branch_updates_parent_count() {
        let tree = tree();
        let r = root(&tree, "root");
        let a = branch(&tree, &r, "a", None);

        tree.delete_thread(&a.id, ALICE).unwrap();

        assert_eq!(tree.list_roots(ALICE).unwrap()[0].child_count, 0);
    }

    #[test]
    fn delete_is_owner_scoped() {
        let tree = tree();
        let a = root(&tree, "A");

        assert!(matches!(
            tree.delete_thread(&a.id, BOB),
            Err(ThreadError::NotFound(_))
        ));
        assert!(tree.get_thread(&a.id, ALICE).is_ok());
    }

    // =========================================================================
    // append_message
    // =========================================================================

    #[test]
    fn append_keeps_client_id() {
        let tree = tree();
        let a = root(&tree, "A");

        let stored = tree
            .append_message(
                ALICE,
                NewMessage {
                    id: Some("client-1".into()),
                    thread_id: a.id.clone(),
                    role: Role::User,
                    content: "hello".into(),
                    selected_text: Some("span".into()),
                },
            )
            .unwrap();

        assert_eq!(stored.id, "client-1");
        assert_eq!(stored.selected_text.as_deref(), Some("span"));
    }

    #[test]
    fn client_ids_do_not_collide_across_owners() {
        let tree = tree();
        let a = root(&tree, "A");
        let b = tree
            .create_thread(BOB, CreateThread::root(Some("B".into())))
            .unwrap();
        let message = |thread_id: &str| NewMessage {
            id: Some("shared-id".into()),
            thread_id: thread_id.to_string(),
            role: Role::User,
            content: "hello".into(),
            selected_text: None,
        };

        tree.append_message(ALICE, message(&a.id)).unwrap();
        let stored = tree.append_message(BOB, message(&b.id)).unwrap();

        assert_eq!(stored.id, "shared-id");
        assert_eq!(tree.get_thread(&a.id, ALICE).unwrap().messages.len(), 1);
        assert_eq!(tree.get_thread(&b.id, BOB).unwrap().messages.len(), 1);
    }

    #[test]
    fn append_to_foreign_thread_is_not_found() {
        let tree = tree();
        let a = root(&tree, "A");

        let err = tree
            .append_message(
                BOB,
                NewMessage {
                    id: None,
                    thread_id: a.id,
                    role: Role::User,
                    content: "sneaky".into(),
                    selected_text: None,
                },
            )
            .unwrap_err();

        assert!(matches!(err, ThreadError::NotFound("Thread")));
    }

    #[test]
    fn detail_serializes_camel_case() {
        let tree = tree();
        let r = root(&tree, "root");
        let a = branch(&tree, &r, "span", None);

        let json = serde_json::to_value(tree.get_thread(&a.id, ALICE).unwrap()).unwrap();

        assert_eq!(json["parentThreadId"], r.id.as_str());
        assert_eq!(json["selectedContext"], "span");
        assert!(json["childThreads"].as_array().unwrap().is_empty());
        assert_eq!(json["breadcrumbs"][0]["title"], "root");
    }
}
