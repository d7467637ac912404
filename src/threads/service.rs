//! Owner-bound thread operations as seen by a conversation session.

use async_trait::async_trait;

use super::{CreateThread, NewMessage, ThreadDetail, ThreadError, ThreadTree};
use crate::db::{Message, RootThread, Thread};

/// Thread operations on behalf of one identity.
#[async_trait]
pub trait ThreadService: Send + Sync {
    async fn create_thread(&self, request: CreateThread) -> Result<Thread, ThreadError>;

    async fn get_thread(&self, id: &str) -> Result<ThreadDetail, ThreadError>;

    async fn list_roots(&self) -> Result<Vec<RootThread>, ThreadError>;

    async fn rename_thread(&self, id: &str, title: &str) -> Result<Thread, ThreadError>;

    async fn delete_thread(&self, id: &str) -> Result<(), ThreadError>;

    async fn append_message(&self, message: NewMessage) -> Result<Message, ThreadError>;
}

/// In-process service over a [`ThreadTree`].
#[derive(Clone)]
pub struct LocalThreadService {
    tree: ThreadTree,
    owner: String,
}

impl LocalThreadService {
    pub fn new(tree: ThreadTree, owner: impl Into<String>) -> Self {
        Self {
            tree,
            owner: owner.into(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn tree(&self) -> &ThreadTree {
        &self.tree
    }
}

#[async_trait]
impl ThreadService for LocalThreadService {
    async fn create_thread(&self, request: CreateThread) -> Result<Thread, ThreadError> {
        self.tree.create_thread(&self.owner, request)
    }

    async fn get_thread(&self, id: &str) -> Result<ThreadDetail, ThreadError> {
        self.tree.get_thread(id, &self.owner)
    }

    async fn list_roots(&self) -> Result<Vec<RootThread>, ThreadError> {
        self.tree.list_roots(&self.owner)
    }

    async fn rename_thread(&self, id: &str, title: &str) -> Result<Thread, ThreadError> {
        self.tree.rename_thread(id, &self.owner, title)
    }

    async fn delete_thread(&self, id: &str) -> Result<(), ThreadError> {
        self.tree.delete_thread(id, &self.owner).map(|_| ())
    }

    async fn append_message(&self, message: NewMessage) -> Result<Message, ThreadError> {
        self.tree.append_message(&self.owner, message)
    }
}
