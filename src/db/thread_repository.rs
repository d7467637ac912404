//! SQLite-backed thread and message persistence.
//!
//! This repository encapsulates all SQL operations for:
//! - Creating, renaming, and cascading deletion of threads (`threads`)
//! - Appending and listing messages (`messages`)
//! - Child and root listings with their direct-child counts
//!
//! Every thread lookup is scoped by owner; a thread owned by someone else is
//! indistinguishable from a missing one.

use std::collections::VecDeque;

use crate::db::{
    from_millis, now_millis, ChildThread, Database, Message, RootThread, Role, Thread,
};
use rusqlite::{Connection, OptionalExtension, Row};

const THREAD_COLUMNS: &str = "id, owner_id, title, parent_thread_id, parent_message_id, \
                              selected_context, created_at, updated_at";

/// Thread and message persistence operations.
pub struct ThreadRepository<'a> {
    db: &'a Database,
}

impl<'a> ThreadRepository<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    fn thread_from_row(row: &Row<'_>) -> Result<Thread, rusqlite::Error> {
        Ok(Thread {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            title: row.get(2)?,
            parent_thread_id: row.get(3)?,
            parent_message_id: row.get(4)?,
            selected_context: row.get(5)?,
            created_at: from_millis(row.get(6)?),
            updated_at: from_millis(row.get(7)?),
        })
    }

    fn message_from_row(row: &Row<'_>) -> Result<Message, rusqlite::Error> {
        let role: String = row.get(2)?;
        let role = role.parse::<Role>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?;

        Ok(Message {
            id: row.get(0)?,
            thread_id: row.get(1)?,
            role,
            content: row.get(3)?,
            selected_text: row.get(4)?,
            created_at: from_millis(row.get(5)?),
        })
    }

    /// Insert a new thread with no messages.
    ///
    /// Callers are responsible for validating the parent link; this only
    /// writes the row.
    pub fn insert_thread(
        &self,
        id: &str,
        owner_id: &str,
        title: &str,
        parent_thread_id: Option<&str>,
        parent_message_id: Option<&str>,
        selected_context: Option<&str>,
    ) -> Result<Thread, rusqlite::Error> {
        let now = now_millis();

        self.db.conn().execute(
            "INSERT INTO threads (id, owner_id, title, parent_thread_id, parent_message_id,
                                  selected_context, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            rusqlite::params![
                id,
                owner_id,
                title,
                parent_thread_id,
                parent_message_id,
                selected_context,
                now,
                now
            ],
        )?;

        Ok(Thread {
            id: id.to_string(),
            owner_id: owner_id.to_string(),
            title: title.to_string(),
            parent_thread_id: parent_thread_id.map(str::to_string),
            parent_message_id: parent_message_id.map(str::to_string),
            selected_context: selected_context.map(str::to_string),
            created_at: from_millis(now),
            updated_at: from_millis(now),
        })
    }

    /// Look up a thread owned by `owner_id`.
    pub fn find_thread(&self, id: &str, owner_id: &str) -> Result<Option<Thread>, rusqlite::Error> {
        self.db
            .conn()
            .query_row(
                &format!("SELECT {THREAD_COLUMNS} FROM threads WHERE id = ? AND owner_id = ?"),
                [id, owner_id],
                Self::thread_from_row,
            )
            .optional()
    }

    /// Whether `message_id` identifies a message of `thread_id`.
    pub fn message_in_thread(
        &self,
        message_id: &str,
        thread_id: &str,
    ) -> Result<bool, rusqlite::Error> {
        self.db.conn().query_row(
            "SELECT EXISTS(SELECT 1 FROM messages WHERE id = ? AND thread_id = ?)",
            [message_id, thread_id],
            |row| row.get(0),
        )
    }

    /// All messages of a thread in creation order.
    pub fn messages(&self, thread_id: &str) -> Result<Vec<Message>, rusqlite::Error> {
        let mut stmt = self.db.conn().prepare(
            "SELECT id, thread_id, role, content, selected_text, created_at
             FROM messages
             WHERE thread_id = ?
             ORDER BY created_at, rowid",
        )?;

        let rows = stmt.query_map([thread_id], Self::message_from_row)?;
        rows.collect()
    }

    /// Direct children of a thread, newest first, with their own child counts.
    pub fn children(
        &self,
        thread_id: &str,
        owner_id: &str,
    ) -> Result<Vec<ChildThread>, rusqlite::Error> {
        let mut stmt = self.db.conn().prepare(
            "SELECT t.id, t.title, t.selected_context, t.parent_message_id, t.created_at,
                    (SELECT COUNT(*) FROM threads c WHERE c.parent_thread_id = t.id)
             FROM threads t
             WHERE t.parent_thread_id = ? AND t.owner_id = ?
             ORDER BY t.created_at DESC, t.rowid DESC",
        )?;

        let rows = stmt.query_map([thread_id, owner_id], |row| {
            Ok(ChildThread {
                id: row.get(0)?,
                title: row.get(1)?,
                selected_context: row.get(2)?,
                parent_message_id: row.get(3)?,
                created_at: from_millis(row.get(4)?),
                child_count: row.get(5)?,
            })
        })?;

        rows.collect()
    }

    /// Root threads of an owner, most recently updated first.
    pub fn roots(&self, owner_id: &str) -> Result<Vec<RootThread>, rusqlite::Error> {
        let mut stmt = self.db.conn().prepare(
            "SELECT t.id, t.title, t.updated_at,
                    (SELECT COUNT(*) FROM threads c WHERE c.parent_thread_id = t.id)
             FROM threads t
             WHERE t.owner_id = ? AND t.parent_thread_id IS NULL
             ORDER BY t.updated_at DESC, t.rowid DESC",
        )?;

        let rows = stmt.query_map([owner_id], |row| {
            Ok(RootThread {
                id: row.get(0)?,
                title: row.get(1)?,
                updated_at: from_millis(row.get(2)?),
                child_count: row.get(3)?,
            })
        })?;

        rows.collect()
    }

    /// Change a thread's title and bump `updated_at`.
    ///
    /// Returns `None` when the thread is missing or owned by someone else.
    pub fn rename(
        &self,
        id: &str,
        owner_id: &str,
        title: &str,
    ) -> Result<Option<Thread>, rusqlite::Error> {
        let changed = self.db.conn().execute(
            "UPDATE threads SET title = ?, updated_at = ? WHERE id = ? AND owner_id = ?",
            rusqlite::params![title, now_millis(), id, owner_id],
        )?;

        if changed == 0 {
            return Ok(None);
        }
        self.find_thread(id, owner_id)
    }

    /// Append a message and bump the thread's `updated_at` in one transaction.
    pub fn insert_message(
        &self,
        id: &str,
        thread_id: &str,
        role: Role,
        content: &str,
        selected_text: Option<&str>,
    ) -> Result<Message, rusqlite::Error> {
        let now = now_millis();

        self.db.in_transaction(|conn| {
            conn.execute(
                "INSERT INTO messages (id, thread_id, role, content, selected_text, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                rusqlite::params![id, thread_id, role.as_str(), content, selected_text, now],
            )?;

            conn.execute(
                "UPDATE threads SET updated_at = ? WHERE id = ?",
                rusqlite::params![now, thread_id],
            )?;

            Ok(Message {
                id: id.to_string(),
                thread_id: thread_id.to_string(),
                role,
                content: content.to_string(),
                selected_text: selected_text.map(str::to_string),
                created_at: from_millis(now),
            })
        })
    }

    /// Delete a thread, every descendant thread, and all of their messages.
    ///
    /// Messages go first, then threads deepest-first, so no row ever points at
    /// a deleted parent even without foreign-key cascades. Returns the number
    /// of threads removed, or `None` if the thread is missing or not owned.
    pub fn delete_subtree(
        &self,
        id: &str,
        owner_id: &str,
    ) -> Result<Option<usize>, rusqlite::Error> {
        if self.find_thread(id, owner_id)?.is_none() {
            return Ok(None);
        }

        self.db.in_transaction(|conn| {
            let subtree = Self::collect_subtree(conn, id)?;

            for thread_id in &subtree {
                conn.execute("DELETE FROM messages WHERE thread_id = ?", [thread_id])?;
            }
            for thread_id in subtree.iter().rev() {
                conn.execute("DELETE FROM threads WHERE id = ?", [thread_id])?;
            }

            tracing::debug!(root = %id, threads = subtree.len(), "Deleted thread subtree");
            Ok(Some(subtree.len()))
        })
    }

    /// Breadth-first list of `root` and all its descendants (root first).
    fn collect_subtree(conn: &Connection, root: &str) -> Result<Vec<String>, rusqlite::Error> {
        let mut stmt = conn.prepare("SELECT id FROM threads WHERE parent_thread_id = ?")?;
        let mut ordered = Vec::new();
        let mut queue = VecDeque::from([root.to_string()]);

        while let Some(current) = queue.pop_front() {
            let children = stmt
                .query_map([&current], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            queue.extend(children);
            ordered.push(current);
        }

        Ok(ordered)
    }
}
