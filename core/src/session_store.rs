//! Persistent chat history keyed by session scope.
//!
//! Rows live in `chat_history` ordered by a per-scope sequence number. A
//! user/assistant round is written by [`SessionStore::commit_turn`] inside one
//! transaction, so a reader either sees both halves or neither.

use std::path::Path;

use anyhow::{anyhow, bail, Result};
use r2d2_sqlite::rusqlite::{params, Connection, TransactionBehavior};
use serde::Serialize;
use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use crate::conversation::{approx_tokens, Conversation, Message, Role};
use crate::db::DbPool;

/// Identifies whose history a turn reads and writes. Passed explicitly
/// through every orchestrator entry point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SessionScope {
    key: String,
}

impl SessionScope {
    /// Stable key for a workspace folder.
    pub fn for_workspace(path: &Path) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(path.to_string_lossy().as_bytes());
        let digest = hasher.finalize();
        let key = digest.iter().map(|b| format!("{:02x}", b)).collect::<String>();
        Self { key }
    }

    pub fn named(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

/// The user half of a round, held until the assistant answers.
#[derive(Debug, Clone)]
pub struct PendingTurn {
    user: Message,
}

impl PendingTurn {
    pub fn new(user: Message) -> Self {
        Self { user }
    }

    pub fn user(&self) -> &Message {
        &self.user
    }

    pub fn complete(self, reply: impl Into<String>) -> CompletedTurn {
        CompletedTurn {
            user: self.user,
            assistant: Message::assistant(reply),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompletedTurn {
    pub user: Message,
    pub assistant: Message,
}

#[derive(Clone)]
pub struct SessionStore {
    pool: DbPool,
}

impl SessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append a single message to the end of the scope's history.
    pub fn append(&self, scope: &SessionScope, message: &Message) -> Result<()> {
        validate(message)?;
        let mut conn = self.pool.get().map_err(|err| anyhow!(err.to_string()))?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        insert_message(&tx, scope, message)?;
        tx.commit()?;
        Ok(())
    }

    /// Persist both halves of a round, or nothing. The write lock is taken up
    /// front so concurrent scopes queue on the busy timeout instead of failing
    /// on a read-to-write upgrade.
    pub fn commit_turn(&self, scope: &SessionScope, turn: &CompletedTurn) -> Result<()> {
        if turn.user.role() != Role::User || turn.assistant.role() != Role::Assistant {
            bail!("a turn must be a user message followed by an assistant message");
        }
        validate(&turn.user)?;
        validate(&turn.assistant)?;
        let mut conn = self.pool.get().map_err(|err| anyhow!(err.to_string()))?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        insert_message(&tx, scope, &turn.user)?;
        insert_message(&tx, scope, &turn.assistant)?;
        tx.commit()?;
        Ok(())
    }

    pub fn history(&self, scope: &SessionScope) -> Result<Conversation> {
        let conn = self.pool.get().map_err(|err| anyhow!(err.to_string()))?;
        let mut stmt = conn.prepare(
            "SELECT role, content FROM chat_history WHERE scope = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![scope.key()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut conversation = Conversation::new();
        for row in rows {
            let (role, content) = row?;
            conversation.push(Message::new(role.parse()?, content));
        }
        Ok(conversation)
    }

    /// Clear the scope's history. Returns the number of messages removed.
    pub fn reset(&self, scope: &SessionScope) -> Result<usize> {
        let conn = self.pool.get().map_err(|err| anyhow!(err.to_string()))?;
        let removed = conn.execute(
            "DELETE FROM chat_history WHERE scope = ?1",
            params![scope.key()],
        )?;
        Ok(removed)
    }

    /// Drop every scope. Run once when the host starts.
    pub fn purge_all(&self) -> Result<usize> {
        let conn = self.pool.get().map_err(|err| anyhow!(err.to_string()))?;
        Ok(conn.execute("DELETE FROM chat_history", [])?)
    }
}

fn validate(message: &Message) -> Result<()> {
    if message.role() == Role::System {
        bail!("system messages are injected per request and never stored");
    }
    if message.content().trim().is_empty() {
        bail!("{} message is empty", message.role());
    }
    Ok(())
}

fn insert_message(conn: &Connection, scope: &SessionScope, message: &Message) -> Result<()> {
    let next_seq: i64 = conn.query_row(
        "SELECT COALESCE(MAX(seq), 0) + 1 FROM chat_history WHERE scope = ?1",
        params![scope.key()],
        |row| row.get(0),
    )?;
    conn.execute(
        "INSERT INTO chat_history (scope, seq, role, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            scope.key(),
            next_seq,
            message.role().as_str(),
            message.content(),
            OffsetDateTime::now_utc().unix_timestamp(),
        ],
    )?;
    Ok(())
}

/// Newest whole rounds of `history` whose estimated size fits `budget`.
/// A user message directly followed by its assistant reply is kept or dropped
/// together.
pub fn trim_to_budget(history: &Conversation, budget: usize) -> Conversation {
    let messages = history.messages();
    let mut start = messages.len();
    let mut used = 0usize;
    while start > 0 {
        let end = start;
        let mut chunk_start = end - 1;
        if chunk_start > 0
            && messages[chunk_start].role() == Role::Assistant
            && messages[chunk_start - 1].role() == Role::User
        {
            chunk_start -= 1;
        }
        let cost: usize = messages[chunk_start..end]
            .iter()
            .map(|m| approx_tokens(m.content()))
            .sum();
        if used + cost > budget {
            break;
        }
        used += cost;
        start = chunk_start;
    }
    Conversation::from(messages[start..].to_vec())
}
