//! Process-wide key/value settings backed by the `app_settings` table.
//!
//! Values are scalar strings addressed by key name. Lookups never cache and
//! never write, so two reads without an intervening [`SettingsStore::set`]
//! always agree.

use anyhow::{anyhow, Result};
use r2d2_sqlite::rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;

use crate::db::DbPool;

pub const SELECTED_PROVIDER_KEY: &str = "ola.provider";
pub const HISTORY_BUDGET_KEY: &str = "ola.history.maxTokens";

#[derive(Clone)]
pub struct SettingsStore {
    pool: DbPool,
}

impl SettingsStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> DbPool {
        self.pool.clone()
    }

    /// Look up `key`, falling back to `default` when the row is absent.
    pub fn get(&self, key: &str, default: &str) -> Result<String> {
        let conn = self.pool.get().map_err(|err| anyhow!(err.to_string()))?;
        Ok(read_setting(&conn, key)?.unwrap_or_else(|| default.to_string()))
    }

    pub fn get_optional(&self, key: &str) -> Result<Option<String>> {
        let conn = self.pool.get().map_err(|err| anyhow!(err.to_string()))?;
        read_setting(&conn, key)
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.pool.get().map_err(|err| anyhow!(err.to_string()))?;
        upsert_setting(&conn, key, value)
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        let conn = self.pool.get().map_err(|err| anyhow!(err.to_string()))?;
        conn.execute("DELETE FROM app_settings WHERE key = ?1", params![key])?;
        Ok(())
    }
}

pub(crate) fn read_setting(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM app_settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

pub(crate) fn upsert_setting(conn: &Connection, key: &str, value: &str) -> Result<()> {
    let now = OffsetDateTime::now_utc().unix_timestamp();
    conn.execute(
        "INSERT INTO app_settings (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value, now],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_in_memory;

    #[test]
    fn missing_key_returns_default() {
        let store = SettingsStore::new(init_in_memory().unwrap());
        assert_eq!(store.get("groq.apiKey", "").unwrap(), "");
        assert_eq!(store.get(SELECTED_PROVIDER_KEY, "Groq").unwrap(), "Groq");
    }

    #[test]
    fn repeated_reads_agree_until_written() {
        let store = SettingsStore::new(init_in_memory().unwrap());
        store.set("groq.model", "llama3-70b-8192").unwrap();
        let first = store.get("groq.model", "").unwrap();
        let second = store.get("groq.model", "").unwrap();
        assert_eq!(first, second);

        store.set("groq.model", "mixtral-8x7b-32768").unwrap();
        assert_eq!(store.get("groq.model", "").unwrap(), "mixtral-8x7b-32768");
    }

    #[test]
    fn remove_restores_default() {
        let store = SettingsStore::new(init_in_memory().unwrap());
        store.set("anthropic.model", "claude-3-opus").unwrap();
        store.remove("anthropic.model").unwrap();
        assert_eq!(store.get_optional("anthropic.model").unwrap(), None);
    }
}
