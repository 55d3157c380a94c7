use anyhow::{Context, Result};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::PathBuf;
use std::time::Duration;

pub type DbPool = Pool<SqliteConnectionManager>;

pub fn init_db(workspace_dir: PathBuf) -> Result<DbPool> {
    std::fs::create_dir_all(&workspace_dir)?;
    let db_path = workspace_dir.join("ola.db");
    let mgr = SqliteConnectionManager::file(&db_path)
        .with_init(|conn| conn.busy_timeout(Duration::from_secs(5)));
    let pool = Pool::new(mgr)?;
    {
        let conn = pool.get()?;
        apply_migrations(&conn)?;
    }
    Ok(pool)
}

/// Single-connection pool over a private in-memory database. Every pooled
/// connection to `:memory:` would otherwise see its own empty database.
pub fn init_in_memory() -> Result<DbPool> {
    let mgr = SqliteConnectionManager::memory();
    let pool = Pool::builder()
        .max_size(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .build(mgr)?;
    {
        let conn = pool.get()?;
        apply_migrations(&conn)?;
    }
    Ok(pool)
}

fn apply_migrations(conn: &Connection) -> Result<()> {
    let migrations: &[(&str, &str)] = &[
        (
            "0001_init.sql",
            include_str!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/../migrations/0001_init.sql"
            )),
        ),
        (
            "0002_chat_history.sql",
            include_str!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/../migrations/0002_chat_history.sql"
            )),
        ),
    ];

    for (name, sql) in migrations {
        conn.execute_batch(sql)
            .with_context(|| format!("failed to apply migration {name}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let pool = init_in_memory().unwrap();
        let conn = pool.get().unwrap();
        apply_migrations(&conn).unwrap();
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('app_settings', 'event_log', 'chat_history')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 3);
    }
}
