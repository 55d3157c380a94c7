use r2d2_sqlite::rusqlite::{params, Connection};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::db::DbPool;

pub fn log_event(
    conn: &Connection,
    level: &str,
    code: Option<&str>,
    module: &str,
    message: &str,
    explain: Option<&str>,
    data: Option<Value>,
) -> rusqlite::Result<()> {
    let id = Uuid::new_v4().to_string();
    let ts = OffsetDateTime::now_utc().unix_timestamp();
    let data_str = data.map(|v| v.to_string());
    conn.execute(
        "INSERT INTO event_log (id, ts, level, code, module, message, explain, data) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![id, ts, level, code, module, message, explain, data_str],
    )?;
    Ok(())
}

/// Best-effort variant for callers that only hold the pool. Audit rows must
/// never fail the operation being audited.
pub fn record(
    pool: &DbPool,
    level: &str,
    code: Option<&str>,
    module: &str,
    message: &str,
    data: Option<Value>,
) {
    match pool.get() {
        Ok(conn) => {
            if let Err(err) = log_event(&conn, level, code, module, message, None, data) {
                log::warn!("failed to write event_log row for {module}: {err}");
            }
        }
        Err(err) => log::warn!("event_log unavailable for {module}: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_in_memory;

    #[test]
    fn record_writes_a_row() {
        let pool = init_in_memory().unwrap();
        record(
            &pool,
            "warn",
            Some("GEN-1001"),
            "ai.runtime",
            "provider failed",
            Some(serde_json::json!({ "provider": "groq" })),
        );
        let conn = pool.get().unwrap();
        let (code, data): (String, String) = conn
            .query_row(
                "SELECT code, data FROM event_log WHERE module = 'ai.runtime'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(code, "GEN-1001");
        assert!(data.contains("groq"));
    }
}
