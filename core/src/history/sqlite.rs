//! SQLite history backend
//!
//! All sessions share one `history_records` table; the autoincrement `seq`
//! column is the log order.

use super::log::{HistoryError, HistoryLog};
use super::record::HistoryRecord;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;

const SCHEMA: [&str; 2] = [
    r#"
    CREATE TABLE IF NOT EXISTS history_records (
        seq INTEGER PRIMARY KEY AUTOINCREMENT,
        session_id TEXT NOT NULL,
        at INTEGER NOT NULL,
        kind TEXT NOT NULL,
        payload TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS history_records_session ON history_records (session_id, seq)",
];

#[derive(Debug, Clone)]
pub struct SqliteHistoryLog {
    pool: SqlitePool,
    session_id: String,
}

impl SqliteHistoryLog {
    /// Connect to `database_url` (e.g. `sqlite://cadence.db` or
    /// `sqlite::memory:`) and make sure the table exists
    pub async fn connect(database_url: &str, session_id: &str) -> Result<Self, HistoryError> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // One connection: appends stay ordered and `:memory:` databases
        // survive for the life of the pool
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Self::with_pool(pool, session_id).await
    }

    pub async fn with_pool(pool: SqlitePool, session_id: &str) -> Result<Self, HistoryError> {
        migrate(&pool).await?;
        Ok(Self {
            pool,
            session_id: session_id.to_string(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Create the history table if it does not exist
pub async fn migrate(pool: &SqlitePool) -> Result<(), HistoryError> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

#[async_trait]
impl HistoryLog for SqliteHistoryLog {
    async fn append(&self, record: &HistoryRecord) -> Result<(), HistoryError> {
        let payload = serde_json::to_string(record)?;

        sqlx::query(
            "INSERT INTO history_records (session_id, at, kind, payload) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&self.session_id)
        .bind(record.at())
        .bind(record.kind())
        .bind(payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<HistoryRecord>, HistoryError> {
        let rows = sqlx::query(
            "SELECT seq, payload FROM history_records WHERE session_id = ?1 ORDER BY seq ASC",
        )
        .bind(&self.session_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let seq: i64 = row.try_get("seq")?;
                let payload: String = row.try_get("payload")?;
                serde_json::from_str(&payload).map_err(|source| HistoryError::Corrupt {
                    path: format!("history_records#{}", seq).into(),
                    line: seq as usize,
                    source,
                })
            })
            .collect()
    }
}
