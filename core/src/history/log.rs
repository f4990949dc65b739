//! History log contract and backend selection

use super::record::HistoryRecord;
use super::{JsonlHistoryLog, SqliteHistoryLog};
use crate::config::{HistoryBackend, HistoryConfig};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse history record at {path}:{line}: {source}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode history record: {0}")]
    Json(#[from] serde_json::Error),

    #[error("history database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl HistoryError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HistoryError::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

/// Ordered append-only storage for one session's records
///
/// Single writer per session: callers serialize appends through the
/// session lease.
#[async_trait]
pub trait HistoryLog: Send + Sync {
    async fn append(&self, record: &HistoryRecord) -> Result<(), HistoryError>;

    /// Every record, in append order
    async fn load_all(&self) -> Result<Vec<HistoryRecord>, HistoryError>;
}

/// Log held in memory, lost on exit
#[derive(Debug, Default)]
pub struct MemoryHistoryLog {
    records: Mutex<Vec<HistoryRecord>>,
}

impl MemoryHistoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<HistoryRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }
}

#[async_trait]
impl HistoryLog for MemoryHistoryLog {
    async fn append(&self, record: &HistoryRecord) -> Result<(), HistoryError> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<HistoryRecord>, HistoryError> {
        Ok(self.records.lock().await.clone())
    }
}

/// Open the configured backend for a session
pub async fn open_log(
    config: &HistoryConfig,
    session_id: &str,
) -> Result<Arc<dyn HistoryLog>, HistoryError> {
    match config.backend {
        HistoryBackend::Jsonl => {
            let log = JsonlHistoryLog::open(&config.dir, session_id).await?;
            tracing::debug!(session_id = %session_id, path = %log.path().display(), "history log opened");
            Ok(Arc::new(log))
        }
        HistoryBackend::Sqlite => {
            let log = SqliteHistoryLog::connect(&config.database_url, session_id).await?;
            Ok(Arc::new(log))
        }
    }
}
