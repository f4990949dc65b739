//! JSON Lines history backend: one file per session, one record per line

use super::log::{HistoryError, HistoryLog};
use super::record::HistoryRecord;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

#[derive(Debug)]
pub struct JsonlHistoryLog {
    path: PathBuf,
    /// Serializes appends from this process
    write_lock: Mutex<()>,
}

impl JsonlHistoryLog {
    /// Open `<dir>/<session_id>.jsonl`, creating the directory if needed
    ///
    /// A torn final line left by a crash mid-append is repaired here so the
    /// next append starts on a fresh line.
    pub async fn open(dir: &Path, session_id: &str) -> Result<Self, HistoryError> {
        fs::create_dir_all(dir)
            .await
            .map_err(|e| HistoryError::io("creating history directory", dir, e))?;

        let log = Self {
            path: dir.join(format!("{}.jsonl", session_id)),
            write_lock: Mutex::new(()),
        };
        log.repair_tail().await?;
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_contents(&self) -> Result<String, HistoryError> {
        match fs::read_to_string(&self.path).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
            Err(e) => Err(HistoryError::io("reading history", &self.path, e)),
        }
    }

    async fn repair_tail(&self) -> Result<(), HistoryError> {
        let contents = self.read_contents().await?;
        if contents.is_empty() || contents.ends_with('\n') {
            return Ok(());
        }

        let keep = contents.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let tail = &contents[keep..];

        if serde_json::from_str::<HistoryRecord>(tail).is_ok() {
            // Complete record, only the newline was lost
            self.write_raw(b"\n").await
        } else {
            tracing::warn!(path = %self.path.display(), bytes = tail.len(), "truncating torn history line");
            let file = OpenOptions::new()
                .write(true)
                .open(&self.path)
                .await
                .map_err(|e| HistoryError::io("opening history", &self.path, e))?;
            file.set_len(keep as u64)
                .await
                .map_err(|e| HistoryError::io("truncating history", &self.path, e))?;
            file.sync_data()
                .await
                .map_err(|e| HistoryError::io("syncing history", &self.path, e))
        }
    }

    async fn write_raw(&self, bytes: &[u8]) -> Result<(), HistoryError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| HistoryError::io("opening history", &self.path, e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| HistoryError::io("appending history", &self.path, e))?;
        file.sync_data()
            .await
            .map_err(|e| HistoryError::io("syncing history", &self.path, e))
    }
}

#[async_trait]
impl HistoryLog for JsonlHistoryLog {
    async fn append(&self, record: &HistoryRecord) -> Result<(), HistoryError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        self.write_raw(&line).await
    }

    async fn load_all(&self) -> Result<Vec<HistoryRecord>, HistoryError> {
        let contents = self.read_contents().await?;
        let complete = contents.ends_with('\n');
        let lines: Vec<&str> = contents.lines().collect();
        let mut records = Vec::with_capacity(lines.len());

        for (index, line) in lines.iter().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<HistoryRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) if !complete && index + 1 == lines.len() => {
                    tracing::warn!(
                        path = %self.path.display(),
                        line = index + 1,
                        error = %e,
                        "skipping torn final history line"
                    );
                }
                Err(source) => {
                    return Err(HistoryError::Corrupt {
                        path: self.path.clone(),
                        line: index + 1,
                        source,
                    })
                }
            }
        }

        Ok(records)
    }
}
