//! Per-session append-only history log
//!
//! Every phase transition of a script run is one `HistoryRecord`. Recovery
//! reads the whole log back and derives state from it; nothing else about a
//! run is persisted.

pub mod jsonl;
pub mod log;
pub mod record;
pub mod sqlite;
pub mod writer;

#[cfg(test)]
mod tests;

pub use jsonl::JsonlHistoryLog;
pub use log::{open_log, HistoryError, HistoryLog, MemoryHistoryLog};
pub use record::{
    ExecutionCompleted, ExecutionPaused, ExecutionStarted, ExecutionToolResult, HistoryRecord,
    ToolCall,
};
pub use sqlite::SqliteHistoryLog;
pub use writer::CheckpointWriter;
