//! Checkpoint writer
//!
//! Appends exactly one record per phase transition and waits for the log to
//! accept it before returning, so a caller never moves past a transition the
//! log does not know about. Timestamps are clamped to be non-decreasing.

use super::log::{HistoryError, HistoryLog};
use super::record::{
    ExecutionCompleted, ExecutionPaused, ExecutionStarted, ExecutionToolResult, HistoryRecord,
    ToolCall,
};
use crate::step::{Dispatch, Snapshot};
use crate::tools::ToolMessage;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct CheckpointWriter {
    log: Arc<dyn HistoryLog>,
    session_id: String,
    /// Timestamp of the last appended record; held while appending
    last_at: Mutex<i64>,
}

impl CheckpointWriter {
    pub fn new(log: Arc<dyn HistoryLog>, session_id: impl Into<String>) -> Self {
        Self {
            log,
            session_id: session_id.into(),
            last_at: Mutex::new(i64::MIN),
        }
    }

    /// Writer that continues after the records already in `log`
    pub async fn open(
        log: Arc<dyn HistoryLog>,
        session_id: impl Into<String>,
    ) -> Result<Self, HistoryError> {
        let last = log
            .load_all()
            .await?
            .iter()
            .map(HistoryRecord::at)
            .max()
            .unwrap_or(i64::MIN);

        let writer = Self::new(log, session_id);
        *writer.last_at.lock().await = last;
        Ok(writer)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn log(&self) -> &Arc<dyn HistoryLog> {
        &self.log
    }

    /// Append one record, stamping it no earlier than the previous one
    pub async fn append(&self, mut record: HistoryRecord) -> Result<HistoryRecord, HistoryError> {
        let mut last_at = self.last_at.lock().await;
        let at = record.at().max(*last_at);
        record.set_at(at);

        self.log.append(&record).await?;
        *last_at = at;

        tracing::trace!(session_id = %self.session_id, kind = record.kind(), at, "history record appended");
        Ok(record)
    }

    /* ===================== Turn Records ===================== */

    pub async fn assistant_message(&self, text: &str) -> Result<HistoryRecord, HistoryError> {
        self.append(HistoryRecord::AssistantMessage {
            at: now_millis(),
            text: text.to_string(),
        })
        .await
    }

    pub async fn tool_invoked(&self, call: ToolCall) -> Result<HistoryRecord, HistoryError> {
        self.append(HistoryRecord::ToolInvoked {
            at: now_millis(),
            tool_call_id: call.id.clone(),
            call,
        })
        .await
    }

    pub async fn tool_completed(
        &self,
        tool_call_id: &str,
        result: ToolMessage,
    ) -> Result<HistoryRecord, HistoryError> {
        tracing::debug!(session_id = %self.session_id, call_id = %tool_call_id, is_error = result.is_error, "tool call completed");
        self.append(HistoryRecord::ToolCompleted {
            at: now_millis(),
            tool_call_id: tool_call_id.to_string(),
            result,
        })
        .await
    }

    /* ===================== Execution Records ===================== */

    pub async fn execution_started(
        &self,
        call_id: &str,
        code: &str,
        preamble: &str,
    ) -> Result<HistoryRecord, HistoryError> {
        tracing::info!(session_id = %self.session_id, call_id = %call_id, "execution started");
        self.append(HistoryRecord::ExecutionStarted(ExecutionStarted {
            at: now_millis(),
            call_id: call_id.to_string(),
            code: code.to_string(),
            preamble: preamble.to_string(),
        }))
        .await
    }

    /// Record a pause; a snapshot that cannot be encoded is stored empty,
    /// which recovery treats as unresumable
    pub async fn execution_paused(
        &self,
        call_id: &str,
        snapshot: &Snapshot,
        printed_so_far: &[String],
        tool_call_count: u32,
        tool_args: JsonValue,
    ) -> Result<HistoryRecord, HistoryError> {
        let encoded = snapshot.encode().unwrap_or_else(|e| {
            tracing::error!(session_id = %self.session_id, call_id = %call_id, error = %e, "snapshot could not be encoded");
            String::new()
        });
        let tool_name = snapshot.pending_call().function_name.clone();

        tracing::info!(session_id = %self.session_id, call_id = %call_id, tool = %tool_name, "execution paused");
        self.append(HistoryRecord::ExecutionPaused(ExecutionPaused {
            at: now_millis(),
            call_id: call_id.to_string(),
            snapshot: encoded,
            printed_so_far: printed_so_far.to_vec(),
            tool_call_count,
            tool_name,
            tool_args,
        }))
        .await
    }

    pub async fn execution_tool_result(
        &self,
        call_id: &str,
        dispatch: &Dispatch,
    ) -> Result<HistoryRecord, HistoryError> {
        tracing::debug!(
            session_id = %self.session_id,
            call_id = %call_id,
            tool = %dispatch.tool_name,
            is_error = dispatch.tool_is_error,
            "tool result received"
        );
        self.append(HistoryRecord::ExecutionToolResult(ExecutionToolResult {
            at: now_millis(),
            call_id: call_id.to_string(),
            tool_name: dispatch.tool_name.clone(),
            tool_result: dispatch.tool_result.clone(),
            tool_is_error: dispatch.tool_is_error,
        }))
        .await
    }

    pub async fn execution_completed(
        &self,
        call_id: &str,
        output: &str,
        printed_so_far: &[String],
        tool_call_count: u32,
        is_error: bool,
    ) -> Result<HistoryRecord, HistoryError> {
        tracing::info!(session_id = %self.session_id, call_id = %call_id, is_error, tool_call_count, "execution completed");
        self.append(HistoryRecord::ExecutionCompleted(ExecutionCompleted {
            at: now_millis(),
            call_id: call_id.to_string(),
            output: output.to_string(),
            printed_so_far: printed_so_far.to_vec(),
            tool_call_count,
            is_error,
        }))
        .await
    }
}

/// Wall clock in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
