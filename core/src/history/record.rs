//! History record shapes
//!
//! One record per phase transition, appended in non-decreasing `at` order
//! (epoch milliseconds). Records are never rewritten.

use crate::tools::ToolMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStarted {
    pub at: i64,
    pub call_id: String,
    pub code: String,
    pub preamble: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPaused {
    pub at: i64,
    pub call_id: String,
    /// Base64 snapshot dump. Empty when no snapshot could be captured.
    pub snapshot: String,
    pub printed_so_far: Vec<String>,
    pub tool_call_count: u32,
    pub tool_name: String,
    pub tool_args: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionToolResult {
    pub at: i64,
    pub call_id: String,
    pub tool_name: String,
    pub tool_result: String,
    pub tool_is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionCompleted {
    pub at: i64,
    pub call_id: String,
    pub output: String,
    pub printed_so_far: Vec<String>,
    pub tool_call_count: u32,
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryRecord {
    /// Start of a model turn
    AssistantMessage { at: i64, text: String },
    ToolInvoked {
        at: i64,
        tool_call_id: String,
        call: ToolCall,
    },
    ToolCompleted {
        at: i64,
        tool_call_id: String,
        result: ToolMessage,
    },
    ExecutionStarted(ExecutionStarted),
    ExecutionPaused(ExecutionPaused),
    ExecutionToolResult(ExecutionToolResult),
    ExecutionCompleted(ExecutionCompleted),
}

impl HistoryRecord {
    pub fn at(&self) -> i64 {
        match self {
            HistoryRecord::AssistantMessage { at, .. }
            | HistoryRecord::ToolInvoked { at, .. }
            | HistoryRecord::ToolCompleted { at, .. } => *at,
            HistoryRecord::ExecutionStarted(r) => r.at,
            HistoryRecord::ExecutionPaused(r) => r.at,
            HistoryRecord::ExecutionToolResult(r) => r.at,
            HistoryRecord::ExecutionCompleted(r) => r.at,
        }
    }

    pub(crate) fn set_at(&mut self, value: i64) {
        match self {
            HistoryRecord::AssistantMessage { at, .. }
            | HistoryRecord::ToolInvoked { at, .. }
            | HistoryRecord::ToolCompleted { at, .. } => *at = value,
            HistoryRecord::ExecutionStarted(r) => r.at = value,
            HistoryRecord::ExecutionPaused(r) => r.at = value,
            HistoryRecord::ExecutionToolResult(r) => r.at = value,
            HistoryRecord::ExecutionCompleted(r) => r.at = value,
        }
    }

    /// The serialized `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            HistoryRecord::AssistantMessage { .. } => "assistant_message",
            HistoryRecord::ToolInvoked { .. } => "tool_invoked",
            HistoryRecord::ToolCompleted { .. } => "tool_completed",
            HistoryRecord::ExecutionStarted(_) => "execution_started",
            HistoryRecord::ExecutionPaused(_) => "execution_paused",
            HistoryRecord::ExecutionToolResult(_) => "execution_tool_result",
            HistoryRecord::ExecutionCompleted(_) => "execution_completed",
        }
    }
}
