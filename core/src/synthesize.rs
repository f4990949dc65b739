//! Crash completion synthesizer
//!
//! Every `tool_invoked` must be answered by a `tool_completed` before the
//! model sees the conversation again. After a crash or an abort, the
//! unanswered calls get a synthesized error result.

use crate::history::HistoryRecord;
use crate::tools::ToolMessage;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    SessionCrashed,
    UserAborted,
}

impl CompletionReason {
    pub fn message(&self) -> &'static str {
        match self {
            CompletionReason::SessionCrashed => "Session crashed before tool completion.",
            CompletionReason::UserAborted => "User aborted before tool completion.",
        }
    }
}

impl fmt::Display for CompletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompletionReason::SessionCrashed => write!(f, "session_crashed"),
            CompletionReason::UserAborted => write!(f, "user_aborted"),
        }
    }
}

/// One failed `tool_completed` per tool call that has none, in call order
///
/// Running it again over `records` plus its own output yields nothing.
pub fn pending_tool_results_synthesize(
    records: &[HistoryRecord],
    reason: CompletionReason,
    at: i64,
) -> Vec<HistoryRecord> {
    let mut answered: HashSet<&str> = records
        .iter()
        .filter_map(|record| match record {
            HistoryRecord::ToolCompleted { tool_call_id, .. } => Some(tool_call_id.as_str()),
            _ => None,
        })
        .collect();

    let mut synthesized = Vec::new();
    for record in records {
        let HistoryRecord::ToolInvoked { tool_call_id, .. } = record else {
            continue;
        };
        if !answered.insert(tool_call_id.as_str()) {
            continue;
        }

        tracing::info!(call_id = %tool_call_id, reason = %reason, "synthesizing tool completion");
        synthesized.push(HistoryRecord::ToolCompleted {
            at,
            tool_call_id: tool_call_id.clone(),
            result: ToolMessage::error(reason.message()),
        });
    }

    synthesized
}
