//! Turn-level view of what a session still owes the model
//!
//! A turn starts at the latest `assistant_message`; its script blocks are
//! the `run_script` tool calls recorded after it, in order. Recovery needs
//! to know which block to start, which to resume from a snapshot, and which
//! cannot be resumed at all.

use super::pending_execution::{pending_execution_resolve, PendingExecution};
use crate::history::{ExecutionPaused, ExecutionStarted, HistoryRecord};
use crate::tools::RUN_SCRIPT_TOOL;
use serde::Serialize;
use std::collections::HashSet;

/// Diagnostic for a run that crashed before it could checkpoint a pause
pub const RESTARTED_BEFORE_TOOL_CALL: &str =
    "Process was restarted before any tool call; the execution cannot be resumed.";

/// Diagnostic for a pause recorded without a usable snapshot
pub const NO_SNAPSHOT_MESSAGE: &str =
    "Process was restarted before any tool call was checkpointed: no snapshot was captured, the execution cannot be resumed.";

/* ===================== Types ===================== */

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScriptBlock {
    pub tool_call_id: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PendingPhaseKind {
    /// The block was requested but never started
    VmStart,
    /// The block is paused on a tool call with a resumable snapshot
    ToolCall {
        start: ExecutionStarted,
        paused: ExecutionPaused,
    },
    /// The block started but left nothing to resume from
    Error {
        start: ExecutionStarted,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingPhase {
    #[serde(flatten)]
    pub kind: PendingPhaseKind,
    pub blocks: Vec<ScriptBlock>,
    pub block_index: usize,
    pub assistant_at: Option<i64>,
    pub response_text: String,
}

impl PendingPhase {
    pub fn block(&self) -> Option<&ScriptBlock> {
        self.blocks.get(self.block_index)
    }
}

/// The latest model turn found in a log
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    /// Position of the first record belonging to the turn
    pub first_record: usize,
    pub assistant_at: Option<i64>,
    pub response_text: String,
    pub blocks: Vec<ScriptBlock>,
}

impl Turn {
    /// Records appended since the turn began
    pub fn records<'a>(&self, records: &'a [HistoryRecord]) -> &'a [HistoryRecord] {
        &records[self.first_record.min(records.len())..]
    }
}

/* ===================== Resolution ===================== */

/// Locate the latest turn and its script blocks
///
/// With no assistant message in the log the whole log is one turn.
pub fn turn_extract(records: &[HistoryRecord]) -> Turn {
    let assistant = records
        .iter()
        .enumerate()
        .rev()
        .find_map(|(index, record)| match record {
            HistoryRecord::AssistantMessage { at, text } => Some((index, *at, text.clone())),
            _ => None,
        });

    let (first_record, assistant_at, response_text) = match assistant {
        Some((index, at, text)) => (index, Some(at), text),
        None => (0, None, String::new()),
    };

    let blocks = records[first_record..]
        .iter()
        .filter_map(|record| match record {
            HistoryRecord::ToolInvoked { tool_call_id, call, .. } if call.name == RUN_SCRIPT_TOOL => {
                Some(ScriptBlock {
                    tool_call_id: tool_call_id.clone(),
                    code: call
                        .arguments
                        .get("code")
                        .and_then(|code| code.as_str())
                        .unwrap_or_default()
                        .to_string(),
                })
            }
            _ => None,
        })
        .collect();

    Turn {
        first_record,
        assistant_at,
        response_text,
        blocks,
    }
}

/// Work left over in the latest turn, or `None` when nothing is pending
pub fn pending_phase_resolve(records: &[HistoryRecord]) -> Option<PendingPhase> {
    let turn = turn_extract(records);

    let mut finished: HashSet<&str> = HashSet::new();
    let mut started: HashSet<&str> = HashSet::new();
    for record in records {
        match record {
            HistoryRecord::ExecutionCompleted(r) => {
                finished.insert(r.call_id.as_str());
            }
            HistoryRecord::ToolCompleted { tool_call_id, .. } => {
                finished.insert(tool_call_id.as_str());
            }
            HistoryRecord::ExecutionStarted(r) => {
                started.insert(r.call_id.as_str());
            }
            _ => {}
        }
    }

    // A run whose tool call was already answered (e.g. by an abort) is closed
    let pending =
        pending_execution_resolve(records).filter(|p| !has_tool_completed_for(records, p.call_id()));

    if let Some(pending) = pending {
        return Some(phase_for_execution(turn, pending));
    }

    let block_index = turn.blocks.iter().position(|block| {
        let id = block.tool_call_id.as_str();
        !finished.contains(id) && !started.contains(id)
    })?;

    Some(PendingPhase {
        kind: PendingPhaseKind::VmStart,
        blocks: turn.blocks,
        block_index,
        assistant_at: turn.assistant_at,
        response_text: turn.response_text,
    })
}

fn has_tool_completed_for(records: &[HistoryRecord], call_id: &str) -> bool {
    records.iter().any(|record| {
        matches!(record, HistoryRecord::ToolCompleted { tool_call_id, .. } if tool_call_id == call_id)
    })
}

fn phase_for_execution(turn: Turn, pending: PendingExecution) -> PendingPhase {
    let position = turn
        .blocks
        .iter()
        .position(|block| block.tool_call_id == pending.start.call_id);

    // A run outside the latest turn is still recovered, as a turn of its own
    let (blocks, block_index) = match position {
        Some(index) => (turn.blocks, index),
        None => (
            vec![ScriptBlock {
                tool_call_id: pending.start.call_id.clone(),
                code: pending.start.code.clone(),
            }],
            0,
        ),
    };

    let PendingExecution {
        start,
        last_snapshot,
    } = pending;

    let kind = match last_snapshot {
        None => PendingPhaseKind::Error {
            start,
            message: RESTARTED_BEFORE_TOOL_CALL.to_string(),
        },
        Some(paused) if paused.snapshot.is_empty() => PendingPhaseKind::Error {
            start,
            message: NO_SNAPSHOT_MESSAGE.to_string(),
        },
        Some(paused) => PendingPhaseKind::ToolCall { start, paused },
    };

    PendingPhase {
        kind,
        blocks,
        block_index,
        assistant_at: turn.assistant_at,
        response_text: turn.response_text,
    }
}
