//! Most recent run that started but never completed

use crate::history::{ExecutionPaused, ExecutionStarted, HistoryRecord};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingExecution {
    pub start: ExecutionStarted,
    /// Latest pause for the run; `None` when it never reached a tool call
    pub last_snapshot: Option<ExecutionPaused>,
}

impl PendingExecution {
    pub fn call_id(&self) -> &str {
        &self.start.call_id
    }
}

/// Find the pending execution in `records`, if any
///
/// Scans backward: a start is closed by any completion for its call id that
/// comes later in the log. The latest unclosed start wins.
pub fn pending_execution_resolve(records: &[HistoryRecord]) -> Option<PendingExecution> {
    let mut completed: HashSet<&str> = HashSet::new();
    let mut found = None;

    for (index, record) in records.iter().enumerate().rev() {
        match record {
            HistoryRecord::ExecutionCompleted(r) => {
                completed.insert(r.call_id.as_str());
            }
            HistoryRecord::ExecutionStarted(r) if !completed.contains(r.call_id.as_str()) => {
                found = Some((index, r));
                break;
            }
            _ => {}
        }
    }

    let (start_index, start) = found?;
    let last_snapshot = records[start_index + 1..]
        .iter()
        .rev()
        .find_map(|record| match record {
            HistoryRecord::ExecutionPaused(p) if p.call_id == start.call_id => Some(p.clone()),
            _ => None,
        });

    Some(PendingExecution {
        start: start.clone(),
        last_snapshot,
    })
}
