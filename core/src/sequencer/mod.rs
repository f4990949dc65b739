//! Multi-block sequencer
//!
//! A model turn may carry several script blocks. `ScriptSession` runs them
//! in order, checkpointing every transition through the `CheckpointWriter`,
//! and picks a turn back up after a crash from whatever the log says is
//! pending.
//!
//! ## Flow
//!
//! ```text
//! run_turn ──► assistant_message, tool_invoked × N
//!          └─► per block: execution_started
//!                         ├─ paused ─► execution_paused ─► tool ─► execution_tool_result ─► resume
//!                         └─ done ───► execution_completed ─► tool_completed
//! ```
//!
//! The block index is never stored: recovery derives it from the log.

pub mod lease;


use crate::engine::Limits;
use crate::history::writer::now_millis;
use crate::history::{CheckpointWriter, HistoryError, HistoryLog, HistoryRecord, ToolCall};
use crate::recovery::{
    pending_execution_resolve, pending_phase_resolve, turn_extract, PendingPhase,
    PendingPhaseKind, ScriptBlock,
};
use crate::step::{
    dispatch_tool_call_with, resume, resume_with_restart_error, start, DispatchError, Outcome,
    Snapshot, SnapshotError, TracingSink,
};
use crate::synthesize::{pending_tool_results_synthesize, CompletionReason};
use crate::tools::preamble::preamble_build;
use crate::tools::{ExecutionContext, ToolMessage, ToolRegistry, RUN_SCRIPT_TOOL};
use serde_json::{json, Value as JsonValue};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use lease::{LeaseError, LeaseRegistry, SessionLease};

/// Result text for blocks that never ran because an earlier one failed
pub const SKIPPED_MESSAGE: &str = "Skipped: an earlier script block failed.";

/* ===================== Types ===================== */

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error("session {session_id} has unfinished work; recover or abort it first")]
    PendingWork { session_id: String },
}

/// What one script block produced
#[derive(Debug, Clone, PartialEq)]
pub struct BlockResult {
    pub tool_call_id: String,
    pub output: String,
    pub printed_lines: Vec<String>,
    pub tool_call_count: u32,
    pub is_error: bool,
}

impl BlockResult {
    /// Tool result handed back to the model for this block
    pub fn message(&self) -> ToolMessage {
        if self.is_error {
            return ToolMessage::error(format!(
                "<script_result>\nScript execution failed: {}\n{}</script_result>",
                self.output,
                printed_section(&self.printed_lines)
            ));
        }

        ToolMessage::text(format!(
            "<script_result>\n{}Output:\n{}\n</script_result>",
            printed_section(&self.printed_lines),
            self.output
        ))
    }
}

fn printed_section(lines: &[String]) -> String {
    if lines.is_empty() {
        String::new()
    } else {
        format!("Print output:\n{}\n\n", lines.join("\n"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Every block ran without error
    Completed { results: Vec<BlockResult> },
    /// A block failed; later blocks were skipped
    Failed {
        results: Vec<BlockResult>,
        message: String,
    },
    /// Cancelled; the log is left paused for recovery
    Interrupted { block_index: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryReport {
    /// What the log said was pending before recovery acted on it
    pub phase: Option<PendingPhase>,
    pub outcome: Option<TurnOutcome>,
    /// Tool completions rebuilt from executions that finished before the crash
    pub backfilled: usize,
    /// Tool completions synthesized for calls left unanswered
    pub synthesized: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AbortReport {
    /// Call id of the execution closed by the abort, if one was pending
    pub closed_execution: Option<String>,
    pub synthesized: usize,
}

/* ===================== Session ===================== */

/// Script runs for one agent session
pub struct ScriptSession {
    session_id: String,
    writer: CheckpointWriter,
    registry: Arc<dyn ToolRegistry>,
    limits: Limits,
    leases: LeaseRegistry,
}

impl ScriptSession {
    pub async fn open(
        session_id: impl Into<String>,
        log: Arc<dyn HistoryLog>,
        registry: Arc<dyn ToolRegistry>,
        limits: Limits,
        leases: LeaseRegistry,
    ) -> Result<Self, SessionError> {
        let session_id = session_id.into();
        let writer = CheckpointWriter::open(log, session_id.clone()).await?;
        Ok(Self {
            session_id,
            writer,
            registry,
            limits,
            leases,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Take the session lease, waiting behind any run already in flight
    async fn lease(&self) -> SessionLease {
        match self.leases.try_acquire(&self.session_id) {
            Ok(lease) => lease,
            Err(LeaseError::Busy(_)) => {
                tracing::info!(session_id = %self.session_id, "waiting for session lease");
                self.leases.acquire(&self.session_id).await
            }
        }
    }

    pub async fn records(&self) -> Result<Vec<HistoryRecord>, SessionError> {
        Ok(self.writer.log().load_all().await?)
    }

    /// Current pending phase, recomputed from the log
    pub async fn pending_phase(&self) -> Result<Option<PendingPhase>, SessionError> {
        Ok(pending_phase_resolve(&self.records().await?))
    }

    /// Record a model turn with `codes` as its script blocks and run them
    pub async fn run_turn(
        &self,
        text: &str,
        codes: &[String],
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, SessionError> {
        let _lease = self.lease().await;

        if self.pending_phase().await?.is_some() {
            return Err(SessionError::PendingWork {
                session_id: self.session_id.clone(),
            });
        }

        self.writer.assistant_message(text).await?;
        let mut blocks = Vec::with_capacity(codes.len());
        for code in codes {
            let id = format!("call_{}", Uuid::new_v4().simple());
            self.writer
                .tool_invoked(ToolCall {
                    id: id.clone(),
                    name: RUN_SCRIPT_TOOL.to_string(),
                    arguments: json!({ "code": code }),
                })
                .await?;
            blocks.push(ScriptBlock {
                tool_call_id: id,
                code: code.clone(),
            });
        }

        tracing::info!(session_id = %self.session_id, blocks = blocks.len(), "turn started");
        self.run_from(&blocks, 0, None, cancel).await
    }

    /// Boot path: finish whatever the log says is pending, then answer any
    /// tool call still left open
    pub async fn recover(&self, cancel: &CancellationToken) -> Result<RecoveryReport, SessionError> {
        let _lease = self.lease().await;

        let mut records = self.records().await?;
        let backfilled = self.completions_backfill(&records).await?;
        if backfilled > 0 {
            records = self.records().await?;
        }
        let phase = pending_phase_resolve(&records);

        let outcome = match &phase {
            Some(phase) => {
                tracing::info!(
                    session_id = %self.session_id,
                    block_index = phase.block_index,
                    blocks = phase.blocks.len(),
                    "recovering pending phase"
                );
                Some(self.phase_continue(phase, &records, cancel).await?)
            }
            None => None,
        };

        // An interrupted recovery leaves its call open for the next boot
        if let Some(TurnOutcome::Interrupted { .. }) = outcome {
            return Ok(RecoveryReport {
                phase,
                outcome,
                backfilled,
                synthesized: 0,
            });
        }

        let synthesized = self.synthesize(CompletionReason::SessionCrashed).await?;
        Ok(RecoveryReport {
            phase,
            outcome,
            backfilled,
            synthesized,
        })
    }

    /// Close the pending execution, if any, and answer every open tool call
    pub async fn abort(&self, reason: CompletionReason) -> Result<AbortReport, SessionError> {
        let _lease = self.lease().await;
        let records = self.records().await?;

        let closed_execution = match pending_execution_resolve(&records) {
            Some(pending) => {
                let (printed, count) = pending
                    .last_snapshot
                    .as_ref()
                    .map(|p| (p.printed_so_far.clone(), p.tool_call_count))
                    .unwrap_or_default();
                self.writer
                    .execution_completed(pending.call_id(), reason.message(), &printed, count, true)
                    .await?;
                Some(pending.start.call_id)
            }
            None => None,
        };

        let synthesized = self.synthesize(reason).await?;
        tracing::info!(
            session_id = %self.session_id,
            reason = %reason,
            synthesized,
            "session aborted"
        );
        Ok(AbortReport {
            closed_execution,
            synthesized,
        })
    }

    async fn synthesize(&self, reason: CompletionReason) -> Result<usize, SessionError> {
        let records = self.records().await?;
        let synthesized = pending_tool_results_synthesize(&records, reason, now_millis());
        let count = synthesized.len();
        for record in synthesized {
            self.writer.append(record).await?;
        }
        Ok(count)
    }

    /* ===================== Recovery ===================== */

    /// Answer tool calls whose run finished before the crash with the result
    /// already in the log
    async fn completions_backfill(&self, records: &[HistoryRecord]) -> Result<usize, SessionError> {
        let invoked: HashSet<&str> = records
            .iter()
            .filter_map(|record| match record {
                HistoryRecord::ToolInvoked { tool_call_id, .. } => Some(tool_call_id.as_str()),
                _ => None,
            })
            .collect();
        let mut answered: HashSet<&str> = records
            .iter()
            .filter_map(|record| match record {
                HistoryRecord::ToolCompleted { tool_call_id, .. } => Some(tool_call_id.as_str()),
                _ => None,
            })
            .collect();

        let mut backfilled = 0;
        for record in records {
            let HistoryRecord::ExecutionCompleted(done) = record else {
                continue;
            };
            let call_id = done.call_id.as_str();
            if !invoked.contains(call_id) || !answered.insert(call_id) {
                continue;
            }

            let result = BlockResult {
                tool_call_id: done.call_id.clone(),
                output: done.output.clone(),
                printed_lines: done.printed_so_far.clone(),
                tool_call_count: done.tool_call_count,
                is_error: done.is_error,
            };
            self.writer.tool_completed(call_id, result.message()).await?;
            tracing::info!(
                session_id = %self.session_id,
                call_id = %call_id,
                is_error = done.is_error,
                "tool completion rebuilt from finished execution"
            );
            backfilled += 1;
        }
        Ok(backfilled)
    }

    async fn phase_continue(
        &self,
        phase: &PendingPhase,
        records: &[HistoryRecord],
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, SessionError> {
        let blocks = &phase.blocks;
        let index = phase.block_index;

        match &phase.kind {
            PendingPhaseKind::VmStart => {
                if let Some(message) = earlier_failure(records, &blocks[..index]) {
                    tracing::warn!(
                        session_id = %self.session_id,
                        block_index = index,
                        "earlier block failed, skipping rest of turn"
                    );
                    self.skip_rest(&blocks[index..]).await?;
                    return Ok(TurnOutcome::Failed {
                        results: vec![],
                        message,
                    });
                }
                self.run_from(blocks, index, None, cancel).await
            }
            PendingPhaseKind::ToolCall { paused, .. } => {
                let block = &blocks[index];
                let dump = match Snapshot::decode(&paused.snapshot).and_then(|s| s.dump()) {
                    Ok(dump) => dump,
                    Err(e) => {
                        let message = format!("snapshot could not be restored: {}", e);
                        return self.fail_block(blocks, index, message).await;
                    }
                };

                tracing::info!(
                    session_id = %self.session_id,
                    call_id = %block.tool_call_id,
                    tool = %paused.tool_name,
                    "resuming paused block after restart"
                );
                let mut sink = TracingSink {
                    call_id: block.tool_call_id.clone(),
                };
                let outcome = resume_with_restart_error(&dump, &mut sink);
                self.run_from(blocks, index, Some(outcome), cancel).await
            }
            PendingPhaseKind::Error { message, .. } => {
                tracing::error!(session_id = %self.session_id, block_index = index, "{}", message);
                self.fail_block(blocks, index, message.clone()).await
            }
        }
    }

    /// Fail a block that cannot run on, then skip the rest of the turn
    async fn fail_block(
        &self,
        blocks: &[ScriptBlock],
        index: usize,
        message: String,
    ) -> Result<TurnOutcome, SessionError> {
        let block = &blocks[index];
        let result = BlockResult {
            tool_call_id: block.tool_call_id.clone(),
            output: message.clone(),
            printed_lines: vec![],
            tool_call_count: 0,
            is_error: true,
        };

        self.writer
            .execution_completed(&block.tool_call_id, &message, &[], 0, true)
            .await?;
        self.writer
            .tool_completed(&block.tool_call_id, result.message())
            .await?;
        self.skip_rest(&blocks[index + 1..]).await?;

        Ok(TurnOutcome::Failed {
            results: vec![result],
            message,
        })
    }

    async fn skip_rest(&self, blocks: &[ScriptBlock]) -> Result<(), SessionError> {
        for block in blocks {
            self.writer
                .tool_completed(&block.tool_call_id, ToolMessage::error(SKIPPED_MESSAGE))
                .await?;
        }
        Ok(())
    }

    /* ===================== Execution ===================== */

    /// Run blocks from `index`; `current` is the already-running outcome of
    /// that block when picking up a resumed run
    async fn run_from(
        &self,
        blocks: &[ScriptBlock],
        mut index: usize,
        mut current: Option<Outcome>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, SessionError> {
        let mut results = Vec::new();

        while let Some(block) = blocks.get(index) {
            let outcome = match current.take() {
                Some(outcome) => outcome,
                None => {
                    if cancel.is_cancelled() {
                        return Ok(TurnOutcome::Interrupted { block_index: index });
                    }
                    self.start_block(block).await?
                }
            };

            let Some(result) = self.drive(block, outcome, cancel).await? else {
                tracing::info!(
                    session_id = %self.session_id,
                    call_id = %block.tool_call_id,
                    "turn interrupted"
                );
                return Ok(TurnOutcome::Interrupted { block_index: index });
            };

            self.writer
                .tool_completed(&block.tool_call_id, result.message())
                .await?;
            let failed = result.is_error.then(|| result.output.clone());
            results.push(result);
            index += 1;

            if let Some(message) = failed {
                self.skip_rest(&blocks[index..]).await?;
                return Ok(TurnOutcome::Failed { results, message });
            }
        }

        Ok(TurnOutcome::Completed { results })
    }

    async fn start_block(&self, block: &ScriptBlock) -> Result<Outcome, SessionError> {
        let preamble = preamble_build(&self.registry.list());
        self.writer
            .execution_started(&block.tool_call_id, &block.code, &preamble)
            .await?;

        let mut sink = TracingSink {
            call_id: block.tool_call_id.clone(),
        };
        Ok(start(
            &block.code,
            &preamble,
            &self.registry.external_names(),
            self.limits,
            &mut sink,
        ))
    }

    /// Answer tool calls until the block completes; `None` when cancelled
    async fn drive(
        &self,
        block: &ScriptBlock,
        mut outcome: Outcome,
        cancel: &CancellationToken,
    ) -> Result<Option<BlockResult>, SessionError> {
        let call_id = block.tool_call_id.as_str();
        let ctx =
            ExecutionContext::new(self.session_id.clone(), call_id).with_cancel(cancel.clone());
        let mut sink = TracingSink {
            call_id: call_id.to_string(),
        };

        loop {
            match outcome {
                Outcome::Completed {
                    output,
                    printed_lines,
                    tool_call_count,
                    is_error,
                } => {
                    self.writer
                        .execution_completed(
                            call_id,
                            &output,
                            &printed_lines,
                            tool_call_count,
                            is_error,
                        )
                        .await?;
                    return Ok(Some(BlockResult {
                        tool_call_id: call_id.to_string(),
                        output,
                        printed_lines,
                        tool_call_count,
                        is_error,
                    }));
                }
                Outcome::Paused {
                    snapshot,
                    printed_lines,
                    tool_call_count,
                    ..
                } => {
                    let writer = &self.writer;
                    let paused = (&snapshot, printed_lines.as_slice());
                    let checkpoint = move |tool_args: JsonValue| async move {
                        let (snapshot, printed_lines) = paused;
                        writer
                            .execution_paused(
                                call_id,
                                snapshot,
                                printed_lines,
                                tool_call_count,
                                tool_args,
                            )
                            .await
                            .map(|_| ())
                    };

                    let dispatched =
                        dispatch_tool_call_with(&snapshot, self.registry.as_ref(), &ctx, checkpoint)
                            .await;
                    let dispatch = match dispatched {
                        Ok(dispatch) => dispatch,
                        Err(DispatchError::Cancelled) => return Ok(None),
                        Err(DispatchError::Snapshot(e)) => return Err(e.into()),
                    };

                    self.writer.execution_tool_result(call_id, &dispatch).await?;
                    outcome = resume(&dispatch.snapshot_dump, &dispatch.resume, &mut sink);
                }
            }
        }
    }
}

/// Diagnostic of the first block in `blocks` that ended in error
fn earlier_failure(records: &[HistoryRecord], blocks: &[ScriptBlock]) -> Option<String> {
    let turn_records = turn_extract(records).records(records);
    blocks.iter().find_map(|block| {
        turn_records.iter().find_map(|record| match record {
            HistoryRecord::ExecutionCompleted(r) if r.call_id == block.tool_call_id && r.is_error => {
                Some(r.output.clone())
            }
            _ => None,
        })
    })
}
