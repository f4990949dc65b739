//! Step controller
//!
//! Wraps the script engine with three operations:
//! - `start` runs a script until it completes or calls an external function
//! - `dispatch_tool_call` answers the pending call through the tool registry
//! - `resume` continues a snapshot with that answer
//!
//! Engine faults never escape as errors: they come back as
//! `Outcome::Completed { is_error: true }` with a formatted diagnostic.

pub mod print;
pub mod snapshot;

#[cfg(test)]
mod tests;

use crate::bridge::{args_convert, result_convert, val_to_json};
use crate::engine::errors::{self, ErrorInfo};
use crate::engine::{parse_program, run_until_done, Limits, PendingCall, Resolved, RunState, Val, VM};
use crate::tools::{preamble::script_compose, ExecutionContext, ToolError, ToolRegistry};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};
use std::collections::BTreeSet;
use std::fmt::Display;
use std::future::Future;

pub use print::{NullSink, PrintSink, TracingSink};
pub use snapshot::{Snapshot, SnapshotError};

/// Message injected into a resumed snapshot whose in-flight call was lost to a restart
pub const PROCESS_RESTARTED: &str = "Process was restarted";

/* ===================== Types ===================== */

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed {
        output: String,
        printed_lines: Vec<String>,
        tool_call_count: u32,
        is_error: bool,
    },
    Paused {
        snapshot: Snapshot,
        pending_call: PendingCall,
        printed_lines: Vec<String>,
        tool_call_count: u32,
    },
}

impl Outcome {
    fn failed(diagnostic: impl Display) -> Self {
        Outcome::Completed {
            output: diagnostic.to_string(),
            printed_lines: vec![],
            tool_call_count: 0,
            is_error: true,
        }
    }
}

/// How a suspended VM continues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResumeArguments {
    ReturnValue { value: Val },
    Exception { error: ErrorInfo },
}

impl From<ResumeArguments> for Resolved {
    fn from(args: ResumeArguments) -> Self {
        match args {
            ResumeArguments::ReturnValue { value } => Resolved::Value(value),
            ResumeArguments::Exception { error } => Resolved::Error(error),
        }
    }
}

/// Result of answering a pending call
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatch {
    /// Snapshot to resume, with the tool-call count updated
    pub snapshot_dump: Vec<u8>,
    pub resume: ResumeArguments,
    pub tool_name: String,
    pub tool_args: JsonValue,
    pub tool_result: String,
    pub tool_is_error: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The cancellation token fired; the engine was not resumed
    #[error("tool dispatch cancelled")]
    Cancelled,
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/* ===================== Start ===================== */

/// Start a script
pub fn start(
    code: &str,
    preamble: &str,
    external_names: &[String],
    limits: Limits,
    sink: &mut dyn PrintSink,
) -> Outcome {
    let source = script_compose(preamble, code);
    let program = match parse_program(&source) {
        Ok(program) => program,
        Err(e) => {
            tracing::debug!(error = %e, "script failed to parse");
            return Outcome::failed(ErrorInfo::new(errors::SYNTAX_ERROR, e.to_string()));
        }
    };

    let externals: BTreeSet<String> = external_names.iter().cloned().collect();
    drive(VM::new(program, externals, limits), sink)
}

/* ===================== Resume ===================== */

/// Resume a snapshot dump with the answer to its pending call
pub fn resume(snapshot_dump: &[u8], args: &ResumeArguments, sink: &mut dyn PrintSink) -> Outcome {
    let snapshot = match Snapshot::load(snapshot_dump) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::warn!(error = %e, "snapshot could not be restored");
            return Outcome::failed(ErrorInfo::runtime(format!(
                "snapshot could not be restored: {}",
                e
            )));
        }
    };

    let mut vm = snapshot.into_vm();
    vm.resume(args.clone().into());
    drive(vm, sink)
}

/// Resume after a process restart: the call in flight is never re-invoked,
/// the script sees a `RuntimeError` instead.
pub fn resume_with_restart_error(snapshot_dump: &[u8], sink: &mut dyn PrintSink) -> Outcome {
    let args = ResumeArguments::Exception {
        error: ErrorInfo::runtime(PROCESS_RESTARTED),
    };
    resume(snapshot_dump, &args, sink)
}

/// Run until done and package the result
fn drive(mut vm: VM, sink: &mut dyn PrintSink) -> Outcome {
    let already_printed = vm.printed.len();
    run_until_done(&mut vm);

    for line in &vm.printed[already_printed..] {
        sink.append(line);
    }

    let printed_lines = vm.printed.clone();
    let tool_call_count = vm.tool_calls;

    match vm.run_state() {
        RunState::Suspended(pending_call) => match Snapshot::new(vm) {
            Ok(snapshot) => Outcome::Paused {
                snapshot,
                pending_call,
                printed_lines,
                tool_call_count,
            },
            Err(e) => Outcome::Completed {
                output: ErrorInfo::runtime(e.to_string()).to_string(),
                printed_lines,
                tool_call_count,
                is_error: true,
            },
        },
        RunState::Finished(value) => Outcome::Completed {
            output: crate::bridge::value_format(&value),
            printed_lines,
            tool_call_count,
            is_error: false,
        },
        RunState::Failed(error) => Outcome::Completed {
            output: error.to_string(),
            printed_lines,
            tool_call_count,
            is_error: true,
        },
    }
}

/* ===================== Dispatch ===================== */

/// Answer the snapshot's pending call through the registry
pub async fn dispatch_tool_call(
    snapshot: &Snapshot,
    registry: &dyn ToolRegistry,
    ctx: &ExecutionContext,
) -> Result<Dispatch, DispatchError> {
    dispatch_tool_call_with(snapshot, registry, ctx, |_| {
        std::future::ready(Ok::<(), std::convert::Infallible>(()))
    })
    .await
}

/// Like `dispatch_tool_call`, running `before_execute` first
///
/// `before_execute` is where the caller checkpoints the paused state. It
/// receives the schema-bound arguments, or the raw `{args, kwargs}` when
/// they do not bind, and is skipped for unknown tools. If it fails the tool
/// is not invoked and the script receives a tool error.
pub async fn dispatch_tool_call_with<H, F, E>(
    snapshot: &Snapshot,
    registry: &dyn ToolRegistry,
    ctx: &ExecutionContext,
    before_execute: H,
) -> Result<Dispatch, DispatchError>
where
    H: FnOnce(JsonValue) -> F,
    F: Future<Output = Result<(), E>>,
    E: Display,
{
    let mut snapshot = snapshot.clone();
    let call = snapshot.pending_call().clone();
    let name = call.function_name.clone();

    let Some(schema) = registry.lookup(&name) else {
        tracing::warn!(call_id = %ctx.call_id, tool = %name, "script called an unknown tool");
        let message = format!("Unknown tool: {}", name);
        return tool_failure(&snapshot, name, JsonValue::Null, message);
    };

    let bound = args_convert(&call.args, &call.kwargs, &schema);
    let checkpoint_args = match &bound {
        Ok(args) => args.clone(),
        Err(_) => raw_args_json(&call),
    };

    if let Err(e) = before_execute(checkpoint_args).await {
        tracing::warn!(
            call_id = %ctx.call_id,
            tool = %name,
            error = %e,
            "checkpoint before tool call failed"
        );
        return tool_failure(&snapshot, name, JsonValue::Null, e.to_string());
    }

    snapshot.tool_call_count_increment();

    let args = match bound {
        Ok(args) => args,
        Err(e) => return tool_failure(&snapshot, name, JsonValue::Null, e.to_string()),
    };

    if ctx.cancel.is_cancelled() {
        return Err(DispatchError::Cancelled);
    }

    tracing::debug!(call_id = %ctx.call_id, tool = %name, "invoking tool");
    let result = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(DispatchError::Cancelled),
        result = registry.invoke(&name, args.clone(), ctx) => result,
    };

    match result {
        Ok(result) if result.message.is_error => {
            let text = result.message.joined_text();
            let message = if text.trim().is_empty() {
                format!("Tool execution failed: {}", name)
            } else {
                text
            };
            tool_failure(&snapshot, name, args, message)
        }
        Ok(result) => Ok(Dispatch {
            snapshot_dump: snapshot.dump()?,
            resume: ResumeArguments::ReturnValue {
                value: result_convert(&result),
            },
            tool_name: name,
            tool_args: args,
            tool_result: result.message.joined_text(),
            tool_is_error: false,
        }),
        Err(ToolError::Aborted) => Err(DispatchError::Cancelled),
        Err(e) => tool_failure(&snapshot, name, args, e.to_string()),
    }
}

/// Resume directive that raises a catchable `ToolError` in the script
fn tool_failure(
    snapshot: &Snapshot,
    tool_name: String,
    tool_args: JsonValue,
    message: String,
) -> Result<Dispatch, DispatchError> {
    Ok(Dispatch {
        snapshot_dump: snapshot.dump()?,
        resume: ResumeArguments::Exception {
            error: ErrorInfo::new(errors::TOOL_ERROR, message.clone()),
        },
        tool_name,
        tool_args,
        tool_result: message,
        tool_is_error: true,
    })
}

/// Call arguments as the script passed them, before schema binding
fn raw_args_json(call: &PendingCall) -> JsonValue {
    let kwargs: Map<String, JsonValue> = call
        .kwargs
        .iter()
        .map(|(name, value)| (name.clone(), val_to_json(value)))
        .collect();
    json!({
        "args": call.args.iter().map(val_to_json).collect::<Vec<_>>(),
        "kwargs": kwargs,
    })
}
