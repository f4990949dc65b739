pub mod bridge;
pub mod cli;
pub mod config;
pub mod engine;
pub mod history;
pub mod recovery;
pub mod sequencer;
pub mod step;
pub mod synthesize;
pub mod tools;

#[cfg(test)]
pub mod test_helpers;

// Re-export main types
pub use config::Config;
pub use engine::{ErrorInfo, Limits, PendingCall, Val};
pub use history::{CheckpointWriter, HistoryLog, HistoryRecord};
pub use recovery::{pending_execution_resolve, pending_phase_resolve, PendingExecution, PendingPhase};
pub use sequencer::{ScriptSession, TurnOutcome};
pub use step::{dispatch_tool_call, resume, start, Outcome, ResumeArguments};
pub use synthesize::{pending_tool_results_synthesize, CompletionReason};
pub use tools::{ToolRegistry, ToolSet};
