//! Checkpoint recovery
//!
//! Pure functions over a session's history. Nothing derived here is ever
//! stored: every caller recomputes from the log it just loaded.

pub mod pending_execution;
pub mod pending_phase;


pub use pending_execution::{pending_execution_resolve, PendingExecution};
pub use pending_phase::{
    pending_phase_resolve, turn_extract, PendingPhase, PendingPhaseKind, ScriptBlock, Turn,
    NO_SNAPSHOT_MESSAGE, RESTARTED_BEFORE_TOOL_CALL,
};
