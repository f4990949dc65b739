//! Pending control transfers and the frame stack

use super::ast::Stmt;
use super::phase::{ForPhase, IfPhase, TryPhase};
use super::values::Val;
use crate::engine::errors::ErrorInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/* ===================== Control Flow ===================== */

/// What the VM does next instead of running the top frame
///
/// Anything but `None` makes `step` unwind frames until a loop, a `try` or the
/// bottom of the stack handles it. `Suspend` leaves the stack intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Control {
    None,
    Break,
    Continue,
    Return(Val),
    /// Catchable script error
    Throw(Val),
    /// Uncatchable failure (resource limits). Unwinds the whole stack.
    Fault(ErrorInfo),
    /// Stopped at a call to an external function
    Suspend(PendingCall),
}

/// A call to an external function the host must resolve before the VM can continue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingCall {
    pub function_name: String,
    pub args: Vec<Val>,
    pub kwargs: BTreeMap<String, Val>,
}

/* ===================== Frames ===================== */

/// Statement kind plus its progress so far
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum FrameKind {
    Block { idx: usize },
    Declare,
    Assign,
    Expr,
    If { phase: IfPhase },
    While,
    For {
        phase: ForPhase,
        items: Vec<Val>,
        idx: usize,
    },
    Try { phase: TryPhase },
    Return,
    Break,
    Continue,
}

/// One active statement
///
/// Nothing lives on the Rust call stack between steps, so a VM parked on
/// an external call is plain data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(flatten)]
    pub kind: FrameKind,
    pub node: Stmt,
}
