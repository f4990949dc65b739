//! Virtual Machine state
//!
//! The VM holds all execution state:
//! - frames: Stack of active statements
//! - control: Current control flow state (return, break, throw, suspend)
//! - env: Variable bindings (one flat scope per script)
//! - replay: Results already resolved for the statement being evaluated
//!
//! Everything here is serializable so a suspended VM can be written to disk
//! and resumed in another process.

use super::errors::ErrorInfo;
use super::expressions::{Evaluator, Interrupt};
use super::types::{Control, ForPhase, Frame, FrameKind, IfPhase, Stmt, TryPhase, Val};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/* ===================== Limits ===================== */

/// Resource limits enforced while the VM runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    /// Maximum statement steps per run (reset on every start/resume)
    pub max_steps: u64,
    /// Maximum frame stack depth and expression nesting depth
    pub max_depth: usize,
    /// Maximum length of any list, object or string produced by the script
    pub max_collection_len: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_steps: 1_000_000,
            max_depth: 256,
            max_collection_len: 100_000,
        }
    }
}

/* ===================== Replay Journal ===================== */

/// Outcome of an external call, supplied by the host on resume
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Resolved {
    Value(Val),
    Error(ErrorInfo),
}

/// Per-statement journal
///
/// A statement whose expression suspends is evaluated again from the start on
/// resume. External calls already answered take their result from `results`
/// in call order, and the first `printed` print calls are not emitted again.
/// The journal is cleared whenever an evaluation finishes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Replay {
    pub results: Vec<Resolved>,
    pub printed: usize,
}

/* ===================== VM ===================== */

/// Virtual Machine state
///
/// This contains everything needed to execute (and serialize/resume) a program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VM {
    /// Stack of execution frames
    pub frames: Vec<Frame>,

    /// Current control flow state
    pub control: Control,

    /// Variable bindings
    pub env: BTreeMap<String, Val>,

    /// Names that suspend the VM when called
    pub externals: BTreeSet<String>,

    pub limits: Limits,

    pub replay: Replay,

    /// Value of the most recent top-level expression statement
    pub last_value: Val,

    /// Every line printed so far, across all runs of this VM
    pub printed: Vec<String>,

    /// External calls answered by the host that named a known tool
    pub tool_calls: u32,

    /// Steps taken in the current run
    pub steps: u64,
}

impl VM {
    /// Create a new VM with a program
    ///
    /// The program is wrapped in a root frame and execution begins on the first step.
    pub fn new(program: Stmt, externals: BTreeSet<String>, limits: Limits) -> Self {
        let mut vm = VM {
            frames: vec![],
            control: Control::None,
            env: BTreeMap::new(),
            externals,
            limits,
            replay: Replay::default(),
            last_value: Val::Null,
            printed: vec![],
            tool_calls: 0,
            steps: 0,
        };

        push_stmt(&mut vm, &program);

        vm
    }

    /// Resume a suspended VM with the outcome of its pending call
    ///
    /// Returns false if the VM was not suspended.
    pub fn resume(&mut self, resolved: Resolved) -> bool {
        if !matches!(self.control, Control::Suspend(_)) {
            return false;
        }
        self.replay.results.push(resolved);
        self.control = Control::None;
        true
    }

    /// Evaluate expressions for the current statement
    ///
    /// All expressions a statement needs must be evaluated inside one call so
    /// that the replay journal lines up with the external calls they make.
    pub(crate) fn evaluate<T>(
        &mut self,
        f: impl FnOnce(&mut Evaluator<'_>) -> Result<T, Interrupt>,
    ) -> Result<T, Interrupt> {
        let mut evaluator = Evaluator::new(&self.env, &self.externals, &self.limits, &self.replay);
        let result = f(&mut evaluator);
        let (new_lines, prints_seen) = evaluator.finish();

        self.printed.extend(new_lines);
        match &result {
            Err(Interrupt::Suspend(_)) => self.replay.printed = prints_seen,
            _ => self.replay = Replay::default(),
        }

        result
    }

    /// Record an interrupted evaluation in the control state
    pub(crate) fn interrupt(&mut self, interrupt: Interrupt) -> Step {
        match interrupt {
            Interrupt::Throw(error) => {
                self.control = Control::Throw(error);
                Step::Continue
            }
            Interrupt::Fault(error) => {
                self.control = Control::Fault(error);
                Step::Continue
            }
            Interrupt::Suspend(call) => {
                // Keep the frame: the statement re-runs on resume
                self.control = Control::Suspend(call);
                Step::Done
            }
        }
    }
}

/* ===================== Frame Management ===================== */

/// Push a new frame for a statement onto the stack
pub fn push_stmt(vm: &mut VM, stmt: &Stmt) {
    let kind = match stmt {
        Stmt::Block { .. } => FrameKind::Block { idx: 0 },
        Stmt::Declare { .. } => FrameKind::Declare,
        Stmt::Assign { .. } => FrameKind::Assign,
        Stmt::Expr { .. } => FrameKind::Expr,
        Stmt::If { .. } => FrameKind::If {
            phase: IfPhase::Eval,
        },
        Stmt::While { .. } => FrameKind::While,
        Stmt::ForLoop { .. } => FrameKind::For {
            phase: ForPhase::Init,
            items: vec![],
            idx: 0,
        },
        Stmt::Try { .. } => FrameKind::Try {
            phase: TryPhase::Start,
        },
        Stmt::Return { .. } => FrameKind::Return,
        Stmt::Break => FrameKind::Break,
        Stmt::Continue => FrameKind::Continue,
    };

    vm.frames.push(Frame {
        kind,
        node: stmt.clone(),
    });
}

/* ===================== Step Result ===================== */

/// Result of executing one step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Continue to next step
    Continue,
    /// Execution complete (or suspended)
    Done,
}
