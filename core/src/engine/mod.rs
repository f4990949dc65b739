//! # Script Engine - Resumable Stack-Driven Interpreter
//!
//! ## Core Principles
//!
//! 1. **Stack-driven execution**: All state in `frames: Vec<Frame>`, no recursion between statements
//! 2. **Statement-level suspension**: A statement that hits an external call is re-evaluated on
//!    resume, with answered calls served from its replay journal
//! 3. **Centralized control flow**: `Control` enum manages break/continue/return/throw/suspend
//! 4. **Pure executor**: No I/O, no async - just runs until suspend or complete
//!
//! ## Usage
//! ```ignore
//! let program = parse_program(source)?;
//! let mut vm = VM::new(program, externals, Limits::default());
//! run_until_done(&mut vm);
//! if let Control::Suspend(call) = &vm.control {
//!     // resolve `call`, then
//!     vm.resume(Resolved::Value(result));
//!     run_until_done(&mut vm);
//! }
//! ```

pub mod errors;
pub mod exec_loop;
pub mod expressions;
pub mod parser;
pub mod statements;
pub mod stdlib;
pub mod types;
pub mod vm;

#[cfg(test)]
mod tests;

pub use errors::ErrorInfo;
pub use exec_loop::{run_until_done, step};
pub use parser::{parse_program, ParseError};
pub use types::{Control, Expr, PendingCall, Stmt, Val};
pub use vm::{Limits, Resolved, Step, VM};

/// Final state of a VM after `run_until_done`
#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    /// Stopped at an external call
    Suspended(PendingCall),
    /// Finished; the value is the return value or the last top-level expression
    Finished(Val),
    /// An error escaped the script
    Failed(ErrorInfo),
}

impl VM {
    pub fn run_state(&self) -> RunState {
        match &self.control {
            Control::Suspend(call) => RunState::Suspended(call.clone()),
            Control::Return(v) => RunState::Finished(v.clone()),
            Control::None => RunState::Finished(self.last_value.clone()),
            Control::Fault(error) => RunState::Failed(error.clone()),
            Control::Throw(Val::Error(error)) => RunState::Failed(error.clone()),
            Control::Throw(other) => RunState::Failed(ErrorInfo::runtime(
                crate::bridge::value_format(other),
            )),
            // unwind() turns stray break/continue into a thrown error
            Control::Break | Control::Continue => {
                RunState::Failed(ErrorInfo::runtime("loop control outside loop"))
            }
        }
    }
}
