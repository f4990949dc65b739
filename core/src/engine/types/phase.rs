//! Progress markers for statements that take more than one step

use serde::{Deserialize, Serialize};

/// Execution phase for If statements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IfPhase {
    /// Evaluate the test and push the chosen branch
    Eval,
    /// Branch finished; pop
    Done,
}

/// Execution phase for For loops
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForPhase {
    /// Evaluate the iterable once
    Init,
    /// Bind the next item and push the body
    Iterate,
}

/// Execution phase for Try statements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TryPhase {
    /// Push the try block
    Start,
    /// Executing the try block (errors are caught here)
    Body,
    /// Executing the catch block (error was caught)
    Catch,
}
