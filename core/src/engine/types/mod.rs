//! Type definitions for the engine
//!
//! - AST nodes (Stmt, Expr)
//! - Runtime values (Val)
//! - Control flow (Control, Frame, FrameKind)
//! - Execution phases for multi-step statements

pub mod ast;
pub mod control;
pub mod phase;
pub mod values;

pub use ast::{Accessor, BinaryOp, Expr, ForLoopKind, Stmt, UnaryOp};
pub use control::{Control, Frame, FrameKind, PendingCall};
pub use phase::*;
pub use values::Val;
