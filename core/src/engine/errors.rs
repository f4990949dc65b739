//! Error values raised inside scripts
//!
//! Errors are ordinary values (`Val::Error`) so they can be caught, stored in
//! variables and serialized as part of a suspended VM.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const RUNTIME_ERROR: &str = "RuntimeError";
pub const TYPE_ERROR: &str = "TypeError";
pub const NAME_ERROR: &str = "NameError";
pub const INDEX_ERROR: &str = "IndexError";
pub const VALUE_ERROR: &str = "ValueError";
pub const ZERO_DIVISION_ERROR: &str = "ZeroDivisionError";
pub const TOOL_ERROR: &str = "ToolError";
pub const SYNTAX_ERROR: &str = "SyntaxError";
/// Resource limit violations. These cannot be caught by `try`.
pub const LIMIT_EXCEEDED: &str = "LimitExceeded";

/// Error code plus human readable message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(RUNTIME_ERROR, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(TYPE_ERROR, message)
    }

    pub fn limit(message: impl Into<String>) -> Self {
        Self::new(LIMIT_EXCEEDED, message)
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}
