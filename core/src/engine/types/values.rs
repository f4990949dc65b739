//! Runtime values

use crate::engine::errors::ErrorInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Runtime value
///
/// Objects use a BTreeMap so that key order (and therefore printed output and
/// snapshots) is deterministic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Val {
    Null,
    Bool(bool),
    Int(i64),
    Num(f64),
    Str(String),
    List(Vec<Val>),
    Obj(BTreeMap<String, Val>),
    Error(ErrorInfo),
}

impl Val {
    /// Truthiness follows the usual scripting rules: null, false, zero and
    /// empty containers are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Val::Null => false,
            Val::Bool(b) => *b,
            Val::Int(n) => *n != 0,
            Val::Num(n) => *n != 0.0 && !n.is_nan(),
            Val::Str(s) => !s.is_empty(),
            Val::List(items) => !items.is_empty(),
            Val::Obj(map) => !map.is_empty(),
            Val::Error(_) => true,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Val::Null => "null",
            Val::Bool(_) => "bool",
            Val::Int(_) => "int",
            Val::Num(_) => "float",
            Val::Str(_) => "str",
            Val::List(_) => "list",
            Val::Obj(_) => "object",
            Val::Error(_) => "error",
        }
    }

    /// Numeric view used by arithmetic and comparisons
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Val::Int(n) => Some(*n as f64),
            Val::Num(n) => Some(*n),
            _ => None,
        }
    }

    /// Structural equality where ints and floats compare numerically
    pub fn loose_eq(&self, other: &Val) -> bool {
        match (self, other) {
            (Val::Int(a), Val::Num(b)) | (Val::Num(b), Val::Int(a)) => (*a as f64) == *b,
            (Val::List(a), Val::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.loose_eq(y))
            }
            (Val::Obj(a), Val::Obj(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b)
                        .all(|((ka, va), (kb, vb))| ka == kb && va.loose_eq(vb))
            }
            _ => self == other,
        }
    }
}

impl From<ErrorInfo> for Val {
    fn from(error: ErrorInfo) -> Self {
        Val::Error(error)
    }
}
