//! Built-in functions available to every script
//!
//! `print` is handled by the evaluator itself since it writes to the VM's
//! output; everything here is a pure function of its arguments.

use super::errors::{self, ErrorInfo};
use super::types::Val;
use super::vm::Limits;
use crate::bridge::{json_to_val, val_to_json, value_format};
use std::collections::BTreeMap;

/* ===================== Built-in Identifiers ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Len,
    Str,
    Int,
    Float,
    Bool,
    Type,
    Keys,
    Values,
    Range,
    Abs,
    Min,
    Max,
    JsonParse,
    JsonStringify,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Self> {
        let builtin = match name {
            "len" => Builtin::Len,
            "str" => Builtin::Str,
            "int" => Builtin::Int,
            "float" => Builtin::Float,
            "bool" => Builtin::Bool,
            "type" => Builtin::Type,
            "keys" => Builtin::Keys,
            "values" => Builtin::Values,
            "range" => Builtin::Range,
            "abs" => Builtin::Abs,
            "min" => Builtin::Min,
            "max" => Builtin::Max,
            "json_parse" => Builtin::JsonParse,
            "json_stringify" => Builtin::JsonStringify,
            _ => return None,
        };
        Some(builtin)
    }

    fn name(self) -> &'static str {
        match self {
            Builtin::Len => "len",
            Builtin::Str => "str",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Bool => "bool",
            Builtin::Type => "type",
            Builtin::Keys => "keys",
            Builtin::Values => "values",
            Builtin::Range => "range",
            Builtin::Abs => "abs",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::JsonParse => "json_parse",
            Builtin::JsonStringify => "json_stringify",
        }
    }
}

/* ===================== Dispatcher ===================== */

/// Call a built-in by name. Returns None when no built-in has that name.
pub fn call_builtin(
    name: &str,
    args: &[Val],
    kwargs: &BTreeMap<String, Val>,
    limits: &Limits,
) -> Option<Result<Val, ErrorInfo>> {
    let builtin = Builtin::from_name(name)?;
    Some(call(builtin, args, kwargs, limits))
}

fn call(
    builtin: Builtin,
    args: &[Val],
    kwargs: &BTreeMap<String, Val>,
    limits: &Limits,
) -> Result<Val, ErrorInfo> {
    match builtin {
        Builtin::Len => match one(builtin, args)? {
            Val::Str(s) => Ok(Val::Int(s.chars().count() as i64)),
            Val::List(items) => Ok(Val::Int(items.len() as i64)),
            Val::Obj(map) => Ok(Val::Int(map.len() as i64)),
            other => Err(ErrorInfo::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            ))),
        },
        Builtin::Str => Ok(Val::Str(value_format(one(builtin, args)?))),
        Builtin::Int => match one(builtin, args)? {
            Val::Int(n) => Ok(Val::Int(*n)),
            Val::Bool(b) => Ok(Val::Int(*b as i64)),
            Val::Num(n) if n.is_finite() => Ok(Val::Int(n.trunc() as i64)),
            Val::Str(s) => s.trim().parse::<i64>().map(Val::Int).map_err(|_| {
                ErrorInfo::new(
                    errors::VALUE_ERROR,
                    format!("invalid literal for int(): '{}'", s),
                )
            }),
            other => Err(ErrorInfo::type_error(format!(
                "int() argument must be a string or a number, not '{}'",
                other.type_name()
            ))),
        },
        Builtin::Float => match one(builtin, args)? {
            Val::Int(n) => Ok(Val::Num(*n as f64)),
            Val::Num(n) => Ok(Val::Num(*n)),
            Val::Bool(b) => Ok(Val::Num(if *b { 1.0 } else { 0.0 })),
            Val::Str(s) => s.trim().parse::<f64>().map(Val::Num).map_err(|_| {
                ErrorInfo::new(
                    errors::VALUE_ERROR,
                    format!("could not convert string to float: '{}'", s),
                )
            }),
            other => Err(ErrorInfo::type_error(format!(
                "float() argument must be a string or a number, not '{}'",
                other.type_name()
            ))),
        },
        Builtin::Bool => Ok(Val::Bool(one(builtin, args)?.is_truthy())),
        Builtin::Type => Ok(Val::Str(one(builtin, args)?.type_name().to_string())),
        Builtin::Keys => match one(builtin, args)? {
            Val::Obj(map) => Ok(Val::List(map.keys().cloned().map(Val::Str).collect())),
            other => Err(expected(builtin, "object", other)),
        },
        Builtin::Values => match one(builtin, args)? {
            Val::Obj(map) => Ok(Val::List(map.values().cloned().collect())),
            other => Err(expected(builtin, "object", other)),
        },
        Builtin::Range => range(args, limits),
        Builtin::Abs => match one(builtin, args)? {
            Val::Int(n) => Ok(n
                .checked_abs()
                .map(Val::Int)
                .unwrap_or(Val::Num((*n as f64).abs()))),
            Val::Num(n) => Ok(Val::Num(n.abs())),
            other => Err(expected(builtin, "number", other)),
        },
        Builtin::Min | Builtin::Max => extremum(builtin, args),
        Builtin::JsonParse => match one(builtin, args)? {
            Val::Str(s) => {
                let json: serde_json::Value = serde_json::from_str(s).map_err(|e| {
                    ErrorInfo::new(errors::VALUE_ERROR, format!("invalid JSON: {}", e))
                })?;
                Ok(json_to_val(&json))
            }
            other => Err(expected(builtin, "string", other)),
        },
        Builtin::JsonStringify => {
            let value = args
                .first()
                .ok_or_else(|| arg_count(builtin, "at least 1", args.len()))?;
            let pretty = kwargs
                .get("pretty")
                .or_else(|| args.get(1))
                .map(Val::is_truthy)
                .unwrap_or(false);
            let json = val_to_json(value);
            let text = if pretty {
                serde_json::to_string_pretty(&json)
            } else {
                serde_json::to_string(&json)
            }
            .map_err(|e| ErrorInfo::runtime(e.to_string()))?;
            check_len(text.len(), limits)?;
            Ok(Val::Str(text))
        }
    }
}

/* ===================== Helpers ===================== */

/// Reject collections above the configured size
pub fn check_len(len: usize, limits: &Limits) -> Result<(), ErrorInfo> {
    if len > limits.max_collection_len {
        return Err(ErrorInfo::limit(format!(
            "collection of length {} exceeds the limit of {}",
            len, limits.max_collection_len
        )));
    }
    Ok(())
}

fn arg_count(builtin: Builtin, expected: &str, got: usize) -> ErrorInfo {
    ErrorInfo::type_error(format!(
        "{}() takes {} argument(s) ({} given)",
        builtin.name(),
        expected,
        got
    ))
}

fn expected(builtin: Builtin, what: &str, got: &Val) -> ErrorInfo {
    ErrorInfo::type_error(format!(
        "{}() expected {}, got '{}'",
        builtin.name(),
        what,
        got.type_name()
    ))
}

fn one(builtin: Builtin, args: &[Val]) -> Result<&Val, ErrorInfo> {
    match args {
        [v] => Ok(v),
        _ => Err(arg_count(builtin, "exactly 1", args.len())),
    }
}

fn int_arg(builtin: Builtin, v: &Val) -> Result<i64, ErrorInfo> {
    match v {
        Val::Int(n) => Ok(*n),
        other => Err(expected(builtin, "int", other)),
    }
}

fn range(args: &[Val], limits: &Limits) -> Result<Val, ErrorInfo> {
    let b = Builtin::Range;
    let (start, stop, step) = match args {
        [stop] => (0, int_arg(b, stop)?, 1),
        [start, stop] => (int_arg(b, start)?, int_arg(b, stop)?, 1),
        [start, stop, step] => (int_arg(b, start)?, int_arg(b, stop)?, int_arg(b, step)?),
        _ => return Err(arg_count(b, "1 to 3", args.len())),
    };
    if step == 0 {
        return Err(ErrorInfo::new(
            errors::VALUE_ERROR,
            "range() arg 3 must not be zero",
        ));
    }

    let span = if step > 0 {
        stop.saturating_sub(start)
    } else {
        start.saturating_sub(stop)
    };
    let count = if span <= 0 {
        0
    } else {
        (span as u64).div_ceil(step.unsigned_abs())
    };
    check_len(usize::try_from(count).unwrap_or(usize::MAX), limits)?;

    let items = (0..count as i64)
        .map(|i| Val::Int(start + i * step))
        .collect();
    Ok(Val::List(items))
}

fn extremum(builtin: Builtin, args: &[Val]) -> Result<Val, ErrorInfo> {
    let items: &[Val] = match args {
        [Val::List(items)] => items,
        [_] | [] => return Err(arg_count(builtin, "a list or at least 2", args.len())),
        _ => args,
    };

    let mut best: Option<&Val> = None;
    for item in items {
        let Some(n) = item.as_f64() else {
            return Err(expected(builtin, "numbers", item));
        };
        best = match best {
            Some(current) => {
                let current_n = current.as_f64().unwrap_or(n);
                let better = if builtin == Builtin::Min {
                    n < current_n
                } else {
                    n > current_n
                };
                Some(if better { item } else { current })
            }
            None => Some(item),
        };
    }

    best.cloned().ok_or_else(|| {
        ErrorInfo::new(
            errors::VALUE_ERROR,
            format!("{}() arg is an empty sequence", builtin.name()),
        )
    })
}
