//! Expression evaluation
//!
//! Expressions are evaluated in one pass. A call to an external function
//! either takes its answer from the replay journal or interrupts evaluation
//! with a suspension; nothing else in an expression can suspend.

use super::errors::{self, ErrorInfo};
use super::stdlib;
use super::types::{BinaryOp, Expr, PendingCall, UnaryOp, Val};
use super::vm::{Limits, Replay, Resolved};
use crate::bridge::value_format;
use std::collections::{BTreeMap, BTreeSet};

/* ===================== Evaluation Results ===================== */

/// Why an evaluation stopped before producing a value
#[derive(Debug, Clone, PartialEq)]
pub enum Interrupt {
    /// Catchable error value
    Throw(Val),
    /// External call that the host must resolve
    Suspend(PendingCall),
    /// Uncatchable failure
    Fault(ErrorInfo),
}

impl From<ErrorInfo> for Interrupt {
    fn from(error: ErrorInfo) -> Self {
        if error.code == errors::LIMIT_EXCEEDED {
            Interrupt::Fault(error)
        } else {
            Interrupt::Throw(Val::Error(error))
        }
    }
}

pub type EvalResult<T = Val> = Result<T, Interrupt>;

/* ===================== Evaluator ===================== */

pub struct Evaluator<'a> {
    env: &'a BTreeMap<String, Val>,
    externals: &'a BTreeSet<String>,
    limits: &'a Limits,
    replay: &'a Replay,
    calls_seen: usize,
    prints_seen: usize,
    new_lines: Vec<String>,
    depth: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        env: &'a BTreeMap<String, Val>,
        externals: &'a BTreeSet<String>,
        limits: &'a Limits,
        replay: &'a Replay,
    ) -> Self {
        Self {
            env,
            externals,
            limits,
            replay,
            calls_seen: 0,
            prints_seen: 0,
            new_lines: vec![],
            depth: 0,
        }
    }

    /// Lines printed for the first time during this evaluation, and the total
    /// number of print calls made
    pub fn finish(self) -> (Vec<String>, usize) {
        (self.new_lines, self.prints_seen)
    }

    pub fn eval(&mut self, expr: &Expr) -> EvalResult {
        self.depth += 1;
        let result = if self.depth > self.limits.max_depth {
            Err(Interrupt::Fault(ErrorInfo::limit(format!(
                "maximum expression depth of {} exceeded",
                self.limits.max_depth
            ))))
        } else {
            self.eval_inner(expr)
        };
        self.depth -= 1;
        result
    }

    fn eval_inner(&mut self, expr: &Expr) -> EvalResult {
        match expr {
            Expr::LitNull => Ok(Val::Null),
            Expr::LitBool { v } => Ok(Val::Bool(*v)),
            Expr::LitInt { v } => Ok(Val::Int(*v)),
            Expr::LitNum { v } => Ok(Val::Num(*v)),
            Expr::LitStr { v } => Ok(Val::Str(v.clone())),

            Expr::LitList { elements } => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    items.push(self.eval(element)?);
                }
                stdlib::check_len(items.len(), self.limits)?;
                Ok(Val::List(items))
            }

            Expr::LitObj { properties } => {
                let mut map = BTreeMap::new();
                for (key, value) in properties {
                    let v = self.eval(value)?;
                    map.insert(key.clone(), v);
                }
                stdlib::check_len(map.len(), self.limits)?;
                Ok(Val::Obj(map))
            }

            Expr::Ident { name } => self.env.get(name).cloned().ok_or_else(|| {
                ErrorInfo::new(
                    errors::NAME_ERROR,
                    format!("name '{}' is not defined", name),
                )
                .into()
            }),

            Expr::Member { object, property } => {
                let target = self.eval(object)?;
                Ok(member_get(&target, property)?)
            }

            Expr::Index { object, index } => {
                let target = self.eval(object)?;
                let key = self.eval(index)?;
                Ok(index_get(&target, &key)?)
            }

            Expr::Call {
                callee,
                args,
                kwargs,
            } => {
                let mut arg_vals = Vec::with_capacity(args.len());
                for arg in args {
                    arg_vals.push(self.eval(arg)?);
                }
                let mut kwarg_vals = BTreeMap::new();
                for (name, value) in kwargs {
                    let v = self.eval(value)?;
                    kwarg_vals.insert(name.clone(), v);
                }
                self.call(callee, arg_vals, kwarg_vals)
            }

            Expr::Unary { op, operand } => {
                let v = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Val::Bool(!v.is_truthy())),
                    UnaryOp::Neg => match v {
                        Val::Int(n) => Ok(n
                            .checked_neg()
                            .map(Val::Int)
                            .unwrap_or(Val::Num(-(n as f64)))),
                        Val::Num(n) => Ok(Val::Num(-n)),
                        other => Err(ErrorInfo::type_error(format!(
                            "bad operand type for unary -: '{}'",
                            other.type_name()
                        ))
                        .into()),
                    },
                }
            }

            Expr::Binary { op, left, right } => match op {
                BinaryOp::And => {
                    let l = self.eval(left)?;
                    if !l.is_truthy() {
                        return Ok(l);
                    }
                    self.eval(right)
                }
                BinaryOp::Or => {
                    let l = self.eval(left)?;
                    if l.is_truthy() {
                        return Ok(l);
                    }
                    self.eval(right)
                }
                BinaryOp::Nullish => {
                    let l = self.eval(left)?;
                    if l != Val::Null {
                        return Ok(l);
                    }
                    self.eval(right)
                }
                _ => {
                    let l = self.eval(left)?;
                    let r = self.eval(right)?;
                    Ok(binary(*op, l, r, self.limits)?)
                }
            },

            Expr::Ternary {
                condition,
                consequent,
                alternate,
            } => {
                if self.eval(condition)?.is_truthy() {
                    self.eval(consequent)
                } else {
                    self.eval(alternate)
                }
            }
        }
    }

    /* ===================== Calls ===================== */

    fn call(&mut self, name: &str, args: Vec<Val>, kwargs: BTreeMap<String, Val>) -> EvalResult {
        // Host functions shadow built-ins of the same name
        if self.externals.contains(name) {
            return self.external_call(name, args, kwargs);
        }

        if name == "print" {
            return self.print(&args);
        }

        match stdlib::call_builtin(name, &args, &kwargs, self.limits) {
            Some(result) => Ok(result?),
            None => Err(ErrorInfo::new(
                errors::NAME_ERROR,
                format!("name '{}' is not defined", name),
            )
            .into()),
        }
    }

    fn external_call(
        &mut self,
        name: &str,
        args: Vec<Val>,
        kwargs: BTreeMap<String, Val>,
    ) -> EvalResult {
        let idx = self.calls_seen;
        self.calls_seen += 1;

        match self.replay.results.get(idx) {
            Some(Resolved::Value(v)) => Ok(v.clone()),
            Some(Resolved::Error(error)) => Err(Interrupt::Throw(Val::Error(error.clone()))),
            None => Err(Interrupt::Suspend(PendingCall {
                function_name: name.to_string(),
                args,
                kwargs,
            })),
        }
    }

    fn print(&mut self, args: &[Val]) -> EvalResult {
        let line = args
            .iter()
            .map(value_format)
            .collect::<Vec<_>>()
            .join(" ")
            .trim_end()
            .to_string();

        // Lines printed before a suspension were already emitted
        if self.prints_seen >= self.replay.printed {
            self.new_lines.push(line);
        }
        self.prints_seen += 1;
        Ok(Val::Null)
    }
}

/* ===================== Operators ===================== */

fn member_get(target: &Val, property: &str) -> Result<Val, ErrorInfo> {
    match target {
        Val::Obj(map) => Ok(map.get(property).cloned().unwrap_or(Val::Null)),
        Val::Error(info) => match property {
            "code" => Ok(Val::Str(info.code.clone())),
            "message" => Ok(Val::Str(info.message.clone())),
            _ => Ok(Val::Null),
        },
        Val::List(items) if property == "length" => Ok(Val::Int(items.len() as i64)),
        Val::Str(s) if property == "length" => Ok(Val::Int(s.chars().count() as i64)),
        other => Err(ErrorInfo::type_error(format!(
            "'{}' object has no attribute '{}'",
            other.type_name(),
            property
        ))),
    }
}

/// Resolve a possibly negative index against a sequence length
pub(crate) fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let idx = if index < 0 { len + index } else { index };
    (0..len).contains(&idx).then_some(idx as usize)
}

fn index_get(target: &Val, key: &Val) -> Result<Val, ErrorInfo> {
    match (target, key) {
        (Val::List(items), Val::Int(i)) => resolve_index(*i, items.len())
            .map(|idx| items[idx].clone())
            .ok_or_else(|| ErrorInfo::new(errors::INDEX_ERROR, "list index out of range")),
        (Val::Str(s), Val::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            resolve_index(*i, chars.len())
                .map(|idx| Val::Str(chars[idx].to_string()))
                .ok_or_else(|| ErrorInfo::new(errors::INDEX_ERROR, "string index out of range"))
        }
        (Val::Obj(map), Val::Str(k)) => Ok(map.get(k).cloned().unwrap_or(Val::Null)),
        (target, key) => Err(ErrorInfo::type_error(format!(
            "'{}' object cannot be indexed by '{}'",
            target.type_name(),
            key.type_name()
        ))),
    }
}

fn binary(op: BinaryOp, l: Val, r: Val, limits: &Limits) -> Result<Val, ErrorInfo> {
    match op {
        BinaryOp::Eq => Ok(Val::Bool(l.loose_eq(&r))),
        BinaryOp::Ne => Ok(Val::Bool(!l.loose_eq(&r))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => compare(op, &l, &r),
        BinaryOp::Add => match (l, r) {
            (Val::Str(a), Val::Str(b)) => {
                stdlib::check_len(a.len() + b.len(), limits)?;
                Ok(Val::Str(a + &b))
            }
            (Val::List(mut a), Val::List(b)) => {
                stdlib::check_len(a.len() + b.len(), limits)?;
                a.extend(b);
                Ok(Val::List(a))
            }
            (l, r) => arithmetic(op, &l, &r),
        },
        _ => arithmetic(op, &l, &r),
    }
}

fn arithmetic(op: BinaryOp, l: &Val, r: &Val) -> Result<Val, ErrorInfo> {
    let symbol = match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        _ => "%",
    };

    if let (Val::Int(a), Val::Int(b)) = (l, r) {
        let (a, b) = (*a, *b);
        let checked = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Mod => {
                if b == 0 {
                    return Err(ErrorInfo::new(
                        errors::ZERO_DIVISION_ERROR,
                        "integer modulo by zero",
                    ));
                }
                a.checked_rem(b).map(|m| floor_mod(m, b))
            }
            _ => None,
        };
        if let Some(v) = checked {
            return Ok(Val::Int(v));
        }
        // Overflow (and true division) fall through to float arithmetic
    }

    let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) else {
        return Err(ErrorInfo::type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            symbol,
            l.type_name(),
            r.type_name()
        )));
    };

    match op {
        BinaryOp::Add => Ok(Val::Num(a + b)),
        BinaryOp::Sub => Ok(Val::Num(a - b)),
        BinaryOp::Mul => Ok(Val::Num(a * b)),
        BinaryOp::Div | BinaryOp::Mod if b == 0.0 => Err(ErrorInfo::new(
            errors::ZERO_DIVISION_ERROR,
            "division by zero",
        )),
        BinaryOp::Div => Ok(Val::Num(a / b)),
        _ => {
            let m = a % b;
            Ok(Val::Num(if m != 0.0 && (m < 0.0) != (b < 0.0) { m + b } else { m }))
        }
    }
}

/// Remainder takes the sign of the divisor
fn floor_mod(m: i64, b: i64) -> i64 {
    if m != 0 && (m < 0) != (b < 0) {
        m + b
    } else {
        m
    }
}

fn compare(op: BinaryOp, l: &Val, r: &Val) -> Result<Val, ErrorInfo> {
    let ordering = match (l, r) {
        (Val::Str(a), Val::Str(b)) => Some(a.cmp(b)),
        _ => match (l.as_f64(), r.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => {
                return Err(ErrorInfo::type_error(format!(
                    "comparison not supported between '{}' and '{}'",
                    l.type_name(),
                    r.type_name()
                )));
            }
        },
    };

    let Some(ordering) = ordering else {
        // NaN compares false
        return Ok(Val::Bool(false));
    };

    let result = match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    };
    Ok(Val::Bool(result))
}
