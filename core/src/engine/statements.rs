//! One handler per statement kind
//!
//! A handler evaluates what the statement needs through `VM::evaluate`,
//! then pushes children, records its next phase or pops itself.

use super::errors::{self, ErrorInfo};
use super::expressions::resolve_index;
use super::types::{
    Accessor, Control, Expr, ForLoopKind, ForPhase, FrameKind, IfPhase, Stmt, TryPhase, Val,
};
use super::vm::{push_stmt, Step, VM};

/* ===================== Statement Handlers ===================== */

/// Execute Block statement
pub fn execute_block(vm: &mut VM, idx: usize, body: Vec<Stmt>) -> Step {
    let frame_idx = vm.frames.len() - 1;

    if idx >= body.len() {
        vm.frames.pop();
        return Step::Continue;
    }

    // Only the last top-level expression statement produces the script output
    if frame_idx == 0 {
        vm.last_value = Val::Null;
    }

    vm.frames[frame_idx].kind = FrameKind::Block { idx: idx + 1 };
    push_stmt(vm, &body[idx]);

    Step::Continue
}

/// Execute expression statement
pub fn execute_expr(vm: &mut VM, expr: Expr) -> Step {
    match vm.evaluate(|ev| ev.eval(&expr)) {
        Ok(v) => {
            // Directly under the root block
            if vm.frames.len() == 2 {
                vm.last_value = v;
            }
            vm.frames.pop();
            Step::Continue
        }
        Err(interrupt) => vm.interrupt(interrupt),
    }
}

/// Execute `let name = init`
pub fn execute_declare(vm: &mut VM, name: String, init: Option<Expr>) -> Step {
    let value = match init {
        Some(expr) => match vm.evaluate(|ev| ev.eval(&expr)) {
            Ok(v) => v,
            Err(interrupt) => return vm.interrupt(interrupt),
        },
        None => Val::Null,
    };

    vm.env.insert(name, value);
    vm.frames.pop();
    Step::Continue
}

/// Key of one assignment path segment, after evaluation
enum PathKey {
    Prop(String),
    Index(Val),
}

/// Execute `var(.prop | [index])* = value`
///
/// A plain `x = value` declares `x` when it does not exist yet.
pub fn execute_assign(vm: &mut VM, var: String, path: Vec<Accessor>, value: Expr) -> Step {
    let evaluated = vm.evaluate(|ev| {
        let v = ev.eval(&value)?;
        let mut keys = Vec::with_capacity(path.len());
        for accessor in &path {
            keys.push(match accessor {
                Accessor::Prop { property } => PathKey::Prop(property.clone()),
                Accessor::Index { expr } => PathKey::Index(ev.eval(expr)?),
            });
        }
        Ok((v, keys))
    });

    let (value, keys) = match evaluated {
        Ok(parts) => parts,
        Err(interrupt) => return vm.interrupt(interrupt),
    };

    if keys.is_empty() {
        vm.env.insert(var, value);
        vm.frames.pop();
        return Step::Continue;
    }

    let max_len = vm.limits.max_collection_len;
    let result = match vm.env.get_mut(&var) {
        Some(target) => assign_path(target, &keys, value, max_len),
        None => Err(ErrorInfo::new(
            errors::NAME_ERROR,
            format!("name '{}' is not defined", var),
        )),
    };

    match result {
        Ok(()) => {
            vm.frames.pop();
            Step::Continue
        }
        Err(error) => vm.interrupt(error.into()),
    }
}

fn assign_path(
    target: &mut Val,
    keys: &[PathKey],
    value: Val,
    max_len: usize,
) -> Result<(), ErrorInfo> {
    let Some((key, rest)) = keys.split_first() else {
        *target = value;
        return Ok(());
    };

    let type_name = target.type_name();
    let slot = match (target, key) {
        (Val::Obj(map), PathKey::Prop(k)) | (Val::Obj(map), PathKey::Index(Val::Str(k))) => {
            if !map.contains_key(k) {
                if !rest.is_empty() {
                    return Err(ErrorInfo::new(
                        errors::INDEX_ERROR,
                        format!("key '{}' not found", k),
                    ));
                }
                if map.len() >= max_len {
                    return Err(ErrorInfo::limit(format!(
                        "collection of length {} exceeds the limit of {}",
                        map.len() + 1,
                        max_len
                    )));
                }
            }
            map.entry(k.clone()).or_insert(Val::Null)
        }
        (Val::List(items), PathKey::Index(Val::Int(i))) => {
            let len = items.len();
            let idx = resolve_index(*i, len).ok_or_else(|| {
                ErrorInfo::new(errors::INDEX_ERROR, "list assignment index out of range")
            })?;
            &mut items[idx]
        }
        (_, PathKey::Prop(k)) => {
            return Err(ErrorInfo::type_error(format!(
                "cannot set attribute '{}' on '{}'",
                k, type_name
            )));
        }
        (_, PathKey::Index(k)) => {
            return Err(ErrorInfo::type_error(format!(
                "'{}' object does not support item assignment with '{}' keys",
                type_name,
                k.type_name()
            )));
        }
    };

    assign_path(slot, rest, value, max_len)
}

/// Execute If statement
pub fn execute_if(
    vm: &mut VM,
    phase: IfPhase,
    test: Expr,
    then_s: Stmt,
    else_s: Option<Stmt>,
) -> Step {
    match phase {
        IfPhase::Eval => {
            let truthy = match vm.evaluate(|ev| ev.eval(&test)) {
                Ok(v) => v.is_truthy(),
                Err(interrupt) => return vm.interrupt(interrupt),
            };

            let branch = if truthy { Some(then_s) } else { else_s };
            match branch {
                Some(stmt) => {
                    let frame_idx = vm.frames.len() - 1;
                    vm.frames[frame_idx].kind = FrameKind::If {
                        phase: IfPhase::Done,
                    };
                    push_stmt(vm, &stmt);
                }
                None => {
                    vm.frames.pop();
                }
            }
            Step::Continue
        }
        IfPhase::Done => {
            vm.frames.pop();
            Step::Continue
        }
    }
}

/// Execute While statement
///
/// The frame stays on the stack while the loop runs; each time it is on top
/// the test is evaluated again.
pub fn execute_while(vm: &mut VM, test: Expr, body: Stmt) -> Step {
    match vm.evaluate(|ev| ev.eval(&test)) {
        Ok(v) if v.is_truthy() => push_stmt(vm, &body),
        Ok(_) => {
            vm.frames.pop();
        }
        Err(interrupt) => return vm.interrupt(interrupt),
    }
    Step::Continue
}

/// Execute For loop
pub fn execute_for(
    vm: &mut VM,
    phase: ForPhase,
    items: Vec<Val>,
    idx: usize,
    kind: ForLoopKind,
    binding: String,
    iterable: Expr,
    body: Stmt,
) -> Step {
    let frame_idx = vm.frames.len() - 1;

    match phase {
        ForPhase::Init => {
            let collection = match vm.evaluate(|ev| ev.eval(&iterable)) {
                Ok(v) => v,
                Err(interrupt) => return vm.interrupt(interrupt),
            };

            let items = match iteration_items(kind, collection) {
                Ok(items) => items,
                Err(error) => return vm.interrupt(error.into()),
            };

            vm.frames[frame_idx].kind = FrameKind::For {
                phase: ForPhase::Iterate,
                items,
                idx: 0,
            };
            Step::Continue
        }
        ForPhase::Iterate => {
            let Some(item) = items.get(idx).cloned() else {
                vm.frames.pop();
                return Step::Continue;
            };

            vm.env.insert(binding, item);
            vm.frames[frame_idx].kind = FrameKind::For {
                phase: ForPhase::Iterate,
                items,
                idx: idx + 1,
            };
            push_stmt(vm, &body);
            Step::Continue
        }
    }
}

fn iteration_items(kind: ForLoopKind, collection: Val) -> Result<Vec<Val>, ErrorInfo> {
    match (kind, collection) {
        (ForLoopKind::Of, Val::List(items)) => Ok(items),
        (ForLoopKind::Of, Val::Obj(map)) => Ok(map.into_values().collect()),
        (ForLoopKind::Of, Val::Str(s)) => Ok(s.chars().map(|c| Val::Str(c.to_string())).collect()),
        (ForLoopKind::In, Val::Obj(map)) => Ok(map.into_keys().map(Val::Str).collect()),
        (ForLoopKind::In, Val::List(items)) => {
            Ok((0..items.len() as i64).map(Val::Int).collect())
        }
        (_, other) => Err(ErrorInfo::type_error(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

/// Execute Try statement
///
/// Errors thrown while the body runs are caught during unwinding (see
/// exec_loop::unwind); here we only push blocks and pop when finished.
pub fn execute_try(vm: &mut VM, phase: TryPhase, body: Stmt) -> Step {
    match phase {
        TryPhase::Start => {
            let frame_idx = vm.frames.len() - 1;
            vm.frames[frame_idx].kind = FrameKind::Try {
                phase: TryPhase::Body,
            };
            push_stmt(vm, &body);
        }
        TryPhase::Body | TryPhase::Catch => {
            vm.frames.pop();
        }
    }
    Step::Continue
}

/// Execute Return statement
pub fn execute_return(vm: &mut VM, value: Option<Expr>) -> Step {
    let val = match value {
        Some(expr) => match vm.evaluate(|ev| ev.eval(&expr)) {
            Ok(v) => v,
            Err(interrupt) => return vm.interrupt(interrupt),
        },
        None => Val::Null,
    };

    vm.control = Control::Return(val);
    vm.frames.pop();
    Step::Continue
}

/// Execute Break statement
pub fn execute_break(vm: &mut VM) -> Step {
    vm.control = Control::Break;
    vm.frames.pop();
    Step::Continue
}

/// Execute Continue statement
pub fn execute_continue(vm: &mut VM) -> Step {
    vm.control = Control::Continue;
    vm.frames.pop();
    Step::Continue
}
