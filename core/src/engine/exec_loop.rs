//! Step loop
//!
//! `step` advances the top frame by one phase, checking the step and depth
//! budgets first. While a control transfer is active it hands over to
//! `unwind` instead. `run_until_done` calls it until the VM finishes or
//! parks on an external call.

use super::errors::ErrorInfo;
use super::statements::{
    execute_assign, execute_block, execute_break, execute_continue, execute_declare, execute_expr,
    execute_for, execute_if, execute_return, execute_try, execute_while,
};
use super::types::{Control, FrameKind, Stmt, TryPhase, Val};
use super::vm::{push_stmt, Step, VM};

/* ===================== Public API ===================== */

/// Run the VM until it completes or suspends
///
/// The step counter is reset on every call, so each start or resume gets the
/// full step budget. After completion, inspect `vm.control` for the final state.
pub fn run_until_done(vm: &mut VM) {
    vm.steps = 0;
    loop {
        match step(vm) {
            Step::Continue => continue,
            Step::Done => break,
        }
    }
}

/// Execute one step of the VM
pub fn step(vm: &mut VM) -> Step {
    match vm.control {
        Control::None => {}
        Control::Suspend(_) => return Step::Done,
        _ => return unwind(vm),
    }

    // Get top frame (if any)
    let Some(frame_idx) = vm.frames.len().checked_sub(1) else {
        return Step::Done;
    };

    vm.steps += 1;
    if vm.steps > vm.limits.max_steps {
        vm.control = Control::Fault(ErrorInfo::limit(format!(
            "maximum of {} steps exceeded",
            vm.limits.max_steps
        )));
        return Step::Continue;
    }
    if vm.frames.len() > vm.limits.max_depth {
        vm.control = Control::Fault(ErrorInfo::limit(format!(
            "maximum nesting depth of {} exceeded",
            vm.limits.max_depth
        )));
        return Step::Continue;
    }

    // Handlers take the frame by value and write its new phase back
    let (kind, node) = {
        let f = &vm.frames[frame_idx];
        (f.kind.clone(), f.node.clone())
    };

    match (kind, node) {
        (FrameKind::Block { idx }, Stmt::Block { body }) => execute_block(vm, idx, body),

        (FrameKind::Expr, Stmt::Expr { expr }) => execute_expr(vm, expr),

        (FrameKind::Declare, Stmt::Declare { name, init }) => execute_declare(vm, name, init),

        (FrameKind::Assign, Stmt::Assign { var, path, value }) => {
            execute_assign(vm, var, path, value)
        }

        (
            FrameKind::If { phase },
            Stmt::If {
                test,
                then_s,
                else_s,
            },
        ) => execute_if(vm, phase, test, *then_s, else_s.map(|s| *s)),

        (FrameKind::While, Stmt::While { test, body }) => execute_while(vm, test, *body),

        (
            FrameKind::For { phase, items, idx },
            Stmt::ForLoop {
                kind,
                binding,
                iterable,
                body,
            },
        ) => execute_for(vm, phase, items, idx, kind, binding, iterable, *body),

        (FrameKind::Try { phase }, Stmt::Try { body, .. }) => execute_try(vm, phase, *body),

        (FrameKind::Return, Stmt::Return { value }) => execute_return(vm, value),

        (FrameKind::Break, Stmt::Break) => execute_break(vm),

        (FrameKind::Continue, Stmt::Continue) => execute_continue(vm),

        (kind, node) => {
            // Only reachable with a hand-edited snapshot
            vm.control = Control::Fault(ErrorInfo::runtime(format!(
                "frame {:?} does not match statement {:?}",
                kind, node
            )));
            Step::Continue
        }
    }
}

/* ===================== Control Flow ===================== */

/// Unwind the stack when control flow is active
///
/// Pops frames until we find an appropriate handler or run out of frames:
/// - Return and Fault pop everything
/// - Break and Continue stop at the innermost loop
/// - Throw stops at the innermost try whose body is running
fn unwind(vm: &mut VM) -> Step {
    match vm.control.clone() {
        Control::Return(_) | Control::Fault(_) => {
            vm.frames.clear();
            Step::Done
        }

        Control::Break | Control::Continue => {
            let is_break = vm.control == Control::Break;
            while let Some(frame) = vm.frames.last() {
                if matches!(frame.kind, FrameKind::While | FrameKind::For { .. }) {
                    if is_break {
                        vm.frames.pop();
                    }
                    // A continued loop frame runs its next iteration when it is on top again
                    vm.control = Control::None;
                    return Step::Continue;
                }
                vm.frames.pop();
            }

            let keyword = if is_break { "break" } else { "continue" };
            vm.control = Control::Throw(Val::Error(ErrorInfo::new(
                super::errors::SYNTAX_ERROR,
                format!("'{}' outside loop", keyword),
            )));
            Step::Done
        }

        Control::Throw(error) => {
            while let Some(frame) = vm.frames.last() {
                if let (
                    FrameKind::Try {
                        phase: TryPhase::Body,
                    },
                    Stmt::Try {
                        catch_var,
                        catch_body,
                        ..
                    },
                ) = (&frame.kind, &frame.node)
                {
                    let catch_var = catch_var.clone();
                    let catch_body = (**catch_body).clone();

                    let frame_idx = vm.frames.len() - 1;
                    vm.frames[frame_idx].kind = FrameKind::Try {
                        phase: TryPhase::Catch,
                    };
                    if let Some(name) = catch_var {
                        vm.env.insert(name, error);
                    }
                    vm.control = Control::None;
                    push_stmt(vm, &catch_body);
                    return Step::Continue;
                }
                vm.frames.pop();
            }

            // Uncaught: the error stays in vm.control
            Step::Done
        }

        Control::None | Control::Suspend(_) => Step::Done,
    }
}
