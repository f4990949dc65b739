//! Tests for control flow: branches, loops, try/catch and limits

use super::helpers::{failed, finished, parse_and_build_vm, run, s};
use crate::engine::errors;
use crate::engine::{run_until_done, Limits, RunState, Val};

/* ===================== Branches ===================== */

#[test]
fn test_if_else_chain() {
    let source = r#"
        let grade = null
        let score = 72
        if (score >= 90) {
            grade = "A"
        } else if (score >= 70) {
            grade = "C"
        } else {
            grade = "F"
        }
        grade
    "#;
    assert_eq!(finished(source), s("C"));
}

#[test]
fn test_if_uses_truthiness() {
    assert_eq!(finished("let r = 0\nif ([]) { r = 1 } else { r = 2 }\nr"), Val::Int(2));
    assert_eq!(finished("let r = 0\nif ({a: 1}) { r = 1 }\nr"), Val::Int(1));
}

/* ===================== Loops ===================== */

#[test]
fn test_while_with_break_and_continue() {
    let source = r#"
        let i = 0
        let total = 0
        while (true) {
            i = i + 1
            if (i > 10) { break }
            if (i % 2 == 0) { continue }
            total = total + i
        }
        total
    "#;
    assert_eq!(finished(source), Val::Int(25));
}

#[test]
fn test_for_of_list() {
    assert_eq!(
        finished("let sum = 0\nfor (let x of [1, 2, 3]) { sum = sum + x }\nsum"),
        Val::Int(6)
    );
}

#[test]
fn test_for_of_object_and_string() {
    assert_eq!(
        finished("let out = []\nfor (v of {b: 2, a: 1}) { out = out + [v] }\nout"),
        Val::List(vec![Val::Int(1), Val::Int(2)])
    );
    assert_eq!(
        finished("let out = ''\nfor (c of 'abc') { out = c + out }\nout"),
        s("cba")
    );
}

#[test]
fn test_for_in_object_keys_and_list_indexes() {
    assert_eq!(
        finished("let out = []\nfor (k in {b: 2, a: 1}) { out = out + [k] }\nout"),
        Val::List(vec![s("a"), s("b")])
    );
    assert_eq!(
        finished("let out = []\nfor (i in ['x', 'y']) { out = out + [i] }\nout"),
        Val::List(vec![Val::Int(0), Val::Int(1)])
    );
}

#[test]
fn test_for_over_number_is_a_type_error() {
    let error = failed("for (x of 5) { x }");
    assert_eq!(error.code, errors::TYPE_ERROR);
    assert!(error.message.contains("not iterable"));
}

#[test]
fn test_break_inside_nested_loop_only_exits_inner() {
    let source = r#"
        let hits = 0
        for (a of [1, 2, 3]) {
            for (b of [1, 2, 3]) {
                if (b == 2) { break }
                hits = hits + 1
            }
        }
        hits
    "#;
    assert_eq!(finished(source), Val::Int(3));
}

#[test]
fn test_return_inside_loop_ends_script() {
    assert_eq!(finished("for (x of [1, 2, 3]) { if (x == 2) { return x * 100 } }\n0"), Val::Int(200));
}

/* ===================== Try / Catch ===================== */

#[test]
fn test_catch_binds_error_value() {
    let source = r#"
        let caught = null
        try {
            let x = 1 / 0
        } catch (e) {
            caught = [e.code, e.message, type(e)]
        }
        caught
    "#;
    assert_eq!(
        finished(source),
        Val::List(vec![s("ZeroDivisionError"), s("division by zero"), s("error")])
    );
}

#[test]
fn test_catch_without_binding() {
    assert_eq!(
        finished("let ok = false\ntry { missing } catch { ok = true }\nok"),
        Val::Bool(true)
    );
}

#[test]
fn test_statements_after_error_in_try_are_skipped() {
    let vm = run("try {\n  print('one')\n  [][0]\n  print('two')\n} except (e) {\n  print(e.code)\n}");
    assert_eq!(vm.printed, vec!["one", "IndexError"]);
}

#[test]
fn test_uncaught_error_fails_script() {
    let vm = run("print('before')\nlet x = {}.a.b\nprint('after')");
    assert_eq!(vm.printed, vec!["before"]);
    match vm.run_state() {
        RunState::Failed(error) => assert_eq!(error.code, errors::TYPE_ERROR),
        other => panic!("Expected Failed, got {:?}", other),
    }
}

/* ===================== Limits ===================== */

#[test]
fn test_step_limit_is_not_catchable() {
    let limits = Limits {
        max_steps: 200,
        ..Limits::default()
    };
    let mut vm = parse_and_build_vm(
        "let handled = false\ntry { while (true) { } } catch (e) { handled = true }\nhandled",
        &[],
        limits,
    );
    run_until_done(&mut vm);

    match vm.run_state() {
        RunState::Failed(error) => {
            assert_eq!(error.code, errors::LIMIT_EXCEEDED);
            assert!(error.message.contains("200 steps"));
        }
        other => panic!("Expected Failed, got {:?}", other),
    }
}

#[test]
fn test_expression_depth_limit() {
    let limits = Limits {
        max_depth: 8,
        ..Limits::default()
    };
    let source = vec!["1"; 20].join(" + ");
    let mut vm = parse_and_build_vm(&source, &[], limits);
    run_until_done(&mut vm);

    match vm.run_state() {
        RunState::Failed(error) => {
            assert_eq!(error.code, errors::LIMIT_EXCEEDED);
            assert!(error.message.contains("depth"));
        }
        other => panic!("Expected Failed, got {:?}", other),
    }
}

#[test]
fn test_nesting_depth_limit() {
    let limits = Limits {
        max_depth: 4,
        ..Limits::default()
    };
    let source = "if (true) { if (true) { if (true) { if (true) { 1 } } } }";
    let mut vm = parse_and_build_vm(source, &[], limits);
    run_until_done(&mut vm);

    assert!(matches!(
        vm.run_state(),
        RunState::Failed(error) if error.code == errors::LIMIT_EXCEEDED
    ));
}
