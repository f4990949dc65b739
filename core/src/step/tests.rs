//! Step controller tests: start, dispatch, resume

use super::*;
use crate::test_helpers::{double_tool, FnTool};
use crate::tools::{ToolExecutionResult, ToolSet};

fn names(registry: &ToolSet) -> Vec<String> {
    registry.external_names()
}

/// Drive a script to completion, answering every call through the registry
async fn run_to_end(code: &str, registry: &ToolSet, sink: &mut Vec<String>) -> Outcome {
    let ctx = ExecutionContext::new("session", "call-1");
    let mut outcome = start(code, "", &names(registry), Limits::default(), sink);
    while let Outcome::Paused { snapshot, .. } = &outcome {
        let dispatch = dispatch_tool_call(snapshot, registry, &ctx)
            .await
            .expect("dispatch");
        outcome = resume(&dispatch.snapshot_dump, &dispatch.resume, sink);
    }
    outcome
}

fn completed(outcome: &Outcome) -> (&str, bool) {
    match outcome {
        Outcome::Completed {
            output, is_error, ..
        } => (output.as_str(), *is_error),
        other => panic!("Expected Completed, got {:?}", other),
    }
}

/* ===================== Start / Resume ===================== */

#[tokio::test(flavor = "multi_thread")]
async fn test_tool_call_pauses_and_resumes_with_typed_result() {
    let f = FnTool::new("f", &["name"], |_| {
        Ok(ToolExecutionResult::typed("42", serde_json::json!({ "text": "42" })))
    });
    let registry = ToolSet::new().with(f);
    let mut sink = Vec::new();

    let outcome = start("x = f('f')\nx.text", "", &names(&registry), Limits::default(), &mut sink);
    let Outcome::Paused {
        snapshot,
        pending_call,
        tool_call_count,
        ..
    } = outcome
    else {
        panic!("Expected Paused");
    };
    assert_eq!(pending_call.function_name, "f");
    assert_eq!(pending_call.args, vec![Val::Str("f".into())]);
    assert_eq!(tool_call_count, 0);

    let ctx = ExecutionContext::new("session", "call-1");
    let dispatch = dispatch_tool_call(&snapshot, &registry, &ctx).await.unwrap();
    assert_eq!(dispatch.tool_name, "f");
    assert_eq!(dispatch.tool_args, serde_json::json!({ "name": "f" }));
    assert_eq!(dispatch.tool_result, "42");
    assert!(!dispatch.tool_is_error);

    let outcome = resume(&dispatch.snapshot_dump, &dispatch.resume, &mut sink);
    assert_eq!(
        outcome,
        Outcome::Completed {
            output: "42".to_string(),
            printed_lines: vec![],
            tool_call_count: 1,
            is_error: false,
        }
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_text_only_result_resumes_as_string() {
    let registry = ToolSet::new().with(FnTool::new("f", &[], |_| Ok(ToolExecutionResult::text("42"))));
    let outcome = run_to_end("f()", &registry, &mut Vec::new()).await;
    assert_eq!(completed(&outcome), ("42", false));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_printed_lines_are_not_duplicated_across_resumes() {
    let registry = ToolSet::new().with(double_tool());
    let mut sink = Vec::new();

    let outcome = run_to_end(
        "print('before')\nprint('value', double(4))\nprint('after')",
        &registry,
        &mut sink,
    )
    .await;

    assert_eq!(sink, vec!["before", "value 8", "after"]);
    match outcome {
        Outcome::Completed {
            printed_lines,
            tool_call_count,
            is_error,
            ..
        } => {
            assert_eq!(printed_lines, vec!["before", "value 8", "after"]);
            assert_eq!(tool_call_count, 1);
            assert!(!is_error);
        }
        other => panic!("Expected Completed, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_print_inside_suspending_statement_is_emitted_once() {
    let registry = ToolSet::new().with(double_tool());
    let mut sink = Vec::new();

    // print() runs before double() suspends, and again when the statement replays
    let outcome = run_to_end("[print('once'), double(1), double(2)]", &registry, &mut sink).await;

    assert_eq!(sink, vec!["once"]);
    // print() returns null, which formats as an empty string
    assert_eq!(completed(&outcome), (", 2, 4", false));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_multiple_external_calls_in_one_expression() {
    let registry = ToolSet::new().with(double_tool());
    let mut sink = Vec::new();

    let outcome = run_to_end("z = double(1) + double(double(2))\nz", &registry, &mut sink).await;

    assert_eq!(completed(&outcome), ("10", false));
    if let Outcome::Completed {
        tool_call_count, ..
    } = outcome
    {
        assert_eq!(tool_call_count, 3);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_resume_is_deterministic_for_the_same_input() {
    let registry = ToolSet::new().with(double_tool());
    let mut sink = Vec::new();
    let outcome = start("y = double(3)\nprint(y)\ny + 1", "", &names(&registry), Limits::default(), &mut sink);
    let Outcome::Paused { snapshot, .. } = outcome else {
        panic!("Expected Paused");
    };
    let dump = snapshot.dump().unwrap();
    let args = ResumeArguments::ReturnValue { value: Val::Int(6) };

    let first = resume(&dump, &args, &mut Vec::new());
    let second = resume(&dump, &args, &mut Vec::new());

    assert_eq!(first, second);
    assert_eq!(completed(&first), ("7", false));
}

/* ===================== Dispatch Faults ===================== */

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_tool_resumes_with_tool_error() {
    let registry = ToolSet::new();
    let mut sink = Vec::new();
    let externals = vec!["ghost".to_string()];

    let outcome = start(
        "try { ghost() } catch (e) { r = e.code + ': ' + e.message }\nr",
        "",
        &externals,
        Limits::default(),
        &mut sink,
    );
    let Outcome::Paused { snapshot, .. } = outcome else {
        panic!("Expected Paused");
    };

    let ctx = ExecutionContext::new("session", "call-1");
    let dispatch = dispatch_tool_call(&snapshot, &registry, &ctx).await.unwrap();
    assert!(dispatch.tool_is_error);
    assert_eq!(dispatch.tool_result, "Unknown tool: ghost");

    let outcome = resume(&dispatch.snapshot_dump, &dispatch.resume, &mut sink);
    assert_eq!(completed(&outcome), ("ToolError: Unknown tool: ghost", false));
    // Unknown tools do not count as tool calls
    if let Outcome::Completed {
        tool_call_count, ..
    } = outcome
    {
        assert_eq!(tool_call_count, 0);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_error_result_with_blank_text_names_the_tool() {
    let failing = FnTool::new("f", &[], |_| Ok(ToolExecutionResult::error("  ")));
    let registry = ToolSet::new().with(failing);
    let mut sink = Vec::new();

    let outcome = run_to_end("f()", &registry, &mut sink).await;

    assert_eq!(
        completed(&outcome),
        ("ToolError: Tool execution failed: f", true)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failing_checkpoint_skips_the_tool() {
    let tool = double_tool();
    let registry = ToolSet::new().with(tool.clone());
    let mut sink = Vec::new();
    let outcome = start("double(2)", "", &names(&registry), Limits::default(), &mut sink);
    let Outcome::Paused { snapshot, .. } = outcome else {
        panic!("Expected Paused");
    };

    let ctx = ExecutionContext::new("session", "call-1");
    let dispatch = dispatch_tool_call_with(&snapshot, &registry, &ctx, |_| async {
        Err::<(), _>("disk full")
    })
    .await
    .unwrap();

    assert_eq!(tool.call_count(), 0);
    assert!(dispatch.tool_is_error);
    assert_eq!(
        dispatch.resume,
        ResumeArguments::Exception {
            error: ErrorInfo::new(errors::TOOL_ERROR, "disk full")
        }
    );
}

/// Dispatch `code`'s first call, returning what the checkpoint hook saw
async fn checkpointed_args(code: &str, registry: &ToolSet) -> (Dispatch, Option<JsonValue>) {
    let mut sink = Vec::new();
    let outcome = start(code, "", &names(registry), Limits::default(), &mut sink);
    let Outcome::Paused { snapshot, .. } = outcome else {
        panic!("Expected Paused");
    };

    let seen = std::sync::Mutex::new(None);
    let ctx = ExecutionContext::new("session", "call-1");
    let dispatch = dispatch_tool_call_with(&snapshot, registry, &ctx, |args| {
        *seen.lock().unwrap() = Some(args);
        std::future::ready(Ok::<(), String>(()))
    })
    .await
    .unwrap();
    let seen = seen.into_inner().unwrap();
    (dispatch, seen)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_checkpoint_receives_bound_arguments() {
    let registry = ToolSet::new().with(double_tool());

    let (dispatch, seen) = checkpointed_args("double(2)", &registry).await;

    assert_eq!(seen, Some(json!({ "x": 2 })));
    assert_eq!(dispatch.tool_args, json!({ "x": 2 }));
    assert!(!dispatch.tool_is_error);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_checkpoint_falls_back_to_raw_arguments() {
    let tool = double_tool();
    let registry = ToolSet::new().with(tool.clone());

    let (dispatch, seen) = checkpointed_args("double(1, 2)", &registry).await;

    assert_eq!(seen, Some(json!({ "args": [1, 2], "kwargs": {} })));
    assert!(dispatch.tool_is_error);
    assert_eq!(tool.call_count(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_tool_skips_the_checkpoint() {
    let registry = ToolSet::new();
    let mut sink = Vec::new();
    let outcome = start("lookup(1)", "", &["lookup".to_string()], Limits::default(), &mut sink);
    let Outcome::Paused { snapshot, .. } = outcome else {
        panic!("Expected Paused");
    };

    let ran = std::sync::atomic::AtomicBool::new(false);
    let ctx = ExecutionContext::new("session", "call-1");
    let dispatch = dispatch_tool_call_with(&snapshot, &registry, &ctx, |_| {
        ran.store(true, std::sync::atomic::Ordering::SeqCst);
        std::future::ready(Ok::<(), String>(()))
    })
    .await
    .unwrap();

    assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    assert!(dispatch.tool_is_error);
    assert_eq!(dispatch.tool_result, "Unknown tool: lookup");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancelled_dispatch_does_not_invoke_tool() {
    let tool = double_tool();
    let registry = ToolSet::new().with(tool.clone());
    let mut sink = Vec::new();
    let outcome = start("double(2)", "", &names(&registry), Limits::default(), &mut sink);
    let Outcome::Paused { snapshot, .. } = outcome else {
        panic!("Expected Paused");
    };

    let ctx = ExecutionContext::new("session", "call-1");
    ctx.cancel.cancel();
    let result = dispatch_tool_call(&snapshot, &registry, &ctx).await;

    assert!(matches!(result, Err(DispatchError::Cancelled)));
    assert_eq!(tool.call_count(), 0);
}

/* ===================== Restart / Snapshots ===================== */

#[test]
fn test_restart_error_is_catchable() {
    let externals = vec!["slow".to_string()];
    let mut sink = Vec::new();
    let outcome = start(
        "try { slow() } catch (e) { msg = e.message }\nmsg",
        "",
        &externals,
        Limits::default(),
        &mut sink,
    );
    let Outcome::Paused { snapshot, .. } = outcome else {
        panic!("Expected Paused");
    };

    let outcome = resume_with_restart_error(&snapshot.dump().unwrap(), &mut sink);
    assert_eq!(completed(&outcome), ("Process was restarted", false));
}

#[test]
fn test_uncaught_restart_error_fails_the_run() {
    let externals = vec!["slow".to_string()];
    let outcome = start("slow()", "", &externals, Limits::default(), &mut NullSink);
    let Outcome::Paused { snapshot, .. } = outcome else {
        panic!("Expected Paused");
    };

    let outcome = resume_with_restart_error(&snapshot.dump().unwrap(), &mut NullSink);
    assert_eq!(
        completed(&outcome),
        ("RuntimeError: Process was restarted", true)
    );
}

#[test]
fn test_snapshot_base64_round_trip_and_tamper_detection() {
    let externals = vec!["f".to_string()];
    let outcome = start("a = 1\nf(a)", "", &externals, Limits::default(), &mut NullSink);
    let Outcome::Paused { snapshot, .. } = outcome else {
        panic!("Expected Paused");
    };

    let encoded = snapshot.encode().unwrap();
    let decoded = Snapshot::decode(&encoded).unwrap();
    assert_eq!(decoded, snapshot);
    assert_eq!(decoded.pending_call().args, vec![Val::Int(1)]);

    let mut dump = snapshot.dump().unwrap();
    let pos = dump.len() - 5;
    dump[pos] ^= 0x01;
    assert!(Snapshot::load(&dump).is_err());

    let outcome = resume(&dump, &ResumeArguments::ReturnValue { value: Val::Null }, &mut NullSink);
    let (output, is_error) = completed(&outcome);
    assert!(is_error);
    assert!(output.contains("snapshot could not be restored"));
}

#[test]
fn test_empty_snapshot_is_rejected() {
    assert!(matches!(Snapshot::load(&[]), Err(SnapshotError::Empty)));
}

/* ===================== Faults ===================== */

#[test]
fn test_limit_violation_completes_with_error() {
    let limits = Limits {
        max_steps: 1_000,
        ..Limits::default()
    };
    let outcome = start(
        "try { while (true) { x = 1 } } catch (e) { 'caught' }",
        "",
        &[],
        limits,
        &mut NullSink,
    );
    let (output, is_error) = completed(&outcome);
    assert!(is_error);
    assert!(output.starts_with("LimitExceeded"));
}

#[test]
fn test_syntax_error_completes_with_error() {
    let outcome = start("x = = 1", "", &[], Limits::default(), &mut NullSink);
    let (output, is_error) = completed(&outcome);
    assert!(is_error);
    assert!(output.starts_with("SyntaxError"));
}

#[test]
fn test_preamble_does_not_change_output() {
    let outcome = start("1 + 2", "// f(x) - does things", &[], Limits::default(), &mut NullSink);
    assert_eq!(completed(&outcome), ("3", false));
}
