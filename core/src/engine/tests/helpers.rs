//! Test helpers for engine tests
//!
//! Common utilities for parsing scripts and building VMs

use crate::engine::{parse_program, run_until_done, ErrorInfo, Limits, RunState, Stmt, Val, VM};
use std::collections::BTreeSet;

/// Parse a script, round-trip the AST through JSON, and create a VM
///
/// The round-trip keeps every node kind honest about serialization, since
/// suspended VMs carry their statements inside the snapshot.
pub fn parse_and_build_vm(source: &str, externals: &[&str], limits: Limits) -> VM {
    let program = parse_program(source).expect("Parse script failed");
    let json = serde_json::to_string(&program).expect("Program serialization failed");
    let program: Stmt = serde_json::from_str(&json).expect("Program deserialization failed");

    let externals: BTreeSet<String> = externals.iter().map(|name| name.to_string()).collect();
    VM::new(program, externals, limits)
}

/// Run a script with no externals and default limits
pub fn run(source: &str) -> VM {
    let mut vm = parse_and_build_vm(source, &[], Limits::default());
    run_until_done(&mut vm);
    vm
}

/// Output of a script that is expected to finish
pub fn finished(source: &str) -> Val {
    match run(source).run_state() {
        RunState::Finished(v) => v,
        other => panic!("Expected Finished, got {:?}", other),
    }
}

/// Error of a script that is expected to fail
pub fn failed(source: &str) -> ErrorInfo {
    match run(source).run_state() {
        RunState::Failed(error) => error,
        other => panic!("Expected Failed, got {:?}", other),
    }
}

pub fn s(text: &str) -> Val {
    Val::Str(text.to_string())
}
