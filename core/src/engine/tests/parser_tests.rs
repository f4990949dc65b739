//! Tests for the script parser

use crate::engine::types::{Expr, ForLoopKind, Stmt};
use crate::engine::{parse_program, ParseError};

fn body(source: &str) -> Vec<Stmt> {
    match parse_program(source).unwrap() {
        Stmt::Block { body } => body,
        other => panic!("Expected Block, got {:?}", other),
    }
}

#[test]
fn test_empty_script() {
    assert!(body("").is_empty());
    assert!(body("\n\n  # nothing here\n// or here\n").is_empty());
}

#[test]
fn test_statements_split_on_newlines_and_semicolons() {
    assert_eq!(body("let a = 1; let b = 2\nlet c = 3").len(), 3);
}

#[test]
fn test_declaration_keywords_are_interchangeable() {
    for source in ["let x = 1", "const x = 1", "var x = 1"] {
        match &body(source)[0] {
            Stmt::Declare { name, init } => {
                assert_eq!(name, "x");
                assert_eq!(init, &Some(Expr::LitInt { v: 1 }));
            }
            other => panic!("Expected Declare, got {:?}", other),
        }
    }
}

#[test]
fn test_python_style_literals() {
    match &body("[None, True, False]")[0] {
        Stmt::Expr {
            expr: Expr::LitList { elements },
        } => {
            assert_eq!(
                elements,
                &vec![
                    Expr::LitNull,
                    Expr::LitBool { v: true },
                    Expr::LitBool { v: false }
                ]
            );
        }
        other => panic!("Expected list expression, got {:?}", other),
    }
}

#[test]
fn test_string_escapes() {
    match &body(r#"'it\'s' + "a\tb\n""#)[0] {
        Stmt::Expr {
            expr: Expr::Binary { left, right, .. },
        } => {
            assert_eq!(**left, Expr::LitStr { v: "it's".to_string() });
            assert_eq!(**right, Expr::LitStr { v: "a\tb\n".to_string() });
        }
        other => panic!("Expected binary expression, got {:?}", other),
    }
}

#[test]
fn test_for_loop_kinds() {
    let stmts = body("for (let x of xs) { x }\nfor (k in obj) { k }");
    match (&stmts[0], &stmts[1]) {
        (Stmt::ForLoop { kind: first, .. }, Stmt::ForLoop { kind: second, binding, .. }) => {
            assert_eq!(*first, ForLoopKind::Of);
            assert_eq!(*second, ForLoopKind::In);
            assert_eq!(binding, "k");
        }
        other => panic!("Expected two for loops, got {:?}", other),
    }
}

#[test]
fn test_except_is_an_alias_for_catch() {
    match &body("try { f() } except (e) { e }")[0] {
        Stmt::Try { catch_var, .. } => assert_eq!(catch_var.as_deref(), Some("e")),
        other => panic!("Expected Try, got {:?}", other),
    }
}

#[test]
fn test_multiline_call_arguments() {
    let stmts = body("fetch(\n  1,\n  retries = 3,\n)");
    match &stmts[0] {
        Stmt::Expr {
            expr: Expr::Call { callee, args, kwargs },
        } => {
            assert_eq!(callee, "fetch");
            assert_eq!(args.len(), 1);
            assert_eq!(kwargs[0].0, "retries");
        }
        other => panic!("Expected call, got {:?}", other),
    }
}

/* ===================== Errors ===================== */

#[test]
fn test_syntax_error_reports_position() {
    match parse_program("let x = 1\nlet = 2") {
        Err(ParseError::Syntax { line, .. }) => assert_eq!(line, 2),
        other => panic!("Expected Syntax error, got {:?}", other),
    }
}

#[test]
fn test_unclosed_block_is_rejected() {
    assert!(matches!(
        parse_program("if (x) { 1"),
        Err(ParseError::Syntax { .. })
    ));
}

#[test]
fn test_positional_after_keyword_argument_is_rejected() {
    assert!(matches!(
        parse_program("f(a = 1, 2)"),
        Err(ParseError::Build(_))
    ));
}

#[test]
fn test_repeated_keyword_argument_is_rejected() {
    match parse_program("f(a = 1, a = 2)") {
        Err(ParseError::Build(message)) => assert!(message.contains("repeated")),
        other => panic!("Expected Build error, got {:?}", other),
    }
}

#[test]
fn test_keywords_are_not_identifiers() {
    assert!(parse_program("let return = 1").is_err());
    assert!(parse_program("let returned = 1").is_ok());
}
