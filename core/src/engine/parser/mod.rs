//! PEST-based parser for the script language
//!
//! Produces the AST executed by the VM. A program is a sequence of statements;
//! the whole program is wrapped in a root `Stmt::Block`.

use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;

use super::types::ast::{Accessor, BinaryOp, Expr, ForLoopKind, Stmt, UnaryOp};

/* ===================== PEST Parser ===================== */

#[derive(Parser)]
#[grammar = "engine/parser/script.pest"]
struct ScriptParser;

/* ===================== Error Types ===================== */

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid syntax at line {line}, column {col}: {message}")]
    Syntax {
        line: usize,
        col: usize,
        message: String,
    },
    #[error("{0}")]
    Build(String),
}

impl From<pest::error::Error<Rule>> for ParseError {
    fn from(err: pest::error::Error<Rule>) -> Self {
        let (line, col) = match err.line_col {
            pest::error::LineColLocation::Pos(pos) => pos,
            pest::error::LineColLocation::Span(start, _) => start,
        };
        ParseError::Syntax {
            line,
            col,
            message: err.variant.message().to_string(),
        }
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

/* ===================== Public API ===================== */

/// Parse a script into its root block statement
pub fn parse_program(source: &str) -> ParseResult<Stmt> {
    let mut pairs = ScriptParser::parse(Rule::program, source)?;
    let program = next_pair(&mut pairs, "program")?;

    let body = program
        .into_inner()
        .filter(|p| p.as_rule() != Rule::EOI)
        .map(build_statement)
        .collect::<ParseResult<Vec<_>>>()?;

    Ok(Stmt::Block { body })
}

/* ===================== AST Builder ===================== */

fn next_pair<'i>(pairs: &mut Pairs<'i, Rule>, what: &str) -> ParseResult<Pair<'i, Rule>> {
    pairs
        .next()
        .ok_or_else(|| ParseError::Build(format!("missing {} in parse tree", what)))
}

/// Keyword tokens carry no information once the statement rule is known.
/// `of`/`in` are kept: they decide the kind of a for loop.
fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_let
            | Rule::kw_if
            | Rule::kw_else
            | Rule::kw_while
            | Rule::kw_for
            | Rule::kw_try
            | Rule::kw_catch
            | Rule::kw_return
            | Rule::kw_break
            | Rule::kw_continue
    )
}

fn build_block(pair: Pair<Rule>) -> ParseResult<Stmt> {
    // block = { "{" ~ statement* ~ "}" }
    let body = pair
        .into_inner()
        .map(build_statement)
        .collect::<ParseResult<Vec<_>>>()?;
    Ok(Stmt::Block { body })
}

fn build_statement(pair: Pair<Rule>) -> ParseResult<Stmt> {
    let rule = pair.as_rule();
    let mut inner = pair.into_inner().filter(|p| !is_keyword(p.as_rule()));

    match rule {
        Rule::let_stmt => {
            // let_stmt = { kw_let ~ ident ~ ("=" ~ expr)? }
            let name = inner
                .next()
                .ok_or_else(|| ParseError::Build("let without a name".to_string()))?
                .as_str()
                .to_string();
            let init = inner.next().map(build_expression).transpose()?;
            Ok(Stmt::Declare { name, init })
        }
        Rule::assign_stmt => {
            // assign_stmt = { ident ~ accessor* ~ "=" ~ expr }
            let parts: Vec<Pair<Rule>> = inner.collect();
            let (value_pair, head) = parts
                .split_last()
                .ok_or_else(|| ParseError::Build("empty assignment".to_string()))?;
            let (var_pair, accessors) = head
                .split_first()
                .ok_or_else(|| ParseError::Build("assignment without target".to_string()))?;
            let path = accessors
                .iter()
                .cloned()
                .map(build_accessor)
                .collect::<ParseResult<Vec<_>>>()?;
            Ok(Stmt::Assign {
                var: var_pair.as_str().to_string(),
                path,
                value: build_expression(value_pair.clone())?,
            })
        }
        Rule::if_stmt => {
            // if_stmt = { kw_if ~ "(" ~ expr ~ ")" ~ block ~ (kw_else ~ (if_stmt | block))? }
            let test = build_expression(
                inner
                    .next()
                    .ok_or_else(|| ParseError::Build("if without condition".to_string()))?,
            )?;
            let then_s = build_block(
                inner
                    .next()
                    .ok_or_else(|| ParseError::Build("if without body".to_string()))?,
            )?;
            let else_s = match inner.next() {
                Some(p) if p.as_rule() == Rule::if_stmt => Some(Box::new(build_statement(p)?)),
                Some(p) => Some(Box::new(build_block(p)?)),
                None => None,
            };
            Ok(Stmt::If {
                test,
                then_s: Box::new(then_s),
                else_s,
            })
        }
        Rule::while_stmt => {
            let test = build_expression(
                inner
                    .next()
                    .ok_or_else(|| ParseError::Build("while without condition".to_string()))?,
            )?;
            let body = build_block(
                inner
                    .next()
                    .ok_or_else(|| ParseError::Build("while without body".to_string()))?,
            )?;
            Ok(Stmt::While {
                test,
                body: Box::new(body),
            })
        }
        Rule::for_stmt => {
            // for_stmt = { kw_for ~ "(" ~ kw_let? ~ ident ~ (kw_of | kw_in) ~ expr ~ ")" ~ block }
            let parts: Vec<Pair<Rule>> = inner.collect();
            match parts.as_slice() {
                [binding, kind, iterable, body] => Ok(Stmt::ForLoop {
                    kind: if kind.as_rule() == Rule::kw_in {
                        ForLoopKind::In
                    } else {
                        ForLoopKind::Of
                    },
                    binding: binding.as_str().to_string(),
                    iterable: build_expression(iterable.clone())?,
                    body: Box::new(build_block(body.clone())?),
                }),
                _ => Err(ParseError::Build("malformed for statement".to_string())),
            }
        }
        Rule::try_stmt => {
            let parts: Vec<Pair<Rule>> = inner.collect();
            match parts.as_slice() {
                [body, var, catch_body] if var.as_rule() == Rule::ident => Ok(Stmt::Try {
                    body: Box::new(build_block(body.clone())?),
                    catch_var: Some(var.as_str().to_string()),
                    catch_body: Box::new(build_block(catch_body.clone())?),
                }),
                [body, catch_body] => Ok(Stmt::Try {
                    body: Box::new(build_block(body.clone())?),
                    catch_var: None,
                    catch_body: Box::new(build_block(catch_body.clone())?),
                }),
                _ => Err(ParseError::Build("malformed try statement".to_string())),
            }
        }
        Rule::return_stmt => {
            let value = inner.next().map(build_expression).transpose()?;
            Ok(Stmt::Return { value })
        }
        Rule::break_stmt => Ok(Stmt::Break),
        Rule::continue_stmt => Ok(Stmt::Continue),
        Rule::expr_stmt => {
            let expr = build_expression(
                inner
                    .next()
                    .ok_or_else(|| ParseError::Build("empty expression".to_string()))?,
            )?;
            Ok(Stmt::Expr { expr })
        }
        other => Err(ParseError::Build(format!(
            "Unexpected statement rule: {:?}",
            other
        ))),
    }
}

fn build_accessor(pair: Pair<Rule>) -> ParseResult<Accessor> {
    let rule = pair.as_rule();
    let mut inner = pair.into_inner();
    let part = next_pair(&mut inner, "accessor")?;
    match rule {
        Rule::prop_access => Ok(Accessor::Prop {
            property: part.as_str().to_string(),
        }),
        Rule::index_access => Ok(Accessor::Index {
            expr: build_expression(part)?,
        }),
        other => Err(ParseError::Build(format!(
            "Unexpected accessor rule: {:?}",
            other
        ))),
    }
}

fn binary_op(pair: &Pair<Rule>) -> ParseResult<BinaryOp> {
    let op = match pair.as_str() {
        "??" => BinaryOp::Nullish,
        "||" => BinaryOp::Or,
        "&&" => BinaryOp::And,
        "==" => BinaryOp::Eq,
        "!=" => BinaryOp::Ne,
        "<" => BinaryOp::Lt,
        "<=" => BinaryOp::Le,
        ">" => BinaryOp::Gt,
        ">=" => BinaryOp::Ge,
        "+" => BinaryOp::Add,
        "-" => BinaryOp::Sub,
        "*" => BinaryOp::Mul,
        "/" => BinaryOp::Div,
        "%" => BinaryOp::Mod,
        other => {
            return Err(ParseError::Build(format!("Unknown operator '{}'", other)));
        }
    };
    Ok(op)
}

/// Fold `operand (op operand)*` left to right
fn build_binary_chain(pair: Pair<Rule>) -> ParseResult<Expr> {
    let mut inner = pair.into_inner();
    let mut left = build_expression(next_pair(&mut inner, "operand")?)?;

    while let Some(op_pair) = inner.next() {
        let op = binary_op(&op_pair)?;
        let right = build_expression(next_pair(&mut inner, "right operand")?)?;
        left = Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        };
    }

    Ok(left)
}

fn build_expression(pair: Pair<Rule>) -> ParseResult<Expr> {
    match pair.as_rule() {
        Rule::expr => {
            let mut inner = pair.into_inner();
            build_expression(next_pair(&mut inner, "expression")?)
        }
        Rule::ternary => {
            // ternary = { nullish ~ ("?" ~ expr ~ ":" ~ expr)? }
            let mut inner = pair.into_inner();
            let condition = build_expression(next_pair(&mut inner, "condition")?)?;
            match (inner.next(), inner.next()) {
                (Some(consequent), Some(alternate)) => Ok(Expr::Ternary {
                    condition: Box::new(condition),
                    consequent: Box::new(build_expression(consequent)?),
                    alternate: Box::new(build_expression(alternate)?),
                }),
                _ => Ok(condition),
            }
        }
        Rule::nullish
        | Rule::or_expr
        | Rule::and_expr
        | Rule::equality
        | Rule::comparison
        | Rule::additive
        | Rule::multiplicative => build_binary_chain(pair),
        Rule::unary => {
            // unary = { unary_op* ~ postfix }
            let parts: Vec<Pair<Rule>> = pair.into_inner().collect();
            let (operand, ops) = parts
                .split_last()
                .ok_or_else(|| ParseError::Build("empty unary expression".to_string()))?;
            let mut expr = build_expression(operand.clone())?;
            // Innermost operator is closest to the operand
            for op in ops.iter().rev() {
                let op = if op.as_str() == "!" {
                    UnaryOp::Not
                } else {
                    UnaryOp::Neg
                };
                expr = fold_unary(op, expr);
            }
            Ok(expr)
        }
        Rule::postfix => {
            // postfix = { primary ~ (prop_access | index_access)* }
            let mut inner = pair.into_inner();
            let mut expr = build_expression(next_pair(&mut inner, "primary")?)?;
            for access in inner {
                expr = match build_accessor(access)? {
                    Accessor::Prop { property } => Expr::Member {
                        object: Box::new(expr),
                        property,
                    },
                    Accessor::Index { expr: index } => Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    },
                };
            }
            Ok(expr)
        }
        Rule::call => {
            // call = { ident ~ "(" ~ (kwarg | expr)* ~ ")" }
            let mut inner = pair.into_inner();
            let callee = next_pair(&mut inner, "callee")?.as_str().to_string();
            let mut args = Vec::new();
            let mut kwargs: Vec<(String, Expr)> = Vec::new();
            for arg in inner {
                if arg.as_rule() == Rule::kwarg {
                    let mut kw = arg.into_inner();
                    let name = next_pair(&mut kw, "keyword name")?.as_str().to_string();
                    let value = build_expression(next_pair(&mut kw, "keyword value")?)?;
                    if kwargs.iter().any(|(existing, _)| *existing == name) {
                        return Err(ParseError::Build(format!(
                            "keyword argument repeated: {}",
                            name
                        )));
                    }
                    kwargs.push((name, value));
                } else {
                    if !kwargs.is_empty() {
                        return Err(ParseError::Build(
                            "positional argument follows keyword argument".to_string(),
                        ));
                    }
                    args.push(build_expression(arg)?);
                }
            }
            Ok(Expr::Call {
                callee,
                args,
                kwargs,
            })
        }
        Rule::ident => Ok(Expr::Ident {
            name: pair.as_str().to_string(),
        }),
        Rule::null_lit => Ok(Expr::LitNull),
        Rule::bool_lit => Ok(Expr::LitBool {
            v: matches!(pair.as_str(), "true" | "True"),
        }),
        Rule::number => {
            let text = pair.as_str();
            if let Ok(v) = text.parse::<i64>() {
                return Ok(Expr::LitInt { v });
            }
            let v = text.parse::<f64>().map_err(|e| {
                ParseError::Build(format!("Failed to parse number '{}': {}", text, e))
            })?;
            Ok(Expr::LitNum { v })
        }
        Rule::string => {
            let mut inner = pair.into_inner();
            let content = next_pair(&mut inner, "string content")?;
            Ok(Expr::LitStr {
                v: unescape(content.as_str()),
            })
        }
        Rule::list_lit => {
            let elements = pair
                .into_inner()
                .map(build_expression)
                .collect::<ParseResult<Vec<_>>>()?;
            Ok(Expr::LitList { elements })
        }
        Rule::obj_lit => {
            let mut properties = Vec::new();
            for prop in pair.into_inner() {
                let mut inner = prop.into_inner();
                let key_pair = next_pair(&mut inner, "object key")?;
                let key = if key_pair.as_rule() == Rule::string {
                    let mut key_inner = key_pair.into_inner();
                    unescape(next_pair(&mut key_inner, "object key")?.as_str())
                } else {
                    key_pair.as_str().to_string()
                };
                let value = build_expression(next_pair(&mut inner, "object value")?)?;
                properties.push((key, value));
            }
            Ok(Expr::LitObj { properties })
        }
        other => Err(ParseError::Build(format!(
            "Unexpected expression rule: {:?}",
            other
        ))),
    }
}

/// Negative numeric literals become literals rather than Neg expressions
fn fold_unary(op: UnaryOp, expr: Expr) -> Expr {
    match (op, expr) {
        (UnaryOp::Neg, Expr::LitInt { v }) if v != i64::MIN => Expr::LitInt { v: -v },
        (UnaryOp::Neg, Expr::LitNum { v }) => Expr::LitNum { v: -v },
        (op, expr) => Expr::Unary {
            op,
            operand: Box::new(expr),
        },
    }
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
