//! Value bridge between script values and the tool wire format
//!
//! - `args_convert` binds a pending call's arguments to a tool's JSON Schema
//! - `result_convert` turns a tool result back into a script value
//! - `value_format` renders values for printed output and conversation text

use crate::engine::types::Val;
use crate::tools::{ToolExecutionResult, ToolSchema};
use serde_json::{Map, Number, Value as JsonValue};
use std::collections::BTreeMap;

/// Nesting deeper than this is rejected when converting arguments
pub const MAX_ARG_DEPTH: usize = 64;

/// Largest integer a JSON consumer can represent exactly as a double
const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    #[error("{tool}() takes {expected} positional argument(s) but {given} were given")]
    TooManyArguments {
        tool: String,
        expected: usize,
        given: usize,
    },
    #[error("argument nesting exceeds {0} levels")]
    TooDeep(usize),
}

/* ===================== Arguments ===================== */

/// Parameter names in binding order: required parameters first, then
/// optional ones, each group in declaration order.
pub fn parameter_order(schema: &ToolSchema) -> Vec<(String, bool)> {
    let required: Vec<&str> = schema
        .parameters
        .get("required")
        .and_then(JsonValue::as_array)
        .map(|names| names.iter().filter_map(JsonValue::as_str).collect())
        .unwrap_or_default();

    let declared: Vec<&String> = schema
        .parameters
        .get("properties")
        .and_then(JsonValue::as_object)
        .map(|props| props.keys().collect())
        .unwrap_or_default();

    let (mut order, optional): (Vec<_>, Vec<_>) = declared
        .into_iter()
        .map(|name| (name.clone(), required.contains(&name.as_str())))
        .partition(|(_, is_required)| *is_required);
    order.extend(optional);
    order
}

/// Convert a pending call's arguments into the JSON object a tool receives
///
/// Positional arguments bind in `parameter_order`; named arguments override
/// positionally bound values.
pub fn args_convert(
    args: &[Val],
    kwargs: &BTreeMap<String, Val>,
    schema: &ToolSchema,
) -> Result<JsonValue, BridgeError> {
    let order = parameter_order(schema);
    if args.len() > order.len() {
        return Err(BridgeError::TooManyArguments {
            tool: schema.name.clone(),
            expected: order.len(),
            given: args.len(),
        });
    }

    let mut out = Map::new();
    for ((name, _), value) in order.iter().zip(args) {
        out.insert(name.clone(), val_to_wire(value, 0)?);
    }
    for (name, value) in kwargs {
        out.insert(name.clone(), val_to_wire(value, 0)?);
    }

    Ok(JsonValue::Object(out))
}

/// Wire conversion for tool arguments: depth guarded, unsafe integers become strings
fn val_to_wire(v: &Val, depth: usize) -> Result<JsonValue, BridgeError> {
    if depth > MAX_ARG_DEPTH {
        return Err(BridgeError::TooDeep(MAX_ARG_DEPTH));
    }
    let json = match v {
        Val::Int(n) if !(-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(n) => {
            JsonValue::String(n.to_string())
        }
        Val::List(items) => JsonValue::Array(
            items
                .iter()
                .map(|item| val_to_wire(item, depth + 1))
                .collect::<Result<_, _>>()?,
        ),
        Val::Obj(map) => {
            let mut out = Map::new();
            for (key, value) in map {
                out.insert(key.clone(), val_to_wire(value, depth + 1)?);
            }
            JsonValue::Object(out)
        }
        other => val_to_json(other),
    };
    Ok(json)
}

/* ===================== JSON ===================== */

pub fn val_to_json(v: &Val) -> JsonValue {
    match v {
        Val::Null => JsonValue::Null,
        Val::Bool(b) => JsonValue::Bool(*b),
        Val::Int(n) => JsonValue::Number((*n).into()),
        Val::Num(n) => Number::from_f64(*n)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Val::Str(s) => JsonValue::String(s.clone()),
        Val::List(items) => JsonValue::Array(items.iter().map(val_to_json).collect()),
        Val::Obj(map) => JsonValue::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), val_to_json(value)))
                .collect(),
        ),
        Val::Error(info) => {
            let mut out = Map::new();
            out.insert("error".to_string(), JsonValue::String(info.code.clone()));
            out.insert(
                "message".to_string(),
                JsonValue::String(info.message.clone()),
            );
            JsonValue::Object(out)
        }
    }
}

pub fn json_to_val(json: &JsonValue) -> Val {
    match json {
        JsonValue::Null => Val::Null,
        JsonValue::Bool(b) => Val::Bool(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => Val::Int(i),
            None => Val::Num(n.as_f64().unwrap_or(f64::NAN)),
        },
        JsonValue::String(s) => Val::Str(s.clone()),
        JsonValue::Array(items) => Val::List(items.iter().map(json_to_val).collect()),
        JsonValue::Object(map) => Val::Obj(
            map.iter()
                .map(|(key, value)| (key.clone(), json_to_val(value)))
                .collect(),
        ),
    }
}

/* ===================== Results ===================== */

/// Convert a tool result into the value the script receives
///
/// A typed result wins; otherwise text blocks are joined with newlines.
pub fn result_convert(result: &ToolExecutionResult) -> Val {
    match &result.typed_result {
        Some(typed) => json_to_val(typed),
        None => Val::Str(result.message.joined_text()),
    }
}

/* ===================== Formatting ===================== */

/// Deterministic text rendering of a value
pub fn value_format(v: &Val) -> String {
    match v {
        Val::Null => String::new(),
        Val::Bool(b) => b.to_string(),
        Val::Int(n) => n.to_string(),
        Val::Num(n) => number_format(*n),
        Val::Str(s) => s.clone(),
        Val::List(items) => items
            .iter()
            .map(value_format)
            .collect::<Vec<_>>()
            .join(", "),
        // BTreeMap iteration is sorted, so the JSON text is too
        Val::Obj(_) => val_to_json(v).to_string(),
        Val::Error(info) => info.to_string(),
    }
}

fn number_format(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e16 {
        return format!("{}", n as i64);
    }
    n.to_string()
}
