//! Shared helpers for unit tests

use crate::tools::{ExecutionContext, Tool, ToolError, ToolExecutionResult, ToolSchema};
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type Handler = dyn Fn(JsonValue) -> Result<ToolExecutionResult, ToolError> + Send + Sync;

/// Tool backed by a closure, counting its invocations
#[derive(Clone)]
pub struct FnTool {
    name: String,
    params: Vec<&'static str>,
    handler: Arc<Handler>,
    pub calls: Arc<AtomicUsize>,
}

impl FnTool {
    /// Tool whose parameters are all required, in the given order
    pub fn new(
        name: &str,
        params: &[&'static str],
        handler: impl Fn(JsonValue) -> Result<ToolExecutionResult, ToolError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            params: params.to_vec(),
            handler: Arc::new(handler),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for FnTool {
    fn schema(&self) -> ToolSchema {
        let properties: serde_json::Map<String, JsonValue> = self
            .params
            .iter()
            .map(|p| (p.to_string(), json!({})))
            .collect();
        ToolSchema {
            name: self.name.clone(),
            description: format!("Test tool {}", self.name),
            parameters: json!({
                "type": "object",
                "properties": properties,
                "required": self.params,
            }),
        }
    }

    async fn call(
        &self,
        args: JsonValue,
        _ctx: &ExecutionContext,
    ) -> Result<ToolExecutionResult, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.handler)(args)
    }
}

/// Tool that answers with `{"text": <value>}` as a typed result
pub fn text_tool(name: &str, value: &'static str) -> FnTool {
    FnTool::new(name, &[], move |_| {
        Ok(ToolExecutionResult::typed(value, json!({ "text": value })))
    })
}

/// Tool that returns its first argument `x` doubled
pub fn double_tool() -> FnTool {
    FnTool::new("double", &["x"], |args| {
        let x = args.get("x").and_then(JsonValue::as_i64).unwrap_or(0);
        Ok(ToolExecutionResult::typed((x * 2).to_string(), json!(x * 2)))
    })
}

/// Tool that cancels the run it was called from, as a user interrupt would
#[derive(Clone)]
pub struct InterruptingTool {
    name: String,
    pub calls: Arc<AtomicUsize>,
}

impl InterruptingTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Tool for InterruptingTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: "Interrupted while running".to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
        }
    }

    async fn call(
        &self,
        _args: JsonValue,
        ctx: &ExecutionContext,
    ) -> Result<ToolExecutionResult, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ctx.cancel.cancel();
        Err(ToolError::Aborted)
    }
}
