//! Tool registry contract
//!
//! Scripts reach host functionality only through a `ToolRegistry`: every
//! external function a script calls is looked up by name and invoked with
//! JSON arguments. `ToolSet` is the in-process registry used by the CLI and
//! tests.

pub mod builtin;
pub mod preamble;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Name of the tool the model uses to submit a script block. Never exposed
/// to scripts as an external function.
pub const RUN_SCRIPT_TOOL: &str = "run_script";

/* ===================== Wire Types ===================== */

/// Tool description with a JSON Schema object for its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: JsonValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
}

/// Message content returned to the conversation for one tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolMessage {
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
            is_error: true,
        }
    }

    /// Text blocks joined by newlines
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    pub message: ToolMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typed_result: Option<JsonValue>,
}

impl ToolExecutionResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            message: ToolMessage::text(text),
            typed_result: None,
        }
    }

    pub fn typed(text: impl Into<String>, typed_result: JsonValue) -> Self {
        Self {
            message: ToolMessage::text(text),
            typed_result: Some(typed_result),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            message: ToolMessage::error(text),
            typed_result: None,
        }
    }
}

/// Context handed to every tool invocation
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub session_id: String,
    /// Id of the script block whose run made the call
    pub call_id: String,
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    pub fn new(session_id: impl Into<String>, call_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            call_id: call_id.into(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/* ===================== Errors ===================== */

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// Cooperative cancellation. Not a tool failure.
    #[error("Operation aborted.")]
    Aborted,
    #[error("{0}")]
    Failed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/* ===================== Registry ===================== */

#[async_trait]
pub trait ToolRegistry: Send + Sync {
    fn lookup(&self, name: &str) -> Option<ToolSchema>;

    /// All tools, in registration order
    fn list(&self) -> Vec<ToolSchema>;

    async fn invoke(
        &self,
        name: &str,
        args: JsonValue,
        ctx: &ExecutionContext,
    ) -> Result<ToolExecutionResult, ToolError>;

    /// Names scripts may call as external functions
    fn external_names(&self) -> Vec<String> {
        self.list()
            .into_iter()
            .map(|schema| schema.name)
            .filter(|name| name != RUN_SCRIPT_TOOL)
            .collect()
    }
}

/// A single host tool
#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;

    async fn call(
        &self,
        args: JsonValue,
        ctx: &ExecutionContext,
    ) -> Result<ToolExecutionResult, ToolError>;
}

/// Registry backed by a list of `Tool` implementations
#[derive(Clone, Default)]
pub struct ToolSet {
    order: Vec<String>,
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A later tool with the same name replaces the earlier one.
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.insert(Arc::new(tool));
        self
    }

    pub fn insert(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.schema().name;
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, tool);
    }
}

#[async_trait]
impl ToolRegistry for ToolSet {
    fn lookup(&self, name: &str) -> Option<ToolSchema> {
        self.tools.get(name).map(|tool| tool.schema())
    }

    fn list(&self) -> Vec<ToolSchema> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| tool.schema())
            .collect()
    }

    async fn invoke(
        &self,
        name: &str,
        args: JsonValue,
        ctx: &ExecutionContext,
    ) -> Result<ToolExecutionResult, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::Failed(format!("Unknown tool: {}", name)))?;
        tool.call(args, ctx).await
    }
}
