//! Built-in host tools used by the CLI
//!
//! File tools are confined to a root directory; paths that would escape it
//! are rejected.

use super::{ExecutionContext, Tool, ToolError, ToolExecutionResult, ToolSchema, ToolSet};
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::path::{Component, Path, PathBuf};

/// The default tool set rooted at `root`
pub fn host_tools(root: impl Into<PathBuf>) -> ToolSet {
    let root = root.into();
    ToolSet::new()
        .with(EchoTool)
        .with(ReadFileTool { root: root.clone() })
        .with(WriteFileTool { root: root.clone() })
        .with(ListDirTool { root })
}

fn string_arg<'a>(args: &'a JsonValue, name: &str) -> Result<&'a str, ToolError> {
    args.get(name)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| ToolError::Failed(format!("missing string argument '{}'", name)))
}

/// Join a relative path onto `root` without allowing `..` or absolute paths
fn resolve_secure(root: &Path, requested: &str) -> Result<PathBuf, ToolError> {
    let mut resolved = root.to_path_buf();
    for component in Path::new(requested).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => {
                return Err(ToolError::Failed(format!(
                    "path '{}' is outside the workspace",
                    requested
                )));
            }
        }
    }
    Ok(resolved)
}

/* ===================== echo ===================== */

pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "echo".to_string(),
            description: "Return the given text unchanged.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }),
        }
    }

    async fn call(
        &self,
        args: JsonValue,
        _ctx: &ExecutionContext,
    ) -> Result<ToolExecutionResult, ToolError> {
        let text = string_arg(&args, "text")?;
        Ok(ToolExecutionResult::text(text))
    }
}

/* ===================== read_file ===================== */

pub struct ReadFileTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "read_file".to_string(),
            description: "Read a UTF-8 text file relative to the workspace.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"]
            }),
        }
    }

    async fn call(
        &self,
        args: JsonValue,
        ctx: &ExecutionContext,
    ) -> Result<ToolExecutionResult, ToolError> {
        let path = resolve_secure(&self.root, string_arg(&args, "path")?)?;
        let content = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(ToolError::Aborted),
            content = tokio::fs::read_to_string(&path) => content?,
        };
        Ok(ToolExecutionResult::text(content))
    }
}

/* ===================== write_file ===================== */

pub struct WriteFileTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "write_file".to_string(),
            description: "Write text to a file relative to the workspace, creating parent directories.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["path", "content"]
            }),
        }
    }

    async fn call(
        &self,
        args: JsonValue,
        _ctx: &ExecutionContext,
    ) -> Result<ToolExecutionResult, ToolError> {
        let path = resolve_secure(&self.root, string_arg(&args, "path")?)?;
        let content = string_arg(&args, "content")?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        Ok(ToolExecutionResult::typed(
            format!("Wrote {} bytes.", content.len()),
            json!({ "bytes": content.len() }),
        ))
    }
}

/* ===================== list_dir ===================== */

pub struct ListDirTool {
    pub root: PathBuf,
}

#[async_trait]
impl Tool for ListDirTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "list_dir".to_string(),
            description: "List entry names in a directory relative to the workspace.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": []
            }),
        }
    }

    async fn call(
        &self,
        args: JsonValue,
        _ctx: &ExecutionContext,
    ) -> Result<ToolExecutionResult, ToolError> {
        let requested = args.get("path").and_then(JsonValue::as_str).unwrap_or(".");
        let path = resolve_secure(&self.root, requested)?;

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = dir.next_entry().await? {
            entries.push(entry.file_name().to_string_lossy().into_owned());
        }
        entries.sort();

        Ok(ToolExecutionResult::typed(entries.join("\n"), json!(entries)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_file_tools_round_trip_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let tools = host_tools(dir.path());
        let ctx = ExecutionContext::new("s", "c");

        tools
            .invoke(
                "write_file",
                json!({"path": "notes/a.txt", "content": "hello"}),
                &ctx,
            )
            .await
            .unwrap();
        let read = tools
            .invoke("read_file", json!({"path": "notes/a.txt"}), &ctx)
            .await
            .unwrap();
        assert_eq!(read.message.joined_text(), "hello");

        let listing = tools
            .invoke("list_dir", json!({"path": "notes"}), &ctx)
            .await
            .unwrap();
        assert_eq!(listing.typed_result, Some(json!(["a.txt"])));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_paths_outside_root_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let tools = host_tools(dir.path());
        let ctx = ExecutionContext::new("s", "c");

        let err = tools
            .invoke("read_file", json!({"path": "../secret"}), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("outside the workspace"));
    }

    #[test]
    fn test_run_script_is_not_an_external_name() {
        let tools = host_tools(".");
        let names = tools.external_names();
        assert_eq!(names, vec!["echo", "read_file", "write_file", "list_dir"]);
    }
}
