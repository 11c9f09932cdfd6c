//! File tools: read, write, list. Paths are resolved under the call's
//! workspace root and checked against the sensitive set before any I/O.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{Error, Result};

use super::{Capability, Tool, ToolCallContext, ToolOutput, ToolSpec};

pub const TOOL_READ_FILE: &str = "read_file";
pub const TOOL_WRITE_FILE: &str = "write_file";
pub const TOOL_LIST_FILES: &str = "list_files";

const READ_CAP_BYTES: u64 = 1024 * 1024;

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::InvalidInput(format!("missing argument `{key}`")))
}

/// Reads a text file under the workspace root.
pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        TOOL_READ_FILE
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_READ_FILE.to_string(),
            description: Some(
                "Read a UTF-8 text file. Path is relative to the workspace root.".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File path relative to the workspace root." }
                },
                "required": ["path"]
            }),
        }
    }

    fn capability(&self) -> Capability {
        Capability::ReadFs
    }

    async fn call(&self, args: Value, ctx: &ToolCallContext) -> Result<ToolOutput> {
        let path_arg = str_arg(&args, "path")?;
        let path = ctx.sensitive.check(&ctx.workspace_root, path_arg)?;
        let meta = std::fs::metadata(&path)
            .map_err(|e| Error::InvalidInput(format!("{path_arg}: {e}")))?;
        if !meta.is_file() {
            return Err(Error::InvalidInput(format!("not a file: {path_arg}")));
        }
        if meta.len() > READ_CAP_BYTES {
            return Err(Error::InvalidInput(format!(
                "file too large to read: {path_arg} ({} bytes)",
                meta.len()
            )));
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Tool(format!("read {path_arg}: {e}")))?;
        Ok(ToolOutput::text(content))
    }
}

/// Writes a text file under the workspace root, creating parents as needed.
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        TOOL_WRITE_FILE
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_WRITE_FILE.to_string(),
            description: Some(
                "Write content to a file. Path is relative to the workspace root; parent directories are created."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["path", "content"]
            }),
        }
    }

    fn capability(&self) -> Capability {
        Capability::WriteFs
    }

    async fn call(&self, args: Value, ctx: &ToolCallContext) -> Result<ToolOutput> {
        let path_arg = str_arg(&args, "path")?;
        let content = str_arg(&args, "content")?;
        let path = ctx.sensitive.check(&ctx.workspace_root, path_arg)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Tool(format!("create parents for {path_arg}: {e}")))?;
        }
        std::fs::write(&path, content)
            .map_err(|e| Error::Tool(format!("write {path_arg}: {e}")))?;
        Ok(
            ToolOutput::text(format!("wrote {} bytes to {path_arg}", content.len()))
                .with_side_effect(format!("file:{path_arg}")),
        )
    }
}

/// Lists files under a workspace-relative directory, one path per line.
pub struct ListFilesTool;

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        TOOL_LIST_FILES
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_LIST_FILES.to_string(),
            description: Some(
                "List files under a directory (recursive), relative to the workspace root."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "root": { "type": "string", "description": "Directory to list; defaults to the workspace root." }
                }
            }),
        }
    }

    fn capability(&self) -> Capability {
        Capability::ReadFs
    }

    async fn call(&self, args: Value, ctx: &ToolCallContext) -> Result<ToolOutput> {
        let root_arg = args.get("root").and_then(|v| v.as_str()).unwrap_or(".");
        let root = ctx.sensitive.check(&ctx.workspace_root, root_arg)?;
        if !root.is_dir() {
            return Err(Error::InvalidInput(format!("not a directory: {root_arg}")));
        }
        let mut lines = Vec::new();
        for entry in walkdir::WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&ctx.workspace_root.as_path())
                .unwrap_or(entry.path())
                .to_string_lossy()
                .to_string();
            if ctx.sensitive.is_sensitive(&rel) {
                continue;
            }
            lines.push(rel);
        }
        lines.sort();
        Ok(ToolOutput::text(lines.join("\n")))
    }
}
