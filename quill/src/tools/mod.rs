//! Typed tools with JSON-shaped arguments, invoked by role agents.
//!
//! Every tool declares a [`ToolSpec`] (name, description, input schema) and a
//! [`Capability`] tag. The [`ToolRegistry`] validates arguments before any
//! side effect, enforces the process-wide in-flight cap and per-call deadline,
//! and writes an audit line for every mutating invocation and every policy
//! rejection.

mod context;
mod fs;
mod http;
mod path;
mod python;
mod registry;
mod shell;

pub use context::ToolCallContext;
pub use fs::{
    ListFilesTool, ReadFileTool, WriteFileTool, TOOL_LIST_FILES, TOOL_READ_FILE, TOOL_WRITE_FILE,
};
pub use http::{HttpRequestTool, TOOL_HTTP_REQUEST};
pub use path::{resolve_under, SensitivePaths};
pub use python::{RunPythonTool, TOOL_RUN_PYTHON};
pub use registry::ToolRegistry;
pub use shell::{
    GitBranchesTool, GitCommitTool, GitCreateBranchTool, GitDiffTool, GitLogTool, GitStatusTool,
    RunShellTool, TOOL_GIT_BRANCHES, TOOL_GIT_COMMIT, TOOL_GIT_CREATE_BRANCH, TOOL_GIT_DIFF,
    TOOL_GIT_LOG, TOOL_GIT_STATUS, TOOL_RUN_SHELL,
};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Tool specification surfaced to the model: name, description, and the JSON
/// schema its arguments must satisfy.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Capability class of a tool. Mutating classes (`WriteFs`, `RunShell`,
/// `GitMutate`) always leave an audit line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Capability {
    ReadFs,
    WriteFs,
    RunCode,
    RunShell,
    GitMutate,
    HttpOut,
}

impl Capability {
    pub fn is_audited(&self) -> bool {
        matches!(
            self,
            Capability::WriteFs | Capability::RunShell | Capability::GitMutate
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::ReadFs => "read_fs",
            Capability::WriteFs => "write_fs",
            Capability::RunCode => "run_code",
            Capability::RunShell => "run_shell",
            Capability::GitMutate => "git_mutate",
            Capability::HttpOut => "http_out",
        }
    }
}

/// Tool output: result text plus an optional side-effect descriptor (file
/// written, commit hash, HTTP target) recorded in the audit detail.
#[derive(Clone, Debug, Default)]
pub struct ToolOutput {
    pub text: String,
    pub side_effect: Option<String>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            side_effect: None,
        }
    }

    pub fn with_side_effect(mut self, effect: impl Into<String>) -> Self {
        self.side_effect = Some(effect.into());
        self
    }
}

/// A named, whitelisted, side-effecting operation.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn spec(&self) -> ToolSpec;

    fn capability(&self) -> Capability;

    /// Executes with validated arguments. Policy violations return
    /// `NotPermitted`; intrinsic failures (failing tests, bad exit codes)
    /// return `Tool`, which role loops feed back to the model.
    async fn call(&self, args: Value, ctx: &ToolCallContext) -> Result<ToolOutput>;
}
