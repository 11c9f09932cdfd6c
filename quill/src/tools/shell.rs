//! Shell and git tools.
//!
//! All of them run a binary directly with an argument list, never a shell
//! interpreter and never string interpolation. `argv[0]` must be on the
//! configured whitelist. The git tools are thin argv builders over the same
//! run path; `git_commit` auto-initializes the repository when `.git` is
//! absent.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;

use crate::error::{Error, Result};

use super::{Capability, Tool, ToolCallContext, ToolOutput, ToolSpec};

pub const TOOL_RUN_SHELL: &str = "run_shell";
pub const TOOL_GIT_COMMIT: &str = "git_commit";
pub const TOOL_GIT_CREATE_BRANCH: &str = "git_create_branch";
pub const TOOL_GIT_STATUS: &str = "git_status";
pub const TOOL_GIT_DIFF: &str = "git_diff";
pub const TOOL_GIT_LOG: &str = "git_log";
pub const TOOL_GIT_BRANCHES: &str = "git_branches";

const OUTPUT_CAP_BYTES: usize = 256 * 1024;

/// Runs `argv` in `cwd` and returns combined output. Non-zero exit is a
/// `Tool` error carrying the output, which role loops feed back to the model.
pub(crate) async fn run_argv(argv: &[String], cwd: &Path) -> Result<String> {
    let (program, rest) = argv
        .split_first()
        .ok_or_else(|| Error::InvalidInput("empty argv".to_string()))?;
    let output = Command::new(program)
        .args(rest)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| Error::Tool(format!("spawn {program}: {e}")))?;

    let mut text = String::new();
    text.push_str(&String::from_utf8_lossy(&output.stdout));
    if !output.stderr.is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&String::from_utf8_lossy(&output.stderr));
    }
    if text.len() > OUTPUT_CAP_BYTES {
        text.truncate(OUTPUT_CAP_BYTES);
        text.push_str("\n[output truncated]");
    }
    if output.status.success() {
        Ok(text)
    } else {
        let code = output.status.code().unwrap_or(-1);
        Err(Error::Tool(format!("exit status {code}\n{text}")))
    }
}

fn whitelist_check(whitelist: &[String], program: &str) -> Result<()> {
    let base = Path::new(program)
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| program.to_string());
    if whitelist.iter().any(|w| *w == base) {
        Ok(())
    } else {
        Err(Error::NotPermitted(format!(
            "`{program}` is not on the shell whitelist"
        )))
    }
}

/// Whitelisted direct process execution: `{ "argv": ["git", "status"] }`.
pub struct RunShellTool {
    whitelist: Vec<String>,
}

impl RunShellTool {
    pub fn new(whitelist: Vec<String>) -> Self {
        Self { whitelist }
    }
}

#[async_trait]
impl Tool for RunShellTool {
    fn name(&self) -> &str {
        TOOL_RUN_SHELL
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_RUN_SHELL.to_string(),
            description: Some(
                "Run a whitelisted program with an argument list (no shell interpretation)."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "argv": {
                        "type": "array",
                        "description": "Program and arguments, e.g. [\"git\", \"status\"]."
                    }
                },
                "required": ["argv"]
            }),
        }
    }

    fn capability(&self) -> Capability {
        Capability::RunShell
    }

    async fn call(&self, args: Value, ctx: &ToolCallContext) -> Result<ToolOutput> {
        let argv: Vec<String> = args
            .get("argv")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect()
            })
            .ok_or_else(|| Error::InvalidInput("argv must be an array of strings".to_string()))?;
        let Some(program) = argv.first() else {
            return Err(Error::InvalidInput("argv must not be empty".to_string()));
        };
        whitelist_check(&self.whitelist, program)?;
        let text = run_argv(&argv, &ctx.workspace_root).await?;
        Ok(ToolOutput::text(text).with_side_effect(format!("exec:{program}")))
    }
}

/// Shared helper for the git tools: run `git <args>` in the workspace.
async fn run_git(ctx: &ToolCallContext, args: &[&str]) -> Result<String> {
    let mut argv = vec!["git".to_string()];
    argv.extend(args.iter().map(|s| s.to_string()));
    run_argv(&argv, &ctx.workspace_root).await
}

/// `git status --short`.
pub struct GitStatusTool;

#[async_trait]
impl Tool for GitStatusTool {
    fn name(&self) -> &str {
        TOOL_GIT_STATUS
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_GIT_STATUS.to_string(),
            description: Some("Show working tree status.".to_string()),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    fn capability(&self) -> Capability {
        Capability::RunShell
    }

    async fn call(&self, _args: Value, ctx: &ToolCallContext) -> Result<ToolOutput> {
        let text = run_git(ctx, &["status", "--short"]).await?;
        Ok(ToolOutput::text(if text.is_empty() {
            "clean working tree".to_string()
        } else {
            text
        }))
    }
}

/// `git diff`.
pub struct GitDiffTool;

#[async_trait]
impl Tool for GitDiffTool {
    fn name(&self) -> &str {
        TOOL_GIT_DIFF
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_GIT_DIFF.to_string(),
            description: Some("Show unstaged changes as a unified diff.".to_string()),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    fn capability(&self) -> Capability {
        Capability::RunShell
    }

    async fn call(&self, _args: Value, ctx: &ToolCallContext) -> Result<ToolOutput> {
        Ok(ToolOutput::text(run_git(ctx, &["diff"]).await?))
    }
}

/// `git log -n <n> --oneline`.
pub struct GitLogTool;

#[async_trait]
impl Tool for GitLogTool {
    fn name(&self) -> &str {
        TOOL_GIT_LOG
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_GIT_LOG.to_string(),
            description: Some("Show recent commits, one line each.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "n": { "type": "integer", "description": "Number of commits (default 10)." }
                }
            }),
        }
    }

    fn capability(&self) -> Capability {
        Capability::RunShell
    }

    async fn call(&self, args: Value, ctx: &ToolCallContext) -> Result<ToolOutput> {
        let n = args.get("n").and_then(|v| v.as_u64()).unwrap_or(10);
        let n_arg = n.to_string();
        Ok(ToolOutput::text(
            run_git(ctx, &["log", "-n", &n_arg, "--oneline"]).await?,
        ))
    }
}

/// `git branch --list`.
pub struct GitBranchesTool;

#[async_trait]
impl Tool for GitBranchesTool {
    fn name(&self) -> &str {
        TOOL_GIT_BRANCHES
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_GIT_BRANCHES.to_string(),
            description: Some("List local branches.".to_string()),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    fn capability(&self) -> Capability {
        Capability::RunShell
    }

    async fn call(&self, _args: Value, ctx: &ToolCallContext) -> Result<ToolOutput> {
        Ok(ToolOutput::text(run_git(ctx, &["branch", "--list"]).await?))
    }
}

/// `git checkout -b <name>`.
pub struct GitCreateBranchTool;

#[async_trait]
impl Tool for GitCreateBranchTool {
    fn name(&self) -> &str {
        TOOL_GIT_CREATE_BRANCH
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_GIT_CREATE_BRANCH.to_string(),
            description: Some("Create and switch to a new branch.".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": { "name": { "type": "string" } },
                "required": ["name"]
            }),
        }
    }

    fn capability(&self) -> Capability {
        Capability::GitMutate
    }

    async fn call(&self, args: Value, ctx: &ToolCallContext) -> Result<ToolOutput> {
        let name = args
            .get("name")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("missing argument `name`".to_string()))?;
        let text = run_git(ctx, &["checkout", "-b", name]).await?;
        Ok(ToolOutput::text(text).with_side_effect(format!("branch:{name}")))
    }
}

/// Stage everything and commit. Initializes the repository first when `.git`
/// is absent.
pub struct GitCommitTool;

#[async_trait]
impl Tool for GitCommitTool {
    fn name(&self) -> &str {
        TOOL_GIT_COMMIT
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_GIT_COMMIT.to_string(),
            description: Some(
                "Stage all changes and commit with the given message. Initializes the repo if needed."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": { "message": { "type": "string" } },
                "required": ["message"]
            }),
        }
    }

    fn capability(&self) -> Capability {
        Capability::GitMutate
    }

    async fn call(&self, args: Value, ctx: &ToolCallContext) -> Result<ToolOutput> {
        let message = args
            .get("message")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("missing argument `message`".to_string()))?;
        if message.trim().is_empty() {
            return Err(Error::InvalidInput("commit message must not be empty".to_string()));
        }
        if !ctx.workspace_root.join(".git").exists() {
            run_git(ctx, &["init"]).await?;
        }
        run_git(ctx, &["add", "-A"]).await?;
        // Identity is pinned per command so commits work in fresh clones too.
        run_git(
            ctx,
            &[
                "-c",
                "user.email=quill@localhost",
                "-c",
                "user.name=quill",
                "commit",
                "-m",
                message,
            ],
        )
        .await?;
        let hash = run_git(ctx, &["rev-parse", "HEAD"]).await?;
        let hash = hash.trim().to_string();
        Ok(ToolOutput::text(format!("committed {hash}")).with_side_effect(format!("commit:{hash}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::SensitivePaths;
    use std::sync::Arc;

    fn ctx(root: &Path) -> ToolCallContext {
        ToolCallContext::new(root, Arc::new(SensitivePaths::default()), "test")
    }

    #[test]
    fn whitelist_rejects_interpreters() {
        let whitelist = vec!["git".to_string(), "pytest".to_string()];
        assert!(whitelist_check(&whitelist, "git").is_ok());
        assert!(whitelist_check(&whitelist, "/usr/bin/git").is_ok());
        assert!(whitelist_check(&whitelist, "bash").is_err());
        assert!(whitelist_check(&whitelist, "sh").is_err());
        assert!(whitelist_check(&whitelist, "python3").is_err());
    }

    #[tokio::test]
    async fn run_shell_rejects_non_whitelisted_program() {
        let ws = tempfile::tempdir().unwrap();
        let tool = RunShellTool::new(vec!["git".to_string()]);
        let err = tool
            .call(json!({"argv": ["rm", "-rf", "/"]}), &ctx(ws.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotPermitted(_)));
    }

    #[tokio::test]
    async fn run_shell_rejects_empty_argv() {
        let ws = tempfile::tempdir().unwrap();
        let tool = RunShellTool::new(vec!["git".to_string()]);
        let err = tool.call(json!({"argv": []}), &ctx(ws.path())).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn git_commit_auto_initializes_and_reports_hash() {
        let ws = tempfile::tempdir().unwrap();
        std::fs::write(ws.path().join("a.py"), "x = 1\n").unwrap();
        let out = GitCommitTool
            .call(json!({"message": "first"}), &ctx(ws.path()))
            .await
            .unwrap();
        assert!(out.text.starts_with("committed "));
        let effect = out.side_effect.unwrap();
        assert!(effect.starts_with("commit:"));
        assert!(effect.len() > "commit:".len() + 6);
        assert!(ws.path().join(".git").exists());
    }

    #[tokio::test]
    async fn git_status_reports_modified_file() {
        let ws = tempfile::tempdir().unwrap();
        std::fs::write(ws.path().join("a.py"), "x = 1\n").unwrap();
        GitCommitTool
            .call(json!({"message": "first"}), &ctx(ws.path()))
            .await
            .unwrap();
        std::fs::write(ws.path().join("a.py"), "x = 2\n").unwrap();

        let out = GitStatusTool.call(json!({}), &ctx(ws.path())).await.unwrap();
        assert!(out.text.contains("a.py"));
    }

    #[tokio::test]
    async fn git_create_branch_switches() {
        let ws = tempfile::tempdir().unwrap();
        std::fs::write(ws.path().join("a.py"), "x = 1\n").unwrap();
        GitCommitTool
            .call(json!({"message": "first"}), &ctx(ws.path()))
            .await
            .unwrap();
        GitCreateBranchTool
            .call(json!({"name": "feature/x"}), &ctx(ws.path()))
            .await
            .unwrap();
        let out = GitBranchesTool.call(json!({}), &ctx(ws.path())).await.unwrap();
        assert!(out.text.contains("feature/x"));
    }

    #[tokio::test]
    async fn failing_command_is_a_tool_error_with_output() {
        let ws = tempfile::tempdir().unwrap();
        // No repository here, so `git log` fails intrinsically.
        let err = GitLogTool.call(json!({}), &ctx(ws.path())).await.unwrap_err();
        match err {
            Error::Tool(text) => assert!(text.contains("exit status")),
            other => panic!("expected Tool error, got {other:?}"),
        }
    }
}
