//! Sandboxed Python execution.
//!
//! Each call gets a fresh scratch directory that is removed on exit in all
//! paths (owned `TempDir`). The interpreter runs in isolated mode with a
//! scrubbed environment and an in-process address-space limit installed by a
//! preamble before the user code. The registry's deadline kills the process
//! on timeout via `kill_on_drop`.

use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{Error, Result};

use super::{Capability, Tool, ToolCallContext, ToolOutput, ToolSpec};

pub const TOOL_RUN_PYTHON: &str = "run_python";

const MEMORY_CAP_BYTES: u64 = 256 * 1024 * 1024;
const OUTPUT_CAP_BYTES: usize = 256 * 1024;

/// Resource-limit preamble prepended to the user code.
fn limit_preamble() -> String {
    format!(
        "import resource as __r\n\
         try:\n    __r.setrlimit(__r.RLIMIT_AS, ({MEMORY_CAP_BYTES}, {MEMORY_CAP_BYTES}))\n\
         except Exception:\n    pass\n\
         del __r\n"
    )
}

pub struct RunPythonTool {
    interpreter: String,
}

impl RunPythonTool {
    pub fn new() -> Self {
        Self {
            interpreter: "python3".to_string(),
        }
    }

    pub fn with_interpreter(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }
}

impl Default for RunPythonTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for RunPythonTool {
    fn name(&self) -> &str {
        TOOL_RUN_PYTHON
    }

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: TOOL_RUN_PYTHON.to_string(),
            description: Some(
                "Run Python code in an isolated scratch directory with no environment and a memory cap."
                    .to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "code": { "type": "string" },
                    "stdin": { "type": "string", "description": "Optional standard input." }
                },
                "required": ["code"]
            }),
        }
    }

    fn capability(&self) -> Capability {
        Capability::RunCode
    }

    async fn call(&self, args: Value, _ctx: &ToolCallContext) -> Result<ToolOutput> {
        let code = args
            .get("code")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::InvalidInput("missing argument `code`".to_string()))?;
        let stdin_text = args.get("stdin").and_then(|v| v.as_str()).unwrap_or("");

        // Scratch directory removed on drop, success or failure alike.
        let scratch = tempfile::tempdir()
            .map_err(|e| Error::Internal(format!("create scratch dir: {e}")))?;
        let script = scratch.path().join("main.py");
        std::fs::write(&script, format!("{}{}", limit_preamble(), code))
            .map_err(|e| Error::Internal(format!("write script: {e}")))?;

        let mut child = Command::new(&self.interpreter)
            .arg("-I") // isolated: no site dir, no user env vars in sys.path
            .arg(&script)
            .current_dir(scratch.path())
            .env_clear()
            .env("PATH", "/usr/bin:/bin")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Tool(format!("spawn {}: {e}", self.interpreter)))?;

        if let Some(mut handle) = child.stdin.take() {
            let _ = handle.write_all(stdin_text.as_bytes()).await;
            drop(handle);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| Error::Tool(format!("wait for python: {e}")))?;

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
            Ok(ToolOutput::text(text))
        } else {
            let code = output.status.code().unwrap_or(-1);
            Err(Error::Tool(format!("exit status {code}\n{text}")))
        }
    }
}
