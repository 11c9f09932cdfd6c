//! Test-and-fix loop.
//!
//! Repeat up to the cap: run the test command; on green, stop; on red, hand
//! the failing output to the coder role and apply its patch in the workspace;
//! go again. Exhaustion yields `Unfixed` with the last failing output; that
//! is an outcome, not an error. Auto-commit is opt-in per task and goes
//! through the audited `git_commit` tool.

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{Error, Result};
use crate::roles::{run_role, RoleInput, RoleKind, RoleProfile, RoleServices};
use crate::tools::{ToolCallContext, TOOL_GIT_COMMIT, TOOL_RUN_SHELL};

use super::{observe_task, RoleTiming};

#[derive(Clone, Debug)]
pub struct FixLoopConfig {
    pub max_iterations: usize,
    /// Test command, e.g. `["pytest", "-q"]`. Must be on the shell whitelist.
    pub test_argv: Vec<String>,
    /// Off by default; when set, a green run commits with this message.
    pub autocommit: Option<String>,
}

impl Default for FixLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            test_argv: vec!["pytest".to_string(), "-q".to_string()],
            autocommit: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FixOutcome {
    /// Tests pass. `iterations` counts coder rounds that were needed (0 when
    /// the suite was already green).
    Fixed { iterations: usize },
    /// Cap exhausted; carries the latest failing output.
    Unfixed { last_output: String },
}

#[derive(Clone, Debug)]
pub struct FixReport {
    pub outcome: FixOutcome,
    pub timings: Vec<RoleTiming>,
    /// Transcript of each test run, oldest first.
    pub transcript: Vec<String>,
}

/// Runs the test command through the registry's shell tool. `Ok` text means
/// green; a `Tool` error carries the red output.
async fn run_tests(
    services: &RoleServices,
    config: &FixLoopConfig,
    tool_ctx: &ToolCallContext,
) -> Result<std::result::Result<String, String>> {
    let args = json!({ "argv": config.test_argv });
    match services.tools.invoke(TOOL_RUN_SHELL, args, tool_ctx).await {
        Ok(out) => Ok(Ok(out.text)),
        Err(Error::Tool(output)) => Ok(Err(output)),
        Err(e) => Err(e),
    }
}

pub async fn run_test_fix(
    services: &RoleServices,
    config: &FixLoopConfig,
    base_input: RoleInput,
    tool_ctx: &ToolCallContext,
    cancel: &CancellationToken,
) -> Result<FixReport> {
    let coder = RoleProfile::for_kind(RoleKind::Coder);
    let mut timings = Vec::new();
    let mut transcript = Vec::new();
    let mut last_output = String::new();

    for iteration in 0..=config.max_iterations {
        if cancel.is_cancelled() {
            observe_task("test_fix", "cancelled");
            return Err(Error::Timeout {
                what: "test-and-fix cancelled".to_string(),
                elapsed_ms: 0,
            });
        }

        match run_tests(services, config, tool_ctx).await? {
            Ok(output) => {
                transcript.push(output);
                if let Some(message) = &config.autocommit {
                    services
                        .tools
                        .invoke(TOOL_GIT_COMMIT, json!({ "message": message }), tool_ctx)
                        .await?;
                }
                info!(iteration, "tests green");
                observe_task("test_fix", "fixed");
                return Ok(FixReport {
                    outcome: FixOutcome::Fixed {
                        iterations: iteration,
                    },
                    timings,
                    transcript,
                });
            }
            Err(failing) => {
                transcript.push(failing.clone());
                last_output = failing;
            }
        }

        if iteration == config.max_iterations {
            break;
        }

        let started = std::time::Instant::now();
        let input = RoleInput {
            memory_section: base_input.memory_section.clone(),
            code_section: base_input.code_section.clone(),
            recent: Vec::new(),
            input: format!(
                "The test suite is failing. Fix the code under the workspace so the tests pass.\n\
                 Use the file tools to apply your changes.\n\nFailing output:\n{last_output}"
            ),
        };
        let out = run_role(services, &coder, input, None, tool_ctx, cancel).await?;
        timings.push(RoleTiming {
            role: RoleKind::Coder,
            elapsed: started.elapsed(),
            degraded: false,
        });
        info!(iteration, tool_calls = out.tool_records.len(), "coder proposed a fix");
    }

    observe_task("test_fix", "unfixed");
    Ok(FixReport {
        outcome: FixOutcome::Unfixed { last_output },
        timings,
        transcript,
    })
}
