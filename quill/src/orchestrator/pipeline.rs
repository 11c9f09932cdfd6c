//! Single-role and planner → coder → reviewer execution.

use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Error, Result};
use crate::roles::{run_role, RoleInput, RoleKind, RoleProfile, RoleServices};
use crate::tools::ToolCallContext;

use super::{observe_role, observe_task, RoleTiming, TaskReport};

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Deadline for single-role (interactive) tasks.
    pub single_deadline: Duration,
    /// Exceeding this logs a warning but the role keeps its full output.
    pub role_soft_deadline: Duration,
    /// Hitting this cancels the role; the task continues degraded with
    /// whatever partial output was streamed.
    pub role_hard_deadline: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            single_deadline: Duration::from_secs(30),
            role_soft_deadline: Duration::from_secs(5),
            role_hard_deadline: Duration::from_secs(15),
        }
    }
}

/// One role, one loop run, one deadline. The interactive default.
pub async fn run_single_role(
    services: &RoleServices,
    profile: &RoleProfile,
    input: RoleInput,
    chunk_tx: Option<mpsc::Sender<String>>,
    tool_ctx: &ToolCallContext,
    cancel: &CancellationToken,
    config: &PipelineConfig,
    task_id: &str,
) -> Result<TaskReport> {
    let started = Instant::now();
    let result = tokio::time::timeout(
        config.single_deadline,
        run_role(services, profile, input, chunk_tx, tool_ctx, cancel),
    )
    .await;
    let elapsed = started.elapsed();

    let outcome = match result {
        Ok(Ok(out)) => {
            observe_role(profile.kind, elapsed, true);
            observe_task("single", "ok");
            Ok(TaskReport {
                task_id: task_id.to_string(),
                content: out.content,
                timings: vec![RoleTiming {
                    role: profile.kind,
                    elapsed,
                    degraded: false,
                }],
                degraded: false,
            })
        }
        Ok(Err(e)) => {
            observe_role(profile.kind, elapsed, false);
            observe_task("single", "error");
            Err(e)
        }
        Err(_) => {
            observe_role(profile.kind, elapsed, false);
            observe_task("single", "timeout");
            Err(Error::Timeout {
                what: format!("single-role task {task_id}"),
                elapsed_ms: elapsed.as_millis() as u64,
            })
        }
    };
    outcome
}

/// Runs one pipeline step under the soft/hard deadline policy. Returns the
/// step's output (full or partial) and its timing.
async fn run_step(
    services: &RoleServices,
    profile: &RoleProfile,
    input: RoleInput,
    tool_ctx: &ToolCallContext,
    cancel: &CancellationToken,
    config: &PipelineConfig,
) -> Result<(String, RoleTiming)> {
    // Collect streamed chunks so a hard timeout still yields the partial text.
    let (tx, mut rx) = mpsc::channel::<String>(64);
    let collector = tokio::spawn(async move {
        let mut text = String::new();
        while let Some(chunk) = rx.recv().await {
            text.push_str(&chunk);
        }
        text
    });

    let step_cancel = cancel.child_token();
    let started = Instant::now();
    let result = tokio::time::timeout(
        config.role_hard_deadline,
        run_role(services, profile, input, Some(tx), tool_ctx, &step_cancel),
    )
    .await;
    let elapsed = started.elapsed();

    match result {
        Ok(Ok(out)) => {
            drop(collector); // full output available, partial not needed
            if elapsed > config.role_soft_deadline {
                // Soft deadline: warn and keep the full output.
                warn!(
                    role = profile.kind.as_str(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "role exceeded soft deadline"
                );
            }
            observe_role(profile.kind, elapsed, true);
            Ok((
                out.content,
                RoleTiming {
                    role: profile.kind,
                    elapsed,
                    degraded: false,
                },
            ))
        }
        Ok(Err(e)) => {
            // Genuine failures (provider chain exhausted, internal bugs,
            // cancellation) unwind; only the hard deadline degrades.
            observe_role(profile.kind, elapsed, false);
            Err(e)
        }
        Err(_) => {
            // Hard deadline: cancel the in-flight call, keep the partial.
            step_cancel.cancel();
            observe_role(profile.kind, elapsed, false);
            warn!(
                role = profile.kind.as_str(),
                elapsed_ms = elapsed.as_millis() as u64,
                "role hit hard deadline, continuing degraded"
            );
            let partial = collector.await.unwrap_or_default();
            Ok((
                partial,
                RoleTiming {
                    role: profile.kind,
                    elapsed,
                    degraded: true,
                },
            ))
        }
    }
}

/// Planner → coder → reviewer. Each role sees the previous role's final
/// message as its input on top of the shared retrieval context.
pub async fn run_pipeline(
    services: &RoleServices,
    base_input: RoleInput,
    tool_ctx: &ToolCallContext,
    cancel: &CancellationToken,
    config: &PipelineConfig,
    task_id: &str,
) -> Result<TaskReport> {
    let stages = [RoleKind::Planner, RoleKind::Coder, RoleKind::Reviewer];
    let mut timings = Vec::with_capacity(stages.len());
    let mut current_input = base_input.input.clone();
    let mut degraded = false;
    let mut content = String::new();

    for kind in stages {
        if cancel.is_cancelled() {
            observe_task("pipeline", "cancelled");
            return Err(Error::Timeout {
                what: format!("pipeline task {task_id} cancelled"),
                elapsed_ms: 0,
            });
        }
        let profile = RoleProfile::for_kind(kind);
        let input = RoleInput {
            memory_section: base_input.memory_section.clone(),
            code_section: base_input.code_section.clone(),
            recent: base_input.recent.clone(),
            input: current_input.clone(),
        };
        let (output, timing) = run_step(services, &profile, input, tool_ctx, cancel, config).await?;
        degraded |= timing.degraded;
        timings.push(timing);
        current_input = output.clone();
        content = output;
    }

    observe_task("pipeline", if degraded { "degraded" } else { "ok" });
    Ok(TaskReport {
        task_id: task_id.to_string(),
        content,
        timings,
        degraded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLog;
    use crate::llm::MockLlm;
    use crate::roles::RoleKind;
    use crate::tools::{SensitivePaths, ToolRegistry};
    use std::sync::Arc;

    fn services(llm: MockLlm) -> RoleServices {
        RoleServices {
            llm: Arc::new(llm),
            tools: Arc::new(ToolRegistry::new(AuditLog::sink(), 16)),
            tool_call_cap: 4,
        }
    }

    fn tool_ctx() -> ToolCallContext {
        ToolCallContext::new("/tmp", Arc::new(SensitivePaths::default()), "test")
    }

    #[tokio::test]
    async fn single_role_completes_within_deadline() {
        let s = services(MockLlm::reply("answer"));
        let report = run_single_role(
            &s,
            &RoleProfile::for_kind(RoleKind::Developer),
            RoleInput {
                input: "question".into(),
                ..Default::default()
            },
            None,
            &tool_ctx(),
            &CancellationToken::new(),
            &PipelineConfig::default(),
            "t-1",
        )
        .await
        .unwrap();
        assert_eq!(report.content, "answer");
        assert_eq!(report.timings.len(), 1);
        assert!(!report.degraded);
    }

    #[tokio::test]
    async fn single_role_times_out() {
        let s = services(MockLlm::hang());
        let config = PipelineConfig {
            single_deadline: Duration::from_millis(50),
            ..Default::default()
        };
        let err = run_single_role(
            &s,
            &RoleProfile::for_kind(RoleKind::Developer),
            RoleInput::default(),
            None,
            &tool_ctx(),
            &CancellationToken::new(),
            &config,
            "t-2",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn pipeline_chains_three_roles_in_order() {
        let s = services(MockLlm::scripted(vec![
            crate::llm::LlmReply {
                content: "the plan".into(),
                ..Default::default()
            },
            crate::llm::LlmReply {
                content: "the patch".into(),
                ..Default::default()
            },
            crate::llm::LlmReply {
                content: "the review".into(),
                ..Default::default()
            },
        ]));
        let report = run_pipeline(
            &s,
            RoleInput {
                input: "fix the bug".into(),
                ..Default::default()
            },
            &tool_ctx(),
            &CancellationToken::new(),
            &PipelineConfig::default(),
            "t-3",
        )
        .await
        .unwrap();
        assert_eq!(report.content, "the review");
        let roles: Vec<RoleKind> = report.timings.iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![RoleKind::Planner, RoleKind::Coder, RoleKind::Reviewer]
        );
        assert!(!report.degraded);
    }

    #[tokio::test]
    async fn hard_deadline_degrades_but_pipeline_finishes() {
        // Every role hangs; each step hits the hard deadline and the task is
        // marked degraded instead of failing.
        let s = services(MockLlm::hang());
        let config = PipelineConfig {
            single_deadline: Duration::from_secs(30),
            role_soft_deadline: Duration::from_millis(10),
            role_hard_deadline: Duration::from_millis(60),
        };
        let report = run_pipeline(
            &s,
            RoleInput {
                input: "go".into(),
                ..Default::default()
            },
            &tool_ctx(),
            &CancellationToken::new(),
            &config,
            "t-4",
        )
        .await
        .unwrap();
        assert!(report.degraded);
        assert_eq!(report.timings.len(), 3);
        assert!(report.timings.iter().all(|t| t.degraded));
        // The hang mock streams "tick " chunks; the partial output survives.
        assert!(report.content.contains("tick"));
    }

    #[tokio::test]
    async fn cancelled_pipeline_unwinds() {
        let s = services(MockLlm::hang());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run_pipeline(
            &s,
            RoleInput::default(),
            &tool_ctx(),
            &cancel,
            &PipelineConfig::default(),
            "t-5",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
    }
}
