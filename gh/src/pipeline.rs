//! The autonomous pipeline: clone → index → diagnose → patch → guardrail →
//! test-and-fix → draft PR.
//!
//! Runs off the webhook hot path under a wall-clock cap. Every status
//! transition and the final outcome land in the audit log; the PR is always
//! a draft. Guardrail rejection, loop exhaustion, and a missing patch are
//! terminal outcomes with human-readable reasons, not errors.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use quill::{
    run_role, Backend, CodebaseIndexer, FixLoopConfig, FixOutcome, RoleInput, RoleKind,
    RoleProfile, ToolCallContext, VectorIndex,
};

use crate::api::PullRequestApi;
use crate::guardrail::{check_patch, GuardrailVerdict};
use crate::job::{JobSnapshot, JobStatus, JobStore};
use crate::{apply_unified_diff, GhError};

pub struct PipelineDeps {
    pub backend: Arc<Backend>,
    pub jobs: Arc<JobStore>,
    pub pr_api: Arc<dyn PullRequestApi>,
    pub fix_config: FixLoopConfig,
}

/// Extracts a unified diff from the coder's reply: a ```diff fence, or the
/// whole reply when it already starts with a diff header.
fn extract_diff(content: &str) -> Option<String> {
    if let Some(open) = content.find("```diff") {
        let after = &content[open + "```diff".len()..];
        let close = after.find("```")?;
        let body = after[..close].trim_matches('\n');
        return Some(format!("{body}\n"));
    }
    let trimmed = content.trim_start();
    if trimmed.starts_with("--- ") {
        return Some(trimmed.to_string());
    }
    None
}

/// Scope prefixes the planner declared, one per `SCOPE:` line.
fn extract_scope(diagnosis: &str) -> Vec<String> {
    diagnosis
        .lines()
        .filter_map(|l| l.trim().strip_prefix("SCOPE:"))
        .map(|s| s.trim().trim_end_matches('/').to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

async fn audit_transition(
    deps: &PipelineDeps,
    snapshot: &JobSnapshot,
    outcome: &str,
    detail: Option<String>,
) {
    let _ = deps
        .backend
        .audit
        .append(
            &snapshot.event.delivery_id,
            "webhook_job",
            &snapshot.event.repo.full_name,
            outcome,
            detail,
        )
        .await;
}

fn observe(outcome: &'static str) {
    metrics::counter!("quill_webhook_outcome_total", "outcome" => outcome).increment(1);
}

async fn transition(
    deps: &PipelineDeps,
    snapshot: &mut JobSnapshot,
    status: JobStatus,
    outcome: Option<String>,
) -> Result<(), GhError> {
    deps.jobs.transition(snapshot, status, outcome.clone())?;
    audit_transition(deps, snapshot, status.as_str(), outcome).await;
    Ok(())
}

/// Clones the repository through the audited shell tool.
async fn clone_repo(
    deps: &PipelineDeps,
    ctx: &ToolCallContext,
    clone_url: &str,
) -> Result<(), GhError> {
    deps.backend
        .tools
        .invoke(
            "run_shell",
            json!({ "argv": ["git", "clone", "--depth", "1", clone_url, "checkout"] }),
            ctx,
        )
        .await?;
    Ok(())
}

/// Builds a throwaway codebase index over the checkout.
async fn index_checkout(
    deps: &PipelineDeps,
    work: &Path,
    checkout: &Path,
    cancel: &CancellationToken,
) -> Result<Arc<VectorIndex>, GhError> {
    let settings = &deps.backend.settings;
    let index = Arc::new(VectorIndex::load(
        work.join("index"),
        "job-codebase",
        deps.backend.embedder.dimension(),
        deps.backend.embedder.provenance(),
    ));
    let indexer = CodebaseIndexer::new(
        index.clone(),
        deps.backend.embedder.clone(),
        checkout,
        settings.chunk_size,
        settings.chunk_overlap,
        settings.index_file_cap,
        settings.embed_inflight_cap,
    );
    indexer.reindex(cancel).await?;
    Ok(index)
}

async fn code_section(
    deps: &PipelineDeps,
    index: &VectorIndex,
    query: &str,
) -> Option<String> {
    let vector = deps
        .backend
        .embedder
        .embed(&[query])
        .await
        .ok()?
        .into_iter()
        .next()?;
    let hits = index
        .query(
            &vector,
            deps.backend.settings.codebase_recall_k,
            &quill::MetadataFilter::new(),
        )
        .await
        .ok()?;
    if hits.is_empty() {
        return None;
    }
    let mut section = String::new();
    for (record, _) in hits {
        let path = record
            .metadata
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or("<unknown>");
        section.push_str(&format!("--- {path}\n{}\n", record.content));
    }
    Some(section)
}

/// Runs one enqueued job to a terminal status. The returned snapshot is also
/// persisted; errors are mapped to `failed` before returning.
pub async fn run_job(deps: &PipelineDeps, mut snapshot: JobSnapshot) -> JobSnapshot {
    let cancel = CancellationToken::new();
    let deadline = deps.backend.settings.job_deadline;
    let result = tokio::time::timeout(deadline, drive(deps, &mut snapshot, &cancel)).await;
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(delivery = %snapshot.event.delivery_id, error = %e, "job failed");
            let _ = transition(deps, &mut snapshot, JobStatus::Failed, Some(e.to_string())).await;
            observe("failed");
        }
        Err(_) => {
            cancel.cancel();
            let _ = transition(
                deps,
                &mut snapshot,
                JobStatus::Failed,
                Some(format!("wall clock exceeded {deadline:?}")),
            )
            .await;
            observe("failed");
        }
    }
    snapshot
}

/// The happy path; terminal rejections return `Ok` after persisting their
/// status, genuine errors bubble to `run_job`.
async fn drive(
    deps: &PipelineDeps,
    snapshot: &mut JobSnapshot,
    cancel: &CancellationToken,
) -> Result<(), GhError> {
    let settings = &deps.backend.settings;
    let work: PathBuf = settings
        .data_root
        .join("work")
        .join(Uuid::new_v4().to_string());
    std::fs::create_dir_all(&work).map_err(|e| GhError::Store(format!("create work dir: {e}")))?;
    // Scratch is removed on every exit path.
    let _scratch = ScratchGuard(work.clone());
    let checkout = work.join("checkout");

    let base_ctx = ToolCallContext::new(
        &work,
        deps.backend.sensitive.clone(),
        snapshot.event.delivery_id.clone(),
    )
    .with_cancel(cancel.clone())
    .with_deadline(std::time::Duration::from_secs(60));

    // 1. Clone and index.
    transition(deps, snapshot, JobStatus::Analyzing, None).await?;
    clone_repo(deps, &base_ctx, &snapshot.event.repo.clone_url).await?;
    let index = index_checkout(deps, &work, &checkout, cancel).await?;
    let code = code_section(deps, &index, &snapshot.event.summary).await;

    let checkout_ctx = base_ctx.rebase(&checkout);

    // 2. Planner diagnosis.
    let planner = RoleProfile::for_kind(RoleKind::Planner);
    let diagnosis = run_role(
        &deps.backend.roles,
        &planner,
        RoleInput {
            memory_section: None,
            code_section: code.clone(),
            recent: Vec::new(),
            input: format!(
                "Diagnose the following request against this repository and produce a short plan.\n\
                 End with one `SCOPE: <path prefix>` line per area the fix may touch.\n\n{}",
                snapshot.event.summary
            ),
        },
        None,
        &checkout_ctx,
        cancel,
    )
    .await?;
    let scope = extract_scope(&diagnosis.content);

    // 3. Coder patch.
    transition(deps, snapshot, JobStatus::Patching, None).await?;
    let coder = RoleProfile::for_kind(RoleKind::Coder);
    let patch_reply = run_role(
        &deps.backend.roles,
        &coder,
        RoleInput {
            memory_section: None,
            code_section: code,
            recent: Vec::new(),
            input: format!(
                "Produce a unified diff (in a ```diff fence) implementing this plan. \
                 Reply with the diff only.\n\nPlan:\n{}",
                diagnosis.content
            ),
        },
        None,
        &checkout_ctx,
        cancel,
    )
    .await?;
    let Some(diff) = extract_diff(&patch_reply.content) else {
        transition(
            deps,
            snapshot,
            JobStatus::Failed,
            Some("no_patch: coder produced no unified diff".to_string()),
        )
        .await?;
        observe("failed");
        return Ok(());
    };

    // 4. Guardrail, before anything is written.
    let scope_ref = (!scope.is_empty()).then_some(scope.as_slice());
    match check_patch(
        &diff,
        &deps.backend.sensitive,
        settings.patch_line_cap,
        scope_ref,
    ) {
        GuardrailVerdict::Pass => {}
        GuardrailVerdict::Reject { reason, detail } => {
            info!(delivery = %snapshot.event.delivery_id, reason, detail, "guardrail rejected patch");
            transition(deps, snapshot, JobStatus::Rejected, Some(reason)).await?;
            observe("rejected");
            return Ok(());
        }
    }

    // 5. Apply and run the test-and-fix loop in the checkout.
    apply_unified_diff(&checkout, &diff)?;
    transition(deps, snapshot, JobStatus::Testing, None).await?;
    let fix_report = quill::run_test_fix(
        &deps.backend.roles,
        &deps.fix_config,
        RoleInput::default(),
        &checkout_ctx,
        cancel,
    )
    .await?;
    let transcript = fix_report.transcript.join("\n---\n");
    if let FixOutcome::Unfixed { last_output } = &fix_report.outcome {
        transition(
            deps,
            snapshot,
            JobStatus::Failed,
            Some(format!("tests_unfixed: {}", first_line(last_output))),
        )
        .await?;
        observe("failed");
        return Ok(());
    }

    // 6. Branch, commit, push, draft PR.
    transition(deps, snapshot, JobStatus::Posting, None).await?;
    let branch = format!("quill/auto-{}", &snapshot.event.delivery_id);
    deps.backend
        .tools
        .invoke("git_create_branch", json!({ "name": branch }), &checkout_ctx)
        .await?;
    deps.backend
        .tools
        .invoke(
            "git_commit",
            json!({ "message": format!("Automated fix for: {}", first_line(&snapshot.event.summary)) }),
            &checkout_ctx,
        )
        .await?;
    deps.backend
        .tools
        .invoke(
            "run_shell",
            json!({ "argv": ["git", "push", "origin", branch] }),
            &checkout_ctx,
        )
        .await?;

    let body = format!(
        "## Diagnosis\n{}\n\n## Test transcript\n```\n{}\n```\n\n*Opened automatically; draft only, never auto-merged.*",
        diagnosis.content, transcript
    );
    let url = deps
        .pr_api
        .open_draft_pr(
            &snapshot.event.repo,
            &branch,
            &snapshot.event.repo.default_branch,
            &format!("Automated fix: {}", first_line(&snapshot.event.summary)),
            &body,
        )
        .await?;

    transition(deps, snapshot, JobStatus::Done, Some(url)).await?;
    observe("done");
    Ok(())
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

/// Removes the scratch directory on drop, success and failure alike.
struct ScratchGuard(PathBuf);

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.0) {
            warn!(path = %self.0.display(), error = %e, "scratch cleanup failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_diff_from_fence() {
        let content = "Here you go:\n```diff\n--- a/x.py\n+++ b/x.py\n@@ -1,1 +1,1 @@\n-a\n+b\n```\ndone";
        let diff = extract_diff(content).unwrap();
        assert!(diff.starts_with("--- a/x.py"));
        assert!(diff.ends_with("+b\n"));
    }

    #[test]
    fn extract_diff_from_bare_reply() {
        let content = "--- a/x.py\n+++ b/x.py\n@@ -1,1 +1,1 @@\n-a\n+b\n";
        assert!(extract_diff(content).is_some());
    }

    #[test]
    fn extract_diff_absent() {
        assert!(extract_diff("I could not produce a patch.").is_none());
    }

    #[test]
    fn scope_lines_are_parsed() {
        let diagnosis = "The bug is in the calculator.\nSCOPE: src\nSCOPE: tests/\n";
        assert_eq!(extract_scope(diagnosis), vec!["src", "tests"]);
    }

    #[test]
    fn first_line_helper() {
        assert_eq!(first_line("a\nb"), "a");
        assert_eq!(first_line(""), "");
    }
}
