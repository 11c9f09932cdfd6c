//! GitHub ingress for quill.
//!
//! Signature-verified webhook handling, an idempotent job store, guardrails,
//! and the autonomous clone → analyze → patch → test → draft-PR pipeline.
//! The HTTP surface lives in the `serve` crate; this crate is transport-free.

mod api;
mod diff;
mod event;
mod guardrail;
mod job;
mod pipeline;
mod signature;

pub use api::{OctocrabPulls, PullRequestApi};
pub use diff::{apply_unified_diff, diff_paths, diff_changed_lines};
pub use event::{EventKind, RepoRef, WebhookEvent};
pub use guardrail::{check_patch, GuardrailVerdict};
pub use job::{JobSnapshot, JobStatus, JobStore};
pub use pipeline::{run_job, PipelineDeps};
pub use signature::{sign, verify_signature};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GhError {
    #[error("signature rejected")]
    Signature,
    #[error("unsupported or malformed event: {0}")]
    Event(String),
    #[error("job store: {0}")]
    Store(String),
    #[error("guardrail rejected patch: {0}")]
    Guardrail(String),
    #[error("github api: {0}")]
    Api(String),
    #[error(transparent)]
    Core(#[from] quill::Error),
}
