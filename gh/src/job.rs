//! Webhook job snapshots and idempotency.
//!
//! One JSON snapshot per delivery under `<data_root>/jobs/<delivery_id>.json`,
//! rewritten on every status transition so a replay after restart sees the
//! last state. A re-delivery inside the idempotency window is acknowledged
//! but not re-dispatched.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::event::WebhookEvent;
use crate::GhError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Received,
    Analyzing,
    Patching,
    Testing,
    Posting,
    Done,
    Failed,
    Rejected,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Received => "received",
            JobStatus::Analyzing => "analyzing",
            JobStatus::Patching => "patching",
            JobStatus::Testing => "testing",
            JobStatus::Posting => "posting",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Rejected)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub event: WebhookEvent,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// PR URL on success, rejection/failure reason otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}

pub struct JobStore {
    dir: PathBuf,
    window: Duration,
}

impl JobStore {
    pub fn new(data_root: impl Into<PathBuf>, window: Duration) -> Result<Self, GhError> {
        let dir = data_root.into().join("jobs");
        std::fs::create_dir_all(&dir).map_err(|e| GhError::Store(format!("create jobs dir: {e}")))?;
        Ok(Self { dir, window })
    }

    fn path(&self, delivery_id: &str) -> PathBuf {
        // Delivery ids are caller-supplied; keep only a safe charset.
        let safe: String = delivery_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    pub fn get(&self, delivery_id: &str) -> Option<JobSnapshot> {
        let path = self.path(delivery_id);
        let content = std::fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// True when this delivery should be dispatched: unseen, or last seen
    /// outside the idempotency window.
    pub fn should_dispatch(&self, delivery_id: &str) -> bool {
        match self.get(delivery_id) {
            None => true,
            Some(snapshot) => {
                let age = Utc::now().signed_duration_since(snapshot.created_at);
                age.to_std().map(|a| a > self.window).unwrap_or(false)
            }
        }
    }

    /// Records a fresh delivery in `received` state.
    pub fn enqueue(&self, event: &WebhookEvent) -> Result<JobSnapshot, GhError> {
        let snapshot = JobSnapshot {
            event: event.clone(),
            status: JobStatus::Received,
            created_at: Utc::now(),
            completed_at: None,
            outcome: None,
        };
        self.write(&snapshot)?;
        debug!(delivery = %event.delivery_id, "job enqueued");
        Ok(snapshot)
    }

    /// Persists a status transition; terminal states stamp `completed_at`.
    pub fn transition(
        &self,
        snapshot: &mut JobSnapshot,
        status: JobStatus,
        outcome: Option<String>,
    ) -> Result<(), GhError> {
        snapshot.status = status;
        if status.is_terminal() {
            snapshot.completed_at = Some(Utc::now());
        }
        if outcome.is_some() {
            snapshot.outcome = outcome;
        }
        self.write(snapshot)
    }

    fn write(&self, snapshot: &JobSnapshot) -> Result<(), GhError> {
        let path = self.path(&snapshot.event.delivery_id);
        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| GhError::Store(format!("serialize job: {e}")))?;
        std::fs::write(&path, json).map_err(|e| GhError::Store(format!("write job: {e}")))?;
        Ok(())
    }
}
