//! Append-only audit trail.
//!
//! One JSON object per line under `<data_root>/audit.log`. Writes are
//! serialized behind a mutex; the file handle lives for the process and is
//! flushed on every append so a crash loses at most the in-flight record.
//! Process-wide singleton built by the root constructor, shared as
//! `Arc<AuditLog>`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// One audit record. `outcome` mirrors the invocation outcome (`ok` or an
/// error kind); `detail` holds tool-specific context (commit hash, HTTP
/// target, rejection reason).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: String,
    /// Who acted: a session id, a webhook delivery id, or `operator`.
    pub actor: String,
    pub action: String,
    pub target: String,
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

struct Inner {
    file: std::fs::File,
    path: PathBuf,
}

/// Append-only, serialized audit log.
pub struct AuditLog {
    inner: Mutex<Option<Inner>>,
}

impl AuditLog {
    /// Opens (creating parents as needed) `<data_root>/audit.log` for append.
    pub fn init(data_root: &Path) -> Result<Arc<Self>> {
        std::fs::create_dir_all(data_root)
            .map_err(|e| Error::Internal(format!("create data root: {e}")))?;
        let path = data_root.join("audit.log");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::Internal(format!("open audit log: {e}")))?;
        Ok(Arc::new(Self {
            inner: Mutex::new(Some(Inner { file, path })),
        }))
    }

    /// In-memory sink for tests: records are dropped after shutdown.
    pub fn sink() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(None),
        })
    }

    /// Appends one record. Serialized; returns after the line is flushed.
    pub async fn append(
        &self,
        actor: &str,
        action: &str,
        target: &str,
        outcome: &str,
        detail: Option<String>,
    ) -> Result<()> {
        let record = AuditRecord {
            timestamp: Utc::now().to_rfc3339(),
            actor: actor.to_string(),
            action: action.to_string(),
            target: target.to_string(),
            outcome: outcome.to_string(),
            detail,
        };
        let mut guard = self.inner.lock().await;
        let Some(inner) = guard.as_mut() else {
            tracing::debug!(action, target, outcome, "audit (sink)");
            return Ok(());
        };
        let line = serde_json::to_string(&record)
            .map_err(|e| Error::Internal(format!("serialize audit record: {e}")))?;
        writeln!(inner.file, "{line}")
            .and_then(|_| inner.file.flush())
            .map_err(|e| Error::Internal(format!("append audit log: {e}")))?;
        Ok(())
    }

    /// Flushes and drops the handle. Appends after shutdown fail.
    pub async fn shutdown(&self) {
        let mut guard = self.inner.lock().await;
        if let Some(inner) = guard.take() {
            tracing::debug!(path = %inner.path.display(), "audit log closed");
        }
    }

    /// Reads all records back (tests and operator inspection).
    pub fn read_all(data_root: &Path) -> Result<Vec<AuditRecord>> {
        let path = data_root.join("audit.log");
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Internal(format!("read audit log: {e}")))?;
        let mut out = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let record: AuditRecord = serde_json::from_str(line)
                .map_err(|e| Error::Internal(format!("parse audit line: {e}")))?;
            out.push(record);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::init(dir.path()).unwrap();
        log.append("s-1", "git_commit", "repo", "ok", Some("abc123".into()))
            .await
            .unwrap();
        log.append("s-1", "write_file", "a.py", "not_permitted", None)
            .await
            .unwrap();

        let records = AuditLog::read_all(dir.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].action, "git_commit");
        assert_eq!(records[0].outcome, "ok");
        assert_eq!(records[0].detail.as_deref(), Some("abc123"));
        assert_eq!(records[1].outcome, "not_permitted");
    }

    #[tokio::test]
    async fn shutdown_closes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = AuditLog::init(dir.path()).unwrap();
        log.append("op", "reindex", "codebase", "ok", None)
            .await
            .unwrap();
        log.shutdown().await;
        // After shutdown the sink behavior applies; no panic, no write.
        log.append("op", "reindex", "codebase", "ok", None)
            .await
            .unwrap();
        let records = AuditLog::read_all(dir.path()).unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn sink_accepts_appends() {
        let log = AuditLog::sink();
        log.append("s", "a", "t", "ok", None).await.unwrap();
    }
}
