//! Per-call tool context.
//!
//! Built by the caller (role loop, gateway command dispatch, webhook
//! pipeline) and passed by value into each invocation: no tool reaches for
//! ambient state. The workspace root varies per call: interactive sessions
//! use the configured workspace, autonomous jobs their scratch checkout.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::tools::SensitivePaths;

#[derive(Clone)]
pub struct ToolCallContext {
    /// Root every path argument is resolved under.
    pub workspace_root: Arc<PathBuf>,
    /// Paths tools must never touch.
    pub sensitive: Arc<SensitivePaths>,
    /// Audit actor: session id, job delivery id, or `operator`.
    pub actor: String,
    pub cancel: CancellationToken,
    /// Per-call deadline; the registry enforces it.
    pub deadline: Duration,
    /// Caller's tool whitelist (a role's tool subset). `None` means every
    /// registered tool; the registry audits violations.
    pub allowed_tools: Option<Arc<Vec<String>>>,
}

impl ToolCallContext {
    pub fn new(
        workspace_root: impl Into<PathBuf>,
        sensitive: Arc<SensitivePaths>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            workspace_root: Arc::new(workspace_root.into()),
            sensitive,
            actor: actor.into(),
            cancel: CancellationToken::new(),
            deadline: Duration::from_secs(10),
            allowed_tools: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_allowed_tools(mut self, allowed: Vec<String>) -> Self {
        self.allowed_tools = Some(Arc::new(allowed));
        self
    }

    /// Same policy and actor, different root. The autonomous pipeline uses
    /// this to point tools at a scratch checkout.
    pub fn rebase(&self, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: Arc::new(workspace_root.into()),
            sensitive: self.sensitive.clone(),
            actor: self.actor.clone(),
            cancel: self.cancel.clone(),
            deadline: self.deadline,
            allowed_tools: self.allowed_tools.clone(),
        }
    }
}
