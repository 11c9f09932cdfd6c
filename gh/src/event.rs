//! Webhook event parsing: kind, repository, principal.

use serde::{Deserialize, Serialize};

use crate::GhError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PullRequest,
    Issue,
    Push,
}

impl EventKind {
    /// Maps the `X-GitHub-Event` header value.
    pub fn from_header(value: &str) -> Option<Self> {
        match value {
            "pull_request" => Some(Self::PullRequest),
            "issues" | "issue" => Some(Self::Issue),
            "push" => Some(Self::Push),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PullRequest => "pull_request",
            Self::Issue => "issue",
            Self::Push => "push",
        }
    }
}

/// Repository coordinates extracted from the payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    /// `owner/name`.
    pub full_name: String,
    pub clone_url: String,
    /// Base branch the autonomous PR targets.
    pub default_branch: String,
}

impl RepoRef {
    pub fn owner(&self) -> &str {
        self.full_name.split('/').next().unwrap_or("")
    }

    pub fn name(&self) -> &str {
        self.full_name.split('/').nth(1).unwrap_or("")
    }
}

/// One verified, parsed webhook delivery.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub kind: EventKind,
    /// The delivery identifier, which is the idempotency key.
    pub delivery_id: String,
    pub repo: RepoRef,
    /// Acting principal (`sender.login`).
    pub principal: String,
    /// Short task description distilled from the payload (issue title, PR
    /// title, or head commit message); the planner's starting point.
    pub summary: String,
}

#[derive(Deserialize)]
struct RawRepository {
    full_name: String,
    clone_url: String,
    #[serde(default)]
    default_branch: Option<String>,
}

#[derive(Deserialize)]
struct RawSender {
    login: String,
}

#[derive(Deserialize)]
struct RawTitled {
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Deserialize)]
struct RawCommit {
    message: String,
}

#[derive(Deserialize)]
struct RawPayload {
    repository: RawRepository,
    sender: RawSender,
    #[serde(default)]
    pull_request: Option<RawTitled>,
    #[serde(default)]
    issue: Option<RawTitled>,
    #[serde(default)]
    head_commit: Option<RawCommit>,
}

impl WebhookEvent {
    /// Parses a raw payload for a known event kind.
    pub fn parse(kind: EventKind, delivery_id: &str, body: &[u8]) -> Result<Self, GhError> {
        let raw: RawPayload = serde_json::from_slice(body)
            .map_err(|e| GhError::Event(format!("payload parse: {e}")))?;
        let summary = match kind {
            EventKind::PullRequest => raw
                .pull_request
                .and_then(|pr| {
                    let title = pr.title?;
                    Some(match pr.body {
                        Some(body) if !body.is_empty() => format!("{title}\n\n{body}"),
                        _ => title,
                    })
                })
                .unwrap_or_else(|| "pull request update".to_string()),
            EventKind::Issue => raw
                .issue
                .and_then(|issue| {
                    let title = issue.title?;
                    Some(match issue.body {
                        Some(body) if !body.is_empty() => format!("{title}\n\n{body}"),
                        _ => title,
                    })
                })
                .unwrap_or_else(|| "issue update".to_string()),
            EventKind::Push => raw
                .head_commit
                .map(|c| c.message)
                .unwrap_or_else(|| "push".to_string()),
        };
        Ok(Self {
            kind,
            delivery_id: delivery_id.to_string(),
            repo: RepoRef {
                full_name: raw.repository.full_name,
                clone_url: raw.repository.clone_url,
                default_branch: raw
                    .repository
                    .default_branch
                    .unwrap_or_else(|| "main".to_string()),
            },
            principal: raw.sender.login,
            summary,
        })
    }
}
