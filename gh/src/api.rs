//! Pull-request API seam.
//!
//! The pipeline only ever opens *draft* pull requests; there is no merge
//! path here at all. `OctocrabPulls` is the production implementation; tests
//! inject a recording stub.

use async_trait::async_trait;

use crate::event::RepoRef;
use crate::GhError;

#[async_trait]
pub trait PullRequestApi: Send + Sync {
    /// Opens a draft PR and returns its URL.
    async fn open_draft_pr(
        &self,
        repo: &RepoRef,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<String, GhError>;
}

pub struct OctocrabPulls {
    client: octocrab::Octocrab,
}

impl OctocrabPulls {
    pub fn new(token: impl Into<String>) -> Result<Self, GhError> {
        let client = octocrab::OctocrabBuilder::new()
            .personal_token(token.into())
            .build()
            .map_err(|e| GhError::Api(format!("build client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PullRequestApi for OctocrabPulls {
    async fn open_draft_pr(
        &self,
        repo: &RepoRef,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<String, GhError> {
        let pr = self
            .client
            .pulls(repo.owner(), repo.name())
            .create(title, head, base)
            .body(body)
            .draft(true)
            .send()
            .await
            .map_err(|e| GhError::Api(format!("create draft pr: {e}")))?;
        Ok(pr
            .html_url
            .map(|u| u.to_string())
            .unwrap_or_else(|| format!("{}#{}", repo.full_name, pr.number)))
    }
}
