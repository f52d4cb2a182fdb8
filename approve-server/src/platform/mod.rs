//! Platform abstraction for pull request reads and writes.
//!
//! The handler only talks to a `Platform`, so the same pipeline runs against
//! GitHub in production and against `InMemoryPlatform` in tests.

mod memory;

pub use memory::InMemoryPlatform;

use std::sync::Arc;

use anyhow::{Context, Result};
use approve_core::{IssueComment, PullRequestId, PullRequestSnapshot};
use async_trait::async_trait;

use crate::github::GitHubClient;

#[async_trait]
pub trait Platform: Send + Sync {
    /// Read the full current history of a pull request.
    ///
    /// Every call reads fresh; nothing is cached across invocations.
    async fn fetch_snapshot(&self, pr: &PullRequestId) -> Result<PullRequestSnapshot>;

    async fn add_label(&self, pr: &PullRequestId, label: &str) -> Result<()>;

    async fn remove_label(&self, pr: &PullRequestId, label: &str) -> Result<()>;

    async fn create_comment(&self, pr: &PullRequestId, body: &str) -> Result<IssueComment>;

    async fn delete_comment(&self, pr: &PullRequestId, comment_id: u64) -> Result<()>;
}

/// `Platform` backed by the GitHub REST API for one App installation.
pub struct GitHubPlatform {
    client: Arc<GitHubClient>,
    installation_id: u64,
    correlation_id: Option<String>,
}

impl GitHubPlatform {
    pub fn new(
        client: Arc<GitHubClient>,
        installation_id: u64,
        correlation_id: Option<String>,
    ) -> Self {
        Self {
            client,
            installation_id,
            correlation_id,
        }
    }

    fn cid(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }
}

#[async_trait]
impl Platform for GitHubPlatform {
    async fn fetch_snapshot(&self, pr: &PullRequestId) -> Result<PullRequestSnapshot> {
        let (pull_request, comments, reviews, label_events, changed_files) = tokio::try_join!(
            self.client
                .get_pull_request(self.cid(), self.installation_id, &pr.repo, pr.number),
            self.client
                .get_pr_comments(self.cid(), self.installation_id, &pr.repo, pr.number),
            self.client
                .get_pr_reviews(self.cid(), self.installation_id, &pr.repo, pr.number),
            self.client
                .get_label_events(self.cid(), self.installation_id, &pr.repo, pr.number),
            self.client
                .get_changed_files(self.cid(), self.installation_id, &pr.repo, pr.number),
        )
        .with_context(|| format!("Failed to read history of {}", pr))?;

        Ok(PullRequestSnapshot {
            repo: pr.repo.clone(),
            pull_request,
            comments,
            reviews,
            label_events,
            changed_files,
        })
    }

    async fn add_label(&self, pr: &PullRequestId, label: &str) -> Result<()> {
        self.client
            .add_label(self.cid(), self.installation_id, &pr.repo, pr.number, label)
            .await
    }

    async fn remove_label(&self, pr: &PullRequestId, label: &str) -> Result<()> {
        self.client
            .remove_label(self.cid(), self.installation_id, &pr.repo, pr.number, label)
            .await
    }

    async fn create_comment(&self, pr: &PullRequestId, body: &str) -> Result<IssueComment> {
        self.client
            .post_pr_comment(self.cid(), self.installation_id, &pr.repo, pr.number, body)
            .await
    }

    async fn delete_comment(&self, pr: &PullRequestId, comment_id: u64) -> Result<()> {
        self.client
            .delete_comment(self.cid(), self.installation_id, &pr.repo, comment_id)
            .await
    }
}
