//! Platform history for a single pull request.
//!
//! These are the inputs the engine recomputes from on every invocation. They
//! mirror the shape of GitHub's REST payloads closely enough to deserialize a
//! recorded snapshot, but are our own types so the engine never depends on
//! the HTTP client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::actor::Actor;

/// Repository coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Unique identifier for a pull request across repositories.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PullRequestId {
    pub repo: RepoRef,
    pub number: u64,
}

impl fmt::Display for PullRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.repo, self.number)
    }
}

/// Pull request metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub author: Actor,
    #[serde(default)]
    pub body: Option<String>,
    pub base_branch: String,
    /// Labels currently present on the pull request.
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub assignees: Vec<Actor>,
}

impl PullRequest {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l.eq_ignore_ascii_case(label))
    }
}

/// A conversation comment on the pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueComment {
    pub id: u64,
    pub author: Actor,
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub html_url: Option<String>,
}

/// State a review was submitted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    Approved,
    ChangesRequested,
    Commented,
    Pending,
    Dismissed,
    #[serde(other)]
    Unknown,
}

/// A code review submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: u64,
    pub author: Actor,
    #[serde(default)]
    pub body: Option<String>,
    pub state: ReviewState,
    /// Absent while the review is still pending.
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub html_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelAction {
    Added,
    Removed,
}

/// One entry of the pull request's label history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelEvent {
    pub actor: Actor,
    pub label: String,
    pub action: LabelAction,
    pub created_at: DateTime<Utc>,
}

/// Everything the engine reads about one pull request, fetched fresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequestSnapshot {
    pub repo: RepoRef,
    pub pull_request: PullRequest,
    #[serde(default)]
    pub comments: Vec<IssueComment>,
    #[serde(default)]
    pub reviews: Vec<Review>,
    #[serde(default)]
    pub label_events: Vec<LabelEvent>,
    #[serde(default)]
    pub changed_files: Vec<String>,
}

impl PullRequestSnapshot {
    pub fn id(&self) -> PullRequestId {
        PullRequestId {
            repo: self.repo.clone(),
            number: self.pull_request.number,
        }
    }
}
