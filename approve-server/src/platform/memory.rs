//! In-memory implementation of `Platform`.
//!
//! Holds pull request snapshots in a `HashMap` protected by a `RwLock` and
//! applies mutations to them the way GitHub would, so a second evaluation
//! observes the first one's writes. Every successful write is recorded.

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use approve_core::{
    Actor, Effect, IssueComment, LabelAction, LabelEvent, PullRequestId, PullRequestSnapshot,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use super::Platform;

struct Inner {
    snapshots: HashMap<PullRequestId, PullRequestSnapshot>,
    writes: Vec<Effect>,
    next_comment_id: u64,
    /// Writes attempted so far, successful or not.
    attempts: usize,
    fail_write_at: Option<usize>,
    fail_reads: bool,
}

pub struct InMemoryPlatform {
    bot_login: Actor,
    inner: RwLock<Inner>,
}

impl InMemoryPlatform {
    pub fn new(bot_login: &str) -> Self {
        Self {
            bot_login: Actor::from(bot_login),
            inner: RwLock::new(Inner {
                snapshots: HashMap::new(),
                writes: Vec::new(),
                next_comment_id: 1_000_000,
                attempts: 0,
                fail_write_at: None,
                fail_reads: false,
            }),
        }
    }

    pub async fn insert(&self, snapshot: PullRequestSnapshot) {
        let mut inner = self.inner.write().await;
        inner.snapshots.insert(snapshot.id(), snapshot);
    }

    pub async fn snapshot(&self, pr: &PullRequestId) -> Option<PullRequestSnapshot> {
        self.inner.read().await.snapshots.get(pr).cloned()
    }

    /// Successful writes in the order they were issued.
    pub async fn writes(&self) -> Vec<Effect> {
        self.inner.read().await.writes.clone()
    }

    pub async fn clear_writes(&self) {
        self.inner.write().await.writes.clear();
    }

    /// Make the `index`-th write attempt (zero-based, counted from now) fail.
    pub async fn fail_write_at(&self, index: usize) {
        let mut inner = self.inner.write().await;
        inner.fail_write_at = Some(inner.attempts + index);
    }

    pub async fn fail_reads(&self, fail: bool) {
        self.inner.write().await.fail_reads = fail;
    }

    /// Append a comment as a human would, one second after the latest activity.
    pub async fn push_comment(&self, pr: &PullRequestId, author: &str, body: &str) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let id = inner.next_comment_id;
        inner.next_comment_id += 1;
        let snapshot = inner
            .snapshots
            .get_mut(pr)
            .ok_or_else(|| anyhow!("unknown pull request {}", pr))?;
        let created_at = next_timestamp(snapshot);
        snapshot.comments.push(IssueComment {
            id,
            author: Actor::from(author),
            body: body.to_string(),
            created_at,
            html_url: None,
        });
        Ok(id)
    }

    async fn write<F>(&self, pr: &PullRequestId, effect: Effect, apply: F) -> Result<()>
    where
        F: FnOnce(&mut PullRequestSnapshot, DateTime<Utc>) + Send,
    {
        let mut inner = self.inner.write().await;
        let attempt = inner.attempts;
        inner.attempts += 1;
        if inner.fail_write_at == Some(attempt) {
            return Err(anyhow!("injected failure on {:?}", effect));
        }

        let snapshot = inner
            .snapshots
            .get_mut(pr)
            .ok_or_else(|| anyhow!("unknown pull request {}", pr))?;
        let now = next_timestamp(snapshot);
        apply(snapshot, now);
        inner.writes.push(effect);
        Ok(())
    }
}

/// A timestamp strictly after everything already in the snapshot.
fn next_timestamp(snapshot: &PullRequestSnapshot) -> DateTime<Utc> {
    let comments = snapshot.comments.iter().map(|c| c.created_at);
    let reviews = snapshot.reviews.iter().filter_map(|r| r.submitted_at);
    let labels = snapshot.label_events.iter().map(|e| e.created_at);
    comments
        .chain(reviews)
        .chain(labels)
        .max()
        .map_or_else(Utc::now, |latest| latest + Duration::seconds(1))
}

#[async_trait]
impl Platform for InMemoryPlatform {
    async fn fetch_snapshot(&self, pr: &PullRequestId) -> Result<PullRequestSnapshot> {
        let inner = self.inner.read().await;
        if inner.fail_reads {
            return Err(anyhow!("injected read failure for {}", pr));
        }
        inner
            .snapshots
            .get(pr)
            .cloned()
            .ok_or_else(|| anyhow!("unknown pull request {}", pr))
    }

    async fn add_label(&self, pr: &PullRequestId, label: &str) -> Result<()> {
        let actor = self.bot_login.clone();
        let effect = Effect::AddLabel {
            label: label.to_string(),
        };
        self.write(pr, effect, |snapshot, now| {
            if !snapshot.pull_request.has_label(label) {
                snapshot.pull_request.labels.push(label.to_string());
            }
            snapshot.label_events.push(LabelEvent {
                actor,
                label: label.to_string(),
                action: LabelAction::Added,
                created_at: now,
            });
        })
        .await
    }

    async fn remove_label(&self, pr: &PullRequestId, label: &str) -> Result<()> {
        let actor = self.bot_login.clone();
        let effect = Effect::RemoveLabel {
            label: label.to_string(),
        };
        self.write(pr, effect, |snapshot, now| {
            snapshot
                .pull_request
                .labels
                .retain(|l| !l.eq_ignore_ascii_case(label));
            snapshot.label_events.push(LabelEvent {
                actor,
                label: label.to_string(),
                action: LabelAction::Removed,
                created_at: now,
            });
        })
        .await
    }

    async fn create_comment(&self, pr: &PullRequestId, body: &str) -> Result<IssueComment> {
        let id = {
            let mut inner = self.inner.write().await;
            let id = inner.next_comment_id;
            inner.next_comment_id += 1;
            id
        };
        let author = self.bot_login.clone();
        let effect = Effect::CreateComment {
            body: body.to_string(),
        };

        let mut created = None;
        self.write(pr, effect, |snapshot, now| {
            let comment = IssueComment {
                id,
                author,
                body: body.to_string(),
                created_at: now,
                html_url: None,
            };
            created = Some(comment.clone());
            snapshot.comments.push(comment);
        })
        .await?;

        created.ok_or_else(|| anyhow!("comment {} was not created", id))
    }

    async fn delete_comment(&self, pr: &PullRequestId, comment_id: u64) -> Result<()> {
        let effect = Effect::DeleteComment { comment_id };
        self.write(pr, effect, |snapshot, _| {
            snapshot.comments.retain(|c| c.id != comment_id);
        })
        .await
    }
}
