//! Reconciliation planning (side effects as data).
//!
//! The planner compares desired state against what the platform currently
//! shows and returns the minimal list of mutations. It performs no I/O; the
//! server's interpreter executes the effects in order.

use serde::{Deserialize, Serialize};

use crate::config::ApprovalConfig;
use crate::notification::{is_notification, NotificationMeta};
use crate::pull_request::{IssueComment, PullRequestSnapshot};

/// A single platform mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum Effect {
    AddLabel { label: String },
    RemoveLabel { label: String },
    DeleteComment { comment_id: u64 },
    CreateComment { body: String },
}

/// What the engine wants the pull request to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredState {
    pub approved: bool,
    pub body: String,
    pub meta: NotificationMeta,
}

/// What the pull request currently shows.
#[derive(Debug, Clone)]
pub struct ObservedState<'a> {
    pub label_present: bool,
    /// Bot notifications, oldest first.
    pub notifications: Vec<&'a IssueComment>,
}

impl<'a> ObservedState<'a> {
    pub fn from_snapshot(snapshot: &'a PullRequestSnapshot, config: &ApprovalConfig) -> Self {
        let bot = config.bot_login.as_deref();
        let mut notifications: Vec<&IssueComment> = snapshot
            .comments
            .iter()
            .filter(|c| c.author.is_bot(bot) && is_notification(&c.body))
            .collect();
        notifications.sort_by_key(|c| (c.created_at, c.id));

        Self {
            label_present: snapshot.pull_request.has_label(&config.approved_label),
            notifications,
        }
    }

    /// Metadata of the most recent notification, if it can be parsed.
    pub fn latest_meta(&self) -> Option<NotificationMeta> {
        self.notifications
            .last()
            .and_then(|c| NotificationMeta::parse(&c.body))
    }
}

/// Plan the mutations that bring `observed` in line with `desired`.
///
/// A new notification is posted only on a material transition: the label
/// flips, no notification exists yet, or the latest one records a different
/// approver set or approval state. Wording changes alone never re-post.
/// Posting replaces every older notification; otherwise only surplus
/// duplicates are removed.
pub fn plan_effects(desired: &DesiredState, observed: &ObservedState<'_>, label: &str) -> Vec<Effect> {
    let mut effects = Vec::new();

    let label_effect = match (desired.approved, observed.label_present) {
        (true, false) => Some(Effect::AddLabel {
            label: label.to_string(),
        }),
        (false, true) => Some(Effect::RemoveLabel {
            label: label.to_string(),
        }),
        _ => None,
    };
    let label_changed = label_effect.is_some();
    effects.extend(label_effect);

    let up_to_date = observed.latest_meta().as_ref() == Some(&desired.meta);

    if label_changed || !up_to_date {
        effects.extend(observed.notifications.iter().map(|c| Effect::DeleteComment {
            comment_id: c.id,
        }));
        effects.push(Effect::CreateComment {
            body: desired.body.clone(),
        });
    } else if let Some((_, stale)) = observed.notifications.split_last() {
        effects.extend(stale.iter().map(|c| Effect::DeleteComment { comment_id: c.id }));
    }

    effects
}
