//! Merges comments, reviews and label history into one ordered command stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actor::Actor;
use crate::command::{extract_from_comment, extract_from_review, Command, CommandKind, CommandOrigin};
use crate::config::ApprovalConfig;
use crate::pull_request::{LabelAction, LabelEvent, PullRequestSnapshot};

/// Whether a human applied the approved label directly.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BypassState {
    #[default]
    Inactive,
    Manual { actor: Actor, at: DateTime<Utc> },
}

impl BypassState {
    pub fn is_active(&self) -> bool {
        matches!(self, BypassState::Manual { .. })
    }
}

/// Commands in replay order plus the out-of-band bypass signal.
#[derive(Debug, Clone)]
pub struct Timeline {
    pub commands: Vec<Command>,
    pub bypass: BypassState,
}

/// Build the replay order for a pull request.
///
/// Commands are sorted by timestamp; among equal timestamps implicit commands
/// come first, so an explicit command replayed after them takes precedence.
/// Signals authored by the bot are dropped.
pub fn build_timeline(snapshot: &PullRequestSnapshot, config: &ApprovalConfig) -> Timeline {
    let bot = config.bot_login.as_deref();
    let mut commands = Vec::new();

    if config.implicit_self_approve {
        commands.push(Command {
            actor: snapshot.pull_request.author.clone(),
            kind: CommandKind::Approve,
            timestamp: DateTime::<Utc>::MIN_UTC,
            origin: CommandOrigin::ImplicitSelf,
            explicit: false,
            reference: None,
        });
    }

    for comment in snapshot.comments.iter().filter(|c| !c.author.is_bot(bot)) {
        commands.extend(extract_from_comment(comment, config));
    }

    for review in snapshot.reviews.iter().filter(|r| !r.author.is_bot(bot)) {
        commands.extend(extract_from_review(review, config));
    }

    commands.extend(label_commands(&snapshot.label_events, config));

    // Stable: commands from the same body keep their line order
    commands.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then(a.explicit.cmp(&b.explicit))
    });

    Timeline {
        commands,
        bypass: label_bypass(&snapshot.label_events, config),
    }
}

fn is_approved_label(event: &LabelEvent, config: &ApprovalConfig) -> bool {
    event.label.eq_ignore_ascii_case(&config.approved_label)
}

/// A human adding the approved label approves; removing it cancels.
fn label_commands<'a>(
    events: &'a [LabelEvent],
    config: &'a ApprovalConfig,
) -> impl Iterator<Item = Command> + 'a {
    let bot = config.bot_login.as_deref();
    events
        .iter()
        .filter(move |e| is_approved_label(e, config) && !e.actor.is_bot(bot))
        .map(|e| Command {
            actor: e.actor.clone(),
            kind: match e.action {
                LabelAction::Added => CommandKind::Approve,
                LabelAction::Removed => CommandKind::Cancel,
            },
            timestamp: e.created_at,
            origin: CommandOrigin::Label,
            explicit: true,
            reference: None,
        })
}

/// Replay the approved label's history to find a manual bypass.
///
/// The most recent add decides: a human add activates the bypass, a bot add
/// does not. Any later removal clears it.
pub fn label_bypass(events: &[LabelEvent], config: &ApprovalConfig) -> BypassState {
    let bot = config.bot_login.as_deref();
    let mut history: Vec<&LabelEvent> = events
        .iter()
        .filter(|e| is_approved_label(e, config))
        .collect();
    history.sort_by_key(|e| e.created_at);

    history
        .into_iter()
        .fold(BypassState::Inactive, |_, event| match event.action {
            LabelAction::Added if !event.actor.is_bot(bot) => BypassState::Manual {
                actor: event.actor.clone(),
                at: event.created_at,
            },
            _ => BypassState::Inactive,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pull_request::{IssueComment, PullRequest, RepoRef, Review, ReviewState};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn config() -> ApprovalConfig {
        ApprovalConfig {
            bot_login: Some("approve-bot".to_string()),
            ..ApprovalConfig::default()
        }
    }

    fn snapshot() -> PullRequestSnapshot {
        PullRequestSnapshot {
            repo: RepoRef::new("org", "repo"),
            pull_request: PullRequest {
                number: 1,
                author: Actor::from("author"),
                body: None,
                base_branch: "master".to_string(),
                labels: vec![],
                assignees: vec![],
            },
            comments: vec![],
            reviews: vec![],
            label_events: vec![],
            changed_files: vec![],
        }
    }

    fn comment(id: u64, author: &str, body: &str, secs: i64) -> IssueComment {
        IssueComment {
            id,
            author: Actor::from(author),
            body: body.to_string(),
            created_at: at(secs),
            html_url: None,
        }
    }

    fn label(actor: &str, action: LabelAction, secs: i64) -> LabelEvent {
        LabelEvent {
            actor: Actor::from(actor),
            label: "approved".to_string(),
            action,
            created_at: at(secs),
        }
    }

    #[test]
    fn test_commands_sorted_across_sources() {
        let mut snap = snapshot();
        snap.comments = vec![
            comment(1, "carol", "/approve", 300),
            comment(2, "alice", "/approve", 100),
        ];
        snap.reviews = vec![Review {
            id: 3,
            author: Actor::from("bob"),
            body: Some("/approve".to_string()),
            state: ReviewState::Commented,
            submitted_at: Some(at(200)),
            html_url: None,
        }];

        let timeline = build_timeline(&snap, &config());
        let actors: Vec<&str> = timeline.commands.iter().map(|c| c.actor.login()).collect();
        assert_eq!(actors, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_implicit_self_approval_leads() {
        let mut snap = snapshot();
        snap.comments = vec![comment(1, "alice", "/approve", 100)];
        let cfg = ApprovalConfig {
            implicit_self_approve: true,
            ..config()
        };

        let timeline = build_timeline(&snap, &cfg);
        assert_eq!(timeline.commands[0].origin, CommandOrigin::ImplicitSelf);
        assert_eq!(timeline.commands[0].actor, Actor::from("author"));
        assert!(!timeline.commands[0].explicit);
    }

    #[test]
    fn test_equal_timestamps_put_explicit_last() {
        let mut snap = snapshot();
        snap.reviews = vec![Review {
            id: 3,
            author: Actor::from("bob"),
            body: None,
            state: ReviewState::ChangesRequested,
            submitted_at: Some(at(100)),
            html_url: None,
        }];
        snap.comments = vec![comment(1, "bob", "/approve", 100)];

        let timeline = build_timeline(&snap, &config());
        assert_eq!(timeline.commands.len(), 2);
        assert!(!timeline.commands[0].explicit);
        assert!(timeline.commands[1].explicit);
        assert_eq!(timeline.commands[1].kind, CommandKind::Approve);
    }

    #[test]
    fn test_bot_comments_ignored() {
        let mut snap = snapshot();
        snap.comments = vec![
            comment(1, "approve-bot", "/approve", 100),
            comment(2, "other-app[bot]", "/approve", 100),
        ];
        assert!(build_timeline(&snap, &config()).commands.is_empty());
    }

    #[test]
    fn test_human_label_changes_become_commands() {
        let mut snap = snapshot();
        snap.label_events = vec![
            label("alice", LabelAction::Added, 100),
            label("approve-bot", LabelAction::Removed, 150),
            label("bob", LabelAction::Removed, 200),
        ];

        let timeline = build_timeline(&snap, &config());
        let kinds: Vec<(String, CommandKind)> = timeline
            .commands
            .iter()
            .map(|c| (c.actor.normalized(), c.kind))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("alice".to_string(), CommandKind::Approve),
                ("bob".to_string(), CommandKind::Cancel),
            ]
        );
    }

    #[test]
    fn test_bypass_set_by_human_add() {
        let events = vec![label("alice", LabelAction::Added, 100)];
        assert_eq!(
            label_bypass(&events, &config()),
            BypassState::Manual {
                actor: Actor::from("alice"),
                at: at(100),
            }
        );
    }

    #[test]
    fn test_bypass_not_set_by_bot_add() {
        let events = vec![
            label("alice", LabelAction::Added, 100),
            label("alice", LabelAction::Removed, 150),
            label("approve-bot", LabelAction::Added, 200),
        ];
        assert!(!label_bypass(&events, &config()).is_active());
    }

    #[test]
    fn test_bypass_cleared_by_removal() {
        let events = vec![
            label("alice", LabelAction::Removed, 300),
            label("alice", LabelAction::Added, 100),
        ];
        assert!(!label_bypass(&events, &config()).is_active());
    }

    #[test]
    fn test_bypass_ignores_other_labels() {
        let events = vec![LabelEvent {
            actor: Actor::from("alice"),
            label: "lgtm".to_string(),
            action: LabelAction::Added,
            created_at: at(100),
        }];
        assert!(!label_bypass(&events, &config()).is_active());
    }
}
