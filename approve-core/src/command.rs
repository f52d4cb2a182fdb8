//! Command extraction from comment and review bodies.
//!
//! Commands must start a line (after trimming surrounding whitespace) and are
//! matched case-insensitively:
//!
//! - `/approve`, `/approve cancel`, `/approve no-issue` are explicit commands.
//! - `/lgtm`, `/lgtm cancel` become implicit approve/cancel when
//!   `lgtm_acts_as_approve` is set.
//! - A review's state becomes an implicit command when its body carries no
//!   explicit one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::actor::Actor;
use crate::config::ApprovalConfig;
use crate::pull_request::{IssueComment, Review, ReviewState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    Approve,
    Cancel,
    /// Approve and waive the associated-issue requirement.
    NoIssue,
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Approve => write!(f, "approve"),
            CommandKind::Cancel => write!(f, "approve cancel"),
            CommandKind::NoIssue => write!(f, "approve no-issue"),
        }
    }
}

/// Where a command came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandOrigin {
    Comment,
    Review,
    ReviewState,
    Label,
    ImplicitSelf,
}

/// One approval signal from one actor at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub actor: Actor,
    pub kind: CommandKind,
    pub timestamp: DateTime<Utc>,
    pub origin: CommandOrigin,
    /// Parsed from literal command text rather than inferred.
    pub explicit: bool,
    /// Link to the comment or review that carried the command.
    pub reference: Option<String>,
}

/// A line-level match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineCommand {
    Approve(CommandKind),
    Lgtm(CommandKind),
}

/// Parse one line. Returns None for anything that is not a recognised command.
fn parse_line(line: &str) -> Option<LineCommand> {
    let lowercase = line.trim().to_lowercase();

    let (rest, is_lgtm) = if let Some(rest) = lowercase.strip_prefix("/approve") {
        (rest, false)
    } else if let Some(rest) = lowercase.strip_prefix("/lgtm") {
        (rest, true)
    } else {
        return None;
    };

    // Require a whitespace boundary, so "/approved" is not "/approve" + "d"
    if !rest.is_empty() && !rest.starts_with(|c: char| c.is_whitespace()) {
        return None;
    }

    let kind = match rest.trim() {
        "" => CommandKind::Approve,
        "cancel" => CommandKind::Cancel,
        "no-issue" if !is_lgtm => CommandKind::NoIssue,
        _ => return None,
    };

    Some(if is_lgtm {
        LineCommand::Lgtm(kind)
    } else {
        LineCommand::Approve(kind)
    })
}

/// All explicit approve commands in a body, in line order.
pub fn parse_explicit_commands(body: &str) -> Vec<CommandKind> {
    body.lines()
        .filter_map(|line| match parse_line(line) {
            Some(LineCommand::Approve(kind)) => Some(kind),
            _ => None,
        })
        .collect()
}

fn parse_lgtm_commands(body: &str) -> Vec<CommandKind> {
    body.lines()
        .filter_map(|line| match parse_line(line) {
            Some(LineCommand::Lgtm(kind)) => Some(kind),
            _ => None,
        })
        .collect()
}

/// Commands carried by a conversation comment.
pub fn extract_from_comment(comment: &IssueComment, config: &ApprovalConfig) -> Vec<Command> {
    let make = |kind, explicit| Command {
        actor: comment.author.clone(),
        kind,
        timestamp: comment.created_at,
        origin: CommandOrigin::Comment,
        explicit,
        reference: comment.html_url.clone(),
    };

    let explicit = parse_explicit_commands(&comment.body);
    if !explicit.is_empty() {
        return explicit.into_iter().map(|kind| make(kind, true)).collect();
    }

    if config.lgtm_acts_as_approve {
        return parse_lgtm_commands(&comment.body)
            .into_iter()
            .map(|kind| make(kind, false))
            .collect();
    }

    Vec::new()
}

/// Commands carried by a submitted review.
///
/// Explicit commands in the body replace the review state entirely. A
/// changes-requested review always cancels, regardless of configuration.
pub fn extract_from_review(review: &Review, config: &ApprovalConfig) -> Vec<Command> {
    let Some(submitted_at) = review.submitted_at else {
        return Vec::new();
    };

    let explicit = review
        .body
        .as_deref()
        .map(parse_explicit_commands)
        .unwrap_or_default();

    if !explicit.is_empty() {
        return explicit
            .into_iter()
            .map(|kind| Command {
                actor: review.author.clone(),
                kind,
                timestamp: submitted_at,
                origin: CommandOrigin::Review,
                explicit: true,
                reference: review.html_url.clone(),
            })
            .collect();
    }

    let implied = match review.state {
        ReviewState::Approved if config.review_acts_as_approve => CommandKind::Approve,
        ReviewState::ChangesRequested => CommandKind::Cancel,
        _ => return Vec::new(),
    };

    vec![Command {
        actor: review.author.clone(),
        kind: implied,
        timestamp: submitted_at,
        origin: CommandOrigin::ReviewState,
        explicit: false,
        reference: review.html_url.clone(),
    }]
}
