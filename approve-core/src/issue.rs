//! Associated-issue detection.

use serde::Serialize;

use crate::actor::Actor;
use crate::config::ApprovalConfig;
use crate::pull_request::RepoRef;
use crate::resolver::ApprovalDecision;

/// Whether the pull request references a tracking issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueLink {
    pub required: bool,
    pub number: Option<u64>,
    /// True when an approver's latest command was `/approve no-issue`, or
    /// when linking is not required at all.
    pub bypassed: bool,
    /// Approvers whose standing approval waives the requirement.
    pub bypassed_by: Vec<Actor>,
}

impl IssueLink {
    pub fn is_satisfied(&self) -> bool {
        self.number.is_some() || self.bypassed
    }
}

/// Characters that end a reference token.
fn is_token_boundary(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']' | ',' | ';' | '<' | '>')
}

/// Find the first issue reference in `body`.
///
/// Accepts `#123`, `owner/repo#123` and `https://github.com/owner/repo/issues/123`
/// for the pull request's own repository.
pub fn find_issue_reference(body: &str, repo: &RepoRef) -> Option<u64> {
    let qualified = format!("{}/{}#", repo.owner, repo.name).to_lowercase();
    let url = format!("github.com/{}/{}/issues/", repo.owner, repo.name).to_lowercase();

    body.split(is_token_boundary)
        .filter(|t| !t.is_empty())
        .find_map(|token| {
            let token = token
                .trim_end_matches(['.', ':', '!', '?'])
                .to_lowercase();
            let digits = if let Some(rest) = token.strip_prefix('#') {
                rest
            } else if let Some(rest) = token.strip_prefix(&qualified) {
                rest
            } else if let Some(idx) = token.find(&url) {
                &token[idx + url.len()..]
            } else {
                return None;
            };

            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            digits.parse().ok()
        })
}

/// Resolve the issue requirement for a pull request.
///
/// The bypass follows the same precedence as approval: only an approver whose
/// deciding command is `/approve no-issue` waives it.
pub fn resolve_issue_link(
    body: Option<&str>,
    repo: &RepoRef,
    decision: &ApprovalDecision,
    config: &ApprovalConfig,
) -> IssueLink {
    let number = body.and_then(|b| find_issue_reference(b, repo));
    let bypassed_by: Vec<Actor> = decision
        .approvers
        .iter()
        .filter(|a| a.no_issue)
        .map(|a| a.actor.clone())
        .collect();

    IssueLink {
        required: config.issue_required,
        number,
        bypassed: !config.issue_required || !bypassed_by.is_empty(),
        bypassed_by,
    }
}
