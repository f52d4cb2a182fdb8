//! Rendering of the approval status comment.
//!
//! The output is a pure function of its inputs so that re-running the engine
//! over unchanged history reproduces it exactly. The trailing `META` block is
//! the machine-readable part: the reconciler compares it, and external tooling
//! may read approval state from it without running the engine.

use serde::{Deserialize, Serialize};
use std::fmt::Write;

use crate::config::ApprovalConfig;
use crate::issue::IssueLink;
use crate::pull_request::{PullRequestSnapshot, RepoRef};
use crate::resolver::{Approval, ApprovalDecision, GroupStatus};

/// Identifies a status comment written by this engine.
pub const NOTIFICATION_MARKER: &str = "[APPROVALNOTIFIER]";

const META_PREFIX: &str = "<!-- META=";
const META_SUFFIX: &str = " -->";
const DEFAULT_HOST: &str = "https://github.com";

/// Links and coordinates needed to render a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderContext {
    pub repo: RepoRef,
    pub base_branch: String,
    pub host: String,
    pub pr_process_link: String,
    pub commands_link: String,
}

impl RenderContext {
    pub fn new(snapshot: &PullRequestSnapshot, config: &ApprovalConfig) -> Self {
        Self {
            repo: snapshot.repo.clone(),
            base_branch: snapshot.pull_request.base_branch.clone(),
            host: DEFAULT_HOST.to_string(),
            pr_process_link: config.pr_process_link.clone(),
            commands_link: config.commands_link.clone(),
        }
    }

    fn owners_link(&self, owners_file: &str) -> String {
        format!(
            "{}/{}/{}/blob/{}/{}",
            self.host, self.repo.owner, self.repo.name, self.base_branch, owners_file
        )
    }
}

/// Machine-readable approval state embedded in every notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMeta {
    /// Lower-cased, sorted logins of credited approvers.
    pub approvers: Vec<String>,
    #[serde(default)]
    pub approved: bool,
}

impl NotificationMeta {
    pub fn from_decision(decision: &ApprovalDecision) -> Self {
        let mut approvers = decision.approver_logins();
        approvers.sort();
        approvers.dedup();
        Self {
            approvers,
            approved: decision.approved,
        }
    }

    fn to_marker(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("{}{}{}", META_PREFIX, json, META_SUFFIX)
    }

    /// Parse the last metadata block in a comment body.
    pub fn parse(body: &str) -> Option<Self> {
        let start = body.rfind(META_PREFIX)? + META_PREFIX.len();
        let rest = &body[start..];
        let end = rest.find(META_SUFFIX)?;
        serde_json::from_str(&rest[..end]).ok()
    }
}

/// Returns true if `body` is an approval notification.
pub fn is_notification(body: &str) -> bool {
    body.contains(NOTIFICATION_MARKER)
}

fn attribution(approval: &Approval, title: &str) -> String {
    format!(
        "*<a href=\"{}\" title=\"{}\">{}</a>*",
        approval.reference.as_deref().unwrap_or("#"),
        title,
        approval.actor
    )
}

fn approval_title(approval: &Approval) -> &'static str {
    if approval.self_approved {
        "Author self-approved"
    } else if approval.no_issue {
        "Approved with no-issue bypass"
    } else {
        "Approved"
    }
}

fn render_group(ctx: &RenderContext, status: &GroupStatus) -> String {
    let file = status.group.owners_file();
    let link = format!("[{}]({})", file, ctx.owners_link(&file));
    match &status.approved_by {
        Some(actor) => format!("- ~~{}~~ [{}]\n", link, actor),
        None if status.is_unsatisfiable() => format!("- **{}** (no eligible approvers)\n", link),
        None => match &status.suggested {
            Some(actor) => format!("- **{}** (suggested: {})\n", link, actor),
            None => format!("- **{}**\n", link),
        },
    }
}

fn render_issue(out: &mut String, decision: &ApprovalDecision, issue: &IssueLink) {
    if !issue.required {
        return;
    }

    if let Some(number) = issue.number {
        let _ = writeln!(out, "Associated issue: *#{}*\n", number);
    } else if !issue.bypassed_by.is_empty() {
        let bypassers: Vec<String> = decision
            .approvers
            .iter()
            .filter(|a| issue.bypassed_by.contains(&a.actor))
            .map(|a| attribution(a, "Approved"))
            .collect();
        let _ = writeln!(
            out,
            "Associated issue requirement bypassed by {}\n",
            bypassers.join(", ")
        );
    } else if decision.bypassed {
        out.push_str("*No associated issue*. Requirement bypassed by manually added approval.\n\n");
    } else {
        out.push_str(
            "*No associated issue*. Update pull-request body to add a reference to an issue, \
             or get approval with `/approve no-issue`\n\n",
        );
    }
}

/// Render the status comment body.
pub fn render_notification(
    ctx: &RenderContext,
    decision: &ApprovalDecision,
    issue: &IssueLink,
) -> String {
    let mut out = String::new();

    let _ = writeln!(
        out,
        "{} This PR is **{}**\n",
        NOTIFICATION_MARKER,
        if decision.approved {
            "APPROVED"
        } else {
            "NOT APPROVED"
        }
    );

    if decision.bypassed {
        out.push_str("Approval requirements bypassed by manually added approval.\n\n");
    }

    if decision.approvers.is_empty() {
        if !decision.bypassed {
            out.push_str("This pull-request has not yet been approved by any approver.\n");
        }
    } else {
        let approvals: Vec<String> = decision
            .approvers
            .iter()
            .map(|a| attribution(a, approval_title(a)))
            .collect();
        let _ = writeln!(
            out,
            "This pull-request has been approved by: {}",
            approvals.join(", ")
        );
    }

    if !decision.approved && !decision.suggested_approvers.is_empty() {
        let bold: Vec<String> = decision
            .suggested_approvers
            .iter()
            .map(|a| format!("**{}**", a))
            .collect();
        let mentions: Vec<String> = decision
            .suggested_approvers
            .iter()
            .map(|a| format!("@{}", a))
            .collect();
        let _ = writeln!(
            out,
            "To complete the [pull request process]({}), please assign {}",
            ctx.pr_process_link,
            bold.join(", ")
        );
        let _ = writeln!(
            out,
            "You can assign the PR to them by writing `/assign {}` in a comment when ready.",
            mentions.join(" ")
        );
    }
    out.push('\n');

    render_issue(&mut out, decision, issue);

    let _ = writeln!(
        out,
        "The full list of commands accepted by this bot can be found [here]({}?repo={}%2F{}).\n",
        ctx.commands_link, ctx.repo.owner, ctx.repo.name
    );
    let _ = writeln!(
        out,
        "The pull request process is described [here]({})\n",
        ctx.pr_process_link
    );

    out.push_str(if decision.approved {
        "<details>\n"
    } else {
        "<details open>\n"
    });
    out.push_str("Needs approval from an approver in each of these files:\n\n");
    for status in &decision.groups {
        out.push_str(&render_group(ctx, status));
    }
    out.push_str("\nApprovers can indicate their approval by writing `/approve` in a comment\n");
    out.push_str("Approvers can cancel approval by writing `/approve cancel` in a comment\n");
    out.push_str("</details>\n");

    out.push_str(&NotificationMeta::from_decision(decision).to_marker());
    out
}
