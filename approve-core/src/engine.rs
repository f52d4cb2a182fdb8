//! The full evaluation pipeline for one pull request.
//!
//! Every call recomputes the decision from the snapshot alone. Nothing is
//! cached between calls, so two evaluations of the same history agree.

use tracing::{debug, info};

use crate::config::ApprovalConfig;
use crate::error::EngineError;
use crate::issue::{resolve_issue_link, IssueLink};
use crate::notification::{render_notification, NotificationMeta, RenderContext};
use crate::owners::{owners_groups, OwnersOracle};
use crate::pull_request::PullRequestSnapshot;
use crate::reconcile::{plan_effects, DesiredState, Effect, ObservedState};
use crate::resolver::{resolve, ApprovalDecision};
use crate::timeline::{build_timeline, Timeline};

/// Everything one evaluation produces.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub timeline: Timeline,
    pub decision: ApprovalDecision,
    pub issue: IssueLink,
    /// Rendered notification body.
    pub body: String,
    /// Mutations needed to publish the result, in execution order.
    pub effects: Vec<Effect>,
}

impl Evaluation {
    /// Ownership approval or a manual bypass. A missing issue link only
    /// changes the rendered message.
    pub fn is_approved(&self) -> bool {
        self.decision.approved
    }
}

pub fn evaluate<O: OwnersOracle + ?Sized>(
    snapshot: &PullRequestSnapshot,
    owners: &O,
    config: &ApprovalConfig,
) -> Result<Evaluation, EngineError> {
    let pr = snapshot.id();
    let timeline = build_timeline(snapshot, config);
    debug!("{}: {} commands in timeline", pr, timeline.commands.len());

    let groups = owners_groups(owners, &snapshot.changed_files)?;

    let decision = resolve(
        &timeline.commands,
        groups,
        &snapshot.pull_request.author,
        &timeline.bypass,
    );

    let issue = resolve_issue_link(
        snapshot.pull_request.body.as_deref(),
        &snapshot.repo,
        &decision,
        config,
    );
    let ctx = RenderContext::new(snapshot, config);
    let body = render_notification(&ctx, &decision, &issue);

    let desired = DesiredState {
        approved: decision.approved,
        body: body.clone(),
        meta: NotificationMeta::from_decision(&decision),
    };
    let observed = ObservedState::from_snapshot(snapshot, config);
    let effects = plan_effects(&desired, &observed, &config.approved_label);

    info!(
        "{}: approved={} bypassed={} approvers={:?} effects={}",
        pr,
        decision.approved,
        decision.bypassed,
        decision.approver_logins(),
        effects.len()
    );

    Ok(Evaluation {
        timeline,
        decision,
        issue,
        body,
        effects,
    })
}
