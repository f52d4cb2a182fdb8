//! Replays the command timeline against the ownership groups.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::actor::Actor;
use crate::command::{Command, CommandKind, CommandOrigin};
use crate::owners::OwnersGroup;
use crate::timeline::BypassState;

/// An actor's standing approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Approval {
    pub actor: Actor,
    pub origin: CommandOrigin,
    /// Approved with `/approve no-issue`.
    pub no_issue: bool,
    /// The approver is the pull request author.
    pub self_approved: bool,
    pub reference: Option<String>,
}

/// The command currently deciding an actor's contribution.
#[derive(Debug, Clone)]
struct Latest {
    command: Command,
}

impl Latest {
    /// Returns true if `candidate` supersedes this entry.
    ///
    /// Later wins; on a timestamp tie an explicit command beats an implicit one,
    /// and otherwise the one replayed last wins.
    fn superseded_by(&self, candidate: &Command) -> bool {
        match candidate.timestamp.cmp(&self.command.timestamp) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => candidate.explicit || !self.command.explicit,
        }
    }
}

/// Per-actor projection of the timeline.
#[derive(Debug, Clone, Default)]
pub struct ApprovalState {
    latest: BTreeMap<Actor, Latest>,
}

impl ApprovalState {
    pub fn replay(commands: &[Command]) -> Self {
        let mut state = Self::default();
        for command in commands {
            state.apply(command);
        }
        state
    }

    pub fn apply(&mut self, command: &Command) {
        match self.latest.get(&command.actor) {
            Some(current) if !current.superseded_by(command) => {}
            _ => {
                // Re-insert so the displayed spelling follows the deciding command
                self.latest.remove(&command.actor);
                self.latest.insert(
                    command.actor.clone(),
                    Latest {
                        command: command.clone(),
                    },
                );
            }
        }
    }

    /// The deciding command kind for `actor`, if any.
    pub fn decision(&self, actor: &Actor) -> Option<CommandKind> {
        self.latest.get(actor).map(|l| l.command.kind)
    }

    /// Timestamp of the deciding command for `actor`.
    pub fn decided_at(&self, actor: &Actor) -> Option<DateTime<Utc>> {
        self.latest.get(actor).map(|l| l.command.timestamp)
    }

    /// Commands whose latest decision is an approval, in login order.
    pub fn approving(&self) -> impl Iterator<Item = &Command> {
        self.latest
            .values()
            .map(|l| &l.command)
            .filter(|c| matches!(c.kind, CommandKind::Approve | CommandKind::NoIssue))
    }
}

/// Approval status of a single group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupStatus {
    pub group: OwnersGroup,
    /// The approver displayed as covering this group.
    pub approved_by: Option<Actor>,
    /// Hint for an unsatisfied group; None if nobody can approve it.
    pub suggested: Option<Actor>,
}

impl GroupStatus {
    pub fn is_satisfied(&self) -> bool {
        self.approved_by.is_some()
    }

    /// Unsatisfied with no eligible approver anywhere in its chain.
    pub fn is_unsatisfiable(&self) -> bool {
        self.approved_by.is_none() && self.group.eligible().is_empty()
    }
}

/// The outcome of replaying a pull request's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalDecision {
    pub approved: bool,
    /// A human applied the approved label directly.
    pub bypassed: bool,
    /// Credited approvers in login order. Empty when bypassed.
    pub approvers: Vec<Approval>,
    /// Every group touched by the pull request, in directory order.
    pub groups: Vec<GroupStatus>,
    pub suggested_approvers: Vec<Actor>,
}

impl ApprovalDecision {
    pub fn unsatisfied_groups(&self) -> impl Iterator<Item = &OwnersGroup> {
        self.groups
            .iter()
            .filter(|s| !s.is_satisfied())
            .map(|s| &s.group)
    }

    pub fn files_approved(&self) -> bool {
        self.groups.iter().all(GroupStatus::is_satisfied)
    }

    /// Lower-cased, sorted approver logins.
    pub fn approver_logins(&self) -> Vec<String> {
        self.approvers.iter().map(|a| a.actor.normalized()).collect()
    }
}

/// Pick a covering approver, preferring one already shown for another group.
fn pick_covering<'a>(candidates: &BTreeSet<&'a Actor>, used: &BTreeSet<Actor>) -> Option<&'a Actor> {
    candidates
        .iter()
        .find(|a| used.contains(**a))
        .or_else(|| candidates.iter().next())
        .copied()
}

/// Decide approval for a pull request.
pub fn resolve(
    commands: &[Command],
    groups: Vec<OwnersGroup>,
    author: &Actor,
    bypass: &BypassState,
) -> ApprovalDecision {
    let state = ApprovalState::replay(commands);
    let approving: BTreeMap<&Actor, &Command> =
        state.approving().map(|c| (&c.actor, c)).collect();

    debug!(
        "Replayed {} commands: {} actors approving",
        commands.len(),
        approving.len()
    );

    let mut used: BTreeSet<Actor> = BTreeSet::new();
    let mut suggested: Vec<Actor> = Vec::new();
    let mut statuses = Vec::with_capacity(groups.len());

    for group in groups {
        let eligible = group.eligible();
        let candidates: BTreeSet<&Actor> = eligible
            .iter()
            .filter_map(|a| approving.get_key_value(*a).map(|(k, _)| *k))
            .collect();

        let approved_by = pick_covering(&candidates, &used).cloned();
        if let Some(actor) = &approved_by {
            used.insert(actor.clone());
        }

        let hint = if approved_by.is_some() {
            None
        } else if let Some(existing) = suggested.iter().find(|s| group.is_eligible(s)) {
            Some(existing.clone())
        } else {
            let pick = group
                .leaf_approvers
                .iter()
                .find(|a| !suggested.contains(a))
                .or_else(|| eligible.iter().copied().find(|a| !suggested.contains(a)))
                .cloned();
            if let Some(actor) = &pick {
                suggested.push(actor.clone());
            }
            pick
        };

        statuses.push(GroupStatus {
            group,
            approved_by,
            suggested: hint,
        });
    }

    let files_approved = statuses.iter().all(GroupStatus::is_satisfied);
    let bypassed = bypass.is_active();

    let approvers = if bypassed {
        Vec::new()
    } else {
        approving
            .values()
            .filter(|c| statuses.iter().any(|s| s.group.is_eligible(&c.actor)))
            .map(|c| Approval {
                actor: c.actor.clone(),
                origin: c.origin,
                no_issue: c.kind == CommandKind::NoIssue,
                self_approved: c.actor == *author,
                reference: c.reference.clone(),
            })
            .collect()
    };

    ApprovalDecision {
        approved: files_approved || bypassed,
        bypassed,
        approvers,
        groups: statuses,
        suggested_approvers: suggested,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn cmd(actor: &str, kind: CommandKind, secs: i64, explicit: bool) -> Command {
        Command {
            actor: Actor::from(actor),
            kind,
            timestamp: at(secs),
            origin: if explicit {
                CommandOrigin::Comment
            } else {
                CommandOrigin::ReviewState
            },
            explicit,
            reference: None,
        }
    }

    fn group(dir: &str, leaf: &[&str], inherited: &[&str]) -> OwnersGroup {
        let leaf_approvers: BTreeSet<Actor> = leaf.iter().map(|a| Actor::from(*a)).collect();
        let mut approvers = leaf_approvers.clone();
        approvers.extend(inherited.iter().map(|a| Actor::from(*a)));
        OwnersGroup {
            directory: dir.to_string(),
            approvers,
            leaf_approvers,
            has_parent_fallback: true,
        }
    }

    fn author() -> Actor {
        Actor::from("author")
    }

    #[test]
    fn test_later_command_wins() {
        let commands = vec![
            cmd("alice", CommandKind::Approve, 100, true),
            cmd("alice", CommandKind::Cancel, 200, true),
        ];
        let state = ApprovalState::replay(&commands);
        assert_eq!(state.decision(&Actor::from("alice")), Some(CommandKind::Cancel));
    }

    #[test]
    fn test_explicit_beats_implicit_on_tie_regardless_of_order() {
        let explicit_cancel = cmd("bob", CommandKind::Cancel, 100, true);
        let implicit_approve = cmd("bob", CommandKind::Approve, 100, false);

        let forward = ApprovalState::replay(&[explicit_cancel.clone(), implicit_approve.clone()]);
        let backward = ApprovalState::replay(&[implicit_approve, explicit_cancel]);

        assert_eq!(forward.decision(&Actor::from("bob")), Some(CommandKind::Cancel));
        assert_eq!(backward.decision(&Actor::from("bob")), Some(CommandKind::Cancel));
    }

    #[test]
    fn test_decision_ignores_actor_case() {
        let commands = vec![
            cmd("Alice", CommandKind::Approve, 100, true),
            cmd("ALIcE", CommandKind::Cancel, 200, true),
        ];
        let state = ApprovalState::replay(&commands);
        assert_eq!(state.decision(&Actor::from("alice")), Some(CommandKind::Cancel));
        assert_eq!(state.decided_at(&Actor::from("alice")), Some(at(200)));
    }

    #[test]
    fn test_all_groups_satisfied() {
        let decision = resolve(
            &[
                cmd("alice", CommandKind::Approve, 100, true),
                cmd("bob", CommandKind::Approve, 110, true),
            ],
            vec![group("a", &["alice"], &[]), group("b", &["bob"], &[])],
            &author(),
            &BypassState::Inactive,
        );

        assert!(decision.approved);
        assert_eq!(decision.approver_logins(), vec!["alice", "bob"]);
        assert!(decision.suggested_approvers.is_empty());
    }

    #[test]
    fn test_partial_approval_suggests_leaf_approver() {
        let decision = resolve(
            &[cmd("alice", CommandKind::Approve, 100, true)],
            vec![
                group("a", &["alice"], &[]),
                group("b", &["zed", "bob"], &["root"]),
            ],
            &author(),
            &BypassState::Inactive,
        );

        assert!(!decision.approved);
        assert_eq!(decision.suggested_approvers, vec![Actor::from("bob")]);
        let unsatisfied: Vec<&str> = decision
            .unsatisfied_groups()
            .map(|g| g.directory.as_str())
            .collect();
        assert_eq!(unsatisfied, vec!["b"]);
    }

    #[test]
    fn test_suggestion_reused_across_groups() {
        let decision = resolve(
            &[],
            vec![
                group("a", &["alice"], &["root"]),
                group("b", &["bob"], &["alice"]),
            ],
            &author(),
            &BypassState::Inactive,
        );

        assert_eq!(decision.suggested_approvers, vec![Actor::from("alice")]);
        assert_eq!(decision.groups[1].suggested, Some(Actor::from("alice")));
    }

    #[test]
    fn test_covering_approver_prefers_already_used() {
        let decision = resolve(
            &[
                cmd("alice", CommandKind::Approve, 100, true),
                cmd("root", CommandKind::Approve, 110, true),
            ],
            vec![
                group("a", &["root"], &[]),
                group("b", &["alice"], &["root"]),
            ],
            &author(),
            &BypassState::Inactive,
        );

        assert_eq!(decision.groups[0].approved_by, Some(Actor::from("root")));
        assert_eq!(decision.groups[1].approved_by, Some(Actor::from("root")));
        // Both still credited in the approver list
        assert_eq!(decision.approver_logins(), vec!["alice", "root"]);
    }

    #[test]
    fn test_non_owner_approval_not_credited() {
        let decision = resolve(
            &[cmd("mallory", CommandKind::Approve, 100, true)],
            vec![group("a", &["alice"], &[])],
            &author(),
            &BypassState::Inactive,
        );
        assert!(!decision.approved);
        assert!(decision.approvers.is_empty());
    }

    #[test]
    fn test_unsatisfiable_group() {
        let decision = resolve(
            &[],
            vec![group("orphan", &[], &[])],
            &author(),
            &BypassState::Inactive,
        );
        assert!(!decision.approved);
        assert!(decision.groups[0].is_unsatisfiable());
        assert_eq!(decision.groups[0].suggested, None);
    }

    #[test]
    fn test_no_parent_fallback_restricts_to_leaf() {
        let mut g = group("b", &["bob"], &["root"]);
        g.has_parent_fallback = false;
        let decision = resolve(
            &[cmd("root", CommandKind::Approve, 100, true)],
            vec![g],
            &author(),
            &BypassState::Inactive,
        );
        assert!(!decision.approved);
    }

    #[test]
    fn test_bypass_approves_with_empty_list() {
        let decision = resolve(
            &[cmd("alice", CommandKind::Approve, 100, true)],
            vec![group("a", &["alice"], &[]), group("b", &["bob"], &[])],
            &author(),
            &BypassState::Manual {
                actor: Actor::from("human"),
                at: at(50),
            },
        );
        assert!(decision.approved);
        assert!(decision.bypassed);
        assert!(decision.approvers.is_empty());
        assert!(!decision.files_approved());
    }

    #[test]
    fn test_no_issue_counts_as_approval() {
        let decision = resolve(
            &[cmd("alice", CommandKind::NoIssue, 100, true)],
            vec![group("a", &["alice"], &[])],
            &author(),
            &BypassState::Inactive,
        );
        assert!(decision.approved);
        assert!(decision.approvers[0].no_issue);
    }

    #[test]
    fn test_display_keeps_spelling_of_deciding_command() {
        let decision = resolve(
            &[
                cmd("Alice", CommandKind::Cancel, 100, true),
                cmd("ALIcE", CommandKind::Approve, 200, true),
            ],
            vec![group("a", &["alice"], &[])],
            &author(),
            &BypassState::Inactive,
        );
        assert_eq!(decision.approvers[0].actor.login(), "ALIcE");
    }

    #[test]
    fn test_author_marked_self_approved() {
        let decision = resolve(
            &[cmd("Author", CommandKind::Approve, 100, true)],
            vec![group("a", &["author"], &[])],
            &author(),
            &BypassState::Inactive,
        );
        assert!(decision.approvers[0].self_approved);
    }

    fn arb_origin() -> impl Strategy<Value = (CommandOrigin, bool)> {
        prop_oneof![
            Just((CommandOrigin::Comment, true)),
            Just((CommandOrigin::Review, true)),
            Just((CommandOrigin::ReviewState, false)),
            Just((CommandOrigin::Label, true)),
        ]
    }

    fn arb_kind() -> impl Strategy<Value = CommandKind> {
        prop_oneof![
            Just(CommandKind::Approve),
            Just(CommandKind::Cancel),
            Just(CommandKind::NoIssue),
        ]
    }

    proptest! {
        #[test]
        fn latest_command_decides_regardless_of_origin(
            first in (arb_kind(), arb_origin()),
            second in (arb_kind(), arb_origin()),
            t1 in 0i64..1_000_000,
            gap in 1i64..1_000_000,
            reversed in any::<bool>(),
        ) {
            let earlier = Command {
                actor: Actor::from("alice"),
                kind: first.0,
                timestamp: at(t1),
                origin: first.1.0,
                explicit: first.1.1,
                reference: None,
            };
            let later = Command {
                actor: Actor::from("ALICE"),
                kind: second.0,
                timestamp: at(t1 + gap),
                origin: second.1.0,
                explicit: second.1.1,
                reference: None,
            };

            let commands = if reversed {
                vec![later.clone(), earlier]
            } else {
                vec![earlier, later.clone()]
            };
            let state = ApprovalState::replay(&commands);
            prop_assert_eq!(state.decision(&Actor::from("alice")), Some(later.kind));
        }
    }
}
