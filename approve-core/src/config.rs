//! Engine configuration.

use serde::{Deserialize, Serialize};

pub const DEFAULT_APPROVED_LABEL: &str = "approved";
pub const DEFAULT_PR_PROCESS_LINK: &str =
    "https://git.k8s.io/community/contributors/guide/owners.md#the-code-review-process";
pub const DEFAULT_COMMANDS_LINK: &str = "https://go.k8s.io/bot-commands";

/// Per-repository approval policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalConfig {
    /// Report whether a tracking issue is linked. Never gates approval.
    pub issue_required: bool,
    /// Credit the pull request author as an approver without a command.
    pub implicit_self_approve: bool,
    /// Treat an `approved` review as `/approve`.
    pub review_acts_as_approve: bool,
    /// Treat `/lgtm` and `/lgtm cancel` as implicit approve/cancel.
    pub lgtm_acts_as_approve: bool,
    pub approved_label: String,
    /// Login the bot posts as. Any `*[bot]` login is treated as a bot as well.
    pub bot_login: Option<String>,
    pub pr_process_link: String,
    pub commands_link: String,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            issue_required: false,
            implicit_self_approve: false,
            review_acts_as_approve: false,
            lgtm_acts_as_approve: false,
            approved_label: DEFAULT_APPROVED_LABEL.to_string(),
            bot_login: None,
            pr_process_link: DEFAULT_PR_PROCESS_LINK.to_string(),
            commands_link: DEFAULT_COMMANDS_LINK.to_string(),
        }
    }
}
