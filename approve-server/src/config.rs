use anyhow::{Context, Result};
use approve_core::config::{
    ApprovalConfig, DEFAULT_APPROVED_LABEL, DEFAULT_COMMANDS_LINK, DEFAULT_PR_PROCESS_LINK,
};
use std::env;
use std::path::PathBuf;

#[derive(Clone)]
pub struct Config {
    pub github_app_id: u64,
    pub github_private_key: String,
    pub github_webhook_secret: String,
    pub port: u16,
    /// JSON ownership map consulted for every evaluation.
    pub owners_path: PathBuf,
    /// Engine flags. `approval.bot_login` is discovered from the App when
    /// `BOT_LOGIN` is unset.
    pub approval: ApprovalConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let github_app_id = env::var("GITHUB_APP_ID")
            .context("GITHUB_APP_ID environment variable is required")?
            .parse::<u64>()
            .context("GITHUB_APP_ID must be a valid number")?;

        let github_private_key = env::var("GITHUB_PRIVATE_KEY")
            .context("GITHUB_PRIVATE_KEY environment variable is required")?
            .replace("\\n", "\n");

        let github_webhook_secret = env::var("GITHUB_WEBHOOK_SECRET")
            .context("GITHUB_WEBHOOK_SECRET environment variable is required")?;

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let owners_path = env::var("OWNERS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("owners.json"));

        let approval = approval_from_lookup(|key| env::var(key).ok())?;

        Ok(Config {
            github_app_id,
            github_private_key,
            github_webhook_secret,
            port,
            owners_path,
            approval,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

fn parse_flag(key: &str, value: Option<String>, default: bool) -> Result<bool> {
    match non_empty(value) {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse::<bool>()
            .with_context(|| format!("{} must be 'true' or 'false', got '{}'", key, v)),
    }
}

/// Build the engine flags from `APPROVE_*` variables and `BOT_LOGIN`.
///
/// Takes a lookup function so tests need not touch the process environment.
pub fn approval_from_lookup<F>(lookup: F) -> Result<ApprovalConfig>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(ApprovalConfig {
        issue_required: parse_flag(
            "APPROVE_REQUIRE_ISSUE",
            lookup("APPROVE_REQUIRE_ISSUE"),
            false,
        )?,
        implicit_self_approve: parse_flag(
            "APPROVE_IMPLICIT_SELF_APPROVE",
            lookup("APPROVE_IMPLICIT_SELF_APPROVE"),
            false,
        )?,
        review_acts_as_approve: parse_flag(
            "APPROVE_REVIEW_ACTS_AS_APPROVE",
            lookup("APPROVE_REVIEW_ACTS_AS_APPROVE"),
            false,
        )?,
        lgtm_acts_as_approve: parse_flag(
            "APPROVE_LGTM_ACTS_AS_APPROVE",
            lookup("APPROVE_LGTM_ACTS_AS_APPROVE"),
            false,
        )?,
        approved_label: non_empty(lookup("APPROVE_LABEL"))
            .unwrap_or_else(|| DEFAULT_APPROVED_LABEL.to_string()),
        bot_login: non_empty(lookup("BOT_LOGIN")),
        pr_process_link: non_empty(lookup("APPROVE_PR_PROCESS_LINK"))
            .unwrap_or_else(|| DEFAULT_PR_PROCESS_LINK.to_string()),
        commands_link: non_empty(lookup("APPROVE_COMMANDS_LINK"))
            .unwrap_or_else(|| DEFAULT_COMMANDS_LINK.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = approval_from_lookup(lookup(&[])).unwrap();
        assert!(!config.issue_required);
        assert!(!config.implicit_self_approve);
        assert!(!config.review_acts_as_approve);
        assert!(!config.lgtm_acts_as_approve);
        assert_eq!(config.approved_label, DEFAULT_APPROVED_LABEL);
        assert_eq!(config.commands_link, DEFAULT_COMMANDS_LINK);
        assert_eq!(config.bot_login, None);
    }

    #[test]
    fn test_bot_login_read_into_engine_flags() {
        let config = approval_from_lookup(lookup(&[("BOT_LOGIN", "approve-bot[bot]")])).unwrap();
        assert_eq!(config.bot_login.as_deref(), Some("approve-bot[bot]"));

        let blank = approval_from_lookup(lookup(&[("BOT_LOGIN", " ")])).unwrap();
        assert_eq!(blank.bot_login, None);
    }

    #[test]
    fn test_flags_parsed() {
        let config = approval_from_lookup(lookup(&[
            ("APPROVE_REQUIRE_ISSUE", "true"),
            ("APPROVE_IMPLICIT_SELF_APPROVE", "true"),
            ("APPROVE_REVIEW_ACTS_AS_APPROVE", "false"),
            ("APPROVE_LABEL", "lgtm-approved"),
        ]))
        .unwrap();
        assert!(config.issue_required);
        assert!(config.implicit_self_approve);
        assert!(!config.review_acts_as_approve);
        assert_eq!(config.approved_label, "lgtm-approved");
    }

    #[test]
    fn test_empty_values_fall_back_to_defaults() {
        let config = approval_from_lookup(lookup(&[
            ("APPROVE_REQUIRE_ISSUE", "  "),
            ("APPROVE_LABEL", ""),
        ]))
        .unwrap();
        assert!(!config.issue_required);
        assert_eq!(config.approved_label, DEFAULT_APPROVED_LABEL);
    }

    #[test]
    fn test_invalid_flag_is_an_error() {
        let err = approval_from_lookup(lookup(&[("APPROVE_LGTM_ACTS_AS_APPROVE", "yes")]))
            .unwrap_err();
        assert!(err.to_string().contains("APPROVE_LGTM_ACTS_AS_APPROVE"));
    }

    #[test]
    fn test_non_empty_filters_whitespace() {
        assert_eq!(non_empty(None), None);
        assert_eq!(non_empty(Some("\t\n".to_string())), None);
        assert_eq!(non_empty(Some("bot".to_string())), Some("bot".to_string()));
    }
}
