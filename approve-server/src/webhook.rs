use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{Json, Response},
    routing::post,
    Router,
};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{error, info, warn};

use approve_core::{Actor, PullRequestId, RepoRef};

use crate::github::CorrelationId;
use crate::handler::handle_pull_request_serialized;
use crate::platform::GitHubPlatform;
use crate::AppState;

const PULL_REQUEST_ACTIONS: &[&str] = &[
    "opened",
    "reopened",
    "synchronize",
    "edited",
    "labeled",
    "unlabeled",
];

#[derive(Debug, Deserialize)]
pub struct GitHubWebhookPayload {
    pub action: Option<String>,
    pub pull_request: Option<PullRequest>,
    pub repository: Option<Repository>,
    pub sender: Option<User>,
    pub installation: Option<Installation>,
    pub issue: Option<Issue>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Issue {
    pub number: u64,
    pub pull_request: Option<PullRequestLink>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullRequestLink {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Installation {
    pub id: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullRequest {
    pub number: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    pub owner: User,
}

#[derive(Debug, Deserialize, Clone)]
pub struct User {
    pub login: String,
}

#[derive(Serialize)]
pub struct WebhookResponse {
    pub message: String,
}

/// A pull request a delivery asks us to re-evaluate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub pr: PullRequestId,
    pub installation_id: u64,
}

type HmacSha256 = Hmac<Sha256>;

fn verify_github_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(signature_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };

    mac.update(payload);

    // Use constant-time verification
    mac.verify_slice(&signature_bytes).is_ok()
}

async fn verify_webhook_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let signature = parts
        .headers
        .get("x-hub-signature-256")
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !verify_github_signature(&state.webhook_secret, &bytes, signature) {
        error!("Invalid webhook signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let correlation_id = correlation_id_from_headers(&parts.headers);

    let mut new_request = Request::from_parts(parts, axum::body::Body::from(bytes));
    new_request.extensions_mut().insert(correlation_id);

    Ok(next.run(new_request).await)
}

/// GitHub's delivery ID when present, otherwise a fresh one.
fn correlation_id_from_headers(headers: &HeaderMap) -> CorrelationId {
    headers
        .get("x-github-delivery")
        .and_then(|h| h.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| CorrelationId(s.to_string()))
        .unwrap_or_default()
}

/// Work out which pull request, if any, an event concerns.
pub fn trigger_for(event: &str, payload: &GitHubWebhookPayload) -> Option<Trigger> {
    let action = payload.action.as_deref().unwrap_or("");
    let number = match event {
        "issue_comment" => {
            let issue = payload.issue.as_ref()?;
            issue.pull_request.as_ref()?;
            matches!(action, "created" | "edited" | "deleted").then_some(issue.number)?
        }
        "pull_request_review" => {
            let pr = payload.pull_request.as_ref()?;
            matches!(action, "submitted" | "edited" | "dismissed").then_some(pr.number)?
        }
        "pull_request" => {
            let pr = payload.pull_request.as_ref()?;
            PULL_REQUEST_ACTIONS.contains(&action).then_some(pr.number)?
        }
        _ => return None,
    };

    let repo = payload.repository.as_ref()?;
    let installation = payload.installation.as_ref()?;

    Some(Trigger {
        pr: PullRequestId {
            repo: RepoRef::new(repo.owner.login.clone(), repo.name.clone()),
            number,
        },
        installation_id: installation.id,
    })
}

/// Comments and reviews the bot wrote itself never change the outcome.
fn is_own_activity(event: &str, payload: &GitHubWebhookPayload, bot_login: Option<&str>) -> bool {
    event != "pull_request"
        && payload
            .sender
            .as_ref()
            .is_some_and(|s| Actor::from(s.login.as_str()).is_bot(bot_login))
}

pub async fn github_webhook_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<WebhookResponse>, StatusCode> {
    let correlation_id = request
        .extensions()
        .get::<CorrelationId>()
        .map(|id| id.0.clone());

    let (parts, body) = request.into_parts();
    let event = parts
        .headers
        .get("x-github-event")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
        .to_string();

    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    let payload: GitHubWebhookPayload =
        serde_json::from_slice(&bytes).map_err(|_| StatusCode::BAD_REQUEST)?;

    info!(
        "Received {} event (action: {:?}) for {}",
        event,
        payload.action,
        payload
            .repository
            .as_ref()
            .map(|r| r.full_name.as_str())
            .unwrap_or("unknown")
    );

    if is_own_activity(&event, &payload, state.approval.bot_login.as_deref()) {
        info!("Ignoring {} event triggered by the bot itself", event);
        return Ok(Json(WebhookResponse {
            message: "Ignored own activity".to_string(),
        }));
    }

    let Some(trigger) = trigger_for(&event, &payload) else {
        if payload.installation.is_none() {
            warn!("No installation information in payload, skipping");
        }
        return Ok(Json(WebhookResponse {
            message: "Event ignored".to_string(),
        }));
    };

    let message = format!("Evaluating {}", trigger.pr);
    tokio::spawn(async move {
        info!("Spawned background task for {}", trigger.pr);

        let platform = GitHubPlatform::new(
            state.github_client.clone(),
            trigger.installation_id,
            correlation_id,
        );
        if let Err(e) = handle_pull_request_serialized(
            &state.pr_locks,
            &platform,
            state.owners.as_ref(),
            &state.approval,
            &trigger.pr,
        )
        .await
        {
            error!("Failed to evaluate {}: {:#}", trigger.pr, e);
        }
    });

    Ok(Json(WebhookResponse { message }))
}

pub fn webhook_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhook", post(github_webhook_handler))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            verify_webhook_signature,
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn payload(value: serde_json::Value) -> GitHubWebhookPayload {
        serde_json::from_value(value).unwrap()
    }

    fn repository() -> serde_json::Value {
        json!({
            "name": "repo",
            "full_name": "owner/repo",
            "owner": { "login": "owner" }
        })
    }

    #[test]
    fn test_signature_roundtrip() {
        let body = br#"{"action":"opened"}"#;
        let signature = sign("secret", body);
        assert!(verify_github_signature("secret", body, &signature));
        assert!(!verify_github_signature("other", body, &signature));
    }

    #[test]
    fn test_signature_rejects_malformed() {
        let body = b"{}";
        assert!(!verify_github_signature("secret", body, "sha1=abcd"));
        assert!(!verify_github_signature("secret", body, "sha256=not-hex"));
        assert!(!verify_github_signature("secret", body, ""));
    }

    #[test]
    fn test_issue_comment_on_pull_request_triggers() {
        let p = payload(json!({
            "action": "created",
            "issue": {
                "number": 789,
                "pull_request": { "url": "https://api.github.com/repos/owner/repo/pulls/789" }
            },
            "repository": repository(),
            "sender": { "login": "alice" },
            "installation": { "id": 999 }
        }));

        let trigger = trigger_for("issue_comment", &p).unwrap();
        assert_eq!(trigger.pr.number, 789);
        assert_eq!(trigger.pr.repo, RepoRef::new("owner", "repo"));
        assert_eq!(trigger.installation_id, 999);
    }

    #[test]
    fn test_issue_comment_on_plain_issue_ignored() {
        let p = payload(json!({
            "action": "created",
            "issue": { "number": 5 },
            "repository": repository(),
            "installation": { "id": 999 }
        }));
        assert_eq!(trigger_for("issue_comment", &p), None);
    }

    #[test]
    fn test_pull_request_actions() {
        for (action, expected) in [
            ("opened", true),
            ("synchronize", true),
            ("labeled", true),
            ("unlabeled", true),
            ("closed", false),
            ("assigned", false),
        ] {
            let p = payload(json!({
                "action": action,
                "pull_request": { "number": 3 },
                "repository": repository(),
                "installation": { "id": 1 }
            }));
            assert_eq!(trigger_for("pull_request", &p).is_some(), expected, "{}", action);
        }
    }

    #[test]
    fn test_review_submitted_triggers() {
        let p = payload(json!({
            "action": "submitted",
            "pull_request": { "number": 4 },
            "repository": repository(),
            "installation": { "id": 1 }
        }));
        assert!(trigger_for("pull_request_review", &p).is_some());
        assert_eq!(trigger_for("push", &p), None);
    }

    #[test]
    fn test_missing_installation_ignored() {
        let p = payload(json!({
            "action": "opened",
            "pull_request": { "number": 3 },
            "repository": repository()
        }));
        assert_eq!(trigger_for("pull_request", &p), None);
    }

    #[test]
    fn test_own_comments_ignored_but_own_label_changes_not() {
        let p = payload(json!({
            "action": "created",
            "sender": { "login": "approve-bot[bot]" }
        }));
        assert!(is_own_activity("issue_comment", &p, Some("approve-bot[bot]")));
        assert!(!is_own_activity("pull_request", &p, Some("approve-bot[bot]")));

        let human = payload(json!({ "action": "created", "sender": { "login": "alice" } }));
        assert!(!is_own_activity("issue_comment", &human, Some("approve-bot[bot]")));
    }

    #[test]
    fn test_correlation_id_prefers_delivery_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-github-delivery", "abc-123".parse().unwrap());
        assert_eq!(
            correlation_id_from_headers(&headers),
            CorrelationId("abc-123".to_string())
        );

        let generated = correlation_id_from_headers(&HeaderMap::new());
        assert!(!generated.0.is_empty());
    }
}
