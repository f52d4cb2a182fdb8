use anyhow::{anyhow, Context, Result};
use approve_core::{
    Actor, IssueComment, LabelAction, LabelEvent, PullRequest, RepoRef, Review, ReviewState,
};
use axum::http;
use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, Method, Request, Response, StatusCode, Url};
use reqwest_middleware::{ClientWithMiddleware, Middleware, Next, Result as MiddlewareResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

const API_ROOT: &str = "https://api.github.com";
const PER_PAGE: usize = 100;

pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Correlation ID carried through request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct GitHubClient {
    client: ClientWithMiddleware,
    app_id: u64,
    private_key: String,
    token_cache: Arc<RwLock<HashMap<u64, (String, SystemTime)>>>,
}

#[derive(Debug, Serialize)]
struct CreateCommentRequest<'a> {
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct AddLabelsRequest<'a> {
    labels: [&'a str; 1],
}

#[derive(Debug, Serialize)]
struct GitHubAppClaims {
    iss: u64,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct InstallationTokenResponse {
    token: String,
    expires_at: String,
}

#[derive(Debug, Deserialize)]
struct AppInfoResponse {
    slug: String,
}

#[derive(Debug, Deserialize)]
pub struct UserResponse {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct LabelResponse {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestRefResponse {
    #[serde(rename = "ref")]
    pub ref_name: String,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestResponse {
    pub number: u64,
    pub user: UserResponse,
    pub body: Option<String>,
    pub base: PullRequestRefResponse,
    #[serde(default)]
    pub labels: Vec<LabelResponse>,
    #[serde(default)]
    pub assignees: Vec<UserResponse>,
}

impl From<PullRequestResponse> for PullRequest {
    fn from(pr: PullRequestResponse) -> Self {
        PullRequest {
            number: pr.number,
            author: Actor::new(pr.user.login),
            body: pr.body,
            base_branch: pr.base.ref_name,
            labels: pr.labels.into_iter().map(|l| l.name).collect(),
            assignees: pr
                .assignees
                .into_iter()
                .map(|u| Actor::new(u.login))
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CommentResponse {
    pub id: u64,
    #[serde(default)]
    pub body: Option<String>,
    pub user: UserResponse,
    pub created_at: DateTime<Utc>,
    pub html_url: Option<String>,
}

impl From<CommentResponse> for IssueComment {
    fn from(c: CommentResponse) -> Self {
        IssueComment {
            id: c.id,
            author: Actor::new(c.user.login),
            body: c.body.unwrap_or_default(),
            created_at: c.created_at,
            html_url: c.html_url,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReviewResponse {
    pub id: u64,
    /// Null for reviews by deleted accounts.
    pub user: Option<UserResponse>,
    pub body: Option<String>,
    pub state: ReviewState,
    pub submitted_at: Option<DateTime<Utc>>,
    pub html_url: Option<String>,
}

impl ReviewResponse {
    fn into_review(self) -> Option<Review> {
        let user = self.user?;
        Some(Review {
            id: self.id,
            author: Actor::new(user.login),
            body: self.body.filter(|b| !b.is_empty()),
            state: self.state,
            submitted_at: self.submitted_at,
            html_url: self.html_url,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct IssueEventResponse {
    pub event: String,
    pub actor: Option<UserResponse>,
    pub label: Option<LabelResponse>,
    pub created_at: DateTime<Utc>,
}

impl IssueEventResponse {
    /// Label events only; everything else in the issue timeline is dropped.
    fn into_label_event(self) -> Option<LabelEvent> {
        let action = match self.event.as_str() {
            "labeled" => LabelAction::Added,
            "unlabeled" => LabelAction::Removed,
            _ => return None,
        };
        Some(LabelEvent {
            actor: Actor::new(self.actor?.login),
            label: self.label?.name,
            action,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Deserialize)]
struct FileResponse {
    filename: String,
}

impl GitHubClient {
    pub fn new(app_id: u64, private_key: String) -> Self {
        Self {
            client: create_github_client(),
            app_id,
            private_key,
            token_cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn generate_jwt(&self) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("Failed to get current time")?
            .as_secs();

        let claims = GitHubAppClaims {
            iss: self.app_id,
            iat: now - 60,  // Issued 60 seconds ago to account for clock skew
            exp: now + 600, // Expires in 10 minutes
        };

        let header = Header::new(Algorithm::RS256);
        let encoding_key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .context("Failed to parse private key")?;

        encode(&header, &claims, &encoding_key).context("Failed to encode JWT")
    }

    async fn get_installation_token(&self, installation_id: u64) -> Result<String> {
        // Check if current token is still valid (with 5 minute buffer)
        {
            let cache = self.token_cache.read().await;
            if let Some((token, expires_at)) = cache.get(&installation_id) {
                if expires_at
                    .duration_since(SystemTime::now())
                    .unwrap_or_default()
                    .as_secs()
                    > 300
                {
                    return Ok(token.clone());
                }
            }
        }

        let jwt = self.generate_jwt()?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            API_ROOT, installation_id
        );

        info!("Requesting new installation access token");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", jwt))
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .context("Failed to send installation token request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!(
                "GitHub App token request failed: {} - {}",
                status, error_text
            );
            return Err(anyhow!(
                "GitHub App token request failed: {} - {}",
                status,
                error_text
            ));
        }

        let token_response: InstallationTokenResponse = response
            .json()
            .await
            .context("Failed to parse installation token response")?;

        let expires_at = DateTime::parse_from_rfc3339(&token_response.expires_at)
            .context("Failed to parse token expiration")?
            .with_timezone(&Utc);

        let expires_at_system =
            UNIX_EPOCH + std::time::Duration::from_secs(expires_at.timestamp().max(0) as u64);

        {
            let mut cache = self.token_cache.write().await;
            cache.insert(
                installation_id,
                (token_response.token.clone(), expires_at_system),
            );
        }

        info!("Successfully obtained installation access token");
        Ok(token_response.token)
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &Url,
        token: &str,
        correlation_id: Option<&str>,
        body: Option<&serde_json::Value>,
    ) -> Result<Response> {
        let mut request_builder = self
            .client
            .request(method.clone(), url.clone())
            .header("Authorization", format!("Bearer {}", token))
            .header("Accept", "application/vnd.github.v3+json");

        if let Some(cid) = correlation_id {
            request_builder = request_builder.header(CORRELATION_ID_HEADER, cid);
        }
        if let Some(body) = body {
            request_builder = request_builder
                .body(serde_json::to_string(body)?)
                .header("Content-Type", "application/json");
        }

        request_builder
            .send()
            .await
            .with_context(|| format!("Failed to send {} {}", method, url))
    }

    /// Send an authenticated request, retrying once with a fresh token on 401.
    async fn send(
        &self,
        correlation_id: Option<&str>,
        installation_id: u64,
        method: Method,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> Result<Response> {
        let token = self.get_installation_token(installation_id).await?;
        let response = self
            .send_once(&method, &url, &token, correlation_id, body.as_ref())
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        warn!("Got 401 from {} {}, retrying with fresh token", method, url);
        {
            let mut cache = self.token_cache.write().await;
            cache.remove(&installation_id);
        }
        let fresh_token = self.get_installation_token(installation_id).await?;
        self.send_once(&method, &url, &fresh_token, correlation_id, body.as_ref())
            .await
    }

    async fn check(response: Response, what: &str) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        error!("GitHub API error {}: {} - {}", what, status, error_text);
        Err(anyhow!(
            "GitHub API error {}: {} - {}",
            what,
            status,
            error_text
        ))
    }

    async fn get_paginated<T: DeserializeOwned>(
        &self,
        correlation_id: Option<&str>,
        installation_id: u64,
        path: &str,
        what: &str,
    ) -> Result<Vec<T>> {
        let mut all = Vec::new();
        let mut page = 1;

        loop {
            let url = Url::parse(&format!(
                "{}{}?page={}&per_page={}",
                API_ROOT, path, page, PER_PAGE
            ))
            .with_context(|| format!("Invalid URL for {}", what))?;

            let response = self
                .send(correlation_id, installation_id, Method::GET, url, None)
                .await?;
            let items: Vec<T> = Self::check(response, what)
                .await?
                .json()
                .await
                .with_context(|| format!("Failed to parse {} response", what))?;

            let count = items.len();
            all.extend(items);

            // If we got fewer items than per_page, we've reached the last page
            if count < PER_PAGE {
                break;
            }
            page += 1;
        }

        Ok(all)
    }

    pub async fn get_pull_request(
        &self,
        correlation_id: Option<&str>,
        installation_id: u64,
        repo: &RepoRef,
        pr_number: u64,
    ) -> Result<PullRequest> {
        info!("Fetching PR #{} from {}", pr_number, repo);

        let url = api_url(&["repos", &repo.owner, &repo.name, "pulls", &pr_number.to_string()])?;
        let response = self
            .send(correlation_id, installation_id, Method::GET, url, None)
            .await?;
        let pr: PullRequestResponse = Self::check(response, "fetching PR")
            .await?
            .json()
            .await
            .context("Failed to parse pull request response")?;

        Ok(pr.into())
    }

    pub async fn get_pr_comments(
        &self,
        correlation_id: Option<&str>,
        installation_id: u64,
        repo: &RepoRef,
        pr_number: u64,
    ) -> Result<Vec<IssueComment>> {
        let path = format!(
            "/repos/{}/{}/issues/{}/comments",
            repo.owner, repo.name, pr_number
        );
        let comments: Vec<CommentResponse> = self
            .get_paginated(correlation_id, installation_id, &path, "fetching comments")
            .await?;
        info!("Found {} comments on {}#{}", comments.len(), repo, pr_number);
        Ok(comments.into_iter().map(IssueComment::from).collect())
    }

    pub async fn get_pr_reviews(
        &self,
        correlation_id: Option<&str>,
        installation_id: u64,
        repo: &RepoRef,
        pr_number: u64,
    ) -> Result<Vec<Review>> {
        let path = format!(
            "/repos/{}/{}/pulls/{}/reviews",
            repo.owner, repo.name, pr_number
        );
        let reviews: Vec<ReviewResponse> = self
            .get_paginated(correlation_id, installation_id, &path, "fetching reviews")
            .await?;
        Ok(reviews
            .into_iter()
            .filter_map(ReviewResponse::into_review)
            .collect())
    }

    pub async fn get_label_events(
        &self,
        correlation_id: Option<&str>,
        installation_id: u64,
        repo: &RepoRef,
        pr_number: u64,
    ) -> Result<Vec<LabelEvent>> {
        let path = format!(
            "/repos/{}/{}/issues/{}/events",
            repo.owner, repo.name, pr_number
        );
        let events: Vec<IssueEventResponse> = self
            .get_paginated(correlation_id, installation_id, &path, "fetching issue events")
            .await?;
        Ok(events
            .into_iter()
            .filter_map(IssueEventResponse::into_label_event)
            .collect())
    }

    pub async fn get_changed_files(
        &self,
        correlation_id: Option<&str>,
        installation_id: u64,
        repo: &RepoRef,
        pr_number: u64,
    ) -> Result<Vec<String>> {
        let path = format!(
            "/repos/{}/{}/pulls/{}/files",
            repo.owner, repo.name, pr_number
        );
        let files: Vec<FileResponse> = self
            .get_paginated(correlation_id, installation_id, &path, "fetching changed files")
            .await?;
        Ok(files.into_iter().map(|f| f.filename).collect())
    }

    pub async fn add_label(
        &self,
        correlation_id: Option<&str>,
        installation_id: u64,
        repo: &RepoRef,
        pr_number: u64,
        label: &str,
    ) -> Result<()> {
        info!("Adding label '{}' to {}#{}", label, repo, pr_number);

        let url = api_url(&[
            "repos",
            &repo.owner,
            &repo.name,
            "issues",
            &pr_number.to_string(),
            "labels",
        ])?;
        let body = serde_json::to_value(AddLabelsRequest { labels: [label] })?;
        let response = self
            .send(correlation_id, installation_id, Method::POST, url, Some(body))
            .await?;
        Self::check(response, "adding label").await?;
        Ok(())
    }

    pub async fn remove_label(
        &self,
        correlation_id: Option<&str>,
        installation_id: u64,
        repo: &RepoRef,
        pr_number: u64,
        label: &str,
    ) -> Result<()> {
        info!("Removing label '{}' from {}#{}", label, repo, pr_number);

        let url = api_url(&[
            "repos",
            &repo.owner,
            &repo.name,
            "issues",
            &pr_number.to_string(),
            "labels",
            label,
        ])?;
        let response = self
            .send(correlation_id, installation_id, Method::DELETE, url, None)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            warn!("Label '{}' already absent on {}#{}", label, repo, pr_number);
            return Ok(());
        }
        Self::check(response, "removing label").await?;
        Ok(())
    }

    pub async fn post_pr_comment(
        &self,
        correlation_id: Option<&str>,
        installation_id: u64,
        repo: &RepoRef,
        pr_number: u64,
        comment_body: &str,
    ) -> Result<IssueComment> {
        info!("Posting comment to {}#{}", repo, pr_number);

        let url = api_url(&[
            "repos",
            &repo.owner,
            &repo.name,
            "issues",
            &pr_number.to_string(),
            "comments",
        ])?;
        let body = serde_json::to_value(CreateCommentRequest { body: comment_body })?;
        let response = self
            .send(correlation_id, installation_id, Method::POST, url, Some(body))
            .await?;
        let comment: CommentResponse = Self::check(response, "posting comment")
            .await?
            .json()
            .await
            .context("Failed to parse comment response")?;

        info!("Successfully posted comment with ID: {}", comment.id);
        Ok(comment.into())
    }

    pub async fn delete_comment(
        &self,
        correlation_id: Option<&str>,
        installation_id: u64,
        repo: &RepoRef,
        comment_id: u64,
    ) -> Result<()> {
        info!("Deleting comment {} in {}", comment_id, repo);

        let url = api_url(&[
            "repos",
            &repo.owner,
            &repo.name,
            "issues",
            "comments",
            &comment_id.to_string(),
        ])?;
        let response = self
            .send(correlation_id, installation_id, Method::DELETE, url, None)
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            warn!("Comment {} already deleted", comment_id);
            return Ok(());
        }
        Self::check(response, "deleting comment").await?;
        Ok(())
    }

    /// The login the App posts under, e.g. `approve-bot[bot]`.
    pub async fn get_bot_user(&self) -> Result<String> {
        let jwt = self.generate_jwt()?;
        let response = self
            .client
            .get(format!("{}/app", API_ROOT))
            .header("Authorization", format!("Bearer {}", jwt))
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .context("Failed to send app info request")?;

        let app_info: AppInfoResponse = Self::check(response, "fetching app info")
            .await?
            .json()
            .await
            .context("Failed to parse app info response")?;
        Ok(format!("{}[bot]", app_info.slug))
    }
}

/// Build an API URL from raw path segments, percent-encoding each one.
fn api_url(segments: &[&str]) -> Result<Url> {
    let mut url = Url::parse(API_ROOT).context("Invalid API root")?;
    url.path_segments_mut()
        .map_err(|_| anyhow!("API root cannot carry a path"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Stamps every outgoing request with a correlation ID.
///
/// An explicit header wins, then a `CorrelationId` extension, then a fresh ID.
pub struct CorrelationMiddleware;

#[async_trait::async_trait]
impl Middleware for CorrelationMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> MiddlewareResult<Response> {
        if !req.headers().contains_key(CORRELATION_ID_HEADER) {
            let id = extensions
                .get::<CorrelationId>()
                .cloned()
                .unwrap_or_default();
            if let Ok(value) = id.0.parse() {
                req.headers_mut().insert(CORRELATION_ID_HEADER, value);
            }
        }
        next.run(req, extensions).await
    }
}

pub fn create_github_client() -> ClientWithMiddleware {
    use reqwest_middleware::ClientBuilder;

    let client = Client::builder()
        .user_agent(concat!("approve-bot/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            warn!("Falling back to default HTTP client: {}", e);
            Client::new()
        });

    ClientBuilder::new(client).with(CorrelationMiddleware).build()
}
