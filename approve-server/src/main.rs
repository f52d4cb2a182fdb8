use anyhow::{Context, Result};
use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use approve_core::StaticOwners;
use approve_server::config::Config;
use approve_server::github::GitHubClient;
use approve_server::webhook::webhook_router;
use approve_server::{AppState, PrLocks};

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "approve",
        "version": approve_server::get_bot_version()
    })))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        "Starting approval bot (version {})",
        approve_server::get_bot_version()
    );

    let config =
        Config::from_env().context("Failed to load configuration from environment variables")?;

    let owners = StaticOwners::from_json_file(&config.owners_path).with_context(|| {
        format!(
            "Failed to load ownership map from {}",
            config.owners_path.display()
        )
    })?;
    info!("Loaded ownership map from {}", config.owners_path.display());

    let github_client = Arc::new(GitHubClient::new(
        config.github_app_id,
        config.github_private_key.clone(),
    ));

    let mut approval = config.approval.clone();
    if approval.bot_login.is_none() {
        match github_client.get_bot_user().await {
            Ok(login) => {
                info!("Bot login discovered from App: {}", login);
                approval.bot_login = Some(login);
            }
            Err(e) => warn!(
                "Could not discover bot login, relying on [bot] suffix: {:#}",
                e
            ),
        }
    }

    let app_state = Arc::new(AppState {
        github_client,
        webhook_secret: config.github_webhook_secret.clone(),
        owners: Arc::new(owners),
        approval,
        pr_locks: Arc::new(PrLocks::new()),
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .merge(webhook_router(app_state.clone()))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state);

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
