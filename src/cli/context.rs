//! Startup context for the bot binary
//!
//! Extracts the setup shared by the long-running and one-shot modes.

use merge_bot::auth::get_gitlab_auth;
use merge_bot::config::load_config_or_default;
use merge_bot::context::BotContext;
use merge_bot::error::Result;
use merge_bot::platform::create_platform_service;
use std::path::Path;
use tracing::info;

/// Load config, resolve credentials, and authenticate
///
/// This performs the common setup:
/// - Load `config.toml` (explicit path or the default location)
/// - Resolve the GitLab URL and token
/// - Create the platform service
/// - Look up the bot user
pub async fn build_context(config_path: Option<&Path>, gitlab_url: Option<&str>) -> Result<BotContext> {
    let config = load_config_or_default(config_path)?;
    let auth = get_gitlab_auth(&config, gitlab_url)?;
    info!(base_url = %auth.base_url, source = ?auth.source, "connecting to GitLab");

    let platform = create_platform_service(&auth)?;
    BotContext::connect(platform, config).await
}
