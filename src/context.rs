//! Shared context for project workers
//!
//! Built once at startup and cloned into every worker. Holds the platform
//! client, the configuration, and the bot's own identity.

use crate::config::BotConfig;
use crate::error::Result;
use crate::platform::PlatformService;
use std::sync::Arc;
use tracing::info;

/// Everything a worker needs besides the project it monitors
#[derive(Clone)]
pub struct BotContext {
    /// Platform service (GitLab)
    pub platform: Arc<dyn PlatformService>,
    /// Immutable bot configuration
    pub config: Arc<BotConfig>,
    /// User ID of the automation identity
    pub bot_user_id: u64,
}

impl BotContext {
    /// Create a context for an already known identity
    pub fn new(platform: Arc<dyn PlatformService>, config: BotConfig, bot_user_id: u64) -> Self {
        Self {
            platform,
            config: Arc::new(config),
            bot_user_id,
        }
    }

    /// Authenticate against the platform and build the context
    pub async fn connect(platform: Arc<dyn PlatformService>, config: BotConfig) -> Result<Self> {
        let user = platform.current_user().await?;
        info!(user_id = user.id, username = %user.username, "authenticated as bot user");
        Ok(Self::new(platform, config, user.id))
    }
}
