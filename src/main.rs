//! merge-bot CLI

mod cli;

use clap::Parser;
use cli::LogFormat;
use std::path::PathBuf;

/// GitLab merge bot: assign a merge request to the bot and it lands it
#[derive(Parser, Debug)]
#[command(name = "merge-bot", version, about, long_about = None)]
struct Cli {
    /// Path to config.toml (default: <config dir>/merge-bot/config.toml)
    #[arg(long, env = "MERGE_BOT_CONFIG")]
    config: Option<PathBuf>,

    /// GitLab base URL (overrides GITLAB_URL and the config file)
    #[arg(long)]
    gitlab_url: Option<String>,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Process every project's assigned merge requests once and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    cli::init_tracing(args.log_format);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting merge-bot");
    let ctx = cli::build_context(args.config.as_deref(), args.gitlab_url.as_deref()).await?;

    if args.once {
        cli::run_once(&ctx).await?;
    } else {
        cli::run_bot(ctx).await;
    }
    Ok(())
}
