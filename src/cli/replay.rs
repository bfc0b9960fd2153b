use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use page_adapter::PageDriver;
use replay_session::ReplayManager;
use tracing::{info, warn};
use webreplay_core_types::ReplayOptions;

use crate::cli::runtime;
use crate::store;

#[derive(Args, Clone, Debug)]
pub struct ReplayArgs {
    /// Action list produced by the capture command
    #[arg(default_value = "actions.json")]
    pub input: PathBuf,

    /// Write the per-step report here
    #[arg(short, long)]
    pub report: Option<PathBuf>,

    /// Attach a screenshot to every failed step
    #[arg(long)]
    pub screenshot_on_error: bool,

    /// Element lookup attempts per step
    #[arg(long, default_value_t = 3)]
    pub retries: u32,

    /// Navigation timeout in milliseconds
    #[arg(long, default_value_t = 30_000)]
    pub timeout_ms: u64,

    /// Sign in as this user before replaying
    #[arg(long)]
    pub username: Option<String>,

    /// Environment variable holding the password
    #[arg(long, default_value = "WEBREPLAY_PASSWORD")]
    pub password_env: String,

    /// Login page to authenticate on first
    #[arg(long)]
    pub login_url: Option<String>,

    /// Tenant for tenant-scoped identity providers
    #[arg(long)]
    pub tenant: Option<String>,
}

pub async fn cmd_replay(args: ReplayArgs) -> Result<()> {
    let actions = store::load_actions(&args.input).await?;
    if actions.is_empty() {
        bail!("{} contains no actions", args.input.display());
    }

    let login = runtime::login_from_flags(
        args.username.as_deref(),
        &args.password_env,
        args.login_url.as_deref(),
        args.tenant.as_deref(),
    )?;
    let options = ReplayOptions {
        retry_attempts: args.retries,
        screenshot_on_error: args.screenshot_on_error,
        timeout_ms: args.timeout_ms,
        requires_login: login.is_some(),
        login,
    };

    let driver = Arc::new(runtime::launch_browser(args.timeout_ms).await?);

    let manager = ReplayManager::new(options);
    manager
        .start_replay(driver.clone() as Arc<dyn PageDriver>)
        .await
        .context("could not start the replay")?;
    info!(target: "cli", steps = actions.len(), input = %args.input.display(), "replay starting");

    manager.replay_actions(&actions).await?;
    let summary = manager.stop_replay();
    manager.cleanup().await;
    if let Err(e) = driver.close().await {
        warn!(target: "cli", error = %e, "browser did not close cleanly");
    }

    if let Some(report) = &args.report {
        store::save_summary(report, &summary).await?;
        info!(target: "cli", report = %report.display(), "report written");
    }

    println!(
        "{}/{} steps succeeded ({:.0}%)",
        summary.succeeded,
        summary.total,
        summary.success_rate * 100.0
    );
    for result in summary.results.iter().filter(|r| !r.success) {
        let reason = result.error.as_deref().unwrap_or("unknown failure");
        eprintln!("step {} failed: {reason}", result.action_id);
    }

    if summary.succeeded < summary.total {
        bail!(
            "{} of {} steps failed",
            summary.total - summary.succeeded,
            summary.total
        );
    }
    Ok(())
}
