use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use capture_session::CaptureManager;
use clap::Args;
use page_adapter::PageDriver;
use tracing::{info, warn};
use webreplay_core_types::{CaptureOptions, DomainScopeConfig, SelectorStrategyKind, WorkflowId};

use crate::cli::runtime;
use crate::store;

#[derive(Args, Clone, Debug)]
pub struct CaptureArgs {
    /// Page to start recording on
    pub url: String,

    /// Where to write the recorded action list
    #[arg(short, long, default_value = "actions.json")]
    pub output: PathBuf,

    /// Take periodic screenshots while recording
    #[arg(long)]
    pub screenshots: bool,

    /// Poll interval for the in-page event buffer, in milliseconds
    #[arg(long, default_value_t = 1500)]
    pub frequency_ms: u64,

    /// Navigation timeout in milliseconds
    #[arg(long, default_value_t = 30_000)]
    pub timeout_ms: u64,

    /// Selector family preference: css, xpath, text, or hybrid
    #[arg(long, default_value = "hybrid")]
    pub selector_strategy: String,

    /// Extra domains to record on besides the start domain
    #[arg(long = "allow")]
    pub allowed_domains: Vec<String>,

    /// Sign in as this user before recording
    #[arg(long)]
    pub username: Option<String>,

    /// Environment variable holding the password
    #[arg(long, default_value = "WEBREPLAY_PASSWORD")]
    pub password_env: String,

    /// Login page, when it differs from the start URL
    #[arg(long)]
    pub login_url: Option<String>,

    /// Tenant for tenant-scoped identity providers
    #[arg(long)]
    pub tenant: Option<String>,

    /// Workflow to file this recording under (defaults to a fresh id)
    #[arg(long)]
    pub workflow: Option<String>,
}

pub async fn cmd_capture(args: CaptureArgs) -> Result<()> {
    let login = runtime::login_from_flags(
        args.username.as_deref(),
        &args.password_env,
        args.login_url.as_deref().or(Some(args.url.as_str())),
        args.tenant.as_deref(),
    )?;

    let base_domain = url::Url::parse(&args.url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .with_context(|| format!("start URL has no host: {}", args.url))?;

    let selector_strategy = match args.selector_strategy.as_str() {
        "css" => SelectorStrategyKind::Css,
        "xpath" => SelectorStrategyKind::XPath,
        "text" => SelectorStrategyKind::Text,
        "hybrid" => SelectorStrategyKind::Hybrid,
        other => bail!("unknown selector strategy: {other}"),
    };

    let options = CaptureOptions {
        include_screenshots: args.screenshots,
        capture_frequency_ms: args.frequency_ms,
        selector_strategy,
        timeout_ms: args.timeout_ms,
        requires_login: login.is_some(),
        login,
        domain_scope: Some(DomainScopeConfig {
            base_domain,
            allowed_domains: args.allowed_domains.clone(),
            sso_providers: None,
        }),
        ..CaptureOptions::default()
    };

    let driver = Arc::new(runtime::launch_browser(args.timeout_ms).await?);

    let manager = CaptureManager::new(options);
    manager.set_on_recording_paused(Box::new(|reason| {
        warn!(target: "cli", %reason, "recording paused");
        eprintln!("recording paused: {reason}");
    }));
    manager.set_on_recording_resumed(Box::new(|| {
        info!(target: "cli", "recording resumed");
        eprintln!("recording resumed");
    }));

    let workflow_id = args
        .workflow
        .clone()
        .map(WorkflowId)
        .unwrap_or_else(WorkflowId::new);
    manager
        .start_capture(driver.clone() as Arc<dyn PageDriver>, workflow_id, &args.url)
        .await
        .context("could not start the capture")?;
    eprintln!("recording {} - press Ctrl+C to stop", args.url);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    let actions = manager.stop_capture().await.context("capture did not stop cleanly")?;
    manager.cleanup().await;
    if let Err(e) = driver.close().await {
        warn!(target: "cli", error = %e, "browser did not close cleanly");
    }

    store::save_actions(&args.output, &actions).await?;
    info!(
        target: "cli",
        actions = actions.len(),
        output = %args.output.display(),
        "capture written"
    );
    println!("{} actions written to {}", actions.len(), args.output.display());
    Ok(())
}
