//! JSON persistence for action lists and replay reports.

use std::path::Path;

use anyhow::{Context, Result};
use replay_session::ReplaySummary;
use tokio::fs;
use webreplay_core_types::Action;

pub async fn load_actions(path: &Path) -> Result<Vec<Action>> {
    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read action list from {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("malformed action list in {}", path.display()))
}

pub async fn save_actions(path: &Path, actions: &[Action]) -> Result<()> {
    let body = serde_json::to_string_pretty(actions).context("failed to encode action list")?;
    write_atomically(path, &body).await
}

pub async fn save_summary(path: &Path, summary: &ReplaySummary) -> Result<()> {
    let body = serde_json::to_string_pretty(summary).context("failed to encode replay report")?;
    write_atomically(path, &body).await
}

/// Write through a sibling temp file so an interrupted run never leaves
/// a half-written document behind.
async fn write_atomically(path: &Path, body: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, body)
        .await
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("failed to move {} into place", tmp.display()))?;
    Ok(())
}
