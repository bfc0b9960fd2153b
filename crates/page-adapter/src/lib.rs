//! Remote-debugging page control for WebReplay.
//!
//! The session managers talk to exactly one page through the [`PageDriver`]
//! trait. [`ChromiumDriver`] backs it with a real Chromium instance over the
//! DevTools protocol; [`StubDriver`] is a scriptable in-memory page used by
//! the test suites of every crate that sits above this one.

use std::{env, path::PathBuf};

use which::which;

pub mod chromium;
pub mod driver;
pub mod stub;

pub use chromium::ChromiumDriver;
pub use driver::{
    is_xpath, CookieRecord, DriverError, ElementState, NavigationNotice, PageDriver, Rect,
};
pub use stub::{StubDriver, StubOp};

/// Launch/tuning knobs for the real browser driver.
#[derive(Clone, Debug)]
pub struct DriverConfig {
    pub executable: Option<PathBuf>,
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    pub nav_deadline_ms: u64,
    pub user_data_dir: Option<PathBuf>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            executable: detect_chrome_executable(),
            headless: resolve_headless_default(),
            window_width: 1280,
            window_height: 720,
            nav_deadline_ms: 30_000,
            user_data_dir: None,
        }
    }
}

/// `WEBREPLAY_HEADLESS=0|false|no|off` opens a visible window; anything
/// else (including unset) stays headless.
fn resolve_headless_default() -> bool {
    match env::var("WEBREPLAY_HEADLESS") {
        Ok(value) => {
            let lower = value.to_ascii_lowercase();
            !matches!(lower.as_str(), "0" | "false" | "no" | "off")
        }
        Err(_) => true,
    }
}

/// Locate a Chromium-family executable: `WEBREPLAY_CHROME` override first,
/// then PATH lookup, then well-known install locations.
pub fn detect_chrome_executable() -> Option<PathBuf> {
    if let Ok(raw) = env::var("WEBREPLAY_CHROME") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let candidate = PathBuf::from(trimmed);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    for name in chrome_executable_names() {
        if let Ok(path) = which(name) {
            return Some(path);
        }
    }

    let skip_defaults = env::var("WEBREPLAY_SKIP_OS_PATHS")
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false);
    if !skip_defaults {
        for candidate in os_specific_chrome_paths() {
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    None
}

fn chrome_executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    }

    #[cfg(not(target_os = "windows"))]
    {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }
}

fn os_specific_chrome_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let mut paths = Vec::new();
        for key in ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"] {
            if let Ok(root) = env::var(key) {
                let root = PathBuf::from(root);
                paths.push(root.join("Google/Chrome/Application/chrome.exe"));
                paths.push(root.join("Microsoft/Edge/Application/msedge.exe"));
            }
        }
        paths
    }

    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        vec![
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/chromium"),
        ]
    }
}
