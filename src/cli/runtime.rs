//! Process-level wiring shared by every subcommand.

use anyhow::{anyhow, Result};
use page_adapter::{ChromiumDriver, DriverConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use webreplay_core_types::LoginConfig;

pub fn init_tracing(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Launch the real browser with the environment-driven defaults
/// (`WEBREPLAY_CHROME`, `WEBREPLAY_HEADLESS`).
pub async fn launch_browser(nav_timeout_ms: u64) -> Result<ChromiumDriver> {
    let config = DriverConfig {
        nav_deadline_ms: nav_timeout_ms,
        ..DriverConfig::default()
    };
    if config.executable.is_none() {
        return Err(anyhow!(
            "no Chromium-family browser found; install one or set WEBREPLAY_CHROME"
        ));
    }
    ChromiumDriver::launch(config)
        .await
        .map_err(|e| anyhow!("failed to launch browser: {e}"))
}

/// Credentials for subcommands that sign in first. The password comes
/// from an environment variable so it never lands in shell history.
pub fn login_from_flags(
    username: Option<&str>,
    password_env: &str,
    login_url: Option<&str>,
    tenant: Option<&str>,
) -> Result<Option<LoginConfig>> {
    let Some(username) = username else {
        return Ok(None);
    };
    let password = std::env::var(password_env)
        .map_err(|_| anyhow!("{password_env} must hold the password for {username}"))?;
    Ok(Some(LoginConfig {
        username: username.to_string(),
        password,
        url: login_url.map(str::to_string),
        tenant: tenant.map(str::to_string),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_flags_require_the_password_variable() {
        std::env::remove_var("WEBREPLAY_TEST_PASSWORD");
        let err = login_from_flags(
            Some("alice"),
            "WEBREPLAY_TEST_PASSWORD",
            Some("https://app.example.com/login"),
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("WEBREPLAY_TEST_PASSWORD"));

        std::env::set_var("WEBREPLAY_TEST_PASSWORD", "hunter2");
        let login = login_from_flags(Some("alice"), "WEBREPLAY_TEST_PASSWORD", None, None)
            .unwrap()
            .unwrap();
        assert_eq!(login.username, "alice");
        std::env::remove_var("WEBREPLAY_TEST_PASSWORD");
    }

    #[test]
    fn no_username_means_no_login() {
        assert!(login_from_flags(None, "X", None, None).unwrap().is_none());
    }
}
