//! Drives a detected login form end to end and caches the resulting
//! authenticated state for reuse.

use webreplay_core_types::LoginConfig;
use dashmap::DashMap;
use page_adapter::PageDriver;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use wait_policy::{WaitConfig, WaitPolicy};

use crate::detector::{self, LoginDetector, LoginForm, SubmissionMethod};
use crate::session::LoginSession;
use crate::tables;
use crate::{LoginError, LoginState};

/// Navigation budget for reaching the login page and for restores.
const NAV_DEADLINE: Duration = Duration::from_secs(30);
/// Pause after each submit so the provider can start its transition
/// before we inspect the result.
const POST_SUBMIT_SETTLE: Duration = Duration::from_millis(600);
/// Sessions kept per account/origin key. A re-login keeps the previous
/// session around as a fallback; the newest one wins on restore.
const SESSION_HISTORY: usize = 2;

const READ_LOCAL_STORAGE: &str = "(() => { const out = {}; for (let i = 0; i < localStorage.length; i++) { const k = localStorage.key(i); out[k] = localStorage.getItem(k); } return out; })()";
const READ_SESSION_STORAGE: &str = "(() => { const out = {}; for (let i = 0; i < sessionStorage.length; i++) { const k = sessionStorage.key(i); out[k] = sessionStorage.getItem(k); } return out; })()";

pub struct LoginAdapter {
    detector: LoginDetector,
    wait: WaitPolicy,
    sessions: DashMap<String, Vec<LoginSession>>,
    state: Mutex<LoginState>,
}

impl Default for LoginAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl LoginAdapter {
    pub fn new() -> Self {
        Self {
            detector: LoginDetector::new(),
            wait: WaitPolicy::new(WaitConfig::default()),
            sessions: DashMap::new(),
            state: Mutex::new(LoginState::Idle),
        }
    }

    pub fn state(&self) -> LoginState {
        self.state.lock().clone()
    }

    fn set_state(&self, next: LoginState) {
        *self.state.lock() = next;
    }

    /// Reuse a cached unexpired session for this account, or run a full
    /// login and cache what it produced.
    pub async fn get_authenticated_page(
        &self,
        driver: &dyn PageDriver,
        config: &LoginConfig,
    ) -> Result<LoginSession, LoginError> {
        let url = self.login_url(config)?;
        let key = LoginSession::cache_key(&config.username, &url);

        let cached = self
            .sessions
            .get(&key)
            .and_then(|history| history.iter().find(|s| !s.is_expired()).cloned());
        if let Some(session) = cached {
            debug!(target: "login-flow", key = %key, "restoring cached session");
            self.restore(driver, &session).await?;
            return Ok(session);
        }
        // Only expired entries left under this key.
        self.sessions.remove(&key);

        let session = self.login(driver, config).await?;
        self.remember(key, session.clone());
        Ok(session)
    }

    /// Full login against the page currently reachable at the config URL.
    pub async fn login(
        &self,
        driver: &dyn PageDriver,
        config: &LoginConfig,
    ) -> Result<LoginSession, LoginError> {
        let url = self.login_url(config)?;
        driver.navigate(&url, NAV_DEADLINE).await?;

        self.set_state(LoginState::Detecting);
        let form = match self.detector.detect(driver).await? {
            Some(form) => {
                self.set_state(LoginState::Found);
                form
            }
            None => {
                self.set_state(LoginState::NotFound);
                return Err(LoginError::FormNotFound);
            }
        };

        self.set_state(LoginState::Authenticating(form.form_type));
        let result = self.execute(driver, config, &form).await;
        match &result {
            Ok(_) => self.set_state(LoginState::Success),
            Err(e) => {
                warn!(target: "login-flow", error = %e, "login attempt failed");
                self.set_state(LoginState::Failed);
            }
        }
        result
    }

    async fn execute(
        &self,
        driver: &dyn PageDriver,
        config: &LoginConfig,
        form: &LoginForm,
    ) -> Result<LoginSession, LoginError> {
        if form.submission_method == SubmissionMethod::OauthPopup {
            return Err(LoginError::OauthUnsupported);
        }

        if form.form_type.is_multi_step() {
            self.execute_multi_step(driver, config, form).await?;
        } else {
            self.execute_single_page(driver, config, form).await?;
        }

        self.verify(driver).await?;
        info!(target: "login-flow", username = %config.username, "authenticated");
        self.capture_session(driver, config).await
    }

    /// Identifier and password live on the same page.
    async fn execute_single_page(
        &self,
        driver: &dyn PageDriver,
        config: &LoginConfig,
        form: &LoginForm,
    ) -> Result<(), LoginError> {
        fill_field(driver, &form.email_selector, &config.username).await?;
        if let Some(password_selector) = &form.password_selector {
            fill_field(driver, password_selector, &config.password).await?;
        }
        self.submit(driver, form, form.password_selector.as_deref().unwrap_or(&form.email_selector))
            .await?;
        self.settle(driver).await;
        Ok(())
    }

    /// Identifier first, then a page transition, then the password.
    /// The password field from the first page is stale after the
    /// transition, so it is resolved again from scratch.
    async fn execute_multi_step(
        &self,
        driver: &dyn PageDriver,
        config: &LoginConfig,
        form: &LoginForm,
    ) -> Result<(), LoginError> {
        fill_field(driver, &form.email_selector, &config.username).await?;
        self.submit(driver, form, &form.email_selector).await?;
        self.settle(driver).await;

        if let Some(phrase) = tables::find_failure_phrase(&driver.page_content().await?) {
            return Err(LoginError::AuthFailed(phrase.to_string()));
        }

        let password_selector = detector::probe_first(driver, tables::PASSWORD_SELECTORS)
            .await?
            .ok_or(LoginError::FormNotFound)?;
        fill_field(driver, &password_selector, &config.password).await?;

        let submit_selector =
            detector::probe_first_immediate(driver, tables::SUBMIT_SELECTORS).await?;
        let step = LoginForm {
            submit_selector,
            ..form.clone()
        };
        self.submit(driver, &step, &password_selector).await?;
        self.settle(driver).await;
        Ok(())
    }

    async fn submit(
        &self,
        driver: &dyn PageDriver,
        form: &LoginForm,
        enter_target: &str,
    ) -> Result<(), LoginError> {
        match form.submission_method {
            SubmissionMethod::Click => {
                if let Some(submit) = &form.submit_selector {
                    driver.click(submit).await?;
                } else {
                    driver.press_key(enter_target, "Enter").await?;
                }
            }
            SubmissionMethod::Enter => driver.press_key(enter_target, "Enter").await?,
            SubmissionMethod::AutoSubmit => {}
            SubmissionMethod::OauthPopup => return Err(LoginError::OauthUnsupported),
        }
        Ok(())
    }

    async fn settle(&self, driver: &dyn PageDriver) {
        sleep(POST_SUBMIT_SETTLE).await;
        let outcome = self.wait.wait_for_network_idle(driver).await;
        if !outcome.success {
            debug!(target: "login-flow", error = ?outcome.error, "page did not settle after submit");
        }
    }

    /// Error-first verification. An explicit failure phrase anywhere on
    /// the page fails the attempt regardless of other signals; success
    /// requires the password prompt to be gone and the URL to have left
    /// the auth flow. Anything ambiguous is a failure.
    async fn verify(&self, driver: &dyn PageDriver) -> Result<(), LoginError> {
        let content = driver.page_content().await?;
        if let Some(phrase) = tables::find_failure_phrase(&content) {
            return Err(LoginError::AuthFailed(phrase.to_string()));
        }

        let password_still_visible =
            detector::probe_first_immediate(driver, tables::PASSWORD_SELECTORS)
                .await?
                .is_some();
        let url = driver.current_url().await?;
        if password_still_visible || tables::on_auth_path(&url) {
            return Err(LoginError::AuthFailed(
                "could not confirm authentication succeeded".to_string(),
            ));
        }
        Ok(())
    }

    async fn capture_session(
        &self,
        driver: &dyn PageDriver,
        config: &LoginConfig,
    ) -> Result<LoginSession, LoginError> {
        let url = driver.current_url().await?;
        let mut session = LoginSession::new(&config.username, &url);
        session.cookies = driver.cookies().await?;
        session.local_storage = storage_map(driver.evaluate(READ_LOCAL_STORAGE).await?);
        session.session_storage = storage_map(driver.evaluate(READ_SESSION_STORAGE).await?);
        Ok(session)
    }

    /// Replays a captured session onto a fresh page: cookies first, then
    /// the page itself, then web storage once an origin is loaded.
    async fn restore(
        &self,
        driver: &dyn PageDriver,
        session: &LoginSession,
    ) -> Result<(), LoginError> {
        driver.set_cookies(&session.cookies).await?;
        driver.navigate(&session.url, NAV_DEADLINE).await?;
        for (key, value) in &session.local_storage {
            driver
                .evaluate(&format!(
                    "localStorage.setItem({}, {})",
                    js_str(key),
                    js_str(value)
                ))
                .await?;
        }
        for (key, value) in &session.session_storage {
            driver
                .evaluate(&format!(
                    "sessionStorage.setItem({}, {})",
                    js_str(key),
                    js_str(value)
                ))
                .await?;
        }
        Ok(())
    }

    /// Seed a previously captured session, keyed like a fresh capture.
    pub fn store_session(&self, session: LoginSession) {
        let key = LoginSession::cache_key(&session.username, &session.url);
        self.remember(key, session);
    }

    fn remember(&self, key: String, session: LoginSession) {
        let mut history = self.sessions.entry(key).or_default();
        history.insert(0, session);
        history.truncate(SESSION_HISTORY);
    }

    pub fn cached_session_count(&self) -> usize {
        self.sessions.iter().map(|entry| entry.value().len()).sum()
    }

    /// Drop all cached state. Safe to call more than once.
    pub fn cleanup(&self) {
        self.sessions.clear();
        self.set_state(LoginState::Idle);
    }

    fn login_url(&self, config: &LoginConfig) -> Result<String, LoginError> {
        let url = config.url.clone().ok_or(LoginError::MissingUrl)?;
        Ok(match &config.tenant {
            Some(tenant) => apply_tenant(&url, tenant),
            None => url,
        })
    }
}

/// Clear the field before typing. Triple click selects the existing
/// value and Backspace removes it, which survives inputs that ignore a
/// programmatic value reset.
async fn fill_field(
    driver: &dyn PageDriver,
    selector: &str,
    text: &str,
) -> Result<(), LoginError> {
    driver.click(selector).await?;
    driver.click(selector).await?;
    driver.click(selector).await?;
    driver.press_key(selector, "Backspace").await?;
    driver.type_text(selector, text).await?;
    Ok(())
}

/// Tenant-qualified Microsoft login URLs use a path segment where the
/// generic flow uses /common.
pub fn apply_tenant(url: &str, tenant: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed)
            if parsed
                .host_str()
                .is_some_and(|h| tables::MICROSOFT_HOSTS.contains(&h)) =>
        {
            url.replace("/common", &format!("/{tenant}"))
        }
        _ => url.to_string(),
    }
}

fn storage_map(value: Value) -> HashMap<String, String> {
    match value {
        Value::Object(map) => map
            .into_iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
            .collect(),
        _ => HashMap::new(),
    }
}

fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use page_adapter::{StubDriver, StubOp};
    use std::sync::Arc;

    fn config(username: &str, url: &str) -> LoginConfig {
        LoginConfig {
            username: username.to_string(),
            password: "hunter2".to_string(),
            url: Some(url.to_string()),
            tenant: None,
        }
    }

    #[test]
    fn tenant_rewrite_only_touches_microsoft_hosts() {
        assert_eq!(
            apply_tenant("https://login.microsoftonline.com/common/oauth2/v2.0/authorize", "contoso"),
            "https://login.microsoftonline.com/contoso/oauth2/v2.0/authorize"
        );
        assert_eq!(
            apply_tenant("https://app.example.com/common/login", "contoso"),
            "https://app.example.com/common/login"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn failure_phrase_fails_the_attempt() {
        let driver = StubDriver::new();
        driver.set_url("https://app.example.com/login");
        driver.set_content("<html><form>Login failed, try again</form></html>");
        driver.insert_input("input[type=\"email\"]", "");
        driver.insert_input("input[type=\"password\"]", "");
        driver.insert_element("button[type=\"submit\"]", StubDriver::visible_element("button"));

        let adapter = LoginAdapter::new();
        let err = adapter
            .login(&driver, &config("alice", "https://app.example.com/login"))
            .await
            .unwrap_err();
        match err {
            LoginError::AuthFailed(phrase) => assert_eq!(phrase, "login failed"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(adapter.state(), LoginState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn ambiguous_outcome_fails_closed() {
        let driver = StubDriver::new();
        driver.set_url("https://app.example.com/login");
        driver.set_content("<html><form>Welcome back!</form></html>");
        driver.insert_input("input[type=\"email\"]", "");
        driver.insert_input("input[type=\"password\"]", "");
        driver.insert_element("button[type=\"submit\"]", StubDriver::visible_element("button"));

        let adapter = LoginAdapter::new();
        let err = adapter
            .login(&driver, &config("alice", "https://app.example.com/login"))
            .await
            .unwrap_err();
        assert!(matches!(err, LoginError::AuthFailed(msg) if msg.contains("confirm")));
    }

    #[tokio::test(start_paused = true)]
    async fn multi_step_types_password_after_identifier_submit() {
        let driver = Arc::new(StubDriver::new());
        driver.set_url("https://accounts.google.com/v3/signin/identifier");
        driver.set_content("<html>Sign in</html>");
        driver.insert_input("#identifierId", "");
        driver.insert_input("input[type=\"password\"]", "");
        driver.insert_element("#identifierNext", StubDriver::visible_element("button"));

        let adapter = LoginAdapter::new();
        let task_driver = driver.clone();
        let handle = tokio::spawn(async move {
            adapter
                .login(
                    task_driver.as_ref(),
                    &config("alice@example.com", "https://accounts.google.com/v3/signin/identifier"),
                )
                .await
        });

        // Let both submit steps run, then land the post-login page.
        tokio::time::sleep(Duration::from_millis(800)).await;
        driver.set_url("https://myaccount.google.com/");
        driver.set_content("<html>Account home</html>");
        driver.remove_element("input[type=\"password\"]");

        let session = handle.await.unwrap().unwrap();
        assert_eq!(session.username, "alice@example.com");
        assert!(!session.is_expired());

        let ops = driver.ops();
        let identifier_typed = ops
            .iter()
            .position(|op| matches!(op, StubOp::TypeText { selector, .. } if selector == "#identifierId"))
            .unwrap();
        let password_typed = ops
            .iter()
            .position(
                |op| matches!(op, StubOp::TypeText { selector, .. } if selector == "input[type=\"password\"]"),
            )
            .unwrap();
        let identifier_submitted = ops
            .iter()
            .position(|op| matches!(op, StubOp::Click(selector) if selector == "#identifierNext"))
            .unwrap();
        assert!(identifier_typed < identifier_submitted);
        assert!(identifier_submitted < password_typed);
        assert_eq!(
            driver.element_value("input[type=\"password\"]").as_deref(),
            None,
            "field was removed after typing"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cached_session_is_restored_without_a_login() {
        let driver = StubDriver::new();
        driver.set_url("about:blank");

        let mut session = LoginSession::new("alice", "https://app.example.com/home");
        session.cookies.push(page_adapter::CookieRecord {
            name: "sid".to_string(),
            value: "abc".to_string(),
            domain: Some("app.example.com".to_string()),
            path: Some("/".to_string()),
            expires: None,
            http_only: Some(true),
            secure: Some(true),
        });
        session
            .local_storage
            .insert("token".to_string(), "xyz".to_string());

        let adapter = LoginAdapter::new();
        adapter.store_session(session);

        let restored = adapter
            .get_authenticated_page(&driver, &config("alice", "https://app.example.com/home"))
            .await
            .unwrap();
        assert_eq!(restored.username, "alice");

        // No form interaction happened, only the restore.
        let ops = driver.ops();
        assert!(ops.iter().any(|op| matches!(op, StubOp::Navigate(url) if url == "https://app.example.com/home")));
        assert!(!ops.iter().any(|op| matches!(op, StubOp::TypeText { .. })));
        let cookies = driver.cookies().await.unwrap();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].name, "sid");
    }

    #[tokio::test(start_paused = true)]
    async fn relogin_retains_the_previous_session_and_restores_the_newest() {
        let driver = StubDriver::new();
        driver.set_url("about:blank");

        let older = LoginSession::new("alice", "https://app.example.com/home");
        let newer = LoginSession::new("alice", "https://app.example.com/home");
        let newer_id = newer.id.clone();

        let adapter = LoginAdapter::new();
        adapter.store_session(older);
        adapter.store_session(newer);
        assert_eq!(adapter.cached_session_count(), 2);

        let restored = adapter
            .get_authenticated_page(&driver, &config("alice", "https://app.example.com/home"))
            .await
            .unwrap();
        assert_eq!(restored.id, newer_id);

        // The history is capped: a third session pushes the oldest out.
        adapter.store_session(LoginSession::new("alice", "https://app.example.com/home"));
        assert_eq!(adapter.cached_session_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_cached_session_is_evicted() {
        let driver = StubDriver::new();
        driver.set_url("https://app.example.com/login");
        driver.set_content("<html>nothing to log into</html>");

        let mut session = LoginSession::new("alice", "https://app.example.com/login");
        session.expires_at = chrono::Utc::now() - chrono::Duration::hours(1);

        let adapter = LoginAdapter::new();
        adapter.store_session(session);
        assert_eq!(adapter.cached_session_count(), 1);

        // The stale entry is dropped and a fresh login is attempted,
        // which fails because the page has no form.
        let err = adapter
            .get_authenticated_page(&driver, &config("alice", "https://app.example.com/login"))
            .await
            .unwrap_err();
        assert!(matches!(err, LoginError::FormNotFound));
        assert_eq!(adapter.cached_session_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_is_idempotent() {
        let adapter = LoginAdapter::new();
        adapter.store_session(LoginSession::new("alice", "https://app.example.com/"));
        adapter.cleanup();
        adapter.cleanup();
        assert_eq!(adapter.cached_session_count(), 0);
        assert_eq!(adapter.state(), LoginState::Idle);
    }
}
