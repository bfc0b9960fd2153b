//! Login form detection: probe the page for the field triad, then
//! classify the form shape from the URL and page content.

use page_adapter::{DriverError, PageDriver};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::tables;

/// Escalating probe passes: immediate, then +2s, then +1.5s, to tolerate
/// dynamically rendered forms.
pub const PROBE_DELAYS_MS: [u64; 3] = [0, 2000, 1500];

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FormType {
    Traditional,
    GoogleMultiStep,
    MicrosoftMultiStep,
    Oauth,
    Sso,
    Passwordless,
    Spa,
}

impl FormType {
    pub fn is_multi_step(&self) -> bool {
        matches!(self, FormType::GoogleMultiStep | FormType::MicrosoftMultiStep)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubmissionMethod {
    Click,
    Enter,
    AutoSubmit,
    OauthPopup,
}

/// Detected login-page shape. Selectors, not element handles: anything
/// held across a navigation must be re-resolved.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoginForm {
    pub email_selector: String,
    pub password_selector: Option<String>,
    pub submit_selector: Option<String>,
    pub form_type: FormType,
    pub submission_method: SubmissionMethod,
}

#[derive(Clone, Debug, Default)]
pub struct LoginDetector;

impl LoginDetector {
    pub fn new() -> Self {
        Self
    }

    /// Probe for a login form. `Ok(None)` is the ordinary "no form here"
    /// answer after all retry passes are exhausted, not a failure.
    pub async fn detect(&self, driver: &dyn PageDriver) -> Result<Option<LoginForm>, DriverError> {
        let email = probe_first(driver, tables::EMAIL_SELECTORS).await?;
        let Some(email_selector) = email else {
            debug!(target: "login-flow", "no email/username field found");
            return Ok(None);
        };

        let password_selector = probe_first(driver, tables::PASSWORD_SELECTORS).await?;
        let submit_selector = probe_first(driver, tables::SUBMIT_SELECTORS).await?;

        let url = driver.current_url().await?;
        let content = driver.page_content().await?;
        let form_type = classify(&url, &content);

        // A page with an identifier field but no password only counts as
        // a login form when some recognized flow explains the absence.
        if password_selector.is_none()
            && !matches!(
                form_type,
                FormType::GoogleMultiStep
                    | FormType::MicrosoftMultiStep
                    | FormType::Oauth
                    | FormType::Sso
                    | FormType::Passwordless
            )
        {
            debug!(target: "login-flow", "identifier field without password and no recognized flow");
            return Ok(None);
        }

        let submission_method = submission_method(form_type, submit_selector.is_some());
        info!(
            target: "login-flow",
            form_type = ?form_type,
            method = ?submission_method,
            email = %email_selector,
            "login form detected"
        );

        Ok(Some(LoginForm {
            email_selector,
            password_selector,
            submit_selector,
            form_type,
            submission_method,
        }))
    }
}

/// First selector from the table that resolves to a visible element,
/// retried over the escalating passes.
pub async fn probe_first(
    driver: &dyn PageDriver,
    selectors: &[&str],
) -> Result<Option<String>, DriverError> {
    for delay_ms in PROBE_DELAYS_MS {
        if delay_ms > 0 {
            sleep(Duration::from_millis(delay_ms)).await;
        }
        for selector in selectors {
            match driver.element_state(selector).await? {
                Some(state) if state.visible => return Ok(Some(selector.to_string())),
                _ => {}
            }
        }
    }
    Ok(None)
}

/// One quick pass over the table, for re-resolution after a transition
/// where the caller controls the waiting.
pub async fn probe_first_immediate(
    driver: &dyn PageDriver,
    selectors: &[&str],
) -> Result<Option<String>, DriverError> {
    for selector in selectors {
        match driver.element_state(selector).await? {
            Some(state) if state.visible => return Ok(Some(selector.to_string())),
            _ => {}
        }
    }
    Ok(None)
}

/// Classification priority: known provider host, then OAuth buttons,
/// then enterprise SSO copy, then passwordless signals, then SPA
/// markers, else traditional.
pub fn classify(url: &str, content: &str) -> FormType {
    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
        .unwrap_or_default();

    if tables::GOOGLE_HOSTS.iter().any(|h| host == *h) {
        return FormType::GoogleMultiStep;
    }
    if tables::MICROSOFT_HOSTS.iter().any(|h| host == *h) {
        return FormType::MicrosoftMultiStep;
    }
    if tables::contains_any(content, tables::OAUTH_PHRASES) {
        return FormType::Oauth;
    }
    if tables::contains_any(content, tables::SSO_PHRASES) {
        return FormType::Sso;
    }
    if tables::contains_any(content, tables::PASSWORDLESS_PHRASES) {
        return FormType::Passwordless;
    }
    if tables::SPA_MARKERS.iter().any(|m| content.contains(m)) {
        return FormType::Spa;
    }
    FormType::Traditional
}

fn submission_method(form_type: FormType, has_submit: bool) -> SubmissionMethod {
    match form_type {
        FormType::Oauth => SubmissionMethod::OauthPopup,
        FormType::Spa if !has_submit => SubmissionMethod::AutoSubmit,
        _ if has_submit => SubmissionMethod::Click,
        _ => SubmissionMethod::Enter,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use page_adapter::StubDriver;

    #[test]
    fn provider_hosts_outrank_everything() {
        let t = classify("https://accounts.google.com/v3/signin", "Sign in with Google");
        assert_eq!(t, FormType::GoogleMultiStep);

        let t = classify("https://login.microsoftonline.com/common/oauth2", "");
        assert_eq!(t, FormType::MicrosoftMultiStep);
    }

    #[test]
    fn phrase_driven_classification_order() {
        assert_eq!(
            classify("https://x.test/login", "Continue with Google or email"),
            FormType::Oauth
        );
        assert_eq!(
            classify("https://x.test/login", "Use your organization account"),
            FormType::Sso
        );
        assert_eq!(
            classify("https://x.test/login", "We'll email you a link"),
            FormType::Passwordless
        );
        assert_eq!(
            classify("https://x.test/login", "<div id=\"root\"></div>"),
            FormType::Spa
        );
        assert_eq!(
            classify("https://x.test/login", "<form></form>"),
            FormType::Traditional
        );
    }

    #[tokio::test(start_paused = true)]
    async fn scenario_google_email_password_no_submit() {
        let driver = StubDriver::new();
        driver.set_url("https://accounts.google.com/v3/signin/identifier");
        driver.set_content("<html>Sign in</html>");
        driver.insert_element("#email", StubDriver::visible_element("input"));
        driver.insert_element("input[type=\"password\"]", StubDriver::visible_element("input"));

        let form = LoginDetector::new().detect(&driver).await.unwrap().unwrap();
        assert_eq!(form.form_type, FormType::GoogleMultiStep);
        assert_eq!(form.submission_method, SubmissionMethod::Enter);
        assert_eq!(form.email_selector, "#email");
        assert_eq!(
            form.password_selector.as_deref(),
            Some("input[type=\"password\"]")
        );
        assert!(form.submit_selector.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn detection_not_found_after_all_passes() {
        let driver = StubDriver::new();
        driver.set_url("https://app.example.com/dashboard");
        driver.set_content("<html>dashboard</html>");
        let form = LoginDetector::new().detect(&driver).await.unwrap();
        assert!(form.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn identifier_without_password_needs_a_recognized_flow() {
        let driver = StubDriver::new();
        driver.set_url("https://app.example.com/search");
        driver.set_content("<html>plain page with a username field</html>");
        driver.insert_element("#username", StubDriver::visible_element("input"));
        let form = LoginDetector::new().detect(&driver).await.unwrap();
        assert!(form.is_none());

        // The same field becomes a form when the page says so.
        driver.set_content("<html>Enter your email and we'll send a magic link</html>");
        let form = LoginDetector::new().detect(&driver).await.unwrap().unwrap();
        assert_eq!(form.form_type, FormType::Passwordless);
    }
}
