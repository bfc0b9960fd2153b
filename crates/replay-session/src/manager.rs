//! Replay lifecycle: resolve each step's element, perform it, and
//! report a per-step outcome without ever aborting the run.

use base64::Engine as _;
use chrono::{DateTime, Utc};
use login_flow::LoginAdapter;
use page_adapter::{DriverError, PageDriver};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use webreplay_core_types::{Action, ActionType, ReplayOptions, ReplayResult, SessionId};

use crate::ReplayError;

/// Fixed pause between element lookup attempts.
const RETRY_BACKOFF: Duration = Duration::from_millis(1000);
/// Fallback pause for explicit wait steps that carry no timeout.
const DEFAULT_WAIT: Duration = Duration::from_millis(1000);

/// Sealed outcome of a replay run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplaySummary {
    pub id: SessionId,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub results: Vec<ReplayResult>,
    pub total: usize,
    pub succeeded: usize,
    /// Successes over total, `0.0` for an empty run.
    pub success_rate: f64,
}

pub struct ReplayManager {
    options: ReplayOptions,
    login: LoginAdapter,
    driver: Mutex<Option<Arc<dyn PageDriver>>>,
    results: Mutex<Vec<ReplayResult>>,
    started: Mutex<Option<(SessionId, DateTime<Utc>)>>,
    sealed: Mutex<Option<ReplaySummary>>,
}

impl ReplayManager {
    pub fn new(options: ReplayOptions) -> Self {
        Self {
            options,
            login: LoginAdapter::new(),
            driver: Mutex::new(None),
            results: Mutex::new(Vec::new()),
            started: Mutex::new(None),
            sealed: Mutex::new(None),
        }
    }

    /// Bind the page this run will drive and authenticate if the
    /// options ask for it. Login failures are reported and the run
    /// proceeds unauthenticated; the affected steps will fail on their
    /// own terms.
    pub async fn start_replay(&self, driver: Arc<dyn PageDriver>) -> Result<(), ReplayError> {
        if self.options.requires_login {
            if let Some(login) = &self.options.login {
                if let Err(e) = self.login.get_authenticated_page(driver.as_ref(), login).await {
                    warn!(target: "replay", error = %e, "login failed, replaying unauthenticated");
                }
            }
        }
        let id = SessionId::new();
        *self.driver.lock() = Some(driver);
        *self.results.lock() = Vec::new();
        *self.started.lock() = Some((id.clone(), Utc::now()));
        *self.sealed.lock() = None;
        info!(target: "replay", session = %id, "replay started");
        Ok(())
    }

    /// Execute one step. Runtime problems come back as a failed
    /// [`ReplayResult`]; the only error is calling this before
    /// [`start_replay`], which is a bug in the caller.
    pub async fn execute_action(&self, action: &Action) -> Result<ReplayResult, ReplayError> {
        let driver = self
            .driver
            .lock()
            .clone()
            .ok_or(ReplayError::NotInitialized)?;

        let started = Instant::now();
        let outcome = self.perform(driver.as_ref(), action).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let mut result = ReplayResult {
            action_id: action.id.clone(),
            success: outcome.is_ok(),
            duration_ms,
            error: None,
            screenshot: None,
            selector_used: action
                .action_type
                .needs_selector()
                .then(|| action.selector.clone()),
            confidence: action.metadata.confidence,
        };

        match outcome {
            Ok(screenshot) => {
                result.screenshot = screenshot;
                debug!(target: "replay", id = %action.id, kind = ?action.action_type, duration_ms, "step ok");
            }
            Err(reason) => {
                warn!(target: "replay", id = %action.id, kind = ?action.action_type, %reason, "step failed");
                result.error = Some(reason);
                if self.options.screenshot_on_error {
                    match driver.screenshot_png().await {
                        Ok(png) => {
                            result.screenshot =
                                Some(base64::engine::general_purpose::STANDARD.encode(png));
                        }
                        Err(e) => debug!(target: "replay", error = %e, "error screenshot skipped"),
                    }
                }
            }
        }

        self.results.lock().push(result.clone());
        Ok(result)
    }

    /// Run a whole list, never short-circuiting on a failed step.
    pub async fn replay_actions(
        &self,
        actions: &[Action],
    ) -> Result<Vec<ReplayResult>, ReplayError> {
        let mut results = Vec::with_capacity(actions.len());
        for action in actions {
            results.push(self.execute_action(action).await?);
        }
        Ok(results)
    }

    /// Seal the run and compute its summary. Calling again returns the
    /// same summary.
    pub fn stop_replay(&self) -> ReplaySummary {
        if let Some(done) = self.sealed.lock().clone() {
            return done;
        }
        let results: Vec<ReplayResult> = std::mem::take(&mut *self.results.lock());
        let (id, started_at) = self
            .started
            .lock()
            .take()
            .unwrap_or_else(|| (SessionId::new(), Utc::now()));
        let total = results.len();
        let succeeded = results.iter().filter(|r| r.success).count();
        let success_rate = if total == 0 {
            0.0
        } else {
            succeeded as f64 / total as f64
        };
        let summary = ReplaySummary {
            id: id.clone(),
            started_at,
            ended_at: Utc::now(),
            results,
            total,
            succeeded,
            success_rate,
        };
        *self.sealed.lock() = Some(summary.clone());
        *self.driver.lock() = None;
        info!(target: "replay", session = %id, total, succeeded, success_rate, "replay stopped");
        summary
    }

    pub async fn cleanup(&self) {
        self.login.cleanup();
        *self.driver.lock() = None;
    }

    /// Perform the step. `Ok` carries the screenshot payload when the
    /// step produces one; `Err` carries the human-readable reason.
    async fn perform(
        &self,
        driver: &dyn PageDriver,
        action: &Action,
    ) -> Result<Option<String>, String> {
        if action.action_type.needs_selector() {
            self.find_element(driver, action).await?;
        }

        match action.action_type {
            ActionType::Click => {
                driver.click(&action.selector).await.map_err(stringify)?;
            }
            ActionType::DoubleClick => {
                driver.click(&action.selector).await.map_err(stringify)?;
                driver.click(&action.selector).await.map_err(stringify)?;
            }
            ActionType::RightClick => {
                dispatch_mouse_event(driver, &action.selector, "contextmenu").await?;
            }
            ActionType::Hover => {
                dispatch_mouse_event(driver, &action.selector, "mouseover").await?;
            }
            ActionType::Type => {
                let text = action.value.as_deref().ok_or("type step has no value")?;
                clear_and_type(driver, &action.selector, text).await?;
            }
            ActionType::Select => {
                let value = action.value.as_deref().ok_or("select step has no value")?;
                driver
                    .select_option(&action.selector, value)
                    .await
                    .map_err(stringify)?;
            }
            ActionType::KeyPress => {
                let key = action.value.as_deref().unwrap_or("Enter");
                driver
                    .press_key(&action.selector, key)
                    .await
                    .map_err(stringify)?;
            }
            ActionType::Navigate => {
                let url = action.url.as_deref().ok_or("navigation step has no url")?;
                driver
                    .navigate(url, Duration::from_millis(self.options.timeout_ms))
                    .await
                    .map_err(stringify)?;
            }
            ActionType::Scroll => {
                let coords = action
                    .coordinates
                    .ok_or("scroll step has no coordinates")?;
                driver.scroll_to(coords.x, coords.y).await.map_err(stringify)?;
            }
            ActionType::Wait => {
                let pause = action
                    .timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_WAIT);
                sleep(pause).await;
            }
            ActionType::Screenshot => {
                let png = driver.screenshot_png().await.map_err(stringify)?;
                return Ok(Some(base64::engine::general_purpose::STANDARD.encode(png)));
            }
            ActionType::Custom => {
                let script = action.value.as_deref().ok_or("custom step has no script")?;
                driver.evaluate(script).await.map_err(stringify)?;
            }
            ActionType::DragDrop => {
                return Err("drag-and-drop steps are not supported".to_string());
            }
        }
        Ok(None)
    }

    /// Wait for the step's element with a fixed backoff between
    /// attempts. The per-action retry count wins over the run default.
    async fn find_element(&self, driver: &dyn PageDriver, action: &Action) -> Result<(), String> {
        let attempts = action.retry_count.unwrap_or(self.options.retry_attempts).max(1);
        for attempt in 0..attempts {
            match driver.element_state(&action.selector).await {
                Ok(Some(_)) => return Ok(()),
                Ok(None) => {
                    debug!(
                        target: "replay",
                        selector = %action.selector,
                        attempt = attempt + 1,
                        attempts,
                        "element not found yet"
                    );
                }
                Err(e) if e.is_page_closed() => return Err(e.to_string()),
                Err(e) => debug!(target: "replay", error = %e, "element lookup failed"),
            }
            if attempt + 1 < attempts {
                sleep(RETRY_BACKOFF).await;
            }
        }
        Err(format!(
            "element not found after {attempts} attempts: {}",
            action.selector
        ))
    }
}

/// Clear the target before typing. A triple click selects any existing
/// value and Backspace removes it, which also works on inputs that
/// reject a programmatic reset.
async fn clear_and_type(
    driver: &dyn PageDriver,
    selector: &str,
    text: &str,
) -> Result<(), String> {
    driver.click(selector).await.map_err(stringify)?;
    driver.click(selector).await.map_err(stringify)?;
    driver.click(selector).await.map_err(stringify)?;
    driver.press_key(selector, "Backspace").await.map_err(stringify)?;
    driver.type_text(selector, text).await.map_err(stringify)?;
    Ok(())
}

/// Synthesize a mouse event on the element. Used for the event kinds
/// the driver has no first-class verb for.
async fn dispatch_mouse_event(
    driver: &dyn PageDriver,
    selector: &str,
    event: &str,
) -> Result<(), String> {
    let lookup = if page_adapter::is_xpath(selector) {
        format!(
            "document.evaluate({}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue",
            js_str(selector)
        )
    } else {
        format!("document.querySelector({})", js_str(selector))
    };
    let script = format!(
        "(() => {{ const el = {lookup}; if (!el) {{ return false; }} \
         el.dispatchEvent(new MouseEvent({}, {{ bubbles: true, cancelable: true }})); \
         return true; }})()",
        js_str(event)
    );
    match driver.evaluate(&script).await.map_err(stringify)? {
        Value::Bool(true) => Ok(()),
        _ => Err(format!("element not found: {selector}")),
    }
}

fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

fn stringify(e: DriverError) -> String {
    e.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use page_adapter::{StubDriver, StubOp};
    use webreplay_core_types::Coordinates;

    fn typed(selector: &str, value: &str) -> Action {
        let mut action = Action::new(ActionType::Type, selector);
        action.value = Some(value.to_string());
        action
    }

    #[tokio::test(start_paused = true)]
    async fn execute_before_start_is_a_programmer_error() {
        let manager = ReplayManager::new(ReplayOptions::default());
        let err = manager
            .execute_action(&Action::new(ActionType::Click, "#x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReplayError::NotInitialized));
    }

    #[tokio::test(start_paused = true)]
    async fn type_clears_the_existing_value_first() {
        let driver = Arc::new(StubDriver::new());
        driver.insert_input("#name", "old value");

        let manager = ReplayManager::new(ReplayOptions::default());
        manager.start_replay(driver.clone()).await.unwrap();
        let result = manager
            .execute_action(&typed("#name", "new value"))
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(driver.element_value("#name").as_deref(), Some("new value"));
        let clicks = driver
            .ops()
            .iter()
            .filter(|op| matches!(op, StubOp::Click(s) if s == "#name"))
            .count();
        assert_eq!(clicks, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_step_does_not_stop_the_run() {
        let driver = Arc::new(StubDriver::new());
        driver.set_url("https://app.example.com/");
        driver.insert_element("#a", StubDriver::visible_element("button"));
        driver.insert_input("#in", "");

        let mut nav = Action::new(ActionType::Navigate, "body");
        nav.url = Some("https://app.example.com/start".to_string());
        let mut scroll = Action::new(ActionType::Scroll, "body");
        scroll.coordinates = Some(Coordinates { x: 0.0, y: 400.0 });
        let actions = vec![
            nav,
            Action::new(ActionType::Click, "#a"),
            typed("#in", "hello"),
            Action::new(ActionType::Click, "#missing"),
            scroll,
        ];

        let manager = ReplayManager::new(ReplayOptions::default());
        manager.start_replay(driver).await.unwrap();
        let results = manager.replay_actions(&actions).await.unwrap();

        assert_eq!(results.len(), 5);
        assert!(!results[3].success);
        assert!(results[3].error.as_deref().unwrap_or("").contains("not found"));
        assert!(results.iter().enumerate().all(|(i, r)| r.success || i == 3));

        let summary = manager.stop_replay();
        assert_eq!(summary.total, 5);
        assert_eq!(summary.succeeded, 4);
        assert!((summary.success_rate - 0.8).abs() < f64::EPSILON);
        assert!(summary.ended_at >= summary.started_at);
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_retries_until_the_element_appears() {
        let driver = Arc::new(StubDriver::new());
        let manager = Arc::new(ReplayManager::new(ReplayOptions::default()));
        manager.start_replay(driver.clone()).await.unwrap();

        let task_manager = manager.clone();
        let handle = tokio::spawn(async move {
            task_manager
                .execute_action(&Action::new(ActionType::Click, "#late"))
                .await
        });

        // The element shows up between the second and third attempt.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        driver.insert_element("#late", StubDriver::visible_element("button"));

        let result = handle.await.unwrap().unwrap();
        assert!(result.success);
        assert_eq!(result.selector_used.as_deref(), Some("#late"));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_run_has_zero_success_rate() {
        let manager = ReplayManager::new(ReplayOptions::default());
        manager.start_replay(Arc::new(StubDriver::new())).await.unwrap();
        let summary = manager.stop_replay();
        assert_eq!(summary.total, 0);
        assert_eq!(summary.success_rate, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_replay_is_idempotent() {
        let driver = Arc::new(StubDriver::new());
        driver.insert_element("#a", StubDriver::visible_element("button"));

        let manager = ReplayManager::new(ReplayOptions::default());
        manager.start_replay(driver).await.unwrap();
        manager
            .execute_action(&Action::new(ActionType::Click, "#a"))
            .await
            .unwrap();

        let first = manager.stop_replay();
        let second = manager.stop_replay();
        assert_eq!(first.id, second.id);
        assert_eq!(first.total, second.total);
        assert_eq!(first.success_rate, second.success_rate);
        assert_eq!(
            first.results[0].action_id.to_string(),
            second.results[0].action_id.to_string()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn screenshot_on_error_attaches_evidence() {
        let driver = Arc::new(StubDriver::new());
        let options = ReplayOptions {
            screenshot_on_error: true,
            retry_attempts: 1,
            ..ReplayOptions::default()
        };
        let manager = ReplayManager::new(options);
        manager.start_replay(driver).await.unwrap();

        let result = manager
            .execute_action(&Action::new(ActionType::Click, "#gone"))
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.screenshot.is_some());
    }
}
