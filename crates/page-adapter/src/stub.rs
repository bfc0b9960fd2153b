//! Scriptable in-memory [`PageDriver`] used by the test suites.
//!
//! The stub models just enough page behavior for the managers above it:
//! a URL, registered elements with interactable state, canned script
//! results, and an operation log tests can assert against. Field editing
//! follows real selection semantics far enough that clear-before-type
//! (triple-click then Backspace) is observable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::driver::{
    CookieRecord, DriverError, ElementState, NavigationNotice, PageDriver, Rect,
};

/// One recorded driver operation, in call order.
#[derive(Clone, Debug, PartialEq)]
pub enum StubOp {
    Navigate(String),
    Click(String),
    TypeText { selector: String, text: String },
    PressKey { selector: String, key: String },
    SelectOption { selector: String, value: String },
    Scroll { x: f64, y: f64 },
    Screenshot,
    Evaluate(String),
    AddInitScript,
}

struct StubElement {
    state: ElementState,
    /// Whole-value selection toggled by three consecutive clicks.
    selected: bool,
}

struct EvalRule {
    pattern: String,
    queue: Vec<Value>,
}

#[derive(Default)]
struct StubState {
    url: String,
    content: String,
    elements: HashMap<String, StubElement>,
    counts: HashMap<String, usize>,
    queued_evals: Vec<EvalRule>,
    fixed_evals: Vec<(String, Value)>,
    cookies: Vec<CookieRecord>,
    ops: Vec<StubOp>,
    init_scripts: Vec<String>,
    last_click: Option<(String, u32)>,
}

pub struct StubDriver {
    state: Mutex<StubState>,
    nav_tx: broadcast::Sender<NavigationNotice>,
    closed: AtomicBool,
}

impl Default for StubDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl StubDriver {
    pub fn new() -> Self {
        let (nav_tx, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(StubState::default()),
            nav_tx,
            closed: AtomicBool::new(false),
        }
    }

    /// A visible, enabled element of the given tag at a fixed position.
    pub fn visible_element(tag: &str) -> ElementState {
        ElementState {
            visible: true,
            enabled: true,
            pointer_events: true,
            tag: tag.to_string(),
            value: None,
            bbox: Some(Rect {
                x: 10.0,
                y: 10.0,
                width: 120.0,
                height: 32.0,
            }),
        }
    }

    pub fn set_url(&self, url: &str) {
        self.state.lock().url = url.to_string();
    }

    pub fn set_content(&self, content: &str) {
        self.state.lock().content = content.to_string();
    }

    pub fn insert_element(&self, selector: &str, state: ElementState) {
        self.state.lock().elements.insert(
            selector.to_string(),
            StubElement {
                state,
                selected: false,
            },
        );
    }

    /// Register an input pre-filled with a value.
    pub fn insert_input(&self, selector: &str, value: &str) {
        let mut state = Self::visible_element("input");
        state.value = Some(value.to_string());
        self.insert_element(selector, state);
    }

    pub fn remove_element(&self, selector: &str) {
        self.state.lock().elements.remove(selector);
    }

    /// Override the match count reported for a selector.
    pub fn set_match_count(&self, selector: &str, count: usize) {
        self.state
            .lock()
            .counts
            .insert(selector.to_string(), count);
    }

    /// Queue a one-shot result for any evaluated script containing
    /// `pattern`. Queued results drain FIFO.
    pub fn queue_eval(&self, pattern: &str, value: Value) {
        let mut state = self.state.lock();
        if let Some(rule) = state
            .queued_evals
            .iter_mut()
            .find(|r| r.pattern == pattern)
        {
            rule.queue.push(value);
        } else {
            state.queued_evals.push(EvalRule {
                pattern: pattern.to_string(),
                queue: vec![value],
            });
        }
    }

    /// Fixed result for any evaluated script containing `pattern`.
    pub fn set_eval(&self, pattern: &str, value: Value) {
        self.state
            .lock()
            .fixed_evals
            .push((pattern.to_string(), value));
    }

    /// Simulate an in-page navigation (redirect, SSO hop) without a
    /// driver call.
    pub fn emit_navigation(&self, url: &str) {
        self.state.lock().url = url.to_string();
        let _ = self.nav_tx.send(NavigationNotice {
            url: url.to_string(),
            ts_ms: now_ms(),
        });
    }

    pub fn ops(&self) -> Vec<StubOp> {
        self.state.lock().ops.clone()
    }

    pub fn element_value(&self, selector: &str) -> Option<String> {
        self.state
            .lock()
            .elements
            .get(selector)
            .and_then(|e| e.state.value.clone())
    }

    pub fn init_script_count(&self) -> usize {
        self.state.lock().init_scripts.len()
    }

    /// Force the page-closed condition so callers can exercise their
    /// teardown paths.
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn guard(&self) -> Result<(), DriverError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(DriverError::PageClosed)
        } else {
            Ok(())
        }
    }

    fn record(&self, op: StubOp) {
        let mut state = self.state.lock();
        state.last_click = None;
        state.ops.push(op);
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[async_trait]
impl PageDriver for StubDriver {
    async fn navigate(&self, url: &str, _deadline: Duration) -> Result<(), DriverError> {
        self.guard()?;
        self.record(StubOp::Navigate(url.to_string()));
        self.state.lock().url = url.to_string();
        let _ = self.nav_tx.send(NavigationNotice {
            url: url.to_string(),
            ts_ms: now_ms(),
        });
        Ok(())
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        self.guard()?;
        Ok(self.state.lock().url.clone())
    }

    async fn page_content(&self) -> Result<String, DriverError> {
        self.guard()?;
        Ok(self.state.lock().content.clone())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value, DriverError> {
        self.guard()?;
        self.record(StubOp::Evaluate(expression.to_string()));
        let mut state = self.state.lock();
        for rule in state.queued_evals.iter_mut() {
            if expression.contains(&rule.pattern) && !rule.queue.is_empty() {
                return Ok(rule.queue.remove(0));
            }
        }
        for (pattern, value) in &state.fixed_evals {
            if expression.contains(pattern) {
                return Ok(value.clone());
            }
        }
        Ok(Value::Null)
    }

    async fn query_count(&self, selector: &str) -> Result<usize, DriverError> {
        self.guard()?;
        let state = self.state.lock();
        if let Some(count) = state.counts.get(selector) {
            return Ok(*count);
        }
        Ok(usize::from(state.elements.contains_key(selector)))
    }

    async fn element_state(&self, selector: &str) -> Result<Option<ElementState>, DriverError> {
        self.guard()?;
        Ok(self
            .state
            .lock()
            .elements
            .get(selector)
            .map(|e| e.state.clone()))
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        self.guard()?;
        let mut state = self.state.lock();
        if !state.elements.contains_key(selector) {
            return Err(DriverError::ElementNotFound(selector.to_string()));
        }
        let streak = match state.last_click.take() {
            Some((last, n)) if last == selector => n + 1,
            _ => 1,
        };
        state.last_click = Some((selector.to_string(), streak));
        if streak >= 3 {
            if let Some(element) = state.elements.get_mut(selector) {
                element.selected = true;
            }
        }
        state.ops.push(StubOp::Click(selector.to_string()));
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), DriverError> {
        self.guard()?;
        let mut state = self.state.lock();
        let Some(element) = state.elements.get_mut(selector) else {
            return Err(DriverError::ElementNotFound(selector.to_string()));
        };
        if element.selected {
            element.state.value = Some(text.to_string());
            element.selected = false;
        } else {
            let mut value = element.state.value.take().unwrap_or_default();
            value.push_str(text);
            element.state.value = Some(value);
        }
        state.ops.push(StubOp::TypeText {
            selector: selector.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn press_key(&self, selector: &str, key: &str) -> Result<(), DriverError> {
        self.guard()?;
        let mut state = self.state.lock();
        let Some(element) = state.elements.get_mut(selector) else {
            return Err(DriverError::ElementNotFound(selector.to_string()));
        };
        if key == "Backspace" {
            if element.selected {
                element.state.value = Some(String::new());
                element.selected = false;
            } else if let Some(value) = element.state.value.as_mut() {
                value.pop();
            }
        }
        state.ops.push(StubOp::PressKey {
            selector: selector.to_string(),
            key: key.to_string(),
        });
        Ok(())
    }

    async fn select_option(&self, selector: &str, value: &str) -> Result<(), DriverError> {
        self.guard()?;
        let mut state = self.state.lock();
        let Some(element) = state.elements.get_mut(selector) else {
            return Err(DriverError::ElementNotFound(selector.to_string()));
        };
        element.state.value = Some(value.to_string());
        state.ops.push(StubOp::SelectOption {
            selector: selector.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    async fn scroll_to(&self, x: f64, y: f64) -> Result<(), DriverError> {
        self.guard()?;
        self.record(StubOp::Scroll { x, y });
        Ok(())
    }

    async fn wait_for_load(&self, _timeout: Duration) -> Result<(), DriverError> {
        self.guard()
    }

    async fn screenshot_png(&self) -> Result<Vec<u8>, DriverError> {
        self.guard()?;
        self.record(StubOp::Screenshot);
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn add_init_script(&self, script: &str) -> Result<(), DriverError> {
        self.guard()?;
        self.record(StubOp::AddInitScript);
        self.state.lock().init_scripts.push(script.to_string());
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<CookieRecord>, DriverError> {
        self.guard()?;
        Ok(self.state.lock().cookies.clone())
    }

    async fn set_cookies(&self, cookies: &[CookieRecord]) -> Result<(), DriverError> {
        self.guard()?;
        self.state.lock().cookies = cookies.to_vec();
        Ok(())
    }

    fn subscribe_navigations(&self) -> broadcast::Receiver<NavigationNotice> {
        self.nav_tx.subscribe()
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn triple_click_then_backspace_clears_the_field() {
        let driver = StubDriver::new();
        driver.insert_input("#email", "placeholder text");

        driver.click("#email").await.unwrap();
        driver.click("#email").await.unwrap();
        driver.click("#email").await.unwrap();
        driver.press_key("#email", "Backspace").await.unwrap();
        driver.type_text("#email", "alice@example.com").await.unwrap();

        assert_eq!(
            driver.element_value("#email").as_deref(),
            Some("alice@example.com")
        );
    }

    #[tokio::test]
    async fn typing_without_clearing_appends() {
        let driver = StubDriver::new();
        driver.insert_input("#q", "abc");
        driver.type_text("#q", "def").await.unwrap();
        assert_eq!(driver.element_value("#q").as_deref(), Some("abcdef"));
    }

    #[tokio::test]
    async fn queued_eval_results_drain_fifo() {
        let driver = StubDriver::new();
        driver.queue_eval("__drain", serde_json::json!([1]));
        driver.queue_eval("__drain", serde_json::json!([2, 3]));

        let first = driver.evaluate("window.__drain()").await.unwrap();
        let second = driver.evaluate("window.__drain()").await.unwrap();
        let third = driver.evaluate("window.__drain()").await.unwrap();
        assert_eq!(first, serde_json::json!([1]));
        assert_eq!(second, serde_json::json!([2, 3]));
        assert!(third.is_null());
    }

    #[tokio::test]
    async fn closed_driver_reports_page_closed() {
        let driver = StubDriver::new();
        driver.mark_closed();
        let err = driver.current_url().await.unwrap_err();
        assert!(err.is_page_closed());
    }

    #[tokio::test]
    async fn navigation_reaches_subscribers() {
        let driver = StubDriver::new();
        let mut rx = driver.subscribe_navigations();
        driver
            .navigate("https://app.example.com", Duration::from_secs(5))
            .await
            .unwrap();
        let notice = rx.recv().await.unwrap();
        assert_eq!(notice.url, "https://app.example.com");
    }
}
