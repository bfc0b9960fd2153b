//! Capture lifecycle: install the in-page recorder, poll its buffer,
//! gate recording on the domain scope, and seal the action list.

use chrono::{DateTime, TimeZone, Utc};
use domain_scope::DomainScope;
use login_flow::LoginAdapter;
use page_adapter::{DriverError, NavigationNotice, PageDriver};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webreplay_core_types::{
    Action, ActionType, CaptureOptions, Coordinates, DomainScopeConfig, SessionId, WorkflowId,
};

use selector_engine::{ElementDescriptor, SelectorGenerator};

use crate::script;
use crate::CaptureError;

/// Floor between screenshot actions when screenshots are enabled.
const SCREENSHOT_MIN_INTERVAL: Duration = Duration::from_secs(5);
/// Hard cap on screenshot actions per capture.
const MAX_SCREENSHOTS: usize = 20;

const METADATA_JS: &str = "({ userAgent: navigator.userAgent, width: window.innerWidth, height: window.innerHeight, title: document.title })";

pub type PausedCallback = Box<dyn Fn(&str) + Send + Sync>;
pub type ResumedCallback = Box<dyn Fn() + Send + Sync>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CaptureState {
    Idle,
    Recording,
    Stopped,
}

/// Page environment snapshotted when the recording starts.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SessionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport_height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_title: Option<String>,
}

/// One bounded recording episode. Created by `start_capture`, sealed by
/// `stop_capture`; a sealed session rejects further appends.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaptureSession {
    pub id: SessionId,
    pub workflow_id: WorkflowId,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_scope: Option<DomainScopeConfig>,
    pub metadata: SessionMetadata,
}

/// One interaction event drained from the in-page buffer.
#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    selector: String,
    #[serde(default)]
    tag: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    classes: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    x: Option<f64>,
    #[serde(default)]
    y: Option<f64>,
    #[serde(default)]
    ts: Option<i64>,
}

pub struct CaptureManager {
    inner: Arc<Inner>,
}

struct Inner {
    options: CaptureOptions,
    login: LoginAdapter,
    generator: SelectorGenerator,
    actions: Mutex<Vec<Action>>,
    session: Mutex<Option<CaptureSession>>,
    scope: Mutex<Option<DomainScope>>,
    driver: Mutex<Option<Arc<dyn PageDriver>>>,
    state: Mutex<CaptureState>,
    cancel: Mutex<CancellationToken>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    on_paused: Mutex<Option<PausedCallback>>,
    on_resumed: Mutex<Option<ResumedCallback>>,
    sealed: Mutex<Option<Vec<Action>>>,
}

impl CaptureManager {
    pub fn new(options: CaptureOptions) -> Self {
        let generator = SelectorGenerator::for_strategy(options.selector_strategy);
        Self {
            inner: Arc::new(Inner {
                options,
                login: LoginAdapter::new(),
                generator,
                actions: Mutex::new(Vec::new()),
                session: Mutex::new(None),
                scope: Mutex::new(None),
                driver: Mutex::new(None),
                state: Mutex::new(CaptureState::Idle),
                cancel: Mutex::new(CancellationToken::new()),
                tasks: Mutex::new(Vec::new()),
                on_paused: Mutex::new(None),
                on_resumed: Mutex::new(None),
                sealed: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> CaptureState {
        *self.inner.state.lock()
    }

    pub fn action_count(&self) -> usize {
        self.inner.actions.lock().len()
    }

    pub fn is_recording_paused(&self) -> bool {
        self.inner
            .scope
            .lock()
            .as_ref()
            .map(|s| s.is_recording_paused())
            .unwrap_or(false)
    }

    /// Widen the scope while a capture is running.
    pub fn allow_domain(&self, domain: &str) {
        if let Some(scope) = self.inner.scope.lock().as_mut() {
            scope.add_allowed_domain(domain);
        }
    }

    pub fn disallow_domain(&self, domain: &str) {
        if let Some(scope) = self.inner.scope.lock().as_mut() {
            scope.remove_allowed_domain(domain);
        }
    }

    /// Invoked with the human-readable reason whenever a navigation
    /// leaves the allowed scope and recording pauses.
    pub fn set_on_recording_paused(&self, callback: PausedCallback) {
        *self.inner.on_paused.lock() = Some(callback);
    }

    pub fn set_on_recording_resumed(&self, callback: ResumedCallback) {
        *self.inner.on_resumed.lock() = Some(callback);
    }

    /// The session record, once a capture has started. Sealed with an
    /// end time after `stop_capture`.
    pub fn session(&self) -> Option<CaptureSession> {
        self.inner.session.lock().clone()
    }

    /// Navigate to the start URL, arm the recorder, and begin polling.
    /// Login failures are reported but never abort a capture.
    pub async fn start_capture(
        &self,
        driver: Arc<dyn PageDriver>,
        workflow_id: WorkflowId,
        start_url: &str,
    ) -> Result<(), CaptureError> {
        {
            let mut state = self.inner.state.lock();
            if *state == CaptureState::Recording {
                return Err(CaptureError::AlreadyRecording);
            }
            *state = CaptureState::Recording;
        }

        let scope = match &self.inner.options.domain_scope {
            Some(config) => DomainScope::new(config.clone()),
            None => DomainScope::with_base_domain(&host_of(start_url)),
        };
        *self.inner.scope.lock() = Some(scope);
        *self.inner.sealed.lock() = None;
        self.inner.actions.lock().clear();

        if self.inner.options.requires_login {
            if let Some(login) = &self.inner.options.login {
                match self.inner.login.get_authenticated_page(driver.as_ref(), login).await {
                    Ok(session) => {
                        debug!(target: "capture", session = %session.id, "authenticated before capture")
                    }
                    Err(e) => {
                        warn!(target: "capture", error = %e, "login failed, capturing unauthenticated")
                    }
                }
            }
        }

        let nav_deadline = Duration::from_millis(self.inner.options.timeout_ms);
        driver.add_init_script(script::RECORDER_JS).await?;
        driver.navigate(start_url, nav_deadline).await?;
        driver.evaluate(script::RECORDER_JS).await?;

        let metadata = match driver.evaluate(METADATA_JS).await {
            Ok(value) => session_metadata(value),
            Err(e) => {
                debug!(target: "capture", error = %e, "page metadata unavailable");
                SessionMetadata::default()
            }
        };
        let session = CaptureSession {
            id: SessionId::new(),
            workflow_id,
            started_at: Utc::now(),
            ended_at: None,
            actions: Vec::new(),
            domain_scope: self.inner.options.domain_scope.clone(),
            metadata,
        };
        let session_id = session.id.clone();
        *self.inner.session.lock() = Some(session);

        {
            let mut guard = self.inner.scope.lock();
            if let Some(scope) = guard.as_mut() {
                let decision = scope.record_navigation(start_url);
                if !decision.allowed {
                    warn!(
                        target: "capture",
                        url = %start_url,
                        reason = decision.reason.as_str(),
                        "start url is outside the configured scope"
                    );
                }
            }
        }
        self.push_navigate(start_url);

        let cancel = CancellationToken::new();
        *self.inner.cancel.lock() = cancel.clone();
        *self.inner.driver.lock() = Some(driver.clone());

        // Subscribe before the task is spawned: broadcast only delivers
        // to receivers that already exist when the event is sent.
        let nav_rx = driver.subscribe_navigations();
        let poll = tokio::spawn(poll_loop(self.inner.clone(), driver.clone(), cancel.clone()));
        let nav = tokio::spawn(nav_loop(self.inner.clone(), driver, nav_rx, cancel));
        self.inner.tasks.lock().extend([poll, nav]);

        info!(target: "capture", session = %session_id, url = %start_url, "capture started");
        Ok(())
    }

    /// Stop polling, drain whatever is still buffered, validate, and
    /// seal the list. Calling again returns the same sealed list.
    pub async fn stop_capture(&self) -> Result<Vec<Action>, CaptureError> {
        if let Some(done) = self.inner.sealed.lock().clone() {
            return Ok(done);
        }
        if *self.inner.state.lock() == CaptureState::Idle {
            return Err(CaptureError::NotRecording);
        }

        self.inner.cancel.lock().cancel();
        let tasks: Vec<_> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        let driver = self.inner.driver.lock().clone();
        if let Some(driver) = driver {
            if let Err(e) = drain_once(&self.inner, driver.as_ref()).await {
                if e.is_page_closed() {
                    debug!(target: "capture", "page already closed before final drain");
                } else {
                    warn!(target: "capture", error = %e, "final drain failed");
                }
            }
            // The page stops buffering the moment the capture stops, not
            // only at cleanup.
            if let Err(e) = driver.evaluate(script::TEARDOWN_JS).await {
                debug!(target: "capture", error = %e, "recorder teardown skipped");
            }
        }

        let raw: Vec<Action> = std::mem::take(&mut *self.inner.actions.lock());
        let validated = validate_actions(raw);
        *self.inner.state.lock() = CaptureState::Stopped;
        *self.inner.sealed.lock() = Some(validated.clone());
        if let Some(session) = self.inner.session.lock().as_mut() {
            session.ended_at = Some(Utc::now());
            session.actions = validated.clone();
        }
        info!(target: "capture", actions = validated.len(), "capture stopped");
        Ok(validated)
    }

    /// Tear down page-side listeners and drop held state. Safe to call
    /// repeatedly and on a dead page.
    pub async fn cleanup(&self) {
        self.inner.cancel.lock().cancel();
        let tasks: Vec<_> = self.inner.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        let driver = self.inner.driver.lock().take();
        if let Some(driver) = driver {
            if let Err(e) = driver.evaluate(script::TEARDOWN_JS).await {
                debug!(target: "capture", error = %e, "recorder teardown skipped");
            }
        }
        self.inner.login.cleanup();
        let mut state = self.inner.state.lock();
        if *state == CaptureState::Recording {
            *state = CaptureState::Stopped;
        }
    }

    fn push_navigate(&self, url: &str) {
        let mut action = Action::new(ActionType::Navigate, "body");
        action.url = Some(url.to_string());
        action.metadata.timestamp = Some(Utc::now());
        self.inner.actions.lock().push(action);
    }
}

async fn poll_loop(inner: Arc<Inner>, driver: Arc<dyn PageDriver>, cancel: CancellationToken) {
    let mut ticker = interval(Duration::from_millis(inner.options.capture_frequency_ms.max(100)));
    let mut last_shot: Option<Instant> = None;
    let mut shots = 0usize;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let appended = match drain_once(&inner, driver.as_ref()).await {
            Ok(n) => n,
            Err(e) if e.is_page_closed() => {
                debug!(target: "capture", "page closed, poll loop ending");
                break;
            }
            Err(e) => {
                warn!(target: "capture", error = %e, "drain failed");
                continue;
            }
        };

        if appended == 0 || !inner.options.include_screenshots || shots >= MAX_SCREENSHOTS {
            continue;
        }
        let due = last_shot.map_or(true, |t| t.elapsed() >= SCREENSHOT_MIN_INTERVAL);
        if !due {
            continue;
        }
        match driver.screenshot_png().await {
            Ok(png) => {
                use base64::Engine as _;
                let mut action = Action::new(ActionType::Screenshot, "body");
                action.value = Some(base64::engine::general_purpose::STANDARD.encode(png));
                action.metadata.timestamp = Some(Utc::now());
                inner.actions.lock().push(action);
                last_shot = Some(Instant::now());
                shots += 1;
            }
            Err(e) => debug!(target: "capture", error = %e, "screenshot skipped"),
        }
    }
}

async fn nav_loop(
    inner: Arc<Inner>,
    driver: Arc<dyn PageDriver>,
    mut rx: tokio::sync::broadcast::Receiver<NavigationNotice>,
    cancel: CancellationToken,
) {
    loop {
        let notice = tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Ok(notice) => notice,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(target: "capture", skipped, "navigation events dropped");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        };

        let (was_paused, now_paused, reason, allowed) = {
            let mut guard = inner.scope.lock();
            let Some(scope) = guard.as_mut() else { continue };
            let was_paused = scope.is_recording_paused();
            let decision = scope.record_navigation(&notice.url);
            (
                was_paused,
                scope.is_recording_paused(),
                scope.pause_reason(),
                decision.allowed,
            )
        };

        if now_paused && !was_paused {
            let reason = reason.unwrap_or_else(|| "navigation left the allowed scope".to_string());
            info!(target: "capture", url = %notice.url, %reason, "recording paused");
            if let Err(e) = driver.evaluate(script::PAUSE_JS).await {
                debug!(target: "capture", error = %e, "could not pause in-page recorder");
            }
            if let Some(callback) = inner.on_paused.lock().as_ref() {
                callback(&reason);
            }
        } else if !now_paused && was_paused {
            info!(target: "capture", url = %notice.url, "recording resumed");
            if let Err(e) = driver.evaluate(script::RESUME_JS).await {
                debug!(target: "capture", error = %e, "could not resume in-page recorder");
            }
            if let Some(callback) = inner.on_resumed.lock().as_ref() {
                callback();
            }
        }

        if allowed && !now_paused {
            let mut action = Action::new(ActionType::Navigate, "body");
            action.url = Some(notice.url.clone());
            action.metadata.timestamp = Some(Utc::now());
            inner.actions.lock().push(action);
        }
    }
}

/// Pull the buffered events out of the page and append the converted
/// actions. Returns how many were appended.
async fn drain_once(inner: &Arc<Inner>, driver: &dyn PageDriver) -> Result<usize, DriverError> {
    let batch = driver.evaluate(script::DRAIN_JS).await?;
    let Value::Array(entries) = batch else {
        return Ok(0);
    };
    if entries.is_empty() {
        return Ok(0);
    }

    let paused = inner
        .scope
        .lock()
        .as_ref()
        .map(|s| s.is_recording_paused())
        .unwrap_or(false);
    if paused {
        debug!(target: "capture", dropped = entries.len(), "events drained while paused");
        return Ok(0);
    }

    let mut appended = 0;
    let mut actions = inner.actions.lock();
    for entry in entries {
        let raw: RawEvent = match serde_json::from_value(entry) {
            Ok(raw) => raw,
            Err(e) => {
                debug!(target: "capture", error = %e, "unparseable recorder event");
                continue;
            }
        };
        if let Some(action) = convert_event(&inner.generator, raw) {
            actions.push(action);
            appended += 1;
        }
    }
    Ok(appended)
}

fn convert_event(generator: &SelectorGenerator, raw: RawEvent) -> Option<Action> {
    let action_type = match raw.kind.as_str() {
        "click" => ActionType::Click,
        "dblclick" => ActionType::DoubleClick,
        "contextmenu" => ActionType::RightClick,
        "change" if raw.tag == "select" => ActionType::Select,
        "change" => ActionType::Type,
        "keydown" => ActionType::KeyPress,
        "scroll" => ActionType::Scroll,
        // The click or key press that triggered the submit is captured
        // on its own, so the form event itself is redundant.
        "submit" => return None,
        other => {
            debug!(target: "capture", kind = other, "unrecognized recorder event");
            return None;
        }
    };

    let (selector, coerced) = coerce_selector(&raw.selector);
    let mut action = Action::new(action_type, selector);
    if action_type.needs_selector() {
        let bundle = generator.generate(&descriptor_of(&raw));
        action.metadata.confidence = Some(bundle.confidence);
        action.metadata.stability = Some(bundle.stability.as_str().to_string());
    }
    action.value = raw.value;
    action.url = if raw.url.is_empty() { None } else { Some(raw.url) };
    if let (Some(x), Some(y)) = (raw.x, raw.y) {
        action.coordinates = Some(Coordinates { x, y });
    }
    action.metadata.tag = if raw.tag.is_empty() { None } else { Some(raw.tag) };
    action.metadata.text = if raw.text.is_empty() { None } else { Some(raw.text) };
    action.metadata.timestamp = raw.ts.and_then(millis_to_utc).or_else(|| Some(Utc::now()));
    action.metadata.coerced_selector = coerced;
    Some(action)
}

/// Rebuild what the generator needs from the recorder's event payload.
fn descriptor_of(raw: &RawEvent) -> ElementDescriptor {
    let mut descriptor = ElementDescriptor::with_tag(if raw.tag.is_empty() {
        "*"
    } else {
        raw.tag.as_str()
    });
    if !raw.id.is_empty() {
        descriptor.id = Some(raw.id.clone());
    }
    if !raw.name.is_empty() {
        descriptor
            .attributes
            .insert("name".to_string(), raw.name.clone());
    }
    descriptor.classes = raw
        .classes
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if !raw.text.is_empty() {
        descriptor.text = Some(raw.text.clone());
    }
    descriptor
}

/// Every persisted action carries a non-empty, syntactically valid
/// selector. Anything else collapses to the `"body"` fallback with the
/// coercion flagged in the metadata.
fn coerce_selector(raw: &str) -> (String, bool) {
    let trimmed = raw.trim();
    if trimmed.is_empty() || !selector_engine::validate::validate(trimmed) {
        ("body".to_string(), true)
    } else {
        (trimmed.to_string(), false)
    }
}

/// Final gate before the list is sealed. Drops steps that cannot be
/// replayed, with the reason logged.
fn validate_actions(raw: Vec<Action>) -> Vec<Action> {
    raw.into_iter()
        .filter(|action| {
            if action.selector.trim().is_empty() {
                warn!(target: "capture", id = %action.id, "dropping action with empty selector");
                return false;
            }
            if action.action_type == ActionType::Navigate && action.url.is_none() {
                warn!(target: "capture", id = %action.id, "dropping navigation without a url");
                return false;
            }
            if matches!(action.action_type, ActionType::Type | ActionType::Select)
                && action.value.is_none()
            {
                warn!(target: "capture", id = %action.id, "dropping value action without a value");
                return false;
            }
            true
        })
        .collect()
}

fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_string()))
        .unwrap_or_default()
}

fn millis_to_utc(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

fn session_metadata(value: Value) -> SessionMetadata {
    #[derive(Deserialize, Default)]
    #[serde(rename_all = "camelCase")]
    struct Raw {
        #[serde(default)]
        user_agent: Option<String>,
        #[serde(default)]
        width: Option<u32>,
        #[serde(default)]
        height: Option<u32>,
        #[serde(default)]
        title: Option<String>,
    }

    let raw: Raw = serde_json::from_value(value).unwrap_or_default();
    SessionMetadata {
        user_agent: raw.user_agent,
        viewport_width: raw.width,
        viewport_height: raw.height,
        page_title: raw.title,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use page_adapter::{StubDriver, StubOp};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn click_event(selector: &str) -> Value {
        json!({
            "type": "click",
            "selector": selector,
            "tag": "button",
            "text": "Save",
            "url": "https://app.example.com/form",
            "x": 10.0,
            "y": 20.0,
            "ts": 1_700_000_000_000i64
        })
    }

    #[test]
    fn selector_coercion_flags_the_fallback() {
        assert_eq!(coerce_selector("#save"), ("#save".to_string(), false));
        assert_eq!(coerce_selector("   "), ("body".to_string(), true));
        assert_eq!(coerce_selector("## broken"), ("body".to_string(), true));
    }

    #[test]
    fn validation_drops_unreplayable_steps() {
        let mut nav = Action::new(ActionType::Navigate, "body");
        nav.url = Some("https://app.example.com/".to_string());
        let bad_nav = Action::new(ActionType::Navigate, "body");
        let mut typed = Action::new(ActionType::Type, "#q");
        typed.value = Some("hello".to_string());
        let bad_typed = Action::new(ActionType::Type, "#q");
        let click = Action::new(ActionType::Click, "#save");

        let kept = validate_actions(vec![nav, bad_nav, typed, bad_typed, click]);
        assert_eq!(kept.len(), 3);
        assert!(kept.iter().all(|a| a.action_type != ActionType::Navigate || a.url.is_some()));
    }

    #[test]
    fn submit_events_are_not_duplicated_into_actions() {
        let raw = RawEvent {
            kind: "submit".to_string(),
            selector: "form".to_string(),
            tag: "form".to_string(),
            text: String::new(),
            id: String::new(),
            name: String::new(),
            classes: String::new(),
            url: String::new(),
            value: None,
            x: None,
            y: None,
            ts: None,
        };
        assert!(convert_event(&SelectorGenerator::default(), raw).is_none());
    }

    #[test]
    fn element_events_carry_selector_telemetry() {
        let raw = RawEvent {
            kind: "click".to_string(),
            selector: "#save".to_string(),
            tag: "button".to_string(),
            text: "Save".to_string(),
            id: "save".to_string(),
            name: String::new(),
            classes: "btn btn-primary".to_string(),
            url: "https://app.example.com/".to_string(),
            value: None,
            x: Some(10.0),
            y: Some(20.0),
            ts: None,
        };
        let action = convert_event(&SelectorGenerator::default(), raw).unwrap();
        assert_eq!(action.metadata.stability.as_deref(), Some("high"));
        assert!(action.metadata.confidence.unwrap_or(0.0) > 0.3);

        let scroll = RawEvent {
            kind: "scroll".to_string(),
            selector: "body".to_string(),
            tag: "body".to_string(),
            text: String::new(),
            id: String::new(),
            name: String::new(),
            classes: String::new(),
            url: String::new(),
            value: None,
            x: Some(0.0),
            y: Some(300.0),
            ts: None,
        };
        let action = convert_event(&SelectorGenerator::default(), scroll).unwrap();
        assert!(action.metadata.confidence.is_none());
        assert!(action.metadata.stability.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn capture_drains_polls_into_actions() {
        let driver = Arc::new(StubDriver::new());
        driver.set_url("https://app.example.com/form");
        driver.queue_eval(
            "navigator.userAgent",
            json!({ "userAgent": "StubBrowser/1.0", "width": 1280, "height": 800, "title": "Form" }),
        );
        driver.queue_eval(
            "__wrDrain ?",
            json!([
                click_event("#save"),
                {
                    "type": "change",
                    "selector": "select[name=\"country\"]",
                    "tag": "select",
                    "value": "NZ",
                    "url": "https://app.example.com/form",
                    "ts": 1_700_000_000_500i64
                },
                {
                    "type": "change",
                    "selector": "",
                    "tag": "input",
                    "value": "alice",
                    "url": "https://app.example.com/form",
                    "ts": 1_700_000_001_000i64
                }
            ]),
        );

        let manager = CaptureManager::new(CaptureOptions::default());
        manager
            .start_capture(driver.clone(), WorkflowId::new(), "https://app.example.com/form")
            .await
            .unwrap();
        assert_eq!(manager.state(), CaptureState::Recording);

        tokio::time::sleep(Duration::from_millis(1600)).await;
        let actions = manager.stop_capture().await.unwrap();

        // Initial navigation plus the three drained events.
        assert_eq!(actions.len(), 4);
        assert_eq!(actions[0].action_type, ActionType::Navigate);
        assert_eq!(actions[0].url.as_deref(), Some("https://app.example.com/form"));
        assert_eq!(actions[1].action_type, ActionType::Click);
        assert_eq!(actions[1].selector, "#save");
        assert_eq!(
            actions[1].coordinates,
            Some(Coordinates { x: 10.0, y: 20.0 })
        );
        assert_eq!(actions[2].action_type, ActionType::Select);
        assert_eq!(actions[2].value.as_deref(), Some("NZ"));
        assert_eq!(actions[3].action_type, ActionType::Type);
        assert_eq!(actions[3].selector, "body");
        assert!(actions[3].metadata.coerced_selector);

        // Recorder was armed for future documents and the current one,
        // and stopping detached the in-page buffer.
        assert_eq!(driver.init_script_count(), 1);
        assert!(driver
            .ops()
            .iter()
            .any(|op| matches!(op, StubOp::Evaluate(s) if s.contains("delete window.__wrDrain"))));

        let session = manager.session().unwrap();
        assert!(session.ended_at.is_some());
        assert_eq!(session.actions.len(), actions.len());
        assert!(session.ended_at.unwrap() >= session.started_at);
        assert_eq!(session.metadata.user_agent.as_deref(), Some("StubBrowser/1.0"));
        assert_eq!(session.metadata.viewport_width, Some(1280));
        assert_eq!(session.metadata.page_title.as_deref(), Some("Form"));
    }

    #[tokio::test(start_paused = true)]
    async fn enter_submitted_form_keeps_its_key_press() {
        let driver = Arc::new(StubDriver::new());
        driver.set_url("https://app.example.com/login");
        driver.queue_eval(
            "__wrDrain ?",
            json!([
                {
                    "type": "change",
                    "selector": "input[name=\"q\"]",
                    "tag": "input",
                    "value": "hello",
                    "url": "https://app.example.com/login",
                    "ts": 1_700_000_000_000i64
                },
                {
                    "type": "keydown",
                    "selector": "input[name=\"q\"]",
                    "tag": "input",
                    "value": "Enter",
                    "url": "https://app.example.com/login",
                    "ts": 1_700_000_000_100i64
                },
                {
                    "type": "submit",
                    "selector": "form",
                    "tag": "form",
                    "url": "https://app.example.com/login",
                    "ts": 1_700_000_000_100i64
                }
            ]),
        );

        let manager = CaptureManager::new(CaptureOptions::default());
        manager
            .start_capture(driver, WorkflowId::new(), "https://app.example.com/login")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1600)).await;
        let actions = manager.stop_capture().await.unwrap();

        // Navigate, type, then the Enter press that submits the form.
        // The form's own submit event adds nothing on top of the key.
        assert_eq!(actions.len(), 3);
        assert_eq!(actions[1].action_type, ActionType::Type);
        assert_eq!(actions[2].action_type, ActionType::KeyPress);
        assert_eq!(actions[2].selector, "input[name=\"q\"]");
        assert_eq!(actions[2].value.as_deref(), Some("Enter"));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_capture_is_idempotent() {
        let driver = Arc::new(StubDriver::new());
        driver.set_url("https://app.example.com/");
        driver.queue_eval("__wrDrain ?", json!([click_event("#one")]));

        let manager = CaptureManager::new(CaptureOptions::default());
        manager
            .start_capture(driver, WorkflowId::new(), "https://app.example.com/")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let first = manager.stop_capture().await.unwrap();
        let second = manager.stop_capture().await.unwrap();
        assert_eq!(first.len(), second.len());
        let first_ids: Vec<_> = first.iter().map(|a| a.id.to_string()).collect();
        let second_ids: Vec<_> = second.iter().map(|a| a.id.to_string()).collect();
        assert_eq!(first_ids, second_ids);
        assert_eq!(manager.state(), CaptureState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_without_start_is_an_error() {
        let manager = CaptureManager::new(CaptureOptions::default());
        let err = manager.stop_capture().await.unwrap_err();
        assert!(matches!(err, CaptureError::NotRecording));
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_scope_navigation_pauses_and_resumes() {
        let driver = Arc::new(StubDriver::new());
        driver.set_url("https://app.example.com/");

        let manager = CaptureManager::new(CaptureOptions::default());
        let paused = Arc::new(AtomicBool::new(false));
        let resumed = Arc::new(AtomicBool::new(false));
        let paused_flag = paused.clone();
        let resumed_flag = resumed.clone();
        manager.set_on_recording_paused(Box::new(move |reason| {
            assert!(reason.contains("evil.example.net"));
            paused_flag.store(true, Ordering::SeqCst);
        }));
        manager.set_on_recording_resumed(Box::new(move || {
            resumed_flag.store(true, Ordering::SeqCst);
        }));

        manager
            .start_capture(driver.clone(), WorkflowId::new(), "https://app.example.com/")
            .await
            .unwrap();

        driver.emit_navigation("https://evil.example.net/tracker");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(manager.is_recording_paused());
        assert!(paused.load(Ordering::SeqCst));

        driver.emit_navigation("https://app.example.com/back");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!manager.is_recording_paused());
        assert!(resumed.load(Ordering::SeqCst));

        let actions = manager.stop_capture().await.unwrap();
        let nav_urls: Vec<_> = actions
            .iter()
            .filter(|a| a.action_type == ActionType::Navigate)
            .filter_map(|a| a.url.as_deref())
            .collect();
        assert_eq!(
            nav_urls,
            vec!["https://app.example.com/", "https://app.example.com/back"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn screenshots_are_rate_limited() {
        let driver = Arc::new(StubDriver::new());
        driver.set_url("https://app.example.com/");
        // Two batches drained 1.5s apart, but only one screenshot fits
        // inside the floor.
        driver.queue_eval("__wrDrain ?", json!([click_event("#one")]));
        driver.queue_eval("__wrDrain ?", json!([click_event("#two")]));

        let options = CaptureOptions {
            include_screenshots: true,
            ..CaptureOptions::default()
        };
        let manager = CaptureManager::new(options);
        manager
            .start_capture(driver, WorkflowId::new(), "https://app.example.com/")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(3200)).await;

        let actions = manager.stop_capture().await.unwrap();
        let shots = actions
            .iter()
            .filter(|a| a.action_type == ActionType::Screenshot)
            .count();
        assert_eq!(shots, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_is_idempotent_and_survives_a_closed_page() {
        let driver = Arc::new(StubDriver::new());
        driver.set_url("https://app.example.com/");

        let manager = CaptureManager::new(CaptureOptions::default());
        manager
            .start_capture(driver.clone(), WorkflowId::new(), "https://app.example.com/")
            .await
            .unwrap();

        driver.mark_closed();
        manager.cleanup().await;
        manager.cleanup().await;
        assert_eq!(manager.state(), CaptureState::Stopped);
    }
}
