//! Shared primitives for the WebReplay capture/replay engine: opaque ids,
//! the `Action` model exchanged with the collaborator layer, and the config
//! objects that the collaborator supplies when starting a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ActionId(pub String);

impl ActionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

macro_rules! display_as_inner {
    ($($id:ident),+) => {$(
        impl std::fmt::Display for $id {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    )+};
}

display_as_inner!(SessionId, ActionId, WorkflowId);

/// Every interaction kind a capture session can record or a replay session
/// can execute.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionType {
    Click,
    Type,
    Select,
    Navigate,
    Scroll,
    Wait,
    Hover,
    DoubleClick,
    RightClick,
    DragDrop,
    KeyPress,
    Screenshot,
    Custom,
}

impl ActionType {
    /// Actions that act on a concrete element and therefore need a
    /// meaningful selector. Navigation and scrolling address the page.
    pub fn needs_selector(&self) -> bool {
        !matches!(
            self,
            ActionType::Navigate | ActionType::Scroll | ActionType::Wait | ActionType::Screenshot
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: f64,
    pub y: f64,
}

/// Free-form quality telemetry attached to each captured action.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ActionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stability: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    /// True when the original selector was missing or malformed and the
    /// drain pass substituted the `"body"` fallback.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub coerced_selector: bool,
}

/// One captured or replayable interaction step.
///
/// Invariant: `selector` is a non-empty string by the time the action is
/// persisted. Capture coerces missing selectors to `"body"` instead of
/// dropping the action.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub selector: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(default)]
    pub metadata: ActionMetadata,
}

impl Action {
    pub fn new(action_type: ActionType, selector: impl Into<String>) -> Self {
        Self {
            id: ActionId::new(),
            action_type,
            selector: selector.into(),
            value: None,
            url: None,
            coordinates: None,
            timeout_ms: None,
            retry_count: None,
            metadata: ActionMetadata::default(),
        }
    }
}

/// Which selector candidate families the generator may emit.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectorStrategyKind {
    Css,
    XPath,
    Text,
    #[default]
    Hybrid,
}

/// Credentials handed over by the collaborator when a session requires
/// authentication. The password never appears in logs.
#[derive(Clone, Serialize, Deserialize)]
pub struct LoginConfig {
    pub username: String,
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
}

impl std::fmt::Debug for LoginConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("url", &self.url)
            .field("tenant", &self.tenant)
            .finish()
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DomainScopeConfig {
    pub base_domain: String,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    /// Overrides the built-in SSO provider patterns when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sso_providers: Option<Vec<String>>,
}

fn default_capture_frequency_ms() -> u64 {
    1500
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// Options recognized by `start_capture`, supplied by the collaborator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaptureOptions {
    #[serde(default)]
    pub include_screenshots: bool,
    #[serde(default = "default_capture_frequency_ms")]
    pub capture_frequency_ms: u64,
    #[serde(default)]
    pub selector_strategy: SelectorStrategyKind,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default)]
    pub requires_login: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<LoginConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_scope: Option<DomainScopeConfig>,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            include_screenshots: false,
            capture_frequency_ms: default_capture_frequency_ms(),
            selector_strategy: SelectorStrategyKind::default(),
            timeout_ms: default_timeout_ms(),
            retry_attempts: default_retry_attempts(),
            requires_login: false,
            login: None,
            domain_scope: None,
        }
    }
}

/// Options recognized by `start_replay`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplayOptions {
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default)]
    pub screenshot_on_error: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub requires_login: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<LoginConfig>,
}

impl Default for ReplayOptions {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            screenshot_on_error: false,
            timeout_ms: default_timeout_ms(),
            requires_login: false,
            login: None,
        }
    }
}

/// Outcome of replaying a single action, reported in execution order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReplayResult {
    pub action_id: ActionId,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Base64 PNG captured when screenshot-on-error is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_type_serializes_kebab_case() {
        let json = serde_json::to_string(&ActionType::DoubleClick).unwrap();
        assert_eq!(json, "\"double-click\"");
        let back: ActionType = serde_json::from_str("\"drag-drop\"").unwrap();
        assert_eq!(back, ActionType::DragDrop);
    }

    #[test]
    fn navigation_actions_do_not_need_selectors() {
        assert!(ActionType::Click.needs_selector());
        assert!(ActionType::Type.needs_selector());
        assert!(!ActionType::Navigate.needs_selector());
        assert!(!ActionType::Scroll.needs_selector());
    }

    #[test]
    fn login_config_debug_redacts_password() {
        let config = LoginConfig {
            username: "alice@example.com".into(),
            password: "hunter2".into(),
            url: None,
            tenant: None,
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("alice@example.com"));
    }

    #[test]
    fn capture_options_fill_defaults_from_partial_json() {
        let options: CaptureOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.capture_frequency_ms, 1500);
        assert_eq!(options.retry_attempts, 3);
        assert_eq!(options.selector_strategy, SelectorStrategyKind::Hybrid);
        assert!(!options.include_screenshots);
    }

    #[test]
    fn action_round_trips_through_json() {
        let mut action = Action::new(ActionType::Type, "#email");
        action.value = Some("alice@example.com".into());
        action.metadata.tag = Some("input".into());
        let json = serde_json::to_string(&action).unwrap();
        let back: Action = serde_json::from_str(&json).unwrap();
        assert_eq!(back.selector, "#email");
        assert_eq!(back.action_type, ActionType::Type);
        assert_eq!(back.value.as_deref(), Some("alice@example.com"));
        assert!(!back.metadata.coerced_selector);
    }
}
