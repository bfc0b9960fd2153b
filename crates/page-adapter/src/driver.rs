//! The `PageDriver` seam: everything the session managers need from a live
//! page, expressed selector-first so no caller ever holds a raw element
//! handle across a navigation.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors surfaced by a page driver.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("navigation timed out after {0:?}")]
    NavTimeout(Duration),
    #[error("page closed")]
    PageClosed,
    #[error("no element matches selector {0:?}")]
    ElementNotFound(String),
    #[error("script evaluation failed: {0}")]
    ScriptFailed(String),
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("devtools i/o failure: {0}")]
    CdpIo(String),
    #[error("internal driver error: {0}")]
    Internal(String),
}

impl DriverError {
    /// Classify a raw transport error message. Page-teardown phrasings map
    /// to `PageClosed` so polling loops can treat them as a stop signal.
    pub fn from_transport(err: impl std::fmt::Display) -> Self {
        let message = err.to_string();
        let lower = message.to_ascii_lowercase();
        if lower.contains("context was destroyed")
            || lower.contains("context destroyed")
            || lower.contains("target closed")
            || lower.contains("session closed")
            || lower.contains("browser closed")
            || lower.contains("connection closed")
        {
            DriverError::PageClosed
        } else if lower.contains("timeout") || lower.contains("timed out") {
            DriverError::NavTimeout(Duration::ZERO)
        } else {
            DriverError::CdpIo(message)
        }
    }

    pub fn is_page_closed(&self) -> bool {
        matches!(self, DriverError::PageClosed)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DriverError::ElementNotFound(_) | DriverError::NavTimeout(_) | DriverError::CdpIo(_)
        )
    }
}

/// Bounding box of an element in CSS pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Snapshot of one element's interactable state, produced by an in-page
/// probe. Field names follow the JS object the probe builds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementState {
    pub visible: bool,
    pub enabled: bool,
    pub pointer_events: bool,
    pub tag: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub bbox: Option<Rect>,
}

impl ElementState {
    pub fn is_clickable(&self) -> bool {
        self.visible && self.enabled && self.pointer_events
    }
}

/// Main-frame navigation observed on the wire.
#[derive(Clone, Debug)]
pub struct NavigationNotice {
    pub url: String,
    pub ts_ms: u64,
}

/// Cookie shape exchanged with the session cache.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CookieRecord {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secure: Option<bool>,
}

/// Capability surface the capture/replay managers, login flow and wait
/// policy are written against. One driver instance controls exactly one
/// page; all operations are logically serialized through it.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn navigate(&self, url: &str, deadline: Duration) -> Result<(), DriverError>;

    async fn current_url(&self) -> Result<String, DriverError>;

    async fn page_content(&self) -> Result<String, DriverError>;

    /// Evaluate a script in the page and return its JSON value.
    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value, DriverError>;

    /// Number of elements the selector matches right now. Accepts CSS
    /// selectors and, when the string starts with `/` or `(`, XPath.
    async fn query_count(&self, selector: &str) -> Result<usize, DriverError>;

    /// `None` when the selector matches nothing.
    async fn element_state(&self, selector: &str) -> Result<Option<ElementState>, DriverError>;

    async fn click(&self, selector: &str) -> Result<(), DriverError>;

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), DriverError>;

    async fn press_key(&self, selector: &str, key: &str) -> Result<(), DriverError>;

    async fn select_option(&self, selector: &str, value: &str) -> Result<(), DriverError>;

    async fn scroll_to(&self, x: f64, y: f64) -> Result<(), DriverError>;

    /// Block until the document reports a complete load state or the
    /// timeout elapses.
    async fn wait_for_load(&self, timeout: Duration) -> Result<(), DriverError>;

    async fn screenshot_png(&self) -> Result<Vec<u8>, DriverError>;

    /// Register a script evaluated on every new document, so in-page
    /// listeners survive navigations.
    async fn add_init_script(&self, script: &str) -> Result<(), DriverError>;

    async fn cookies(&self) -> Result<Vec<CookieRecord>, DriverError>;

    async fn set_cookies(&self, cookies: &[CookieRecord]) -> Result<(), DriverError>;

    fn subscribe_navigations(&self) -> broadcast::Receiver<NavigationNotice>;

    async fn close(&self) -> Result<(), DriverError>;

    fn is_closed(&self) -> bool;
}

/// True for strings this driver family routes through `document.evaluate`
/// instead of `querySelectorAll`.
pub fn is_xpath(selector: &str) -> bool {
    selector.starts_with('/') || selector.starts_with('(')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_classification_maps_teardown_phrases() {
        let err = DriverError::from_transport("Execution context was destroyed");
        assert!(err.is_page_closed());
        let err = DriverError::from_transport("Target closed before response");
        assert!(err.is_page_closed());
        let err = DriverError::from_transport("ws handshake refused");
        assert!(matches!(err, DriverError::CdpIo(_)));
    }

    #[test]
    fn element_not_found_is_retryable_but_page_closed_is_not() {
        assert!(DriverError::ElementNotFound("#x".into()).is_retryable());
        assert!(!DriverError::PageClosed.is_retryable());
    }

    #[test]
    fn xpath_detection() {
        assert!(is_xpath("//button[@id='go']"));
        assert!(is_xpath("(//input)[2]"));
        assert!(!is_xpath("#go"));
        assert!(!is_xpath("button.primary"));
    }

    #[test]
    fn element_state_clickable_needs_all_three_gates() {
        let mut state = ElementState {
            visible: true,
            enabled: true,
            pointer_events: true,
            tag: "button".into(),
            value: None,
            bbox: None,
        };
        assert!(state.is_clickable());
        state.pointer_events = false;
        assert!(!state.is_clickable());
    }
}
