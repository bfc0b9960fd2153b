//! Chromium-backed [`PageDriver`] over the DevTools protocol.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, TimeSinceEpoch};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat, EventFrameNavigated,
};
use chromiumoxide::element::Element;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::{broadcast, Mutex};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::driver::{
    is_xpath, CookieRecord, DriverError, ElementState, NavigationNotice, PageDriver,
};
use crate::DriverConfig;

const NAV_BUS_CAPACITY: usize = 256;
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(30);
const LOAD_POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct ChromiumDriver {
    page: Page,
    browser: Mutex<Option<Browser>>,
    nav_tx: broadcast::Sender<NavigationNotice>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    nav_deadline: Duration,
}

impl ChromiumDriver {
    /// Launch a browser, attach to its default page and start forwarding
    /// main-frame navigations onto the internal bus.
    pub async fn launch(cfg: DriverConfig) -> Result<Self, DriverError> {
        let mut builder = BrowserConfig::builder()
            .window_size(cfg.window_width, cfg.window_height)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-extensions")
            .arg("--disable-popup-blocking");

        if !cfg.headless {
            builder = builder.with_head();
        }
        if let Some(ref exe) = cfg.executable {
            builder = builder.chrome_executable(exe);
        }
        if let Some(ref dir) = cfg.user_data_dir {
            builder = builder.user_data_dir(dir);
        }

        let browser_cfg = builder.build().map_err(DriverError::Launch)?;

        let (browser, mut handler) = timeout(LAUNCH_TIMEOUT, Browser::launch(browser_cfg))
            .await
            .map_err(|_| DriverError::Launch("browser launch timed out".into()))?
            .map_err(|e| DriverError::Launch(e.to_string()))?;

        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    trace!(target: "page-adapter", "browser handler ended: {:?}", event);
                    break;
                }
            }
        });

        // Give the default target a moment to attach.
        sleep(Duration::from_millis(100)).await;

        let page = match browser
            .pages()
            .await
            .map_err(DriverError::from_transport)?
            .into_iter()
            .next()
        {
            Some(page) => page,
            None => browser
                .new_page("about:blank")
                .await
                .map_err(DriverError::from_transport)?,
        };

        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(cfg.window_width as i64)
            .height(cfg.window_height as i64)
            .device_scale_factor(1.0)
            .mobile(false)
            .build()
            .map_err(DriverError::Launch)?;
        page.execute(metrics)
            .await
            .map_err(DriverError::from_transport)?;

        let (nav_tx, _) = broadcast::channel(NAV_BUS_CAPACITY);
        let shutdown = CancellationToken::new();

        let mut frame_events = page
            .event_listener::<EventFrameNavigated>()
            .await
            .map_err(DriverError::from_transport)?;
        let forward_tx = nav_tx.clone();
        let forward_cancel = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = forward_cancel.cancelled() => break,
                    event = frame_events.next() => {
                        let Some(event) = event else { break };
                        if event.frame.parent_id.is_none() {
                            let notice = NavigationNotice {
                                url: event.frame.url.clone(),
                                ts_ms: now_ms(),
                            };
                            debug!(target: "page-adapter", url = %notice.url, "main frame navigated");
                            let _ = forward_tx.send(notice);
                        }
                    }
                }
            }
        });

        Ok(Self {
            page,
            browser: Mutex::new(Some(browser)),
            nav_tx,
            closed: AtomicBool::new(false),
            shutdown,
            nav_deadline: Duration::from_millis(cfg.nav_deadline_ms),
        })
    }

    pub fn nav_deadline(&self) -> Duration {
        self.nav_deadline
    }

    fn ensure_open(&self) -> Result<(), DriverError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(DriverError::PageClosed)
        } else {
            Ok(())
        }
    }

    /// Resolve a selector to an element handle, routing XPath selectors
    /// through the XPath lookup so both shapes work on every verb.
    async fn resolve_element(&self, selector: &str) -> Result<Element, DriverError> {
        let lookup = if is_xpath(selector) {
            self.page.find_xpath(selector).await
        } else {
            self.page.find_element(selector).await
        };
        lookup.map_err(|e| match DriverError::from_transport(e) {
            DriverError::PageClosed => DriverError::PageClosed,
            _ => DriverError::ElementNotFound(selector.to_string()),
        })
    }

    async fn eval_value(&self, expression: String) -> Result<serde_json::Value, DriverError> {
        let result = self
            .page
            .evaluate(expression)
            .await
            .map_err(DriverError::from_transport)?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Render a Rust string as a JS string literal.
fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

fn count_script(selector: &str) -> String {
    if is_xpath(selector) {
        format!(
            "document.evaluate({sel}, document, null, \
             XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null).snapshotLength",
            sel = js_string(selector)
        )
    } else {
        format!(
            "document.querySelectorAll({sel}).length",
            sel = js_string(selector)
        )
    }
}

/// JS expression resolving the selector to a single node, for selectors
/// of either shape.
fn lookup_script(selector: &str) -> String {
    if is_xpath(selector) {
        format!(
            "document.evaluate({sel}, document, null, \
             XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue",
            sel = js_string(selector)
        )
    } else {
        format!("document.querySelector({sel})", sel = js_string(selector))
    }
}

fn state_script(selector: &str) -> String {
    let lookup = lookup_script(selector);
    format!(
        r#"(() => {{
            const el = {lookup};
            if (!el) return null;
            const style = window.getComputedStyle(el);
            const rect = el.getBoundingClientRect();
            const visible = !!(el.offsetWidth || el.offsetHeight || el.getClientRects().length)
                && style.visibility !== 'hidden' && style.display !== 'none';
            return {{
                visible,
                enabled: !el.disabled,
                pointerEvents: style.pointerEvents !== 'none',
                tag: el.tagName.toLowerCase(),
                value: 'value' in el ? String(el.value) : null,
                bbox: {{ x: rect.x, y: rect.y, width: rect.width, height: rect.height }}
            }};
        }})()"#
    )
}

#[async_trait]
impl PageDriver for ChromiumDriver {
    async fn navigate(&self, url: &str, deadline: Duration) -> Result<(), DriverError> {
        self.ensure_open()?;
        match timeout(deadline, self.page.goto(url)).await {
            Err(_) => Err(DriverError::NavTimeout(deadline)),
            Ok(Err(e)) => Err(DriverError::from_transport(e)),
            Ok(Ok(_)) => Ok(()),
        }
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        self.ensure_open()?;
        self.page
            .url()
            .await
            .map_err(DriverError::from_transport)?
            .ok_or_else(|| DriverError::Internal("page reported no url".into()))
    }

    async fn page_content(&self) -> Result<String, DriverError> {
        self.ensure_open()?;
        self.page
            .content()
            .await
            .map_err(DriverError::from_transport)
    }

    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value, DriverError> {
        self.ensure_open()?;
        self.eval_value(expression.to_string()).await
    }

    async fn query_count(&self, selector: &str) -> Result<usize, DriverError> {
        self.ensure_open()?;
        let value = self.eval_value(count_script(selector)).await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    async fn element_state(&self, selector: &str) -> Result<Option<ElementState>, DriverError> {
        self.ensure_open()?;
        let value = self.eval_value(state_script(selector)).await?;
        if value.is_null() {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| DriverError::ScriptFailed(format!("bad element state payload: {e}")))
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        self.ensure_open()?;
        let element = self.resolve_element(selector).await?;
        element.click().await.map_err(DriverError::from_transport)?;
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), DriverError> {
        self.ensure_open()?;
        let element = self.resolve_element(selector).await?;
        element.focus().await.map_err(DriverError::from_transport)?;
        element
            .type_str(text)
            .await
            .map_err(DriverError::from_transport)?;
        Ok(())
    }

    async fn press_key(&self, selector: &str, key: &str) -> Result<(), DriverError> {
        self.ensure_open()?;
        let element = self.resolve_element(selector).await?;
        element
            .press_key(key)
            .await
            .map_err(DriverError::from_transport)?;
        Ok(())
    }

    async fn select_option(&self, selector: &str, value: &str) -> Result<(), DriverError> {
        self.ensure_open()?;
        let script = format!(
            r#"(() => {{
                const el = {lookup};
                if (!el) return false;
                el.value = {val};
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }})()"#,
            lookup = lookup_script(selector),
            val = js_string(value),
        );
        let found = self.eval_value(script).await?;
        if found.as_bool().unwrap_or(false) {
            Ok(())
        } else {
            Err(DriverError::ElementNotFound(selector.to_string()))
        }
    }

    async fn scroll_to(&self, x: f64, y: f64) -> Result<(), DriverError> {
        self.ensure_open()?;
        self.eval_value(format!("window.scrollTo({x}, {y})")).await?;
        Ok(())
    }

    async fn wait_for_load(&self, deadline: Duration) -> Result<(), DriverError> {
        self.ensure_open()?;
        let started = tokio::time::Instant::now();
        loop {
            let state = self.eval_value("document.readyState".to_string()).await?;
            if state.as_str() == Some("complete") {
                return Ok(());
            }
            if started.elapsed() >= deadline {
                return Err(DriverError::NavTimeout(deadline));
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(DriverError::PageClosed),
                _ = sleep(LOAD_POLL_INTERVAL) => {}
            }
        }
    }

    async fn screenshot_png(&self) -> Result<Vec<u8>, DriverError> {
        self.ensure_open()?;
        self.page
            .screenshot(
                chromiumoxide::page::ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build(),
            )
            .await
            .map_err(DriverError::from_transport)
    }

    async fn add_init_script(&self, script: &str) -> Result<(), DriverError> {
        self.ensure_open()?;
        self.page
            .execute(AddScriptToEvaluateOnNewDocumentParams::new(
                script.to_string(),
            ))
            .await
            .map_err(DriverError::from_transport)?;
        Ok(())
    }

    async fn cookies(&self) -> Result<Vec<CookieRecord>, DriverError> {
        self.ensure_open()?;
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(DriverError::from_transport)?;
        Ok(cookies
            .into_iter()
            .map(|c| CookieRecord {
                name: c.name,
                value: c.value,
                domain: Some(c.domain),
                path: Some(c.path),
                expires: Some(c.expires),
                http_only: Some(c.http_only),
                secure: Some(c.secure),
            })
            .collect())
    }

    async fn set_cookies(&self, cookies: &[CookieRecord]) -> Result<(), DriverError> {
        self.ensure_open()?;
        let mut params = Vec::with_capacity(cookies.len());
        for record in cookies {
            let mut builder = CookieParam::builder()
                .name(record.name.clone())
                .value(record.value.clone());
            if let Some(ref domain) = record.domain {
                builder = builder.domain(domain.clone());
            }
            if let Some(ref path) = record.path {
                builder = builder.path(path.clone());
            }
            if let Some(expires) = record.expires {
                builder = builder.expires(TimeSinceEpoch::new(expires));
            }
            if let Some(http_only) = record.http_only {
                builder = builder.http_only(http_only);
            }
            if let Some(secure) = record.secure {
                builder = builder.secure(secure);
            }
            params.push(builder.build().map_err(DriverError::Internal)?);
        }
        self.page
            .set_cookies(params)
            .await
            .map_err(DriverError::from_transport)?;
        Ok(())
    }

    fn subscribe_navigations(&self) -> broadcast::Receiver<NavigationNotice> {
        self.nav_tx.subscribe()
    }

    async fn close(&self) -> Result<(), DriverError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shutdown.cancel();
        if let Err(e) = self.page.clone().close().await {
            warn!(target: "page-adapter", "page close failed: {e}");
        }
        if let Some(mut browser) = self.browser.lock().await.take() {
            if let Err(e) = browser.close().await {
                warn!(target: "page-adapter", "browser close failed: {e}");
            }
            let _ = browser.wait().await;
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_script_branches_on_selector_shape() {
        assert!(count_script("#login").contains("querySelectorAll"));
        assert!(count_script("//input[@type='password']").contains("document.evaluate"));
    }

    #[test]
    fn lookup_script_branches_on_selector_shape() {
        assert!(lookup_script("#login").contains("querySelector"));
        assert!(lookup_script("//input[@type='password']").contains("document.evaluate"));
        assert!(lookup_script("(//a)[1]").contains("document.evaluate"));
    }

    #[test]
    fn js_string_escapes_quotes() {
        assert_eq!(js_string(r#"a"b"#), r#""a\"b""#);
    }
}
