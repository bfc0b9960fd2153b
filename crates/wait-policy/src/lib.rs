//! Explicit wait strategies.
//!
//! Every operation polls the page through a [`PageDriver`] and returns a
//! uniform [`WaitOutcome`] instead of raising: callers inspect the result.
//! All loops observe a cancellation token so a manager's `cleanup()` can
//! preempt an in-flight wait.

use std::future::Future;
use std::time::Duration;

use page_adapter::{DriverError, PageDriver};
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Interval between the two bounding-box samples of a stability check.
const STABLE_RECHECK: Duration = Duration::from_millis(100);

#[derive(Clone, Debug)]
pub struct WaitConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub visible: bool,
    pub hidden: bool,
    pub stable: bool,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            visible: true,
            hidden: false,
            stable: false,
        }
    }
}

/// Uniform result of any wait. `success == false` with an error message
/// covers both timeouts and page failures.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WaitOutcome {
    pub success: bool,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WaitOutcome {
    fn ok(duration: Duration) -> Self {
        Self {
            success: true,
            duration,
            error: None,
        }
    }

    fn failed(duration: Duration, error: impl Into<String>) -> Self {
        Self {
            success: false,
            duration,
            error: Some(error.into()),
        }
    }
}

mod duration_ms {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// A heterogeneous condition for [`WaitPolicy::wait_for_multiple`].
#[derive(Clone, Debug)]
pub enum WaitCondition {
    Visible(String),
    Hidden(String),
    Clickable(String),
    Stable(String),
    NetworkIdle,
    /// A JS expression polled until it evaluates to `true`.
    Script(String),
}

#[derive(Clone, Debug, Default)]
pub struct WaitPolicy {
    config: WaitConfig,
    cancel: CancellationToken,
}

impl WaitPolicy {
    pub fn new(config: WaitConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(config: WaitConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    pub fn config(&self) -> &WaitConfig {
        &self.config
    }

    pub async fn wait_for_visible(&self, driver: &dyn PageDriver, selector: &str) -> WaitOutcome {
        self.poll(driver, selector, "visible", |state| {
            matches!(state, Some(s) if s.visible)
        })
        .await
    }

    pub async fn wait_for_hidden(&self, driver: &dyn PageDriver, selector: &str) -> WaitOutcome {
        self.poll(driver, selector, "hidden", |state| {
            !matches!(state, Some(s) if s.visible)
        })
        .await
    }

    pub async fn wait_for_clickable(&self, driver: &dyn PageDriver, selector: &str) -> WaitOutcome {
        self.poll(driver, selector, "clickable", |state| {
            matches!(state, Some(s) if s.is_clickable())
        })
        .await
    }

    /// Visible with an unchanged bounding box across a fixed 100ms
    /// re-check.
    pub async fn wait_for_stable(&self, driver: &dyn PageDriver, selector: &str) -> WaitOutcome {
        let started = Instant::now();
        loop {
            if self.cancel.is_cancelled() {
                return WaitOutcome::failed(started.elapsed(), "wait cancelled");
            }
            match driver.element_state(selector).await {
                Ok(Some(state)) if state.visible => {
                    if let Some(first) = state.bbox {
                        sleep(STABLE_RECHECK).await;
                        match driver.element_state(selector).await {
                            Ok(Some(second)) if second.bbox == Some(first) && second.visible => {
                                return WaitOutcome::ok(started.elapsed());
                            }
                            Ok(_) => {}
                            Err(e) => return self.driver_failure(started, e),
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => return self.driver_failure(started, e),
            }
            if started.elapsed() >= self.config.timeout {
                return WaitOutcome::failed(
                    started.elapsed(),
                    format!("timed out waiting for {selector:?} to become stable"),
                );
            }
            sleep(self.config.poll_interval).await;
        }
    }

    /// Delegates to the page's load-state signal.
    pub async fn wait_for_network_idle(&self, driver: &dyn PageDriver) -> WaitOutcome {
        let started = Instant::now();
        tokio::select! {
            _ = self.cancel.cancelled() => {
                WaitOutcome::failed(started.elapsed(), "wait cancelled")
            }
            result = driver.wait_for_load(self.config.timeout) => match result {
                Ok(()) => WaitOutcome::ok(started.elapsed()),
                Err(e) => WaitOutcome::failed(started.elapsed(), e.to_string()),
            }
        }
    }

    /// Poll an arbitrary predicate until it reports true.
    pub async fn wait_for_custom<F, Fut>(&self, mut predicate: F) -> WaitOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let started = Instant::now();
        loop {
            if self.cancel.is_cancelled() {
                return WaitOutcome::failed(started.elapsed(), "wait cancelled");
            }
            if predicate().await {
                return WaitOutcome::ok(started.elapsed());
            }
            if started.elapsed() >= self.config.timeout {
                return WaitOutcome::failed(started.elapsed(), "timed out waiting for predicate");
            }
            sleep(self.config.poll_interval).await;
        }
    }

    /// Run every condition in order and report one outcome per condition;
    /// a failure never short-circuits the rest.
    pub async fn wait_for_multiple(
        &self,
        driver: &dyn PageDriver,
        conditions: &[WaitCondition],
    ) -> Vec<WaitOutcome> {
        let mut outcomes = Vec::with_capacity(conditions.len());
        for condition in conditions {
            let outcome = match condition {
                WaitCondition::Visible(sel) => self.wait_for_visible(driver, sel).await,
                WaitCondition::Hidden(sel) => self.wait_for_hidden(driver, sel).await,
                WaitCondition::Clickable(sel) => self.wait_for_clickable(driver, sel).await,
                WaitCondition::Stable(sel) => self.wait_for_stable(driver, sel).await,
                WaitCondition::NetworkIdle => self.wait_for_network_idle(driver).await,
                WaitCondition::Script(expr) => {
                    let expr = expr.as_str();
                    self.wait_for_custom(move || async move {
                        driver
                            .evaluate(expr)
                            .await
                            .ok()
                            .and_then(|v| v.as_bool())
                            .unwrap_or(false)
                    })
                    .await
                }
            };
            debug!(
                target: "wait-policy",
                ?condition,
                success = outcome.success,
                "condition evaluated"
            );
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Apply the configured flags to one selector: `hidden` waits for
    /// disappearance, otherwise visibility, then stability when requested.
    pub async fn wait_for_element(&self, driver: &dyn PageDriver, selector: &str) -> WaitOutcome {
        if self.config.hidden {
            return self.wait_for_hidden(driver, selector).await;
        }
        let outcome = self.wait_for_visible(driver, selector).await;
        if !outcome.success || !self.config.stable {
            return outcome;
        }
        self.wait_for_stable(driver, selector).await
    }

    async fn poll<F>(
        &self,
        driver: &dyn PageDriver,
        selector: &str,
        label: &str,
        mut ready: F,
    ) -> WaitOutcome
    where
        F: FnMut(Option<&page_adapter::ElementState>) -> bool,
    {
        let started = Instant::now();
        loop {
            if self.cancel.is_cancelled() {
                return WaitOutcome::failed(started.elapsed(), "wait cancelled");
            }
            match driver.element_state(selector).await {
                Ok(state) => {
                    if ready(state.as_ref()) {
                        return WaitOutcome::ok(started.elapsed());
                    }
                }
                Err(e) => return self.driver_failure(started, e),
            }
            if started.elapsed() >= self.config.timeout {
                return WaitOutcome::failed(
                    started.elapsed(),
                    format!("timed out waiting for {selector:?} to become {label}"),
                );
            }
            sleep(self.config.poll_interval).await;
        }
    }

    fn driver_failure(&self, started: Instant, error: DriverError) -> WaitOutcome {
        WaitOutcome::failed(started.elapsed(), error.to_string())
    }
}
