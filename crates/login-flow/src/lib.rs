//! Login detection and automated sign-in.
//!
//! [`LoginDetector`] probes a page for an authentication form in
//! escalating passes and classifies its shape. [`LoginAdapter`] drives
//! the detected form, verifies the outcome error-first, and caches the
//! resulting session state for later reuse.

pub mod adapter;
pub mod detector;
pub mod session;
pub mod tables;

pub use adapter::{apply_tenant, LoginAdapter};
pub use detector::{FormType, LoginDetector, LoginForm, SubmissionMethod, PROBE_DELAYS_MS};
pub use session::{LoginSession, SESSION_TTL_HOURS};

use page_adapter::DriverError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoginError {
    /// No recognizable login form after all probe passes.
    #[error("no login form found on the page")]
    FormNotFound,

    /// The provider rejected the attempt, or the outcome could not be
    /// confirmed as a success.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Popup-based OAuth flows are not automated.
    #[error("oauth popup flows are not supported")]
    OauthUnsupported,

    /// Login was requested without a URL to navigate to.
    #[error("login config has no url")]
    MissingUrl,

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl LoginError {
    pub fn is_retryable(&self) -> bool {
        match self {
            LoginError::Driver(e) => e.is_retryable(),
            LoginError::FormNotFound => true,
            _ => false,
        }
    }
}

/// Where the adapter currently is in the login lifecycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoginState {
    Idle,
    Detecting,
    Found,
    NotFound,
    Authenticating(FormType),
    Success,
    Failed,
}
