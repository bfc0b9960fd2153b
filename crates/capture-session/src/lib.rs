//! Interaction capture.
//!
//! [`CaptureManager`] injects a small recorder into the page, polls its
//! event buffer on a fixed cadence, and turns the drained events into
//! [`webreplay_core_types::Action`] steps. Navigations are checked
//! against a [`domain_scope::DomainScope`]; leaving the allowed scope
//! pauses recording until the page returns.

pub mod manager;
pub mod script;

pub use manager::{
    CaptureManager, CaptureSession, CaptureState, PausedCallback, ResumedCallback,
    SessionMetadata,
};

use page_adapter::DriverError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("a capture is already running")]
    AlreadyRecording,

    #[error("no capture has been started")]
    NotRecording,

    #[error(transparent)]
    Driver(#[from] DriverError),
}
