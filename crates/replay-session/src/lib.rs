//! Action replay.
//!
//! [`ReplayManager`] executes a captured action list step by step. Each
//! step gets its own [`webreplay_core_types::ReplayResult`] and a failed
//! step never aborts the run; the sealed summary reports the overall
//! success rate.

pub mod manager;

pub use manager::{ReplayManager, ReplaySummary};

use page_adapter::DriverError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplayError {
    /// A step was executed before `start_replay` bound a page. This is
    /// a bug in the caller, not a runtime condition.
    #[error("replay has not been started")]
    NotInitialized,

    #[error(transparent)]
    Driver(#[from] DriverError),
}
