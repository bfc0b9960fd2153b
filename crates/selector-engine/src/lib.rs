//! Multi-strategy element selector synthesis.
//!
//! Given a description of one DOM element the engine emits candidate
//! selectors from several families (id, data attributes, semantic
//! attributes, role, classes, text, position, hierarchy), validates them,
//! and ranks a primary by a fixed priority table so a structurally fragile
//! candidate never outranks a stable one. With a live page handle it also
//! buckets how many elements the primary matches.

use thiserror::Error;

pub mod generator;
pub mod strategies;
pub mod types;
pub mod validate;

pub use generator::{SelectorGenerator, SelectorOptions};
pub use types::{
    AncestorStep, Candidate, CandidateSource, ElementDescriptor, SelectorBundle, Stability,
    Uniqueness,
};

#[derive(Debug, Error)]
pub enum SelectorError {
    #[error("page driver failure: {0}")]
    Driver(#[from] page_adapter::DriverError),
}

impl SelectorError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SelectorError::Driver(e) => e.is_retryable(),
        }
    }
}
