//! Input descriptors and output bundles for selector synthesis.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Attributes considered "data" attributes, probed in order.
pub const DATA_ATTRIBUTES: &[&str] = &[
    "data-testid",
    "data-test",
    "data-cy",
    "data-qa",
    "data-test-id",
];

/// One ancestor on the path from the document root to the element.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AncestorStep {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
}

/// Everything the generator knows about one element. Captured in-page and
/// shipped over as JSON, so every field is optional except the tag.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ElementDescriptor {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub classes: Vec<String>,
    /// `name`, `type`, `role`, `aria-label` and `data-*` attributes.
    /// BTreeMap keeps candidate emission deterministic.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nth_child: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nth_of_type: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ancestors: Vec<AncestorStep>,
}

impl ElementDescriptor {
    pub fn with_tag(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            ..Default::default()
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

/// Which family produced a candidate. Order doubles as the fixed primary
/// priority table: lower discriminant wins regardless of confidence sum.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    Id,
    DataAttr,
    SemanticAttr,
    Role,
    Class,
    Text,
    Positional,
    Hierarchy,
    TagFallback,
}

impl CandidateSource {
    pub fn priority(&self) -> u8 {
        *self as u8
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Candidate {
    pub selector: String,
    pub source: CandidateSource,
    pub weight: f64,
}

/// Shape-derived robustness of the primary selector.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stability {
    High,
    Medium,
    Low,
}

impl Stability {
    pub fn from_source(source: CandidateSource) -> Self {
        match source {
            CandidateSource::Id | CandidateSource::DataAttr => Stability::High,
            CandidateSource::SemanticAttr | CandidateSource::Role | CandidateSource::Class => {
                Stability::Medium
            }
            CandidateSource::Text
            | CandidateSource::Positional
            | CandidateSource::Hierarchy
            | CandidateSource::TagFallback => Stability::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stability::High => "high",
            Stability::Medium => "medium",
            Stability::Low => "low",
        }
    }
}

/// Live-DOM match bucketing. `Unknown` when no page handle was supplied.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Uniqueness {
    Unique,
    Multiple,
    Ambiguous,
    Unknown,
}

impl Uniqueness {
    pub fn from_match_count(count: usize) -> Self {
        match count {
            1 => Uniqueness::Unique,
            2..=5 => Uniqueness::Multiple,
            _ => Uniqueness::Ambiguous,
        }
    }
}

/// The generator's answer: a primary selector, ranked fallbacks, and the
/// quality telemetry the capture manager reports.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SelectorBundle {
    pub primary: String,
    pub alternatives: Vec<String>,
    pub confidence: f64,
    pub stability: Stability,
    pub uniqueness: Uniqueness,
    pub maintainability: f64,
    pub reasoning: Vec<String>,
}
