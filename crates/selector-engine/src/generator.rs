//! Candidate orchestration: run the configured strategy families, validate
//! and rank, pick a primary by the fixed priority table, and score the
//! bundle for the quality telemetry.

use std::collections::BTreeMap;

use page_adapter::PageDriver;
use tracing::{debug, warn};
use webreplay_core_types::SelectorStrategyKind;

use crate::strategies::{self, looks_generated};
use crate::types::{
    Candidate, CandidateSource, ElementDescriptor, SelectorBundle, Stability, Uniqueness,
    DATA_ATTRIBUTES,
};
use crate::validate::validate;
use crate::SelectorError;

#[derive(Clone, Debug)]
pub struct SelectorOptions {
    pub strategy: SelectorStrategyKind,
    pub max_alternatives: usize,
}

impl Default for SelectorOptions {
    fn default() -> Self {
        Self {
            strategy: SelectorStrategyKind::Hybrid,
            max_alternatives: 5,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct SelectorGenerator {
    options: SelectorOptions,
}

impl SelectorGenerator {
    pub fn new(options: SelectorOptions) -> Self {
        Self { options }
    }

    pub fn for_strategy(strategy: SelectorStrategyKind) -> Self {
        Self::new(SelectorOptions {
            strategy,
            ..SelectorOptions::default()
        })
    }

    /// Synthesize a bundle from the descriptor alone. Without a live page
    /// the uniqueness bucket stays [`Uniqueness::Unknown`].
    pub fn generate(&self, descriptor: &ElementDescriptor) -> SelectorBundle {
        let mut reasoning = Vec::new();
        let raw = self.emit_candidates(descriptor, &mut reasoning);

        let mut seen = Vec::new();
        let mut candidates: Vec<Candidate> = Vec::new();
        for candidate in raw {
            if !validate(&candidate.selector) {
                debug!(
                    target: "selector-engine",
                    selector = %candidate.selector,
                    "discarding syntactically invalid candidate"
                );
                continue;
            }
            if seen.contains(&candidate.selector) {
                continue;
            }
            seen.push(candidate.selector.clone());
            candidates.push(candidate);
        }

        // Additive confidence: one contribution per strategy family.
        let mut per_source: BTreeMap<CandidateSource, f64> = BTreeMap::new();
        for candidate in &candidates {
            let entry = per_source.entry(candidate.source).or_insert(0.0);
            if candidate.weight > *entry {
                *entry = candidate.weight;
            }
        }
        let confidence: f64 = per_source.values().sum::<f64>().min(1.0);

        let fallback = strategies::tag_fallback(descriptor);
        let (primary, primary_source) = match candidates
            .iter()
            .enumerate()
            .min_by_key(|(idx, c)| (c.source.priority(), *idx))
        {
            Some((_, best)) => (best.selector.clone(), best.source),
            None => {
                reasoning.push("no strategy produced a valid candidate, using tag".to_string());
                (fallback.selector.clone(), fallback.source)
            }
        };

        let mut ranked: Vec<(u8, usize, String)> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.selector != primary)
            .map(|(idx, c)| (c.source.priority(), idx, c.selector.clone()))
            .collect();
        ranked.sort();
        let alternatives: Vec<String> = ranked
            .into_iter()
            .map(|(_, _, s)| s)
            .take(self.options.max_alternatives)
            .collect();

        let stability = Stability::from_source(primary_source);
        let maintainability = maintainability_score(stability, alternatives.len());

        SelectorBundle {
            primary,
            alternatives,
            confidence,
            stability,
            uniqueness: Uniqueness::Unknown,
            maintainability,
            reasoning,
        }
    }

    /// Like [`generate`](Self::generate) but re-queries the live DOM to
    /// bucket how many elements the primary matches.
    pub async fn generate_with_page(
        &self,
        descriptor: &ElementDescriptor,
        driver: &dyn PageDriver,
    ) -> Result<SelectorBundle, SelectorError> {
        let mut bundle = self.generate(descriptor);
        let count = driver.query_count(&bundle.primary).await?;
        bundle.uniqueness = Uniqueness::from_match_count(count);
        bundle
            .reasoning
            .push(format!("primary matches {count} element(s) on the live page"));
        if bundle.uniqueness == Uniqueness::Ambiguous {
            warn!(
                target: "selector-engine",
                primary = %bundle.primary,
                count,
                "primary selector is ambiguous on the live page"
            );
        }
        Ok(bundle)
    }

    /// Derive one selector that addresses every element in the group:
    /// attribute/class/tag intersection, common tag as last resort.
    pub fn generate_common(&self, descriptors: &[ElementDescriptor]) -> String {
        let Some(first) = descriptors.first() else {
            return "body".to_string();
        };
        if descriptors.len() == 1 {
            return self.generate(first).primary;
        }

        let tags_match = descriptors
            .iter()
            .all(|d| d.tag.eq_ignore_ascii_case(&first.tag));
        let tag = if tags_match {
            first.tag.to_ascii_lowercase()
        } else {
            "*".to_string()
        };

        // Attribute key/value pairs present on every element, tried in
        // data-attr order first, then the semantic ones.
        let mut attr_order: Vec<&str> = DATA_ATTRIBUTES.to_vec();
        attr_order.extend(["name", "type", "role"]);
        for attr in attr_order {
            if let Some(value) = first.attribute(attr) {
                let shared = descriptors
                    .iter()
                    .all(|d| d.attribute(attr) == Some(value));
                if shared && !value.is_empty() {
                    return format!("{tag}[{attr}=\"{value}\"]");
                }
            }
        }

        let common_classes: Vec<&str> = first
            .classes
            .iter()
            .map(String::as_str)
            .filter(|c| !c.is_empty() && !looks_generated(c))
            .filter(|c| {
                descriptors[1..]
                    .iter()
                    .all(|d| d.classes.iter().any(|other| other == c))
            })
            .take(3)
            .collect();
        if !common_classes.is_empty() {
            return format!("{tag}.{}", common_classes.join("."));
        }

        tag
    }

    fn emit_candidates(
        &self,
        descriptor: &ElementDescriptor,
        reasoning: &mut Vec<String>,
    ) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        let strategy = self.options.strategy;
        let css_families = matches!(
            strategy,
            SelectorStrategyKind::Css | SelectorStrategyKind::Hybrid
        );
        let text_family = matches!(
            strategy,
            SelectorStrategyKind::Text | SelectorStrategyKind::Hybrid | SelectorStrategyKind::XPath
        );

        if css_families {
            if let Some(candidate) = strategies::id_candidate(descriptor) {
                reasoning.push(format!("stable id attribute ({})", candidate.selector));
                candidates.push(candidate);
            }
            let data = strategies::data_attr_candidates(descriptor);
            if !data.is_empty() {
                reasoning.push(format!("{} data attribute(s) present", data.len()));
                candidates.extend(data);
            }
            let semantic = strategies::semantic_attr_candidates(descriptor);
            if !semantic.is_empty() {
                reasoning.push("semantic attributes (name/type/aria-label)".to_string());
                candidates.extend(semantic);
            }
            let roles = strategies::role_candidates(descriptor);
            if !roles.is_empty() {
                reasoning.push("role derived from markup".to_string());
                candidates.extend(roles);
            }
            let classes = strategies::class_candidates(descriptor);
            if !classes.is_empty() {
                reasoning.push("stable class combination".to_string());
                candidates.extend(classes);
            }
        }

        if strategy == SelectorStrategyKind::XPath {
            candidates.extend(xpath_attribute_candidates(descriptor));
        }

        if text_family {
            let text = strategies::text_candidates(descriptor);
            if !text.is_empty() {
                reasoning.push("short visible text".to_string());
                candidates.extend(text);
            }
        }

        if css_families {
            candidates.extend(strategies::positional_candidates(descriptor));
            if let Some(candidate) = strategies::hierarchy_candidate(descriptor) {
                candidates.push(candidate);
            }
        }

        candidates
    }
}

/// XPath renderings of the attribute families, used in pure-XPath mode.
fn xpath_attribute_candidates(descriptor: &ElementDescriptor) -> Vec<Candidate> {
    let tag = descriptor.tag.to_ascii_lowercase();
    let mut candidates = Vec::new();
    if let Some(id) = descriptor.id.as_deref().filter(|id| !id.is_empty()) {
        if !looks_generated(id) {
            candidates.push(Candidate {
                selector: format!("//*[@id=\"{id}\"]"),
                source: CandidateSource::Id,
                weight: strategies::W_ID,
            });
        }
    }
    for attr in DATA_ATTRIBUTES {
        if let Some(value) = descriptor.attribute(attr) {
            if !value.is_empty() {
                candidates.push(Candidate {
                    selector: format!("//*[@{attr}=\"{value}\"]"),
                    source: CandidateSource::DataAttr,
                    weight: strategies::W_DATA_ATTR,
                });
            }
        }
    }
    for attr in ["name", "type"] {
        if let Some(value) = descriptor.attribute(attr) {
            if !value.is_empty() {
                candidates.push(Candidate {
                    selector: format!("//{tag}[@{attr}=\"{value}\"]"),
                    source: CandidateSource::SemanticAttr,
                    weight: strategies::W_SEMANTIC,
                });
            }
        }
    }
    candidates
}

fn maintainability_score(stability: Stability, alternative_count: usize) -> f64 {
    let base: f64 = match stability {
        Stability::High => 0.9,
        Stability::Medium => 0.6,
        Stability::Low => 0.3,
    };
    let bonus = if alternative_count >= 2 { 0.05 } else { 0.0 };
    (base + bonus).min(1.0)
}
