//! Candidate emission, one function per strategy family. Each family
//! contributes additively to the bundle confidence; the generator decides
//! which families run based on the configured strategy kind.

use crate::types::{AncestorStep, Candidate, CandidateSource, ElementDescriptor, DATA_ATTRIBUTES};

pub const W_ID: f64 = 0.35;
pub const W_DATA_ATTR: f64 = 0.30;
pub const W_SEMANTIC: f64 = 0.20;
pub const W_ARIA: f64 = 0.15;
pub const W_ROLE: f64 = 0.10;
pub const W_CLASS: f64 = 0.10;
pub const W_TEXT: f64 = 0.10;
pub const W_POSITIONAL: f64 = 0.05;
pub const W_HIERARCHY: f64 = 0.05;

/// Text longer than this is too brittle to match on.
pub const MAX_TEXT_LEN: usize = 50;

pub fn id_candidate(descriptor: &ElementDescriptor) -> Option<Candidate> {
    let id = descriptor.id.as_deref()?.trim();
    if id.is_empty() || looks_generated(id) {
        return None;
    }
    Some(Candidate {
        selector: format!("#{id}"),
        source: CandidateSource::Id,
        weight: W_ID,
    })
}

pub fn data_attr_candidates(descriptor: &ElementDescriptor) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for attr in DATA_ATTRIBUTES {
        if let Some(value) = descriptor.attribute(attr) {
            if !value.is_empty() {
                candidates.push(Candidate {
                    selector: format!("[{attr}=\"{}\"]", escape_attr(value)),
                    source: CandidateSource::DataAttr,
                    weight: W_DATA_ATTR,
                });
            }
        }
    }
    candidates
}

pub fn semantic_attr_candidates(descriptor: &ElementDescriptor) -> Vec<Candidate> {
    let tag = descriptor.tag.to_ascii_lowercase();
    let mut candidates = Vec::new();
    if let Some(name) = descriptor.attribute("name") {
        if !name.is_empty() {
            candidates.push(Candidate {
                selector: format!("{tag}[name=\"{}\"]", escape_attr(name)),
                source: CandidateSource::SemanticAttr,
                weight: W_SEMANTIC,
            });
        }
    }
    if let Some(type_attr) = descriptor.attribute("type") {
        if !type_attr.is_empty() {
            candidates.push(Candidate {
                selector: format!("{tag}[type=\"{}\"]", escape_attr(type_attr)),
                source: CandidateSource::SemanticAttr,
                weight: W_SEMANTIC,
            });
        }
    }
    if let Some(label) = descriptor.attribute("aria-label") {
        if !label.is_empty() && label.len() <= MAX_TEXT_LEN {
            candidates.push(Candidate {
                selector: format!("{tag}[aria-label=\"{}\"]", escape_attr(label)),
                source: CandidateSource::SemanticAttr,
                weight: W_ARIA,
            });
        }
    }
    candidates
}

pub fn role_candidates(descriptor: &ElementDescriptor) -> Vec<Candidate> {
    let tag = descriptor.tag.to_ascii_lowercase();
    let explicit = descriptor.attribute("role").map(str::to_string);
    let inferred = infer_role_from_tag(&tag, descriptor.attribute("type"));
    let role = explicit.or_else(|| inferred.map(str::to_string));
    match role {
        Some(role) if !role.is_empty() => vec![Candidate {
            selector: format!("{tag}[role=\"{}\"]", escape_attr(&role)),
            source: CandidateSource::Role,
            weight: W_ROLE,
        }],
        _ => Vec::new(),
    }
}

pub fn class_candidates(descriptor: &ElementDescriptor) -> Vec<Candidate> {
    let tag = descriptor.tag.to_ascii_lowercase();
    let stable: Vec<&str> = descriptor
        .classes
        .iter()
        .map(String::as_str)
        .filter(|c| !c.is_empty() && !looks_generated(c))
        .take(3)
        .collect();
    if stable.is_empty() {
        return Vec::new();
    }
    vec![Candidate {
        selector: format!("{tag}.{}", stable.join(".")),
        source: CandidateSource::Class,
        weight: W_CLASS,
    }]
}

/// XPath text match; CSS has no text predicate.
pub fn text_candidates(descriptor: &ElementDescriptor) -> Vec<Candidate> {
    let Some(text) = descriptor.text.as_deref() else {
        return Vec::new();
    };
    let text = text.trim();
    if text.is_empty() || text.len() > MAX_TEXT_LEN {
        return Vec::new();
    }
    let tag = descriptor.tag.to_ascii_lowercase();
    let Some(literal) = xpath_literal(text) else {
        return Vec::new();
    };
    vec![Candidate {
        selector: format!("//{tag}[normalize-space(text())={literal}]"),
        source: CandidateSource::Text,
        weight: W_TEXT,
    }]
}

pub fn positional_candidates(descriptor: &ElementDescriptor) -> Vec<Candidate> {
    let tag = descriptor.tag.to_ascii_lowercase();
    let mut candidates = Vec::new();
    if let Some(n) = descriptor.nth_of_type {
        candidates.push(Candidate {
            selector: format!("{tag}:nth-of-type({n})"),
            source: CandidateSource::Positional,
            weight: W_POSITIONAL,
        });
    }
    if let Some(n) = descriptor.nth_child {
        candidates.push(Candidate {
            selector: format!("{tag}:nth-child({n})"),
            source: CandidateSource::Positional,
            weight: W_POSITIONAL,
        });
    }
    candidates
}

/// Full ancestor path down to the element, anchored at the deepest
/// ancestor that carries an id.
pub fn hierarchy_candidate(descriptor: &ElementDescriptor) -> Option<Candidate> {
    if descriptor.ancestors.is_empty() {
        return None;
    }
    let anchor = descriptor
        .ancestors
        .iter()
        .rposition(|step| step.id.is_some());
    let path = match anchor {
        Some(idx) => &descriptor.ancestors[idx..],
        None => descriptor.ancestors.as_slice(),
    };
    let mut parts: Vec<String> = path.iter().map(step_selector).collect();
    parts.push(descriptor.tag.to_ascii_lowercase());
    Some(Candidate {
        selector: parts.join(" > "),
        source: CandidateSource::Hierarchy,
        weight: W_HIERARCHY,
    })
}

pub fn tag_fallback(descriptor: &ElementDescriptor) -> Candidate {
    let tag = descriptor.tag.trim().to_ascii_lowercase();
    Candidate {
        selector: if tag.is_empty() { "body".to_string() } else { tag },
        source: CandidateSource::TagFallback,
        weight: 0.0,
    }
}

fn step_selector(step: &AncestorStep) -> String {
    let tag = step.tag.to_ascii_lowercase();
    if let Some(id) = step.id.as_deref().filter(|id| !id.is_empty()) {
        return format!("{tag}#{id}");
    }
    if let Some(class) = step
        .classes
        .iter()
        .find(|c| !c.is_empty() && !looks_generated(c))
    {
        return format!("{tag}.{class}");
    }
    tag
}

/// ARIA role implied by the tag when no explicit `role` attribute exists.
pub fn infer_role_from_tag(tag: &str, type_attr: Option<&str>) -> Option<&'static str> {
    match tag {
        "button" => Some("button"),
        "a" => Some("link"),
        "select" => Some("combobox"),
        "textarea" => Some("textbox"),
        "nav" => Some("navigation"),
        "main" => Some("main"),
        "form" => Some("form"),
        "input" => match type_attr.unwrap_or("text") {
            "submit" | "button" | "reset" => Some("button"),
            "checkbox" => Some("checkbox"),
            "radio" => Some("radio"),
            "search" => Some("searchbox"),
            "text" | "email" | "password" | "tel" | "url" => Some("textbox"),
            _ => None,
        },
        _ => None,
    }
}

/// Framework-minted identifiers churn between builds and are worthless as
/// anchors.
pub fn looks_generated(token: &str) -> bool {
    if token.starts_with("css-") || token.starts_with("sc-") || token.starts_with("jsx-") {
        return true;
    }
    let digits = token.chars().filter(|c| c.is_ascii_digit()).count();
    digits >= 3 && token.len() >= 8
}

fn escape_attr(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Quote text for an XPath string literal; gives up when the text mixes
/// both quote kinds.
fn xpath_literal(text: &str) -> Option<String> {
    if !text.contains('"') {
        Some(format!("\"{text}\""))
    } else if !text.contains('\'') {
        Some(format!("'{text}'"))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> ElementDescriptor {
        let mut d = ElementDescriptor::with_tag("button");
        d.id = Some("login-btn".into());
        d.classes = vec!["primary".into(), "css-1a2b3c".into()];
        d.attributes.insert("type".into(), "submit".into());
        d.text = Some("Sign in".into());
        d
    }

    #[test]
    fn id_candidate_skips_generated_ids() {
        let d = descriptor();
        assert_eq!(id_candidate(&d).unwrap().selector, "#login-btn");

        let mut generated = descriptor();
        generated.id = Some("ember1234567".into());
        assert!(id_candidate(&generated).is_none());
    }

    #[test]
    fn class_candidate_filters_framework_classes() {
        let candidates = class_candidates(&descriptor());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].selector, "button.primary");
    }

    #[test]
    fn text_candidate_is_xpath_and_length_capped() {
        let candidates = text_candidates(&descriptor());
        assert_eq!(
            candidates[0].selector,
            "//button[normalize-space(text())=\"Sign in\"]"
        );

        let mut long = descriptor();
        long.text = Some("x".repeat(80));
        assert!(text_candidates(&long).is_empty());
    }

    #[test]
    fn role_inference_from_input_type() {
        assert_eq!(infer_role_from_tag("input", Some("submit")), Some("button"));
        assert_eq!(infer_role_from_tag("input", Some("email")), Some("textbox"));
        assert_eq!(infer_role_from_tag("div", None), None);
    }

    #[test]
    fn hierarchy_anchors_at_deepest_id() {
        let mut d = ElementDescriptor::with_tag("a");
        d.ancestors = vec![
            AncestorStep {
                tag: "body".into(),
                ..Default::default()
            },
            AncestorStep {
                tag: "div".into(),
                id: Some("app".into()),
                classes: vec![],
            },
            AncestorStep {
                tag: "ul".into(),
                id: None,
                classes: vec!["nav".into()],
            },
        ];
        let candidate = hierarchy_candidate(&d).unwrap();
        assert_eq!(candidate.selector, "div#app > ul.nav > a");
    }

    #[test]
    fn tag_fallback_never_empty() {
        let empty = ElementDescriptor::with_tag("");
        assert_eq!(tag_fallback(&empty).selector, "body");
        assert_eq!(tag_fallback(&descriptor()).selector, "button");
    }
}
