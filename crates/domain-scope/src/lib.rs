//! Navigation boundary gating.
//!
//! A capture session follows the operator across redirects and SSO hops.
//! `DomainScope` decides, per URL, whether recording may continue: the
//! configured base domain and its subdomains always pass, then an explicit
//! allow-list, then a wildcard list of known identity providers. Anything
//! else pauses recording rather than aborting the session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;
use webreplay_core_types::DomainScopeConfig;

/// Identity-provider hostname patterns consulted when a URL matches
/// neither the base domain nor the allow-list.
pub const DEFAULT_SSO_PROVIDERS: &[&str] = &[
    "accounts.google.com",
    "accounts.youtube.com",
    "login.microsoftonline.com",
    "login.live.com",
    "login.windows.net",
    "*.okta.com",
    "*.oktapreview.com",
    "*.auth0.com",
    "*.onelogin.com",
    "*.pingidentity.com",
    "*.ping-eng.com",
    "*.duosecurity.com",
    "login.salesforce.com",
    "sso.godaddy.com",
    "signin.aws.amazon.com",
];

/// Why a URL was allowed or denied.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeReason {
    BaseDomain,
    Subdomain,
    SsoProvider,
    ExplicitAllowlist,
    Denied,
}

impl ScopeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeReason::BaseDomain => "base_domain",
            ScopeReason::Subdomain => "subdomain",
            ScopeReason::SsoProvider => "sso_provider",
            ScopeReason::ExplicitAllowlist => "explicit_allowlist",
            ScopeReason::Denied => "denied",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScopeDecision {
    pub allowed: bool,
    pub reason: ScopeReason,
    pub domain: String,
}

/// Immutable record of one navigation attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NavigationEvent {
    pub url: String,
    pub domain: String,
    pub allowed: bool,
    pub reason: ScopeReason,
    pub timestamp: DateTime<Utc>,
}

/// The gate itself. Synchronous: a pure classifier plus an append-only
/// navigation log, safe to call from a navigation callback.
#[derive(Debug)]
pub struct DomainScope {
    base_domain: String,
    allowed_domains: Vec<String>,
    sso_providers: Vec<String>,
    history: Vec<NavigationEvent>,
    recording_paused: bool,
}

impl DomainScope {
    pub fn new(config: DomainScopeConfig) -> Self {
        let sso_providers = config
            .sso_providers
            .unwrap_or_else(|| DEFAULT_SSO_PROVIDERS.iter().map(|s| s.to_string()).collect());
        Self {
            base_domain: config.base_domain.to_ascii_lowercase(),
            allowed_domains: config
                .allowed_domains
                .into_iter()
                .map(|d| d.to_ascii_lowercase())
                .collect(),
            sso_providers,
            history: Vec::new(),
            recording_paused: false,
        }
    }

    pub fn with_base_domain(base_domain: &str) -> Self {
        Self::new(DomainScopeConfig {
            base_domain: base_domain.to_string(),
            allowed_domains: Vec::new(),
            sso_providers: None,
        })
    }

    /// Classify a URL. Invalid URLs are denied with domain `"invalid"`,
    /// never an error.
    pub fn is_allowed_domain(&self, url: &str) -> ScopeDecision {
        let host = match Url::parse(url).ok().and_then(|u| {
            u.host_str().map(|h| h.to_ascii_lowercase())
        }) {
            Some(host) => host,
            None => {
                return ScopeDecision {
                    allowed: false,
                    reason: ScopeReason::Denied,
                    domain: "invalid".to_string(),
                }
            }
        };

        if !self.base_domain.is_empty() {
            if host == self.base_domain {
                return ScopeDecision {
                    allowed: true,
                    reason: ScopeReason::BaseDomain,
                    domain: host,
                };
            }
            if host.ends_with(&format!(".{}", self.base_domain)) {
                return ScopeDecision {
                    allowed: true,
                    reason: ScopeReason::Subdomain,
                    domain: host,
                };
            }
        }

        if self
            .allowed_domains
            .iter()
            .any(|pattern| pattern_matches(pattern, &host))
        {
            return ScopeDecision {
                allowed: true,
                reason: ScopeReason::ExplicitAllowlist,
                domain: host,
            };
        }

        if self
            .sso_providers
            .iter()
            .any(|pattern| pattern_matches(pattern, &host))
        {
            return ScopeDecision {
                allowed: true,
                reason: ScopeReason::SsoProvider,
                domain: host,
            };
        }

        ScopeDecision {
            allowed: false,
            reason: ScopeReason::Denied,
            domain: host,
        }
    }

    /// Evaluate a URL, append the event to the history and flip the pause
    /// flag to the negation of the decision.
    pub fn record_navigation(&mut self, url: &str) -> ScopeDecision {
        let decision = self.is_allowed_domain(url);
        self.history.push(NavigationEvent {
            url: url.to_string(),
            domain: decision.domain.clone(),
            allowed: decision.allowed,
            reason: decision.reason,
            timestamp: Utc::now(),
        });
        self.recording_paused = !decision.allowed;
        debug!(
            target: "domain-scope",
            url,
            domain = %decision.domain,
            reason = decision.reason.as_str(),
            paused = self.recording_paused,
            "navigation recorded"
        );
        decision
    }

    pub fn is_recording_paused(&self) -> bool {
        self.recording_paused
    }

    /// Human-readable description of the current gate, for the pause
    /// callback. `None` while recording is live.
    pub fn pause_reason(&self) -> Option<String> {
        if !self.recording_paused {
            return None;
        }
        self.history
            .last()
            .map(|event| format!("navigation to {} left the allowed scope", event.domain))
    }

    pub fn history(&self) -> &[NavigationEvent] {
        &self.history
    }

    pub fn add_allowed_domain(&mut self, domain: &str) {
        let domain = domain.to_ascii_lowercase();
        if !self.allowed_domains.contains(&domain) {
            self.allowed_domains.push(domain);
        }
    }

    pub fn remove_allowed_domain(&mut self, domain: &str) {
        let domain = domain.to_ascii_lowercase();
        self.allowed_domains.retain(|d| d != &domain);
    }
}

/// Exact hostname match, or single-`*` wildcard:
/// `*.auth0.com` matches any host ending in `.auth0.com`.
fn pattern_matches(pattern: &str, host: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if pattern.contains('*') {
        let parts: Vec<&str> = pattern.split('*').collect();
        if parts.len() == 2 {
            return host.starts_with(parts[0]) && host.ends_with(parts[1]);
        }
    }
    host == pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> DomainScope {
        DomainScope::with_base_domain("app.example.com")
    }

    #[test]
    fn base_domain_and_subdomains_are_allowed() {
        let scope = scope();
        let decision = scope.is_allowed_domain("https://app.example.com/dashboard");
        assert!(decision.allowed);
        assert_eq!(decision.reason, ScopeReason::BaseDomain);

        let decision = scope.is_allowed_domain("https://api.app.example.com/v1");
        assert!(decision.allowed);
        assert_eq!(decision.reason, ScopeReason::Subdomain);
    }

    #[test]
    fn default_sso_providers_pass_by_wildcard() {
        let scope = scope();
        let decision = scope.is_allowed_domain("https://dev-123.auth0.com/authorize");
        assert!(decision.allowed);
        assert_eq!(decision.reason, ScopeReason::SsoProvider);

        let decision = scope.is_allowed_domain("https://login.microsoftonline.com/common");
        assert!(decision.allowed);
        assert_eq!(decision.reason, ScopeReason::SsoProvider);
    }

    #[test]
    fn unrelated_hosts_are_denied() {
        let scope = scope();
        let decision = scope.is_allowed_domain("https://evil.com/phish");
        assert!(!decision.allowed);
        assert_eq!(decision.reason, ScopeReason::Denied);
        assert_eq!(decision.domain, "evil.com");
    }

    #[test]
    fn invalid_urls_are_denied_not_errors() {
        let scope = scope();
        let decision = scope.is_allowed_domain("not a url at all");
        assert!(!decision.allowed);
        assert_eq!(decision.domain, "invalid");
    }

    #[test]
    fn record_navigation_toggles_pause_flag() {
        let mut scope = scope();
        scope.record_navigation("https://evil.com");
        assert!(scope.is_recording_paused());
        assert!(scope.pause_reason().unwrap().contains("evil.com"));

        scope.record_navigation("https://app.example.com/home");
        assert!(!scope.is_recording_paused());
        assert!(scope.pause_reason().is_none());
        assert_eq!(scope.history().len(), 2);
    }

    #[test]
    fn allow_list_is_mutable_at_runtime() {
        let mut scope = scope();
        assert!(!scope.is_allowed_domain("https://cdn.partner.io").allowed);

        scope.add_allowed_domain("*.partner.io");
        let decision = scope.is_allowed_domain("https://cdn.partner.io");
        assert!(decision.allowed);
        assert_eq!(decision.reason, ScopeReason::ExplicitAllowlist);

        scope.remove_allowed_domain("*.partner.io");
        assert!(!scope.is_allowed_domain("https://cdn.partner.io").allowed);
    }

    #[test]
    fn explicit_allowlist_wins_before_sso_list() {
        let mut scope = scope();
        scope.add_allowed_domain("accounts.google.com");
        let decision = scope.is_allowed_domain("https://accounts.google.com/signin");
        assert!(decision.allowed);
        assert_eq!(decision.reason, ScopeReason::ExplicitAllowlist);
    }

    #[test]
    fn host_matching_is_case_insensitive() {
        let scope = scope();
        let decision = scope.is_allowed_domain("https://APP.Example.COM/x");
        assert!(decision.allowed);
    }
}
