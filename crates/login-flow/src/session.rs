use chrono::{DateTime, Duration, Utc};
use page_adapter::CookieRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Sessions are reused for this long before a fresh login is forced.
pub const SESSION_TTL_HOURS: i64 = 24;

/// Captured authenticated state for one account on one site.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoginSession {
    pub id: String,
    pub username: String,
    pub url: String,
    pub cookies: Vec<CookieRecord>,
    pub local_storage: HashMap<String, String>,
    pub session_storage: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LoginSession {
    pub fn new(username: &str, url: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            username: username.to_string(),
            url: url.to_string(),
            cookies: Vec::new(),
            local_storage: HashMap::new(),
            session_storage: HashMap::new(),
            created_at: now,
            expires_at: now + Duration::hours(SESSION_TTL_HOURS),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Cache key: one slot per account per origin.
    pub fn cache_key(username: &str, url: &str) -> String {
        let origin = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| url.to_string());
        format!("{username}@{origin}")
    }
}
