use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One upstream Google account. Identity is the refresh token; everything
/// surfaced outside the manager uses the derived opaque `token_id` instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub access_token: String,
    pub refresh_token: String,
    /// Access-token lifetime in seconds, as reported by the OAuth endpoint.
    pub expires_in: i64,
    /// Milliseconds since epoch at which `access_token` was issued.
    pub timestamp: i64,
    #[serde(default = "default_enable")]
    pub enable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, rename = "projectId", skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, rename = "hasQuota", skip_serializing_if = "Option::is_none")]
    pub has_quota: Option<bool>,
}

fn default_enable() -> bool {
    true
}

impl Account {
    pub fn new(refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: String::new(),
            refresh_token: refresh_token.into(),
            expires_in: 0,
            timestamp: 0,
            enable: true,
            email: None,
            project_id: None,
            has_quota: None,
        }
    }

    /// Stable opaque id used by the admin surface: sha256(refresh_token || salt).
    pub fn token_id(&self, salt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.refresh_token.as_bytes());
        hasher.update(salt.as_bytes());
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// `now >= timestamp + expires_in*1000 - refresh_buffer_ms`. An account
    /// that never completed a refresh (timestamp 0) is always expired.
    pub fn is_expired(&self, refresh_buffer_ms: i64) -> bool {
        let now = chrono::Utc::now().timestamp_millis();
        now >= self.timestamp + self.expires_in * 1000 - refresh_buffer_ms
    }

    /// Applies a successful OAuth refresh in one shot so readers never see
    /// a half-updated token.
    pub fn apply_refresh(&mut self, access_token: String, expires_in: i64) {
        self.access_token = access_token;
        self.expires_in = expires_in;
        self.timestamp = chrono::Utc::now().timestamp_millis();
    }
}

/// Redacted account view for list/export-style admin responses.
#[derive(Debug, Clone, Serialize)]
pub struct AccountView {
    pub token_id: String,
    pub email: Option<String>,
    pub enable: bool,
    pub expired: bool,
    #[serde(rename = "projectId")]
    pub project_id: Option<String>,
    #[serde(rename = "hasQuota")]
    pub has_quota: Option<bool>,
}

impl AccountView {
    pub fn from_account(account: &Account, salt: &str, refresh_buffer_ms: i64) -> Self {
        Self {
            token_id: account.token_id(salt),
            email: account.email.clone(),
            enable: account.enable,
            expired: account.is_expired(refresh_buffer_ms),
            project_id: account.project_id.clone(),
            has_quota: account.has_quota,
        }
    }
}
