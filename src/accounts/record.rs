use super::composite::{AuthRecord, RefreshParts};
use chrono::Utc;
use serde::{Deserialize, Serialize};

pub const POOL_DOCUMENT_VERSION: u32 = 1;

/// Early-expiry buffer for cached access tokens. A token inside this window
/// is refreshed before use to avoid expiring mid-request.
const ACCESS_TOKEN_SKEW_MS: i64 = 5 * 60 * 1000;

/// One pooled identity: a refresh token plus its project metadata.
///
/// The refresh token is the primary identity; everything else is display or
/// scheduling state. The access-token cache is runtime-only and never hits
/// disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(default)]
    pub email: String,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub managed_project_id: Option<String>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub added_at: i64,
    /// Epoch milliseconds.
    #[serde(default)]
    pub last_used: i64,
    #[serde(default)]
    pub is_rate_limited: bool,
    /// Epoch milliseconds; 0 when not cooled.
    #[serde(default)]
    pub rate_limit_reset_time: i64,

    #[serde(skip)]
    pub access_token: Option<String>,
    /// Epoch milliseconds; 0 when no token is cached.
    #[serde(skip)]
    pub access_token_expires_at: i64,
}

impl Account {
    pub fn new(email: impl Into<String>, parts: &RefreshParts, now_ms: i64) -> Self {
        Self {
            email: email.into(),
            refresh_token: parts.refresh_token.clone(),
            project_id: parts.project_id.clone(),
            managed_project_id: parts.managed_project_id.clone(),
            added_at: now_ms,
            last_used: now_ms,
            is_rate_limited: false,
            rate_limit_reset_time: 0,
            access_token: None,
            access_token_expires_at: 0,
        }
    }

    pub fn refresh_parts(&self) -> RefreshParts {
        RefreshParts {
            refresh_token: self.refresh_token.clone(),
            project_id: self.project_id.clone(),
            managed_project_id: self.managed_project_id.clone(),
        }
    }

    /// Materialize the token bundle, including any cached access token.
    pub fn auth_details(&self) -> AuthRecord {
        AuthRecord {
            refresh: self.refresh_parts().compose(),
            access: self.access_token.clone(),
            expires: (self.access_token_expires_at > 0).then_some(self.access_token_expires_at),
        }
    }

    /// Fold a (possibly mutated) token bundle back into this account,
    /// preserving pool membership and scheduling state.
    pub fn apply_auth(&mut self, auth: &AuthRecord) {
        let parts = auth.parts();
        if !parts.refresh_token.trim().is_empty() {
            self.refresh_token = parts.refresh_token;
        }
        if parts.project_id.is_some() {
            self.project_id = parts.project_id;
        }
        if parts.managed_project_id.is_some() {
            self.managed_project_id = parts.managed_project_id;
        }
        self.access_token = auth.access.clone();
        self.access_token_expires_at = auth.expires.unwrap_or(0);
    }

    /// True when the cached access token is missing or inside the expiry
    /// skew.
    pub fn needs_refresh(&self, now_ms: i64) -> bool {
        self.access_token.is_none() || now_ms + ACCESS_TOKEN_SKEW_MS >= self.access_token_expires_at
    }

    pub fn is_cooling(&self, now_ms: i64) -> bool {
        self.is_rate_limited && self.rate_limit_reset_time > now_ms
    }

    pub fn clear_cooldown(&mut self) {
        self.is_rate_limited = false;
        self.rate_limit_reset_time = 0;
    }
}

/// The persisted pool document (`antigravity-accounts.json`).
///
/// `active_index` is serialized as a plain integer and clamped on load, so a
/// document written by an older or foreign implementation never wedges the
/// pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccountsDocument {
    pub version: u32,
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub active_index: i64,
}

impl AccountsDocument {
    pub fn empty() -> Self {
        Self {
            version: POOL_DOCUMENT_VERSION,
            accounts: Vec::new(),
            active_index: 0,
        }
    }
}

/// Result of a successful OAuth exchange, ready for pool enrollment.
#[derive(Debug, Clone)]
pub struct EnrolledAccount {
    pub email: String,
    /// Composite refresh string.
    pub refresh: String,
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
