use serde::{Deserialize, Serialize};

/// Separator for the composite refresh string handed to the host credential
/// store. Google refresh tokens are URL-safe and never contain `|`.
const SEPARATOR: char = '|';

/// The three values folded into the host's single opaque refresh field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshParts {
    pub refresh_token: String,
    pub project_id: Option<String>,
    pub managed_project_id: Option<String>,
}

impl RefreshParts {
    pub fn new(refresh_token: impl Into<String>) -> Self {
        Self {
            refresh_token: refresh_token.into(),
            project_id: None,
            managed_project_id: None,
        }
    }

    /// Fold the parts back into the composite string.
    ///
    /// Project segments are trimmed exactly like [`RefreshParts::parse`]
    /// trims them, keeping the two true inverses. Trailing empty segments
    /// are omitted; an absent user project with a present managed project
    /// keeps its empty slot (`tok||managed`).
    pub fn compose(&self) -> String {
        let project = self.project_id.as_deref().map_or("", str::trim);
        let managed = self.managed_project_id.as_deref().map_or("", str::trim);
        match (project.is_empty(), managed.is_empty()) {
            (true, true) => self.refresh_token.clone(),
            (false, true) => format!("{}{SEPARATOR}{project}", self.refresh_token),
            (_, false) => format!("{}{SEPARATOR}{project}{SEPARATOR}{managed}", self.refresh_token),
        }
    }

    /// Split a composite string back into its parts. Empty segments parse as
    /// absent values.
    pub fn parse(composite: &str) -> Self {
        let mut segments = composite.splitn(3, SEPARATOR);
        let refresh_token = segments.next().unwrap_or_default().to_string();
        let non_empty = |s: &str| {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        };
        Self {
            refresh_token,
            project_id: segments.next().and_then(non_empty),
            managed_project_id: segments.next().and_then(non_empty),
        }
    }

    /// The project id a request should run under: the user-chosen one wins,
    /// otherwise the server-assigned managed project.
    pub fn effective_project_id(&self) -> Option<&str> {
        self.project_id
            .as_deref()
            .or(self.managed_project_id.as_deref())
    }
}

/// The token bundle exchanged with the host's credential store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename = "oauth")]
pub struct AuthRecord {
    /// Composite refresh string (see [`RefreshParts`]).
    pub refresh: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
    /// Access-token expiry, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<i64>,
}

impl AuthRecord {
    pub fn new(refresh: impl Into<String>) -> Self {
        Self {
            refresh: refresh.into(),
            access: None,
            expires: None,
        }
    }

    pub fn parts(&self) -> RefreshParts {
        RefreshParts::parse(&self.refresh)
    }

    pub fn with_parts(mut self, parts: &RefreshParts) -> Self {
        self.refresh = parts.compose();
        self
    }

    /// True when the record carries a refresh token at all.
    pub fn has_refresh_token(&self) -> bool {
        !self.parts().refresh_token.trim().is_empty()
    }
}
