pub mod enroll;
pub mod listener;
pub mod manual;

use crate::accounts::{EnrolledAccount, RefreshParts};
use crate::config::ResolvedConfig;
use crate::error::OauthError;
use crate::oauth::endpoints::OauthEndpoints;
use crate::oauth::jwt::email_from_id_token;
use oauth2::{AuthorizationCode, PkceCodeChallenge, PkceCodeVerifier, TokenResponse};
use tracing::debug;
use url::Url;

/// Environment signals that force the paste-based flow.
pub const HEADLESS_ENV_VARS: [&str; 4] = [
    "OPENCODE_HEADLESS",
    "SSH_CONNECTION",
    "SSH_CLIENT",
    "SSH_TTY",
];

pub fn is_headless() -> bool {
    HEADLESS_ENV_VARS
        .iter()
        .any(|name| std::env::var_os(name).is_some())
}

/// Where an interactive authorization currently stands. The headful and
/// headless paths drive the same states; only the AwaitingCallback source
/// differs (loopback redirect vs pasted input).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    AwaitingAuthorization,
    AwaitingCallback,
    Exchanging,
    Done,
}

/// An authorization in flight: the URL to visit plus the PKCE/state material
/// needed to finish the exchange.
pub struct PendingAuthorization {
    pub url: Url,
    pub state: String,
    verifier: String,
    redirect_uri: Url,
    project_id: Option<String>,
    flow_state: FlowState,
}

impl std::fmt::Debug for PendingAuthorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAuthorization")
            .field("state", &self.state)
            .field("verifier", &"<redacted>")
            .field("redirect_uri", &self.redirect_uri.as_str())
            .field("project_id", &self.project_id)
            .field("flow_state", &self.flow_state)
            .finish()
    }
}

impl PendingAuthorization {
    /// Build the authorization URL. `project_id` is the user-chosen project
    /// carried through to the composite at exchange time.
    pub fn begin(
        cfg: &ResolvedConfig,
        redirect_uri: Url,
        project_id: Option<String>,
    ) -> Result<Self, OauthError> {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        let (url, csrf) = OauthEndpoints::build_authorize_url(cfg, challenge, &redirect_uri)?;
        Ok(Self {
            url,
            state: csrf.secret().clone(),
            verifier: verifier.secret().clone(),
            redirect_uri,
            project_id: project_id.filter(|p| !p.trim().is_empty()),
            flow_state: FlowState::AwaitingAuthorization,
        })
    }

    pub fn flow_state(&self) -> FlowState {
        self.flow_state
    }

    pub fn advance(&mut self, next: FlowState) {
        debug!(from = ?self.flow_state, to = ?next, "authorization flow transition");
        self.flow_state = next;
    }

    /// Complete the code exchange and build the enrollable account.
    ///
    /// `state` is the redirect's state parameter when one was seen; a bare
    /// pasted code passes `None` and the originally generated state stands
    /// in for it.
    pub async fn exchange(
        mut self,
        code: &str,
        state: Option<&str>,
        cfg: &ResolvedConfig,
        http_client: &reqwest::Client,
    ) -> Result<EnrolledAccount, OauthError> {
        let effective_state = state.unwrap_or(self.state.as_str());
        if effective_state != self.state {
            return Err(OauthError::Flow {
                code: "CSRF_MISMATCH".to_string(),
                message: "OAuth state parameter mismatch".to_string(),
                details: None,
            });
        }

        self.advance(FlowState::Exchanging);
        let token = OauthEndpoints::exchange_authorization_code(
            cfg,
            AuthorizationCode::new(code.to_string()),
            PkceCodeVerifier::new(self.verifier.clone()),
            &self.redirect_uri,
            http_client,
        )
        .await?;

        let refresh_token = token
            .refresh_token()
            .map(|t| t.secret().trim().to_string())
            .unwrap_or_default();
        if refresh_token.is_empty() {
            return Err(OauthError::Flow {
                code: "MISSING_REFRESH_TOKEN".to_string(),
                message: "Missing refresh_token (check access_type=offline)".to_string(),
                details: None,
            });
        }

        let email = token
            .extra_fields()
            .id_token
            .as_deref()
            .and_then(email_from_id_token)
            .unwrap_or_default();

        let parts = RefreshParts {
            refresh_token,
            project_id: self.project_id.clone(),
            managed_project_id: None,
        };

        self.advance(FlowState::Done);
        Ok(EnrolledAccount {
            email,
            refresh: parts.compose(),
        })
    }
}
