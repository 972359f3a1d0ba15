use super::{GoogleOauth2Client, GoogleTokenResponse};
use crate::accounts::AuthRecord;
use crate::accounts::record::now_ms;
use crate::config::ResolvedConfig;
use crate::error::OauthError;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use tracing::info;

/// Stateless Google OAuth endpoints built from resolved config.
///
/// OAuth parameters come from built-in defaults and may be overridden in
/// tests, so a fresh oauth2 client is built per call.
pub struct OauthEndpoints;

impl OauthEndpoints {
    fn build_client(
        cfg: &ResolvedConfig,
        redirect_url: &url::Url,
    ) -> Result<GoogleOauth2Client, OauthError> {
        let redirect = RedirectUrl::new(redirect_url.to_string()).map_err(parse_err)?;
        let client = oauth2::Client::new(ClientId::new(cfg.oauth_client_id.clone()))
            .set_client_secret(ClientSecret::new(cfg.oauth_client_secret.clone()))
            .set_auth_uri(AuthUrl::new(cfg.oauth_auth_url.to_string()).map_err(parse_err)?)
            .set_token_uri(TokenUrl::new(cfg.oauth_token_url.to_string()).map_err(parse_err)?)
            .set_redirect_uri(redirect);
        Ok(client)
    }

    /// Build an auth URL with configured scopes and PKCE challenge preset.
    /// The returned `CsrfToken` is the `state` embedded in the URL.
    pub fn build_authorize_url(
        cfg: &ResolvedConfig,
        pkce_challenge: PkceCodeChallenge,
        redirect_url: &url::Url,
    ) -> Result<(url::Url, CsrfToken), OauthError> {
        let client = Self::build_client(cfg, redirect_url)?;
        let mut req = client
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(pkce_challenge)
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent");

        for scope in &cfg.oauth_scopes {
            req = req.add_scope(Scope::new(scope.clone()));
        }

        Ok(req.url())
    }

    /// Exchange an authorization code (PKCE) for tokens.
    pub async fn exchange_authorization_code(
        cfg: &ResolvedConfig,
        code: AuthorizationCode,
        verifier: PkceCodeVerifier,
        redirect_url: &url::Url,
        http_client: &reqwest::Client,
    ) -> Result<GoogleTokenResponse, OauthError> {
        let client = Self::build_client(cfg, redirect_url)?;
        let token_result: GoogleTokenResponse = client
            .exchange_code(code)
            .set_pkce_verifier(verifier)
            .request_async(http_client)
            .await?;
        info!("OAuth2 code exchange completed successfully");
        Ok(token_result)
    }

    /// Refresh an access token using a raw refresh token.
    pub async fn refresh_access_token(
        cfg: &ResolvedConfig,
        refresh_token: &str,
        http_client: &reqwest::Client,
    ) -> Result<GoogleTokenResponse, OauthError> {
        let client = Self::build_client(cfg, &cfg.oauth_manual_redirect_url)?;
        let token_result: GoogleTokenResponse = client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(http_client)
            .await?;
        Ok(token_result)
    }

    /// Refresh the token bundle, preserving the composite's project parts.
    ///
    /// `invalid_grant` responses surface as [`OauthError::InvalidGrant`];
    /// everything else is transient to the caller.
    pub async fn refresh_auth_record(
        cfg: &ResolvedConfig,
        auth: &AuthRecord,
        http_client: &reqwest::Client,
    ) -> Result<AuthRecord, OauthError> {
        let parts = auth.parts();
        if parts.refresh_token.trim().is_empty() {
            return Err(OauthError::Other {
                message: "auth record carries no refresh token".to_string(),
            });
        }

        let token =
            Self::refresh_access_token(cfg, parts.refresh_token.as_str(), http_client).await?;

        let expires_in_ms = token
            .expires_in()
            .map_or(3_600_000, |d| i64::try_from(d.as_millis()).unwrap_or(3_600_000));

        Ok(AuthRecord {
            refresh: parts.compose(),
            access: Some(token.access_token().secret().clone()),
            expires: Some(now_ms() + expires_in_ms),
        })
    }
}

fn parse_err(e: url::ParseError) -> OauthError {
    OauthError::Other {
        message: format!("invalid oauth endpoint url: {e}"),
    }
}
