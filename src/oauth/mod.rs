pub mod endpoints;
pub mod jwt;
pub mod ops;
pub mod project;

use crate::config::ResolvedConfig;
use backon::ExponentialBuilder;
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
    BasicTokenType,
};
use oauth2::{Client as OAuth2Client, ExtraTokenFields, StandardRevocableToken, StandardTokenResponse};
use reqwest::header::{CONNECTION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

/// Shared retry policy for OAuth + upstream discovery calls.
///
/// Kept small and deterministic; the dispatch engine's account and endpoint
/// loops are the only other retry layers.
pub(crate) static OAUTH_RETRY_POLICY: LazyLock<ExponentialBuilder> = LazyLock::new(|| {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(3))
        .with_max_times(3)
        .with_jitter()
});

/// Extra (non-standard) OAuth token response fields.
///
/// Keeps OpenID Connect's `id_token` (the email source) plus any additional
/// JSON fields via `flatten`. Debug output is redacted to avoid leaking
/// secrets.
#[derive(Clone, Deserialize, Serialize)]
pub struct GoogleTokenFields {
    pub id_token: Option<String>,

    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl ExtraTokenFields for GoogleTokenFields {}

impl std::fmt::Debug for GoogleTokenFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let id_token = self.id_token.as_ref().map(|_| "<redacted>");
        let mut keys: Vec<&String> = self.extra.keys().collect();
        keys.sort();

        f.debug_struct("GoogleTokenFields")
            .field("id_token", &id_token)
            .field("extra_keys", &keys)
            .finish()
    }
}

/// Standard OAuth2 token endpoint response extended with [`GoogleTokenFields`].
pub type GoogleTokenResponse = StandardTokenResponse<GoogleTokenFields, BasicTokenType>;

/// A standard OAuth2 client configured to return [`GoogleTokenResponse`].
pub(crate) type GoogleOauth2Client<
    HasAuthUrl = oauth2::EndpointSet,
    HasDeviceAuthUrl = oauth2::EndpointNotSet,
    HasIntrospectionUrl = oauth2::EndpointNotSet,
    HasRevocationUrl = oauth2::EndpointNotSet,
    HasTokenUrl = oauth2::EndpointSet,
> = OAuth2Client<
    BasicErrorResponse,
    GoogleTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    HasAuthUrl,
    HasDeviceAuthUrl,
    HasIntrospectionUrl,
    HasRevocationUrl,
    HasTokenUrl,
>;

/// Build the shared outbound HTTP client (OAuth + upstream calls).
pub fn build_http_client(cfg: &ResolvedConfig) -> reqwest::Client {
    let mut headers = HeaderMap::new();
    let mut builder = reqwest::Client::builder()
        .user_agent(cfg.user_agent.clone())
        .connect_timeout(Duration::from_secs(5));

    if let Some(proxy_url) = cfg.proxy.clone() {
        let proxy =
            reqwest::Proxy::all(proxy_url.as_str()).expect("invalid proxy url for reqwest client");
        builder = builder.proxy(proxy);
    }

    if cfg.enable_multiplexing {
        builder = builder.http2_adaptive_window(true);
    } else {
        headers.insert(CONNECTION, HeaderValue::from_static("close"));
        builder = builder
            .http1_only()
            .pool_max_idle_per_host(0)
            .pool_idle_timeout(Duration::from_secs(0));
    }

    builder
        .default_headers(headers)
        .build()
        .expect("FATAL: initialize antigravity HTTP client failed")
}
