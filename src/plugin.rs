use crate::accounts::{AccountStore, AuthRecord, EnrolledAccount, PoolHandle};
use crate::config::{Config, ResolvedConfig};
use crate::dispatch::{DispatchEngine, HostRequest, HostResponse};
use crate::error::{AntigravityError, OauthError};
use crate::flow::listener::LoopbackListener;
use crate::flow::manual::resolve_pasted_input;
use crate::flow::{PendingAuthorization, is_headless};
use crate::oauth::build_http_client;
use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

/// The host's opaque credential slot for this provider.
///
/// `clear` is invoked exactly once: when the last pooled account is evicted
/// on refresh-token revocation.
#[async_trait]
pub trait HostCredentials: Send + Sync {
    async fn get(&self) -> Option<AuthRecord>;
    async fn set(&self, auth: AuthRecord);
    async fn clear(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethodKind {
    OAuth,
    Api,
}

/// One entry in the host's authentication picker.
#[derive(Debug, Clone)]
pub struct AuthMethod {
    pub kind: AuthMethodKind,
    pub label: String,
}

/// Factory for the host plugin, parameterized by the provider id the host
/// registered this shim under.
pub fn antigravity_plugin(provider_id: impl Into<String>) -> AntigravityPlugin {
    AntigravityPlugin::new(provider_id, Config::from_optional_toml().resolve())
}

pub struct AntigravityPlugin {
    provider_id: String,
    cfg: Arc<ResolvedConfig>,
}

impl AntigravityPlugin {
    pub fn new(provider_id: impl Into<String>, cfg: ResolvedConfig) -> Self {
        Self {
            provider_id: provider_id.into(),
            cfg: Arc::new(cfg),
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn config(&self) -> &Arc<ResolvedConfig> {
        &self.cfg
    }

    /// Authentication methods surfaced to the host picker.
    pub fn methods(&self) -> Vec<AuthMethod> {
        vec![
            AuthMethod {
                kind: AuthMethodKind::OAuth,
                label: "Sign in with Google (Antigravity)".to_string(),
            },
            AuthMethod {
                kind: AuthMethodKind::Api,
                label: "Manually enter an API key".to_string(),
            },
        ]
    }

    /// Build the provider loader: loads the pool (seeding it from the host's
    /// stored token bundle when the document is empty) and wires the
    /// dispatch engine behind a fetch.
    pub async fn loader(
        &self,
        host: Arc<dyn HostCredentials>,
    ) -> Result<ProviderLoader, AntigravityError> {
        let seed_auth = host.get().await;
        let store = AccountStore::new(self.cfg.accounts_path.clone());
        let pool = PoolHandle::spawn(store, seed_auth).await?;
        let http = build_http_client(&self.cfg);
        let engine = DispatchEngine::new(self.cfg.clone(), pool, http, host);
        Ok(ProviderLoader::new(engine))
    }

    /// Start a single-account authorization for the host-embedded connect
    /// UI. The returned handle exposes the URL to show and the callback that
    /// finishes the flow.
    pub async fn authorize(&self) -> Result<Authorization, AntigravityError> {
        let http = build_http_client(&self.cfg);
        if is_headless() {
            let pending = PendingAuthorization::begin(
                &self.cfg,
                self.cfg.oauth_manual_redirect_url.clone(),
                None,
            )?;
            return Ok(Authorization {
                url: pending.url.clone(),
                instructions: "Open the URL, authorize, then paste the redirect URL or code."
                    .to_string(),
                method: AuthorizeMode::Code,
                cfg: self.cfg.clone(),
                http,
                source: CallbackSource::Manual(pending),
            });
        }

        let listener = LoopbackListener::bind().await?;
        let pending =
            PendingAuthorization::begin(&self.cfg, listener.redirect_uri(), None)?;
        Ok(Authorization {
            url: pending.url.clone(),
            instructions: "Complete the Google sign-in in your browser.".to_string(),
            method: AuthorizeMode::Auto,
            cfg: self.cfg.clone(),
            http,
            source: CallbackSource::Listener(listener, pending),
        })
    }
}

/// What `loader` hands the host: an empty api key (auth rides on the
/// injected Authorization headers) and the dispatch engine's fetch.
pub struct ProviderLoader {
    pub api_key: &'static str,
    engine: DispatchEngine,
}

impl ProviderLoader {
    fn new(engine: DispatchEngine) -> Self {
        Self {
            api_key: "",
            engine,
        }
    }

    pub async fn fetch(&self, request: HostRequest) -> Result<HostResponse, AntigravityError> {
        self.engine.fetch(request).await
    }

    pub fn pool(&self) -> &PoolHandle {
        self.engine.pool()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizeMode {
    /// Loopback listener resolves the redirect automatically.
    Auto,
    /// The host collects pasted input and passes it to the callback.
    Code,
}

enum CallbackSource {
    Listener(LoopbackListener, PendingAuthorization),
    Manual(PendingAuthorization),
}

/// A single-account authorization in flight.
pub struct Authorization {
    pub url: Url,
    pub instructions: String,
    pub method: AuthorizeMode,
    cfg: Arc<ResolvedConfig>,
    http: reqwest::Client,
    source: CallbackSource,
}

impl Authorization {
    /// Finish the flow: await the redirect (auto) or interpret the pasted
    /// input (code), exchange, and enroll into the pool.
    pub async fn callback(
        self,
        pasted: Option<&str>,
        pool: &PoolHandle,
    ) -> Result<EnrolledAccount, AntigravityError> {
        let account = match self.source {
            CallbackSource::Listener(listener, pending) => {
                let redirect = listener.wait().await?;
                pending
                    .exchange(&redirect.code, redirect.state.as_deref(), &self.cfg, &self.http)
                    .await?
            }
            CallbackSource::Manual(pending) => {
                let input = pasted.ok_or(OauthError::Flow {
                    code: "MISSING_INPUT".to_string(),
                    message: "The code flow needs the pasted redirect URL or code".to_string(),
                    details: None,
                })?;
                let pasted = resolve_pasted_input(input)?;
                pending
                    .exchange(&pasted.code, pasted.state.as_deref(), &self.cfg, &self.http)
                    .await?
            }
        };
        pool.enroll(account.clone()).await?;
        Ok(account)
    }
}
