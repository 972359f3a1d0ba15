use super::classify::{Disposition, classify};
use super::rewrite::{self, HostRequest, PreparedRequest};
use super::transform::{HostResponse, PassthroughTransformer, ResponseTransformer};
use crate::accounts::PoolHandle;
use crate::accounts::record::now_ms;
use crate::config::ResolvedConfig;
use crate::debug_log;
use crate::error::AntigravityError;
use crate::oauth::endpoints::OauthEndpoints;
use crate::oauth::project::ensure_project_context;
use crate::plugin::HostCredentials;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The resilient request pathway: a two-level retry loop over accounts and
/// endpoints.
///
/// For every generative-language call the engine rotates to an account,
/// makes sure it holds a live access token and a resolved project, then
/// walks the endpoint chain until a response classifies as returnable. Pool
/// transitions persist as they happen, so a crash loses at most the one
/// in-flight transition.
pub struct DispatchEngine {
    cfg: Arc<ResolvedConfig>,
    pool: PoolHandle,
    http: reqwest::Client,
    host: Arc<dyn HostCredentials>,
    transformer: Arc<dyn ResponseTransformer>,
}

impl DispatchEngine {
    pub fn new(
        cfg: Arc<ResolvedConfig>,
        pool: PoolHandle,
        http: reqwest::Client,
        host: Arc<dyn HostCredentials>,
    ) -> Self {
        Self {
            cfg,
            pool,
            http,
            host,
            transformer: Arc::new(PassthroughTransformer),
        }
    }

    pub fn with_transformer(mut self, transformer: Arc<dyn ResponseTransformer>) -> Self {
        self.transformer = transformer;
        self
    }

    pub fn pool(&self) -> &PoolHandle {
        &self.pool
    }

    /// The loader's `fetch`. Non-generative calls pass through untouched.
    pub async fn fetch(&self, request: HostRequest) -> Result<HostResponse, AntigravityError> {
        if !rewrite::is_generative_request(&request.url) {
            let response = self.execute_unrewritten(&request).await?;
            return Ok(HostResponse::from_upstream(false, "", response));
        }
        self.dispatch(request).await
    }

    async fn dispatch(&self, request: HostRequest) -> Result<HostResponse, AntigravityError> {
        let attempts = self.pool.count().await?;
        if attempts == 0 {
            return Err(AntigravityError::NoAccounts);
        }

        let mut last_failure: Option<(PreparedRequest, reqwest::Response)> = None;
        let mut last_error: Option<AntigravityError> = None;

        for attempt in 0..attempts {
            let Some(mut account) = self.pool.pick_next().await? else {
                let (wait_ms, accounts) = self.pool.cooldown_status().await?;
                return Err(AntigravityError::AllAccountsCooled { wait_ms, accounts });
            };
            debug!(attempt, email = %account.email, "selected account");

            // Ensure a live access token; refresh lazily on expiry.
            if account.needs_refresh(now_ms()) {
                let refreshed =
                    OauthEndpoints::refresh_auth_record(&self.cfg, &account.auth_details(), &self.http)
                        .await;
                match refreshed {
                    Ok(auth) => {
                        self.pool
                            .update_from_auth(account.refresh_token.clone(), auth.clone())
                            .await?;
                        account.apply_auth(&auth);
                    }
                    Err(e) if e.is_invalid_grant() => {
                        warn!(
                            email = %account.email,
                            "refresh token revoked by provider, evicting account"
                        );
                        let remaining =
                            self.pool.remove_account(account.refresh_token.clone()).await?;
                        if remaining == 0 {
                            self.host.clear().await;
                            return Err(AntigravityError::Reauthenticate);
                        }
                        last_error = Some(e.into());
                        continue;
                    }
                    Err(e) => {
                        warn!(email = %account.email, error = %e, "token refresh failed");
                        last_error = Some(e.into());
                        continue;
                    }
                }
            }
            let Some(access_token) = account.access_token.clone() else {
                last_error = Some(AntigravityError::Unexpected(
                    "account has no access token after refresh".to_string(),
                ));
                continue;
            };

            // Ensure a usable project id, folding any discovery back in.
            let ctx =
                match ensure_project_context(&self.cfg, &account.auth_details(), &self.http).await {
                    Ok(ctx) => ctx,
                    Err(e) => {
                        warn!(email = %account.email, error = %e, "project resolution failed");
                        last_error = Some(e);
                        continue;
                    }
                };
            if ctx.mutated {
                self.pool
                    .update_from_auth(account.refresh_token.clone(), ctx.auth.clone())
                    .await?;
                account.apply_auth(&ctx.auth);
            }

            // Endpoint fallback loop.
            let endpoints = &self.cfg.endpoints;
            for (i, endpoint) in endpoints.iter().enumerate() {
                let endpoints_remaining = endpoints.len() - 1 - i;
                let prepared = rewrite::prepare(
                    &request,
                    &access_token,
                    &ctx.effective_project_id,
                    endpoint,
                    &self.cfg,
                );
                debug_log::line(format!(
                    "dispatch attempt account={} endpoint={} model={}",
                    account.email,
                    prepared.endpoint,
                    prepared.effective_model.as_deref().unwrap_or("-")
                ));

                match self.execute(&prepared).await {
                    Ok(response) => {
                        let pool_size = self.pool.count().await?;
                        let disposition = classify(
                            response.status(),
                            response.headers(),
                            pool_size,
                            endpoints_remaining,
                        );
                        debug_log::line(format!(
                            "endpoint={} status={} -> {:?}",
                            prepared.endpoint,
                            response.status(),
                            disposition
                        ));
                        match disposition {
                            Disposition::Return => {
                                info!(
                                    endpoint = %prepared.endpoint,
                                    status = %response.status(),
                                    "returning upstream response"
                                );
                                return Ok(self.transformer.transform(&prepared, response));
                            }
                            Disposition::FallbackEndpoint => {
                                warn!(
                                    endpoint = %prepared.endpoint,
                                    status = %response.status(),
                                    "endpoint failed, falling back"
                                );
                                last_failure = Some((prepared, response));
                            }
                            Disposition::CooldownAccount { retry_after_ms } => {
                                info!(
                                    email = %account.email,
                                    retry_after_ms,
                                    "rate limited, cooling account and rotating"
                                );
                                self.pool
                                    .mark_rate_limited(account.refresh_token.clone(), retry_after_ms);
                                last_failure = Some((prepared, response));
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(endpoint = %prepared.endpoint, error = %e, "upstream fetch failed");
                        last_error = Some(e.into());
                        // More endpoints: keep trying them; otherwise move on
                        // to the next account.
                    }
                }
            }
        }

        // Every account was tried: the most recent observable upstream
        // response is better than a synthetic error.
        if let Some((prepared, response)) = last_failure {
            return Ok(self.transformer.transform(&prepared, response));
        }
        Err(last_error.unwrap_or(AntigravityError::AllAccountsFailed))
    }

    async fn execute(&self, prepared: &PreparedRequest) -> Result<reqwest::Response, reqwest::Error> {
        let mut req = self
            .http
            .request(prepared.method.clone(), prepared.url.clone())
            .headers(prepared.headers.clone());
        if let Some(body) = &prepared.body {
            req = req.json(body);
        }
        req.send().await
    }

    async fn execute_unrewritten(
        &self,
        request: &HostRequest,
    ) -> Result<reqwest::Response, AntigravityError> {
        let mut req = self
            .http
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            req = req.json(body);
        }
        Ok(req.send().await?)
    }
}
