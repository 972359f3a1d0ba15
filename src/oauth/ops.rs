use super::OAUTH_RETRY_POLICY;
use crate::error::{IsRetryable, OauthError};
use backon::Retryable;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Request metadata required by the upstream project-discovery surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct DiscoveryMetadata {
    ide_type: &'static str,
    platform: &'static str,
    plugin_type: &'static str,
}

impl Default for DiscoveryMetadata {
    fn default() -> Self {
        Self {
            ide_type: "ANTIGRAVITY",
            platform: "PLATFORM_UNSPECIFIED",
            plugin_type: "GEMINI",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct LoadCodeAssistRequest {
    metadata: DiscoveryMetadata,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct OnboardUserRequest<'a> {
    tier_id: &'a str,
    metadata: DiscoveryMetadata,
}

/// Minimal typed view of the loadCodeAssist response needed for onboarding.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LoadCodeAssistResponse {
    pub cloudaicompanion_project: Option<String>,
    #[serde(default)]
    pub allowed_tiers: Vec<AllowedTier>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AllowedTier {
    pub id: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OnboardUserOperation {
    #[serde(default)]
    done: bool,
    #[serde(default)]
    response: Option<OnboardUserResponse>,
}

#[derive(Debug, Deserialize)]
struct OnboardUserResponse {
    #[serde(rename = "cloudaicompanionProject")]
    project: Option<ProjectIdOrObject>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProjectIdOrObject {
    String(String),
    Object { id: String },
}

impl ProjectIdOrObject {
    fn into_id(self) -> Option<String> {
        match self {
            ProjectIdOrObject::String(s) if !s.trim().is_empty() => Some(s),
            ProjectIdOrObject::Object { id } if !id.trim().is_empty() => Some(id),
            _ => None,
        }
    }
}

/// Stateless project-discovery calls against the generative-language base.
pub struct DiscoveryOps;

impl DiscoveryOps {
    fn rpc_url(base: &Url, method: &str) -> String {
        format!("{}/v1internal:{method}", base.as_str().trim_end_matches('/'))
    }

    async fn load_code_assist(
        base: &Url,
        access_token: &str,
        http_client: &reqwest::Client,
    ) -> Result<Value, OauthError> {
        let resp = http_client
            .post(Self::rpc_url(base, "loadCodeAssist"))
            .bearer_auth(access_token)
            .json(&LoadCodeAssistRequest {
                metadata: DiscoveryMetadata::default(),
            })
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(OauthError::UpstreamStatus(resp.status()));
        }
        Ok(resp.json::<Value>().await?)
    }

    async fn onboard_user(
        base: &Url,
        access_token: &str,
        tier_id: &str,
        http_client: &reqwest::Client,
    ) -> Result<Value, OauthError> {
        let resp = http_client
            .post(Self::rpc_url(base, "onboardUser"))
            .bearer_auth(access_token)
            .json(&OnboardUserRequest {
                tier_id,
                metadata: DiscoveryMetadata::default(),
            })
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(OauthError::UpstreamStatus(resp.status()));
        }
        Ok(resp.json::<Value>().await?)
    }

    async fn load_code_assist_with_retry(
        base: &Url,
        access_token: &str,
        http_client: &reqwest::Client,
    ) -> Result<Value, OauthError> {
        (|| async { Self::load_code_assist(base, access_token, http_client).await })
            .retry(*OAUTH_RETRY_POLICY)
            .when(|e: &OauthError| e.is_retryable())
            .notify(|err, dur: Duration| {
                warn!("loadCodeAssist retrying after error {err}, sleeping {dur:?}");
            })
            .await
    }

    async fn onboard_user_with_retry(
        base: &Url,
        access_token: &str,
        tier_id: &str,
        http_client: &reqwest::Client,
    ) -> Result<Value, OauthError> {
        (|| async { Self::onboard_user(base, access_token, tier_id, http_client).await })
            .retry(*OAUTH_RETRY_POLICY)
            .when(|e: &OauthError| e.is_retryable())
            .notify(|err, dur: Duration| {
                warn!("onboardUser retrying after error {err}, sleeping {dur:?}");
            })
            .await
    }

    /// Discover (or provision) the managed project for this access token.
    ///
    /// `loadCodeAssist` wins when it already names a companion project;
    /// otherwise the default allowed tier is onboarded and the long-running
    /// operation is polled until it reports done.
    pub async fn discover_project_id(
        base: &Url,
        access_token: &str,
        http_client: &reqwest::Client,
    ) -> Result<String, OauthError> {
        let load_json =
            Self::load_code_assist_with_retry(base, access_token, http_client).await?;
        debug!(body = %load_json, "loadCodeAssist upstream body");

        let load_resp: LoadCodeAssistResponse =
            serde_json::from_value(load_json).map_err(|e| OauthError::Other {
                message: format!("unexpected loadCodeAssist response: {e}"),
            })?;

        if let Some(pid) = load_resp
            .cloudaicompanion_project
            .filter(|s| !s.trim().is_empty())
        {
            return Ok(pid);
        }

        let tier_id = load_resp
            .allowed_tiers
            .iter()
            .find(|t| t.is_default)
            .and_then(|t| t.id.clone())
            .unwrap_or_else(|| "LEGACY".to_string());

        Self::onboard(base, access_token, tier_id.as_str(), http_client).await
    }

    async fn onboard(
        base: &Url,
        access_token: &str,
        tier_id: &str,
        http_client: &reqwest::Client,
    ) -> Result<String, OauthError> {
        const MAX_ATTEMPTS: usize = 5;
        const RETRY_DELAY: Duration = Duration::from_secs(2);
        let mut last_resp: Option<Value> = None;

        for attempt in 1..=MAX_ATTEMPTS {
            let resp_json =
                Self::onboard_user_with_retry(base, access_token, tier_id, http_client).await?;
            debug!(body = %resp_json, "onboardUser upstream body");
            last_resp = Some(resp_json.clone());

            let op: OnboardUserOperation =
                serde_json::from_value(resp_json.clone()).map_err(|e| OauthError::Other {
                    message: format!("unexpected onboardUser response: {e}"),
                })?;
            if op.done {
                return op
                    .response
                    .and_then(|r| r.project)
                    .and_then(ProjectIdOrObject::into_id)
                    .ok_or(OauthError::Flow {
                        code: "ONBOARD_FAILED".to_string(),
                        message: "Onboarding completed but returned no project ID".to_string(),
                        details: Some(resp_json),
                    });
            }

            if attempt < MAX_ATTEMPTS {
                info!(
                    "onboardUser pending (attempt {attempt}/{MAX_ATTEMPTS}), retrying in {RETRY_DELAY:?}..."
                );
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }

        Err(OauthError::Flow {
            code: "ONBOARD_TIMEOUT".to_string(),
            message: "Project provisioning timed out".to_string(),
            details: last_resp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_urls_use_the_v1internal_verb_shape() {
        let base = Url::parse("https://daily-cloudcode-pa.googleapis.com").unwrap();
        assert_eq!(
            DiscoveryOps::rpc_url(&base, "loadCodeAssist"),
            "https://daily-cloudcode-pa.googleapis.com/v1internal:loadCodeAssist"
        );
    }

    #[test]
    fn discovery_metadata_serializes_to_the_upstream_contract() {
        let body = serde_json::to_value(LoadCodeAssistRequest {
            metadata: DiscoveryMetadata::default(),
        })
        .unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "metadata": {
                    "ideType": "ANTIGRAVITY",
                    "platform": "PLATFORM_UNSPECIFIED",
                    "pluginType": "GEMINI"
                }
            })
        );
    }

    #[test]
    fn onboard_response_project_parses_both_shapes() {
        let as_string: OnboardUserOperation = serde_json::from_value(serde_json::json!({
            "done": true,
            "response": { "cloudaicompanionProject": "p-1" }
        }))
        .unwrap();
        assert_eq!(
            as_string
                .response
                .and_then(|r| r.project)
                .and_then(ProjectIdOrObject::into_id)
                .as_deref(),
            Some("p-1")
        );

        let as_object: OnboardUserOperation = serde_json::from_value(serde_json::json!({
            "done": true,
            "response": { "cloudaicompanionProject": { "id": "p-2" } }
        }))
        .unwrap();
        assert_eq!(
            as_object
                .response
                .and_then(|r| r.project)
                .and_then(ProjectIdOrObject::into_id)
                .as_deref(),
            Some("p-2")
        );
    }
}
