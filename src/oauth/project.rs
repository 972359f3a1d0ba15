use super::ops::DiscoveryOps;
use crate::accounts::AuthRecord;
use crate::config::ResolvedConfig;
use crate::error::{AntigravityError, OauthError};
use tracing::info;

/// Outcome of project resolution: the (possibly mutated) token bundle and
/// the project every request for this account should run under.
#[derive(Debug, Clone)]
pub struct ProjectContext {
    pub auth: AuthRecord,
    pub effective_project_id: String,
    /// True when the composite gained a managed project and must be written
    /// back to the pool.
    pub mutated: bool,
}

/// Ensure the token bundle carries a usable project identifier.
///
/// The user-chosen project wins. Otherwise the upstream discovery surface is
/// asked to produce/confirm a managed project, which is folded into the
/// composite. Idempotent once a project id is present.
pub async fn ensure_project_context(
    cfg: &ResolvedConfig,
    auth: &AuthRecord,
    http_client: &reqwest::Client,
) -> Result<ProjectContext, AntigravityError> {
    let mut parts = auth.parts();
    if let Some(project_id) = parts.effective_project_id() {
        return Ok(ProjectContext {
            auth: auth.clone(),
            effective_project_id: project_id.to_string(),
            mutated: false,
        });
    }

    let access = auth.access.as_deref().ok_or(OauthError::Other {
        message: "project discovery requires an access token".to_string(),
    })?;
    let base = &cfg
        .endpoints
        .first()
        .ok_or_else(|| AntigravityError::Unexpected("endpoint list is empty".to_string()))?
        .base_url;

    let managed = DiscoveryOps::discover_project_id(base, access, http_client).await?;
    info!(project_id = %managed, "discovered managed project for account");

    parts.managed_project_id = Some(managed.clone());
    Ok(ProjectContext {
        auth: auth.clone().with_parts(&parts),
        effective_project_id: managed,
        mutated: true,
    })
}
