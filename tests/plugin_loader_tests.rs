use antigravity_auth::accounts::{AuthRecord, EnrolledAccount};
use antigravity_auth::config::Config;
use antigravity_auth::dispatch::HostRequest;
use antigravity_auth::error::AntigravityError;
use antigravity_auth::plugin::{AntigravityPlugin, AuthMethodKind, HostCredentials};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

fn unique_accounts_path(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX_EPOCH")
        .as_nanos();
    let mut temp_path = std::env::temp_dir();
    temp_path.push(format!(
        "antigravity-plugin-{prefix}-{}-{nanos}.json",
        std::process::id()
    ));
    temp_path
}

struct SeededHost {
    seed: Option<AuthRecord>,
}

#[async_trait]
impl HostCredentials for SeededHost {
    async fn get(&self) -> Option<AuthRecord> {
        self.seed.clone()
    }
    async fn set(&self, _auth: AuthRecord) {}
    async fn clear(&self) {}
}

fn plugin_at(path: PathBuf) -> AntigravityPlugin {
    let mut cfg = Config::default().resolve();
    cfg.accounts_path = path;
    AntigravityPlugin::new("antigravity", cfg)
}

#[tokio::test]
async fn loader_pool_is_the_engine_pool_and_persists_enrollments() {
    let path = unique_accounts_path("shared-pool");
    let plugin = plugin_at(path.clone());
    let loader = plugin
        .loader(Arc::new(SeededHost {
            seed: Some(AuthRecord::new("1//seeded|proj-s")),
        }))
        .await
        .expect("loader");

    assert_eq!(loader.api_key, "", "auth rides on injected headers");

    // The host-seeded account is visible through the loader's pool.
    let pool = loader.pool();
    assert_eq!(pool.count().await.unwrap(), 1);
    let doc = pool.snapshot().await.unwrap();
    assert_eq!(doc.accounts[0].refresh_token, "1//seeded");
    assert_eq!(doc.accounts[0].project_id.as_deref(), Some("proj-s"));

    // Enrollments made through the same handle land in the engine's pool
    // document.
    pool.enroll(EnrolledAccount {
        email: "b@example.com".to_string(),
        refresh: "tok-b".to_string(),
    })
    .await
    .unwrap();

    let raw: Value = serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
    assert_eq!(raw["accounts"].as_array().unwrap().len(), 2);
    let _ = tokio::fs::remove_file(&path).await;
}

#[tokio::test]
async fn loader_fetch_reports_no_accounts_through_the_shared_pool() {
    let path = unique_accounts_path("no-accounts");
    let plugin = plugin_at(path.clone());
    let loader = plugin
        .loader(Arc::new(SeededHost { seed: None }))
        .await
        .expect("loader");
    assert_eq!(loader.pool().count().await.unwrap(), 0);

    let request = HostRequest::post_json(
        Url::parse("https://cloudcode-pa.googleapis.com/v1internal:generateContent").unwrap(),
        json!({ "model": "gemini-3-flash" }),
    );
    let err = loader.fetch(request).await.unwrap_err();
    assert!(matches!(err, AntigravityError::NoAccounts), "{err:?}");
    let _ = tokio::fs::remove_file(&path).await;
}

#[tokio::test]
async fn methods_list_oauth_and_manual_api_key_entry() {
    let path = unique_accounts_path("methods");
    let plugin = plugin_at(path);

    let kinds: Vec<AuthMethodKind> = plugin.methods().iter().map(|m| m.kind).collect();
    assert_eq!(kinds, vec![AuthMethodKind::OAuth, AuthMethodKind::Api]);
}
