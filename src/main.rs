use antigravity_auth::accounts::AuthRecord;
use antigravity_auth::config::Config;
use antigravity_auth::oauth::build_http_client;
use antigravity_auth::plugin::{AntigravityPlugin, HostCredentials};
use async_trait::async_trait;
use mimalloc::MiMalloc;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// The standalone CLI has no host credential store; the pool document on
/// disk is the only persistence.
struct CliHostCredentials;

#[async_trait]
impl HostCredentials for CliHostCredentials {
    async fn get(&self) -> Option<AuthRecord> {
        None
    }
    async fn set(&self, _auth: AuthRecord) {}
    async fn clear(&self) {}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_level(true)
                .with_target(false),
        )
        .init();

    let cfg = Config::from_optional_toml().resolve();
    info!(
        accounts_path = %cfg.accounts_path.display(),
        endpoints = cfg.endpoints.len(),
        debug_sink = antigravity_auth::debug_log::enabled(),
        "antigravity-auth starting"
    );

    let plugin = AntigravityPlugin::new("antigravity", cfg.clone());
    let loader = plugin.loader(Arc::new(CliHostCredentials)).await?;
    let pool = loader.pool();
    let http = build_http_client(&cfg);

    let command = std::env::args().nth(1).unwrap_or_else(|| "login".to_string());
    match command.as_str() {
        "login" => {
            antigravity_auth::flow::enroll::login(&cfg, pool, &http).await?;
        }
        "connect" => {
            let account = antigravity_auth::flow::enroll::connect(&cfg, pool, &http).await?;
            println!("Connected {}.", account.email);
        }
        "list" => {
            let doc = pool.snapshot().await?;
            if doc.accounts.is_empty() {
                println!("No accounts enrolled.");
            }
            for account in &doc.accounts {
                let status = if account.is_rate_limited {
                    "rate-limited"
                } else {
                    "ready"
                };
                println!(
                    "{}  project={}  [{status}]",
                    account.email,
                    account
                        .project_id
                        .as_deref()
                        .or(account.managed_project_id.as_deref())
                        .unwrap_or("<managed on first use>")
                );
            }
        }
        other => {
            eprintln!("unknown command: {other}");
            eprintln!("usage: antigravity-auth [login|connect|list]");
            std::process::exit(2);
        }
    }
    Ok(())
}
