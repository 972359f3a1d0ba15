use figment::{
    Figment,
    providers::{Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;
use url::Url;

/// One upstream base URL in the fallback chain.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    pub label: String,
    pub base_url: Url,
}

/// Shim configuration managed by Figment.
///
/// OAuth endpoints and client credentials are intentionally fixed to built-in
/// defaults (not configurable via `config.toml`); they land on the resolved
/// config so tests can point them at local mocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Ordered endpoint fallback chain.
    /// TOML: `endpoints`. Defaults to daily, autopush, prod cloudcode bases.
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<EndpointConfig>,

    /// Optional upstream HTTP proxy for reqwest clients.
    #[serde(default)]
    pub proxy: Option<Url>,

    /// Allow HTTP/2 multiplexing; disabled forces HTTP/1 with short-lived
    /// connections.
    #[serde(default = "default_true")]
    pub enable_multiplexing: bool,

    /// Override for the persisted accounts document path.
    /// Defaults to `<config-dir>/antigravity-accounts.json`.
    #[serde(default)]
    pub accounts_path: Option<PathBuf>,

    /// Requested-model to upstream-model overrides. Identity when absent.
    #[serde(default)]
    pub model_aliases: HashMap<String, String>,

    /// Cap on interactive enrollment.
    #[serde(default = "default_max_accounts")]
    pub max_accounts: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            proxy: None,
            enable_multiplexing: true,
            accounts_path: None,
            model_aliases: HashMap::new(),
            max_accounts: default_max_accounts(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub endpoints: Vec<EndpointConfig>,
    pub proxy: Option<Url>,
    pub enable_multiplexing: bool,
    pub accounts_path: PathBuf,
    pub model_aliases: HashMap<String, String>,
    pub max_accounts: usize,
    pub oauth_auth_url: Url,
    pub oauth_token_url: Url,
    pub oauth_manual_redirect_url: Url,
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
    pub oauth_scopes: Vec<String>,
    pub user_agent: String,
}

const DEFAULT_CONFIG_FILE: &str = "config.toml";

pub const ACCOUNTS_FILE_NAME: &str = "antigravity-accounts.json";

impl Config {
    /// Builds a Figment that merges defaults and a config TOML file.
    pub fn figment() -> Figment {
        let figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if PathBuf::from(DEFAULT_CONFIG_FILE).is_file() {
            figment.merge(Toml::file(DEFAULT_CONFIG_FILE))
        } else {
            figment
        }
    }

    /// Loads configuration by merging defaults and `config.toml` if present.
    pub fn from_optional_toml() -> Self {
        Self::figment().extract().unwrap_or_else(|err| {
            panic!("failed to extract configuration (defaults + optional config.toml): {err}")
        })
    }

    pub fn resolve(&self) -> ResolvedConfig {
        ResolvedConfig {
            endpoints: self.endpoints.clone(),
            proxy: self.proxy.clone(),
            enable_multiplexing: self.enable_multiplexing,
            accounts_path: self
                .accounts_path
                .clone()
                .unwrap_or_else(default_accounts_path),
            model_aliases: self.model_aliases.clone(),
            max_accounts: self.max_accounts,
            oauth_auth_url: default_oauth_auth_url(),
            oauth_token_url: default_oauth_token_url(),
            oauth_manual_redirect_url: default_oauth_manual_redirect_url(),
            oauth_client_id: default_oauth_client_id(),
            oauth_client_secret: default_oauth_client_secret(),
            oauth_scopes: default_oauth_scopes(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_accounts() -> usize {
    10
}

fn default_endpoints() -> Vec<EndpointConfig> {
    let parse = |label: &str, base: &str| EndpointConfig {
        label: label.to_string(),
        base_url: Url::parse(base).expect("default endpoint base must be a valid URL"),
    };
    vec![
        parse("daily", "https://daily-cloudcode-pa.googleapis.com"),
        parse("autopush", "https://autopush-cloudcode-pa.googleapis.com"),
        parse("prod", "https://cloudcode-pa.googleapis.com"),
    ]
}

fn default_accounts_path() -> PathBuf {
    let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(ACCOUNTS_FILE_NAME);
    path
}

fn default_oauth_auth_url() -> Url {
    Url::parse("https://accounts.google.com/o/oauth2/v2/auth")
        .expect("default oauth_auth_url must be a valid URL")
}

fn default_oauth_token_url() -> Url {
    Url::parse("https://oauth2.googleapis.com/token")
        .expect("default oauth_token_url must be a valid URL")
}

fn default_oauth_manual_redirect_url() -> Url {
    Url::parse("http://localhost:8188").expect("default manual redirect must be a valid URL")
}

fn default_oauth_client_id() -> String {
    "1071006060591-tmhssin2h21lcre235vtolojh4g403ep.apps.googleusercontent.com".to_string()
}

fn default_oauth_client_secret() -> String {
    "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".to_string()
}

fn default_oauth_scopes() -> Vec<String> {
    vec![
        "https://www.googleapis.com/auth/cloud-platform".to_string(),
        "https://www.googleapis.com/auth/userinfo.email".to_string(),
        "https://www.googleapis.com/auth/userinfo.profile".to_string(),
        "https://www.googleapis.com/auth/cclog".to_string(),
        "https://www.googleapis.com/auth/experimentsandconfigs".to_string(),
    ]
}

fn default_user_agent() -> String {
    "antigravity/1.16.5 linux/amd64".to_string()
}

/// Global, lazily-initialized configuration instance.
pub static CONFIG: LazyLock<Config> = LazyLock::new(Config::from_optional_toml);
