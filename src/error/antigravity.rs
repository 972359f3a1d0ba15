use super::IsRetryable;
use super::oauth::OauthError;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum AntigravityError {
    #[error(
        "No Antigravity accounts are configured. Run `opencode auth login` and pick Antigravity to add one."
    )]
    NoAccounts,

    #[error(
        "All {accounts} account(s) are rate limited. Try again in {} second(s).",
        (.wait_ms + 999).div_euclid(1000)
    )]
    AllAccountsCooled { wait_ms: i64, accounts: usize },

    #[error(
        "Antigravity access was revoked for every configured account. Run `opencode auth login` to reauthenticate."
    )]
    Reauthenticate,

    #[error("All Antigravity accounts failed to serve the request")]
    AllAccountsFailed,

    #[error(transparent)]
    Oauth(#[from] OauthError),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Account pool actor error: {0}")]
    Actor(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl IsRetryable for AntigravityError {
    fn is_retryable(&self) -> bool {
        match self {
            AntigravityError::Reqwest(_) => true,
            AntigravityError::Oauth(oauth) => oauth.is_retryable(),
            _ => false,
        }
    }
}
