mod antigravity;
mod oauth;

pub use antigravity::AntigravityError;
pub use oauth::OauthError;

pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}
