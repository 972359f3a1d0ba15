pub mod accounts;
pub mod config;
pub mod debug_log;
pub mod dispatch;
pub mod error;
pub mod flow;
pub mod oauth;
pub mod plugin;

pub use accounts::{Account, AccountPool, AccountStore, AuthRecord, PoolHandle, RefreshParts};
pub use dispatch::{DispatchEngine, HostRequest, HostResponse};
pub use error::{AntigravityError, OauthError};
pub use plugin::{AntigravityPlugin, HostCredentials, antigravity_plugin};
