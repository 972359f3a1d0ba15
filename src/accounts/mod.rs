mod actor;
mod composite;
mod pool;
pub(crate) mod record;
mod store;

pub use actor::PoolHandle;
pub use composite::{AuthRecord, RefreshParts};
pub use pool::AccountPool;
pub use record::{Account, AccountsDocument, EnrolledAccount, POOL_DOCUMENT_VERSION};
pub use store::AccountStore;
