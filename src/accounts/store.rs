use super::record::AccountsDocument;
use crate::error::AntigravityError;
use std::path::PathBuf;
use tracing::warn;

/// Durable load/save of the accounts document.
///
/// Writes replace the whole document atomically (temp file + rename). The
/// in-memory pool stays authoritative for the process lifetime, so every
/// caller treats a failed save as log-and-continue.
#[derive(Debug, Clone)]
pub struct AccountStore {
    path: PathBuf,
}

impl AccountStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Option<AccountsDocument>, AntigravityError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<AccountsDocument>(&bytes) {
            Ok(doc) => Ok(Some(doc)),
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "accounts document unreadable, starting from an empty pool"
                );
                Ok(None)
            }
        }
    }

    pub async fn save(&self, doc: &AccountsDocument) -> Result<(), AntigravityError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_vec_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
