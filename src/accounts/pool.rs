use super::composite::AuthRecord;
use super::record::{Account, AccountsDocument, EnrolledAccount, POOL_DOCUMENT_VERSION, now_ms};
use tracing::{debug, info};

/// In-memory account pool: a round-robin ring with per-account cooldowns.
///
/// Pure scheduling state, no IO and no locks; persistence and message
/// ordering live in the actor wrapping it.
#[derive(Debug, Default)]
pub struct AccountPool {
    accounts: Vec<Account>,
    active_index: usize,
    dirty: bool,
}

impl AccountPool {
    pub fn from_document(doc: AccountsDocument) -> Self {
        let len = doc.accounts.len();
        let clamped = if len == 0 {
            0
        } else {
            doc.active_index.clamp(0, len as i64 - 1) as usize
        };
        if clamped as i64 != doc.active_index {
            debug!(
                stored = doc.active_index,
                clamped, "clamped active index on load"
            );
        }
        Self {
            accounts: doc.accounts,
            active_index: clamped,
            dirty: false,
        }
    }

    /// Seed a single-account pool from a host-stored token bundle.
    pub fn from_seed_auth(auth: &AuthRecord) -> Self {
        let parts = auth.parts();
        let mut account = Account::new(String::new(), &parts, now_ms());
        account.apply_auth(auth);
        Self {
            accounts: vec![account],
            active_index: 0,
            dirty: true,
        }
    }

    pub fn count(&self) -> usize {
        self.accounts.len()
    }

    pub fn active_index(&self) -> usize {
        self.active_index
    }

    /// Select the next non-cooled account, round-robin from the cursor.
    ///
    /// Expired cooldowns encountered during the scan are cleared
    /// opportunistically. On success the cursor advances to one past the
    /// selected entry and `last_used` is stamped. Returns `None` iff every
    /// account is currently cooled.
    pub fn pick_next(&mut self, now_ms: i64) -> Option<Account> {
        let len = self.accounts.len();
        for offset in 0..len {
            let idx = (self.active_index + offset) % len;
            let account = &mut self.accounts[idx];
            if account.is_rate_limited {
                if account.rate_limit_reset_time > now_ms {
                    continue;
                }
                account.clear_cooldown();
                self.dirty = true;
            }
            account.last_used = now_ms;
            self.active_index = (idx + 1) % len;
            self.dirty = true;
            return Some(account.clone());
        }
        None
    }

    /// Smallest remaining cooldown across cooled accounts, floored at zero.
    /// Only meaningful right after `pick_next` returned `None`.
    pub fn min_wait_ms(&self, now_ms: i64) -> i64 {
        self.accounts
            .iter()
            .filter(|a| a.is_rate_limited)
            .map(|a| (a.rate_limit_reset_time - now_ms).max(0))
            .min()
            .unwrap_or(0)
    }

    /// Cool an account down. Monotonic: never shortens an existing cooldown.
    /// No-op when the account left the pool in the meantime.
    pub fn mark_rate_limited(&mut self, refresh_token: &str, retry_after_ms: i64, now_ms: i64) {
        let Some(account) = self.find_mut(refresh_token) else {
            return;
        };
        account.is_rate_limited = true;
        account.rate_limit_reset_time = account
            .rate_limit_reset_time
            .max(now_ms + retry_after_ms.max(0));
        self.dirty = true;
    }

    /// Fold refreshed token material back into the account.
    pub fn update_from_auth(&mut self, refresh_token: &str, auth: &AuthRecord) {
        if let Some(account) = self.find_mut(refresh_token) {
            account.apply_auth(auth);
            self.dirty = true;
        }
    }

    /// Remove by refresh-token identity. Returns whether anything was
    /// removed.
    pub fn remove(&mut self, refresh_token: &str) -> bool {
        let Some(idx) = self
            .accounts
            .iter()
            .position(|a| a.refresh_token == refresh_token)
        else {
            return false;
        };
        self.accounts.remove(idx);
        if idx < self.active_index {
            self.active_index -= 1;
        }
        if self.active_index >= self.accounts.len() {
            self.active_index = 0;
        }
        self.dirty = true;
        true
    }

    /// Enroll a freshly exchanged account. An entry with the same refresh
    /// token is updated in place instead of duplicated.
    pub fn enroll(&mut self, enrolled: &EnrolledAccount, now_ms: i64) {
        let auth = AuthRecord::new(enrolled.refresh.clone());
        let parts = auth.parts();
        if let Some(existing) = self.find_mut(&parts.refresh_token) {
            existing.email = enrolled.email.clone();
            existing.project_id = parts.project_id;
            existing.managed_project_id = parts.managed_project_id;
            existing.last_used = now_ms;
            info!(email = %existing.email, "updated existing account in place");
        } else {
            let account = Account::new(enrolled.email.clone(), &parts, now_ms);
            info!(email = %account.email, total = self.accounts.len() + 1, "enrolled account");
            self.accounts.push(account);
        }
        self.dirty = true;
    }

    /// Serialize to the persisted document shape, clamping the cursor.
    pub fn document(&self) -> AccountsDocument {
        let len = self.accounts.len();
        let idx = if len == 0 {
            0
        } else {
            self.active_index.min(len - 1)
        };
        AccountsDocument {
            version: POOL_DOCUMENT_VERSION,
            accounts: self.accounts.clone(),
            active_index: idx as i64,
        }
    }

    /// Consume the dirty flag; the caller persists when this returns true.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    fn find_mut(&mut self, refresh_token: &str) -> Option<&mut Account> {
        self.accounts
            .iter_mut()
            .find(|a| a.refresh_token == refresh_token)
    }
}
