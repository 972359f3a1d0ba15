use super::composite::AuthRecord;
use super::pool::AccountPool;
use super::record::{Account, AccountsDocument, EnrolledAccount, now_ms};
use super::store::AccountStore;
use crate::error::AntigravityError;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use tracing::{info, warn};

/// Messages handled by the account pool actor.
///
/// Each message is one atomic pool transition; mutating handlers persist
/// before the next message is processed, so a crash loses at most one
/// transition.
#[derive(Debug)]
pub enum PoolMessage {
    /// Rotate to the next non-cooled account; persists the rotation.
    PickNext(RpcReplyPort<Option<Account>>),
    Count(RpcReplyPort<usize>),
    /// (min remaining cooldown ms, account count) for the all-cooled terminal.
    CooldownStatus(RpcReplyPort<(i64, usize)>),
    /// Cool an account down after an upstream 429.
    MarkRateLimited {
        refresh_token: String,
        retry_after_ms: i64,
    },
    /// Fold a refreshed/mutated token bundle back into an account.
    UpdateFromAuth(String, AuthRecord, RpcReplyPort<()>),
    /// Remove by refresh-token identity; replies with the remaining count.
    RemoveAccount(String, RpcReplyPort<usize>),
    /// Enroll (or update in place) an exchanged account; replies with the
    /// new count.
    Enroll(EnrolledAccount, RpcReplyPort<usize>),
    Snapshot(RpcReplyPort<AccountsDocument>),
}

/// Handle for interacting with the account pool actor.
#[derive(Clone, Debug)]
pub struct PoolHandle {
    actor: ActorRef<PoolMessage>,
}

impl PoolHandle {
    /// Load the pool from disk (seeding from a host token bundle when the
    /// document is empty) and spawn the actor around it.
    pub async fn spawn(
        store: AccountStore,
        seed_auth: Option<AuthRecord>,
    ) -> Result<Self, AntigravityError> {
        let (actor, _jh) = Actor::spawn(None, PoolActor, (store, seed_auth))
            .await
            .map_err(|e| AntigravityError::Actor(format!("failed to spawn pool actor: {e}")))?;
        Ok(Self { actor })
    }

    pub async fn pick_next(&self) -> Result<Option<Account>, AntigravityError> {
        ractor::call!(self.actor, PoolMessage::PickNext)
            .map_err(|e| AntigravityError::Actor(format!("PickNext RPC failed: {e}")))
    }

    pub async fn count(&self) -> Result<usize, AntigravityError> {
        ractor::call!(self.actor, PoolMessage::Count)
            .map_err(|e| AntigravityError::Actor(format!("Count RPC failed: {e}")))
    }

    pub async fn cooldown_status(&self) -> Result<(i64, usize), AntigravityError> {
        ractor::call!(self.actor, PoolMessage::CooldownStatus)
            .map_err(|e| AntigravityError::Actor(format!("CooldownStatus RPC failed: {e}")))
    }

    /// Fire-and-forget: the actor mailbox orders this before any later pick.
    pub fn mark_rate_limited(&self, refresh_token: impl Into<String>, retry_after_ms: i64) {
        let _ = ractor::cast!(
            self.actor,
            PoolMessage::MarkRateLimited {
                refresh_token: refresh_token.into(),
                retry_after_ms,
            }
        );
    }

    pub async fn update_from_auth(
        &self,
        refresh_token: impl Into<String>,
        auth: AuthRecord,
    ) -> Result<(), AntigravityError> {
        ractor::call!(
            self.actor,
            PoolMessage::UpdateFromAuth,
            refresh_token.into(),
            auth
        )
        .map_err(|e| AntigravityError::Actor(format!("UpdateFromAuth RPC failed: {e}")))
    }

    pub async fn remove_account(
        &self,
        refresh_token: impl Into<String>,
    ) -> Result<usize, AntigravityError> {
        ractor::call!(self.actor, PoolMessage::RemoveAccount, refresh_token.into())
            .map_err(|e| AntigravityError::Actor(format!("RemoveAccount RPC failed: {e}")))
    }

    pub async fn enroll(&self, account: EnrolledAccount) -> Result<usize, AntigravityError> {
        ractor::call!(self.actor, PoolMessage::Enroll, account)
            .map_err(|e| AntigravityError::Actor(format!("Enroll RPC failed: {e}")))
    }

    pub async fn snapshot(&self) -> Result<AccountsDocument, AntigravityError> {
        ractor::call!(self.actor, PoolMessage::Snapshot)
            .map_err(|e| AntigravityError::Actor(format!("Snapshot RPC failed: {e}")))
    }
}

struct PoolActorState {
    pool: AccountPool,
    store: AccountStore,
}

impl PoolActorState {
    /// Best-effort persist after a transition. Disk failures are logged and
    /// swallowed; the in-memory pool stays authoritative.
    async fn persist(&mut self) {
        if !self.pool.take_dirty() {
            return;
        }
        if let Err(e) = self.store.save(&self.pool.document()).await {
            warn!(
                path = %self.store.path().display(),
                error = %e,
                "failed to persist accounts document, continuing with in-memory state"
            );
        }
    }
}

struct PoolActor;

#[ractor::async_trait]
impl Actor for PoolActor {
    type Msg = PoolMessage;
    type State = PoolActorState;
    type Arguments = (AccountStore, Option<AuthRecord>);

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        (store, seed_auth): Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let doc = store
            .load()
            .await
            .map_err(|e| ActorProcessingErr::from(format!("accounts document load failed: {e}")))?;

        let pool = match doc {
            Some(doc) if !doc.accounts.is_empty() => AccountPool::from_document(doc),
            _ => match seed_auth.filter(AuthRecord::has_refresh_token) {
                Some(auth) => {
                    info!("seeding account pool from host-stored credentials");
                    AccountPool::from_seed_auth(&auth)
                }
                None => AccountPool::default(),
            },
        };

        info!(accounts = pool.count(), "account pool loaded");
        Ok(PoolActorState { pool, store })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            PoolMessage::PickNext(reply) => {
                let picked = state.pool.pick_next(now_ms());
                state.persist().await;
                let _ = reply.send(picked);
            }
            PoolMessage::Count(reply) => {
                let _ = reply.send(state.pool.count());
            }
            PoolMessage::CooldownStatus(reply) => {
                let _ = reply.send((state.pool.min_wait_ms(now_ms()), state.pool.count()));
            }
            PoolMessage::MarkRateLimited {
                refresh_token,
                retry_after_ms,
            } => {
                state
                    .pool
                    .mark_rate_limited(&refresh_token, retry_after_ms, now_ms());
                state.persist().await;
            }
            PoolMessage::UpdateFromAuth(refresh_token, auth, reply) => {
                state.pool.update_from_auth(&refresh_token, &auth);
                state.persist().await;
                let _ = reply.send(());
            }
            PoolMessage::RemoveAccount(refresh_token, reply) => {
                if state.pool.remove(&refresh_token) {
                    warn!(remaining = state.pool.count(), "account removed from pool");
                }
                state.persist().await;
                let _ = reply.send(state.pool.count());
            }
            PoolMessage::Enroll(account, reply) => {
                state.pool.enroll(&account, now_ms());
                state.persist().await;
                let _ = reply.send(state.pool.count());
            }
            PoolMessage::Snapshot(reply) => {
                let _ = reply.send(state.pool.document());
            }
        }
        Ok(())
    }
}
