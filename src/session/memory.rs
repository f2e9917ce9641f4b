/// In-memory session store
///
/// A transaction holds the store-wide lock and works on a copy of the rows;
/// `commit` publishes the copy, anything else discards it. That gives full
/// serializability, which is stricter than the per-principal ordering the
/// Postgres store provides.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::{AppError, DatabaseError};
use crate::session::model::{NewSession, Session, TokenHash};
use crate::session::store::SessionStore;

#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    rows: Arc<Mutex<Vec<Session>>>,
    fail_next_create: Arc<AtomicBool>,
}

pub struct MemoryTx {
    committed: OwnedMutexGuard<Vec<Session>>,
    working: Vec<Session>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `create` fail as if the store went away mid-transaction
    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::SeqCst);
    }

    /// Committed rows, including revoked ones
    pub async fn snapshot(&self) -> Vec<Session> {
        self.rows.lock().await.clone()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<Self::Tx, AppError> {
        let committed = self.rows.clone().lock_owned().await;
        let working = committed.clone();
        Ok(MemoryTx { committed, working })
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), AppError> {
        let MemoryTx {
            mut committed,
            working,
        } = tx;
        *committed = working;
        Ok(())
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), AppError> {
        drop(tx);
        Ok(())
    }

    async fn lock_principal(&self, _tx: &mut Self::Tx, _principal_id: Uuid) -> Result<(), AppError> {
        // The transaction already holds the store-wide lock
        Ok(())
    }

    async fn active_sessions(
        &self,
        tx: &mut Self::Tx,
        principal_id: Uuid,
    ) -> Result<Vec<Session>, AppError> {
        let now = Utc::now();
        let mut sessions: Vec<Session> = tx
            .working
            .iter()
            .filter(|s| s.principal_id == principal_id && s.is_live_at(now))
            .cloned()
            .collect();
        // Stable sort: equal timestamps keep insertion order
        sessions.sort_by_key(|s| s.created_at);
        Ok(sessions)
    }

    async fn create(&self, tx: &mut Self::Tx, new: NewSession<'_>) -> Result<Session, AppError> {
        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err(DatabaseError::Unavailable("injected create failure".to_string()).into());
        }

        let token_hash = TokenHash::of(new.raw_token);
        if tx
            .working
            .iter()
            .any(|s| s.revoked_at.is_none() && s.token_hash == token_hash)
        {
            return Err(DatabaseError::Query("duplicate live token hash".to_string()).into());
        }

        let now = Utc::now();
        let session = Session {
            id: Uuid::now_v7(),
            principal_id: new.principal_id,
            token_hash,
            device_tag: new.device_tag.to_string(),
            created_at: now,
            last_used_at: now,
            expires_at: new.expires_at,
            revoked_at: None,
        };
        tx.working.push(session.clone());
        Ok(session)
    }

    async fn revoke_by_hash(&self, tx: &mut Self::Tx, raw_token: &str) -> Result<bool, AppError> {
        let token_hash = TokenHash::of(raw_token);
        Ok(revoke_where(&mut tx.working, |s| s.token_hash == token_hash) > 0)
    }

    async fn revoke_by_id(
        &self,
        tx: &mut Self::Tx,
        session_id: Uuid,
        principal_id: Uuid,
    ) -> Result<bool, AppError> {
        Ok(revoke_where(&mut tx.working, |s| {
            s.id == session_id && s.principal_id == principal_id
        }) > 0)
    }

    async fn revoke_all_except(
        &self,
        tx: &mut Self::Tx,
        principal_id: Uuid,
        keep_raw_token: &str,
    ) -> Result<u64, AppError> {
        let keep = TokenHash::of(keep_raw_token);
        Ok(revoke_where(&mut tx.working, |s| {
            s.principal_id == principal_id && s.token_hash != keep
        }))
    }
}

/// Conditional revoke: only rows with `revoked_at` unset are touched
fn revoke_where<F>(rows: &mut [Session], matches: F) -> u64
where
    F: Fn(&Session) -> bool,
{
    let now = Utc::now();
    let mut affected = 0;
    for session in rows.iter_mut().filter(|s| s.revoked_at.is_none()) {
        if matches(session) {
            session.revoked_at = Some(now);
            session.last_used_at = now;
            affected += 1;
        }
    }
    affected
}
