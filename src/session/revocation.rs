/// Revocation Service
///
/// User-initiated session teardown: logout, "sign out this device",
/// "sign out everywhere else", and the device list that drives them.

use std::sync::Arc;
use uuid::Uuid;

use crate::error::{AppError, AuthError};
use crate::session::model::{SessionView, TokenHash};
use crate::session::store::SessionStore;

pub struct RevocationService<S: SessionStore> {
    store: Arc<S>,
}

impl<S: SessionStore> RevocationService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Idempotent logout. Returns whether a live session was revoked.
    pub async fn logout(&self, raw_token: &str) -> Result<bool, AppError> {
        let mut tx = self.store.begin().await?;
        let revoked = self.store.revoke_by_hash(&mut tx, raw_token).await?;
        self.store.commit(tx).await?;

        if revoked {
            tracing::info!("Session logged out");
        } else {
            tracing::debug!("Logout for a session that is not live");
        }
        Ok(revoked)
    }

    /// Revoke one of the caller's own sessions
    pub async fn revoke_session(&self, session_id: Uuid, principal_id: Uuid) -> Result<(), AppError> {
        let mut tx = self.store.begin().await?;
        let revoked = self.store.revoke_by_id(&mut tx, session_id, principal_id).await?;
        self.store.commit(tx).await?;

        if !revoked {
            return Err(AuthError::SessionNotFound.into());
        }
        tracing::info!(
            principal_id = %principal_id,
            session_id = %session_id,
            "Session revoked"
        );
        Ok(())
    }

    /// Revoke every session of the caller except the one backing
    /// `current_raw_token`, which must itself still be live
    pub async fn revoke_others(&self, principal_id: Uuid, current_raw_token: &str) -> Result<u64, AppError> {
        let current = TokenHash::of(current_raw_token);

        let mut tx = self.store.begin().await?;
        self.store.lock_principal(&mut tx, principal_id).await?;

        let live = self.store.active_sessions(&mut tx, principal_id).await?;
        if !live.iter().any(|s| s.token_hash == current) {
            if let Err(e) = self.store.rollback(tx).await {
                tracing::error!(error = %e, "Failed to roll back session transaction");
            }
            tracing::warn!(
                principal_id = %principal_id,
                reason = "token_reuse",
                "Revoke-others presented a session that is no longer live"
            );
            return Err(AuthError::TokenReuseDetected.into());
        }

        let count = self
            .store
            .revoke_all_except(&mut tx, principal_id, current_raw_token)
            .await?;
        self.store.commit(tx).await?;

        tracing::info!(principal_id = %principal_id, revoked = count, "Other sessions revoked");
        Ok(count)
    }

    /// Live sessions of the caller, flagging the one backing
    /// `current_raw_token`
    pub async fn list_sessions(
        &self,
        principal_id: Uuid,
        current_raw_token: Option<&str>,
    ) -> Result<Vec<SessionView>, AppError> {
        let current = current_raw_token.map(TokenHash::of);

        let mut tx = self.store.begin().await?;
        let sessions = self.store.active_sessions(&mut tx, principal_id).await?;
        self.store.commit(tx).await?;

        Ok(sessions
            .into_iter()
            .map(|s| SessionView::from_session(s, current.as_ref()))
            .collect())
    }
}
