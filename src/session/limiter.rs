/// Session Limiter
///
/// Caps live sessions per principal by revoking the oldest ones. Must run in
/// the same transaction as the `create` that follows it, after the
/// principal's lock has been taken.

use uuid::Uuid;

use crate::error::AppError;
use crate::session::store::SessionStore;

#[derive(Debug, Clone, Copy)]
pub struct SessionLimiter {
    limit: usize,
}

impl SessionLimiter {
    /// `limit` is clamped to at least one session
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Make room for one more session; returns the ids that were evicted
    pub async fn enforce<S: SessionStore>(
        &self,
        store: &S,
        tx: &mut S::Tx,
        principal_id: Uuid,
    ) -> Result<Vec<Uuid>, AppError> {
        let active = store.active_sessions(tx, principal_id).await?;
        if active.len() < self.limit {
            return Ok(Vec::new());
        }

        let excess = active.len() - self.limit + 1;
        let mut evicted = Vec::with_capacity(excess);
        for session in active.into_iter().take(excess) {
            if store.revoke_by_id(tx, session.id, principal_id).await? {
                evicted.push(session.id);
            }
        }

        tracing::info!(
            principal_id = %principal_id,
            evicted = evicted.len(),
            limit = self.limit,
            "Evicted oldest sessions over the limit"
        );

        Ok(evicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::memory::InMemorySessionStore;
    use crate::session::model::NewSession;
    use chrono::{Duration, Utc};

    async fn seed(store: &InMemorySessionStore, principal: Uuid, tokens: &[&str]) -> Vec<Uuid> {
        let mut tx = store.begin().await.unwrap();
        let mut ids = Vec::new();
        for raw in tokens {
            let session = store
                .create(
                    &mut tx,
                    NewSession {
                        principal_id: principal,
                        raw_token: raw,
                        expires_at: Utc::now() + Duration::days(1),
                        device_tag: "agent | addr",
                    },
                )
                .await
                .unwrap();
            ids.push(session.id);
        }
        store.commit(tx).await.unwrap();
        ids
    }

    #[tokio::test]
    async fn under_limit_evicts_nothing() {
        let store = InMemorySessionStore::new();
        let principal = Uuid::new_v4();
        seed(&store, principal, &["a"]).await;

        let mut tx = store.begin().await.unwrap();
        let evicted = SessionLimiter::new(2).enforce(&store, &mut tx, principal).await.unwrap();
        assert!(evicted.is_empty());
    }

    #[tokio::test]
    async fn at_limit_evicts_the_oldest() {
        let store = InMemorySessionStore::new();
        let principal = Uuid::new_v4();
        let ids = seed(&store, principal, &["a", "b"]).await;

        let mut tx = store.begin().await.unwrap();
        let evicted = SessionLimiter::new(2).enforce(&store, &mut tx, principal).await.unwrap();
        assert_eq!(evicted, vec![ids[0]]);
        assert_eq!(store.active_sessions(&mut tx, principal).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn far_over_limit_leaves_room_for_exactly_one() {
        let store = InMemorySessionStore::new();
        let principal = Uuid::new_v4();
        let ids = seed(&store, principal, &["a", "b", "c", "d", "e"]).await;

        let mut tx = store.begin().await.unwrap();
        let evicted = SessionLimiter::new(2).enforce(&store, &mut tx, principal).await.unwrap();
        assert_eq!(evicted, ids[..4].to_vec());

        let remaining = store.active_sessions(&mut tx, principal).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, ids[4]);
    }

    #[tokio::test]
    async fn other_principals_are_untouched() {
        let store = InMemorySessionStore::new();
        let principal = Uuid::new_v4();
        let neighbour = Uuid::new_v4();
        seed(&store, principal, &["a", "b"]).await;
        seed(&store, neighbour, &["c", "d"]).await;

        let mut tx = store.begin().await.unwrap();
        SessionLimiter::new(2).enforce(&store, &mut tx, principal).await.unwrap();
        assert_eq!(store.active_sessions(&mut tx, neighbour).await.unwrap().len(), 2);
    }

    #[test]
    fn zero_limit_is_clamped() {
        assert_eq!(SessionLimiter::new(0).limit(), 1);
    }
}
