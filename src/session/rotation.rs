/// Rotation Coordinator
///
/// The two transactional paths that create sessions:
/// - `establish`: after a successful login, open a new session
/// - `rotate`: exchange a refresh token for a new pair, exactly once
///
/// Both take the principal's lock before touching any row, so login and
/// rotation acquire locks in the same order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::auth::{IssuedToken, Principal, PrincipalClaims, RefreshClaims, TokenCodec};
use crate::error::{AppError, AuthError, DatabaseError};
use crate::session::limiter::SessionLimiter;
use crate::session::model::NewSession;
use crate::session::store::SessionStore;

/// Everything a client receives after login or rotation
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
    pub principal: PrincipalClaims,
    pub session_id: Uuid,
}

pub struct RotationCoordinator<S: SessionStore> {
    store: Arc<S>,
    codec: Arc<TokenCodec>,
    limiter: SessionLimiter,
    timeout: Duration,
}

impl<S: SessionStore> RotationCoordinator<S> {
    pub fn new(store: Arc<S>, codec: Arc<TokenCodec>, limiter: SessionLimiter, timeout: Duration) -> Self {
        Self {
            store,
            codec,
            limiter,
            timeout,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Open a session for a principal whose credentials were just verified
    #[tracing::instrument(name = "session.establish", skip_all, fields(principal_id = %principal.id))]
    pub async fn establish(&self, principal: &Principal, device_tag: &str) -> Result<SessionTokens, AppError> {
        let claims = PrincipalClaims::from(principal);
        let tokens = self
            .with_timeout(async {
                let mut tx = self.store.begin().await?;
                match self.open(&mut tx, &claims, device_tag).await {
                    Ok(tokens) => {
                        self.store.commit(tx).await?;
                        Ok(tokens)
                    }
                    Err(e) => {
                        self.abort(tx).await;
                        Err(e)
                    }
                }
            })
            .await?;

        tracing::info!(
            session_id = %tokens.session_id,
            max_sessions = self.limiter.limit(),
            "Session established"
        );
        Ok(tokens)
    }

    /// Exchange `old_refresh_token` for a new access/refresh pair
    ///
    /// Fails with `InvalidToken` when the token does not verify, and with
    /// `TokenReuseDetected` when it verifies but its session is already
    /// revoked (exchanged, logged out, evicted, or lost a concurrent race).
    #[tracing::instrument(name = "session.rotate", skip_all)]
    pub async fn rotate(&self, old_refresh_token: &str, device_tag: &str) -> Result<SessionTokens, AppError> {
        let claims: RefreshClaims = self.codec.verify(old_refresh_token).map_err(|kind| {
            tracing::warn!(reason = kind.as_str(), "Refresh token failed verification");
            AppError::Auth(AuthError::InvalidToken(kind))
        })?;
        let principal = PrincipalClaims {
            id: claims.sub,
            display_name: claims.name,
            role: claims.role,
        };

        let tokens = self
            .with_timeout(async {
                let mut tx = self.store.begin().await?;
                match self.exchange(&mut tx, old_refresh_token, &principal, device_tag).await {
                    Ok(tokens) => {
                        self.store.commit(tx).await?;
                        Ok(tokens)
                    }
                    Err(e) => {
                        self.abort(tx).await;
                        Err(e)
                    }
                }
            })
            .await?;

        tracing::info!(
            principal_id = %principal.id,
            session_id = %tokens.session_id,
            "Refresh token rotated"
        );
        Ok(tokens)
    }

    async fn open(
        &self,
        tx: &mut S::Tx,
        principal: &PrincipalClaims,
        device_tag: &str,
    ) -> Result<SessionTokens, AppError> {
        self.store.lock_principal(tx, principal.id).await?;
        self.issue_session(tx, principal, device_tag).await
    }

    async fn exchange(
        &self,
        tx: &mut S::Tx,
        old_refresh_token: &str,
        principal: &PrincipalClaims,
        device_tag: &str,
    ) -> Result<SessionTokens, AppError> {
        self.store.lock_principal(tx, principal.id).await?;

        if !self.store.revoke_by_hash(tx, old_refresh_token).await? {
            tracing::warn!(
                principal_id = %principal.id,
                reason = "token_reuse",
                "Refresh token presented for a session that is no longer live"
            );
            return Err(AuthError::TokenReuseDetected.into());
        }

        self.issue_session(tx, principal, device_tag).await
    }

    /// Enforce the limit, mint both tokens and record the refresh session.
    /// The caller must already hold the principal lock.
    async fn issue_session(
        &self,
        tx: &mut S::Tx,
        principal: &PrincipalClaims,
        device_tag: &str,
    ) -> Result<SessionTokens, AppError> {
        self.limiter.enforce(self.store.as_ref(), tx, principal.id).await?;

        let refresh = self.codec.issue_refresh(principal)?;
        let access = self.codec.issue_access(principal)?;

        let session = self
            .store
            .create(
                tx,
                NewSession {
                    principal_id: principal.id,
                    raw_token: &refresh.token,
                    expires_at: refresh.expires_at,
                    device_tag,
                },
            )
            .await?;

        Ok(SessionTokens {
            access,
            refresh,
            principal: principal.clone(),
            session_id: session.id,
        })
    }

    async fn abort(&self, tx: S::Tx) {
        if let Err(e) = self.store.rollback(tx).await {
            tracing::error!(error = %e, "Failed to roll back session transaction");
        }
    }

    /// Bound the transactional section; dropping the future on timeout drops
    /// the open transaction, which rolls it back.
    async fn with_timeout<T, F>(&self, fut: F) -> Result<T, AppError>
    where
        F: Future<Output = Result<T, AppError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(timeout_ms = self.timeout.as_millis() as u64, "Session transaction timed out");
                Err(DatabaseError::Unavailable("session transaction timed out".to_string()).into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Role;
    use crate::configuration::AuthSettings;
    use crate::error::TokenError;
    use crate::session::memory::InMemorySessionStore;
    use crate::session::model::TokenHash;

    fn get_test_config(max_sessions: usize) -> AuthSettings {
        AuthSettings {
            access_secret: "access-secret-key-at-least-32-characters".to_string(),
            refresh_secret: "refresh-secret-key-at-least-32-characters".to_string(),
            issuer: "test".to_string(),
            access_token_expiry: 900,
            refresh_token_expiry: 86400,
            max_sessions,
            request_timeout_ms: 1000,
            refresh_cookie_name: "refresh_token".to_string(),
            cookie_secure: true,
        }
    }

    fn coordinator(
        max_sessions: usize,
    ) -> (RotationCoordinator<InMemorySessionStore>, Arc<InMemorySessionStore>) {
        let config = get_test_config(max_sessions);
        let store = Arc::new(InMemorySessionStore::new());
        let coordinator = RotationCoordinator::new(
            store.clone(),
            Arc::new(TokenCodec::new(&config)),
            SessionLimiter::new(config.max_sessions),
            config.request_timeout(),
        );
        (coordinator, store)
    }

    fn principal() -> Principal {
        Principal {
            id: Uuid::new_v4(),
            display_name: "Aretha Franklin".to_string(),
            role: Role::User,
            active: true,
            deleted_at: None,
        }
    }

    async fn live_ids(store: &InMemorySessionStore, principal_id: Uuid) -> Vec<Uuid> {
        let mut tx = store.begin().await.unwrap();
        let ids = store
            .active_sessions(&mut tx, principal_id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        store.rollback(tx).await.unwrap();
        ids
    }

    async fn is_revoked(store: &InMemorySessionStore, session_id: Uuid) -> bool {
        store
            .snapshot()
            .await
            .into_iter()
            .find(|s| s.id == session_id)
            .map(|s| s.is_revoked())
            .expect("session should exist")
    }

    #[tokio::test]
    async fn establish_issues_tokens_backed_by_a_session() {
        let (coordinator, store) = coordinator(2);
        let principal = principal();

        let tokens = coordinator.establish(&principal, "agent | addr").await.unwrap();

        assert_eq!(tokens.principal.id, principal.id);
        let rows = store.snapshot().await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, tokens.session_id);
        assert_eq!(rows[0].token_hash, TokenHash::of(&tokens.refresh.token));
        assert_eq!(rows[0].expires_at, tokens.refresh.expires_at);
        assert_eq!(rows[0].device_tag, "agent | addr");

        let access: crate::auth::AccessClaims = coordinator.codec().verify(&tokens.access.token).unwrap();
        assert_eq!(access.sub, principal.id);
        assert_eq!(access.role, Role::User);
    }

    #[tokio::test]
    async fn third_login_evicts_the_first_session() {
        let (coordinator, store) = coordinator(2);
        let principal = principal();

        let s1 = coordinator.establish(&principal, "d1").await.unwrap();
        let s2 = coordinator.establish(&principal, "d2").await.unwrap();
        let s3 = coordinator.establish(&principal, "d3").await.unwrap();

        assert!(is_revoked(&store, s1.session_id).await);
        assert_eq!(live_ids(&store, principal.id).await, vec![s2.session_id, s3.session_id]);
    }

    #[tokio::test]
    async fn rotation_succeeds_once_then_reports_reuse() {
        let (coordinator, store) = coordinator(2);
        let principal = principal();

        let _s1 = coordinator.establish(&principal, "d1").await.unwrap();
        let s2 = coordinator.establish(&principal, "d2").await.unwrap();
        let s3 = coordinator.establish(&principal, "d3").await.unwrap();

        let s4 = coordinator.rotate(&s2.refresh.token, "d2").await.unwrap();
        assert!(is_revoked(&store, s2.session_id).await);
        assert_ne!(s4.refresh.token, s2.refresh.token);
        assert_eq!(live_ids(&store, principal.id).await, vec![s3.session_id, s4.session_id]);

        let err = coordinator.rotate(&s2.refresh.token, "d2").await.unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthError::TokenReuseDetected)));
        assert!(err.requires_reauthentication());
        assert_eq!(live_ids(&store, principal.id).await, vec![s3.session_id, s4.session_id]);
    }

    #[tokio::test]
    async fn rotating_an_evicted_session_is_reuse() {
        let (coordinator, _store) = coordinator(1);
        let principal = principal();

        let s1 = coordinator.establish(&principal, "d1").await.unwrap();
        let _s2 = coordinator.establish(&principal, "d2").await.unwrap();

        let err = coordinator.rotate(&s1.refresh.token, "d1").await.unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthError::TokenReuseDetected)));
    }

    #[tokio::test]
    async fn concurrent_rotations_of_one_token_have_a_single_winner() {
        let (coordinator, store) = coordinator(3);
        let coordinator = Arc::new(coordinator);
        let principal = principal();
        let session = coordinator.establish(&principal, "d1").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let coordinator = coordinator.clone();
            let token = session.refresh.token.clone();
            handles.push(tokio::spawn(async move {
                coordinator.rotate(&token, "racer").await
            }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(AppError::Auth(AuthError::TokenReuseDetected)) => (),
                Err(other) => panic!("unexpected error: {:?}", other),
            }
        }

        assert_eq!(winners, 1);
        assert_eq!(live_ids(&store, principal.id).await.len(), 1);
    }

    #[tokio::test]
    async fn failed_create_rolls_back_the_revocation() {
        let (coordinator, store) = coordinator(2);
        let principal = principal();
        let session = coordinator.establish(&principal, "d1").await.unwrap();

        store.fail_next_create();
        let err = coordinator.rotate(&session.refresh.token, "d1").await.unwrap_err();
        assert!(err.is_retryable());

        // Old session still live, nothing new written
        let rows = store.snapshot().await;
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].is_revoked());

        // The client retries with the same token and succeeds exactly once
        coordinator.rotate(&session.refresh.token, "d1").await.unwrap();
        let err = coordinator.rotate(&session.refresh.token, "d1").await.unwrap_err();
        assert!(matches!(err, AppError::Auth(AuthError::TokenReuseDetected)));
    }

    #[tokio::test]
    async fn failed_create_during_login_leaves_existing_sessions_alone() {
        let (coordinator, store) = coordinator(1);
        let principal = principal();
        let session = coordinator.establish(&principal, "d1").await.unwrap();

        store.fail_next_create();
        assert!(coordinator.establish(&principal, "d2").await.is_err());

        assert_eq!(live_ids(&store, principal.id).await, vec![session.session_id]);
    }

    #[tokio::test]
    async fn unverifiable_tokens_are_invalid_not_reuse() {
        let (coordinator, _store) = coordinator(2);
        let principal = principal();
        let session = coordinator.establish(&principal, "d1").await.unwrap();

        let err = coordinator.rotate("not-a-token", "d1").await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Auth(AuthError::InvalidToken(TokenError::Malformed))
        ));

        // Access tokens are signed with a different secret
        let err = coordinator.rotate(&session.access.token, "d1").await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Auth(AuthError::InvalidToken(TokenError::BadSignature))
        ));
    }

    #[tokio::test]
    async fn refresh_token_from_another_deployment_is_rejected() {
        let (coordinator, _store) = coordinator(2);
        let mut foreign_config = get_test_config(2);
        foreign_config.refresh_secret = "some-other-refresh-secret-value-entirely".to_string();
        let foreign = TokenCodec::new(&foreign_config)
            .issue_refresh(&PrincipalClaims::from(&principal()))
            .unwrap();

        let err = coordinator.rotate(&foreign.token, "d1").await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Auth(AuthError::InvalidToken(TokenError::BadSignature))
        ));
    }

    #[tokio::test]
    async fn live_count_never_exceeds_limit() {
        let (coordinator, store) = coordinator(3);
        let principal = principal();
        let mut current = Vec::new();

        for round in 0..12 {
            let tokens = if round % 3 == 2 && !current.is_empty() {
                let old: SessionTokens = current.remove(0);
                coordinator.rotate(&old.refresh.token, "rot").await.unwrap()
            } else {
                coordinator.establish(&principal, "login").await.unwrap()
            };
            current.push(tokens);
            if current.len() > 3 {
                current.remove(0);
            }

            assert!(live_ids(&store, principal.id).await.len() <= 3);
        }
    }

    #[tokio::test]
    async fn raw_refresh_tokens_are_never_stored() {
        let (coordinator, store) = coordinator(2);
        let principal = principal();
        let mut issued = Vec::new();

        let first = coordinator.establish(&principal, "d1").await.unwrap();
        issued.push(first.refresh.token.clone());
        let second = coordinator.rotate(&first.refresh.token, "d1").await.unwrap();
        issued.push(second.refresh.token.clone());
        issued.push(coordinator.establish(&principal, "d2").await.unwrap().refresh.token);

        for row in store.snapshot().await {
            for raw in &issued {
                assert_ne!(row.token_hash.as_str(), raw);
                assert!(!row.device_tag.contains(raw.as_str()));
            }
        }
    }

    #[tokio::test]
    async fn transaction_timeout_is_retryable() {
        let config = get_test_config(2);
        let store = Arc::new(InMemorySessionStore::new());
        let coordinator = RotationCoordinator::new(
            store.clone(),
            Arc::new(TokenCodec::new(&config)),
            SessionLimiter::new(2),
            Duration::from_millis(50),
        );

        // Another writer holds the store for longer than the timeout
        let blocker = store.begin().await.unwrap();
        let err = coordinator.establish(&principal(), "d1").await.unwrap_err();
        assert!(err.is_retryable());
        drop(blocker);

        assert!(store.snapshot().await.is_empty());
    }
}
