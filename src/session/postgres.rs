/// Postgres-backed session store
///
/// Per-principal serialization uses a transaction-scoped advisory lock keyed
/// by the principal id, so concurrent logins for one principal queue up while
/// different principals never contend.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::AppError;
use crate::session::model::{NewSession, Session, TokenHash};
use crate::session::store::SessionStore;

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Tx, AppError> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), AppError> {
        Ok(tx.commit().await?)
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), AppError> {
        Ok(tx.rollback().await?)
    }

    async fn lock_principal(&self, tx: &mut Self::Tx, principal_id: Uuid) -> Result<(), AppError> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(principal_id.to_string())
            .execute(&mut *tx)
            .await?;
        Ok(())
    }

    async fn active_sessions(
        &self,
        tx: &mut Self::Tx,
        principal_id: Uuid,
    ) -> Result<Vec<Session>, AppError> {
        let sessions = sqlx::query_as::<_, Session>(
            r#"
            SELECT id, principal_id, token_hash, device_tag,
                   created_at, last_used_at, expires_at, revoked_at
            FROM sessions
            WHERE principal_id = $1 AND revoked_at IS NULL AND expires_at > $2
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(principal_id)
        .bind(Utc::now())
        .fetch_all(&mut *tx)
        .await?;

        Ok(sessions)
    }

    async fn create(&self, tx: &mut Self::Tx, new: NewSession<'_>) -> Result<Session, AppError> {
        let now = Utc::now();

        let session = sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions
                (id, principal_id, token_hash, device_tag, created_at, last_used_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $5, $6)
            RETURNING id, principal_id, token_hash, device_tag,
                      created_at, last_used_at, expires_at, revoked_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(new.principal_id)
        .bind(TokenHash::of(new.raw_token))
        .bind(new.device_tag)
        .bind(now)
        .bind(new.expires_at)
        .fetch_one(&mut *tx)
        .await?;

        Ok(session)
    }

    async fn revoke_by_hash(&self, tx: &mut Self::Tx, raw_token: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET revoked_at = $1, last_used_at = $1
            WHERE token_hash = $2 AND revoked_at IS NULL
            "#,
        )
        .bind(Utc::now())
        .bind(TokenHash::of(raw_token))
        .execute(&mut *tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_by_id(
        &self,
        tx: &mut Self::Tx,
        session_id: Uuid,
        principal_id: Uuid,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET revoked_at = $1, last_used_at = $1
            WHERE id = $2 AND principal_id = $3 AND revoked_at IS NULL
            "#,
        )
        .bind(Utc::now())
        .bind(session_id)
        .bind(principal_id)
        .execute(&mut *tx)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn revoke_all_except(
        &self,
        tx: &mut Self::Tx,
        principal_id: Uuid,
        keep_raw_token: &str,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE sessions
            SET revoked_at = $1, last_used_at = $1
            WHERE principal_id = $2 AND token_hash <> $3 AND revoked_at IS NULL
            "#,
        )
        .bind(Utc::now())
        .bind(principal_id)
        .bind(TokenHash::of(keep_raw_token))
        .execute(&mut *tx)
        .await?;

        Ok(result.rows_affected())
    }
}
