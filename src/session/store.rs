/// Session Store contract
///
/// Every operation runs inside a caller-supplied transaction. Revocations are
/// conditional updates (`... WHERE revoked_at IS NULL`), so two callers racing
/// on the same row can never both observe success.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;
use crate::session::model::{NewSession, Session};

#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Open transaction. Dropping it without `commit` rolls it back.
    type Tx: Send;

    async fn begin(&self) -> Result<Self::Tx, AppError>;

    async fn commit(&self, tx: Self::Tx) -> Result<(), AppError>;

    async fn rollback(&self, tx: Self::Tx) -> Result<(), AppError>;

    /// Serialize writers touching one principal's sessions until the
    /// transaction ends.
    async fn lock_principal(&self, tx: &mut Self::Tx, principal_id: Uuid) -> Result<(), AppError>;

    /// Live sessions (not revoked, not expired), oldest first.
    async fn active_sessions(
        &self,
        tx: &mut Self::Tx,
        principal_id: Uuid,
    ) -> Result<Vec<Session>, AppError>;

    /// Persist a session for `new.raw_token`; only its hash is stored.
    async fn create(&self, tx: &mut Self::Tx, new: NewSession<'_>) -> Result<Session, AppError>;

    /// Revoke the live session whose hash matches `raw_token`.
    ///
    /// Returns `false` when no live row matched.
    async fn revoke_by_hash(&self, tx: &mut Self::Tx, raw_token: &str) -> Result<bool, AppError>;

    /// Revoke one live session owned by `principal_id`.
    async fn revoke_by_id(
        &self,
        tx: &mut Self::Tx,
        session_id: Uuid,
        principal_id: Uuid,
    ) -> Result<bool, AppError>;

    /// Revoke every live session of `principal_id` except the one backing
    /// `keep_raw_token`. Returns how many were revoked.
    async fn revoke_all_except(
        &self,
        tx: &mut Self::Tx,
        principal_id: Uuid,
        keep_raw_token: &str,
    ) -> Result<u64, AppError>;
}
