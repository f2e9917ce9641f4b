/// Credential Verification
///
/// Login-time lookup of a principal by identifier and bcrypt check of the
/// presented secret. Every failure mode that could reveal whether an
/// identifier exists collapses into `InvalidCredentials`.

use async_trait::async_trait;
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::auth::principal::{Principal, Role};
use crate::error::{AppError, AuthError};

/// Hash a secret with bcrypt
///
/// `cost` defaults to bcrypt's `DEFAULT_COST` when `None`.
pub fn hash_password(password: &str, cost: Option<u32>) -> Result<String, AppError> {
    hash(password, cost.unwrap_or(DEFAULT_COST))
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

/// Verify a secret against its bcrypt hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    verify(password, hash)
        .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))
}

/// A stored principal plus its credential hash
#[derive(Debug, Clone)]
pub struct CredentialRecord {
    pub principal: Principal,
    pub password_hash: String,
}

/// Well-formed bcrypt hash at `DEFAULT_COST` that no secret is expected to match.
/// Unknown identifiers are checked against it so they cost as much as a wrong secret.
const DUMMY_HASH: &str = "$2b$12$CCCCCCCCCCCCCCCCCCCCC.E5YPO9kmyuRGyh0XouQYb4YMJKvyOeW";

/// Check a looked-up record against the presented secret
fn check_record(record: Option<CredentialRecord>, secret: &str) -> Result<Principal, AppError> {
    let Some(record) = record else {
        let _ = verify_password(secret, DUMMY_HASH);
        return Err(AuthError::InvalidCredentials.into());
    };

    if !verify_password(secret, &record.password_hash)? {
        return Err(AuthError::InvalidCredentials.into());
    }
    // Soft-deleted accounts look exactly like unknown ones
    if record.principal.is_deleted() {
        return Err(AuthError::InvalidCredentials.into());
    }
    if !record.principal.active {
        return Err(AuthError::AccountInactive.into());
    }

    Ok(record.principal)
}

#[async_trait]
pub trait CredentialVerifier: Send + Sync + 'static {
    async fn verify_credentials(&self, identifier: &str, secret: &str) -> Result<Principal, AppError>;
}

/// Verifier backed by the platform's `users` table
pub struct PgCredentialVerifier {
    pool: PgPool,
}

impl PgCredentialVerifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    display_name: String,
    role: String,
    is_active: bool,
    deleted_at: Option<DateTime<Utc>>,
    password_hash: String,
}

#[async_trait]
impl CredentialVerifier for PgCredentialVerifier {
    async fn verify_credentials(&self, identifier: &str, secret: &str) -> Result<Principal, AppError> {
        let row = sqlx::query_as::<_, UserRow>(
            r#"
            SELECT id, display_name, role, is_active, deleted_at, password_hash
            FROM users
            WHERE lower(email) = lower($1)
            "#,
        )
        .bind(identifier.trim())
        .fetch_optional(&self.pool)
        .await?;

        let record = row
            .map(|row| -> Result<CredentialRecord, AppError> {
                let role = row.role.parse::<Role>().map_err(AppError::Internal)?;
                Ok(CredentialRecord {
                    principal: Principal {
                        id: row.id,
                        display_name: row.display_name,
                        role,
                        active: row.is_active,
                        deleted_at: row.deleted_at,
                    },
                    password_hash: row.password_hash,
                })
            })
            .transpose()?;

        check_record(record, secret)
    }
}

/// Verifier over a fixed set of accounts, keyed by lowercase identifier
#[derive(Default)]
pub struct InMemoryCredentialVerifier {
    accounts: HashMap<String, CredentialRecord>,
}

impl InMemoryCredentialVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(
        mut self,
        identifier: &str,
        password_hash: String,
        principal: Principal,
    ) -> Self {
        self.accounts.insert(
            identifier.trim().to_lowercase(),
            CredentialRecord {
                principal,
                password_hash,
            },
        );
        self
    }
}

#[async_trait]
impl CredentialVerifier for InMemoryCredentialVerifier {
    async fn verify_credentials(&self, identifier: &str, secret: &str) -> Result<Principal, AppError> {
        let record = self.accounts.get(&identifier.trim().to_lowercase()).cloned();
        check_record(record, secret)
    }
}
