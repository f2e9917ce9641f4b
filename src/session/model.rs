/// Session records
///
/// A session is the server-side half of a refresh token. Only the SHA-256
/// hash of the raw token is ever stored.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

const MAX_DEVICE_TAG_LENGTH: usize = 512;

/// Lowercase hex SHA-256 of a raw refresh token
#[derive(Debug, Clone, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(transparent)]
pub struct TokenHash(String);

impl TokenHash {
    pub fn of(raw_token: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(raw_token.as_bytes());
        Self(format!("{:x}", hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Session {
    pub id: Uuid,
    pub principal_id: Uuid,
    pub token_hash: TokenHash,
    pub device_tag: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// Input to `SessionStore::create`
#[derive(Debug, Clone)]
pub struct NewSession<'a> {
    pub principal_id: Uuid,
    pub raw_token: &'a str,
    pub expires_at: DateTime<Utc>,
    pub device_tag: &'a str,
}

/// Build the audit-only device tag from a user agent and source address
pub fn device_tag(user_agent: Option<&str>, source_addr: Option<&str>) -> String {
    let tag = format!(
        "{} | {}",
        user_agent.map(str::trim).filter(|s| !s.is_empty()).unwrap_or("unknown"),
        source_addr.unwrap_or("unknown")
    );
    tag.chars().take(MAX_DEVICE_TAG_LENGTH).collect()
}

/// A live session as shown in a "manage my devices" view
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub id: Uuid,
    pub device_tag: String,
    pub created_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_current: bool,
}

impl SessionView {
    pub fn from_session(session: Session, current: Option<&TokenHash>) -> Self {
        let is_current = current.map_or(false, |hash| *hash == session.token_hash);
        Self {
            id: session.id,
            device_tag: session.device_tag,
            created_at: session.created_at,
            last_used_at: session.last_used_at,
            expires_at: session.expires_at,
            is_current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_hashing() {
        let hash1 = TokenHash::of("some.refresh.token");
        let hash2 = TokenHash::of("some.refresh.token");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1.as_str(), "some.refresh.token");
        assert_eq!(hash1.as_str().len(), 64);
    }

    #[test]
    fn test_different_tokens_different_hashes() {
        assert_ne!(TokenHash::of("token-a"), TokenHash::of("token-b"));
    }

    #[test]
    fn device_tag_combines_agent_and_address() {
        let tag = device_tag(Some("Mozilla/5.0"), Some("10.0.0.7"));
        assert_eq!(tag, "Mozilla/5.0 | 10.0.0.7");

        assert_eq!(device_tag(Some("  "), None), "unknown | unknown");
    }

    #[test]
    fn device_tag_is_capped() {
        let agent = "x".repeat(2000);
        assert_eq!(device_tag(Some(&agent), Some("1.2.3.4")).chars().count(), MAX_DEVICE_TAG_LENGTH);
    }
}
