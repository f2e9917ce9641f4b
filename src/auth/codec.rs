/// Token Codec
///
/// Signs and verifies access and refresh tokens. Each kind has its own
/// secret and lifetime.

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};

use crate::auth::claims::{AccessClaims, PrincipalClaims, RefreshClaims, SignedClaims, TokenKind};
use crate::configuration::AuthSettings;
use crate::error::{AppError, TokenError};

/// A freshly signed token and the instant it stops being valid
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
    lifetime_seconds: i64,
}

impl KeyPair {
    fn new(secret: &str, lifetime_seconds: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            lifetime_seconds,
        }
    }
}

pub struct TokenCodec {
    access: KeyPair,
    refresh: KeyPair,
    issuer: String,
}

impl TokenCodec {
    pub fn new(settings: &AuthSettings) -> Self {
        Self {
            access: KeyPair::new(&settings.access_secret, settings.access_token_expiry),
            refresh: KeyPair::new(&settings.refresh_secret, settings.refresh_token_expiry),
            issuer: settings.issuer.clone(),
        }
    }

    pub fn access_lifetime_seconds(&self) -> i64 {
        self.access.lifetime_seconds
    }

    pub fn issue_access(&self, principal: &PrincipalClaims) -> Result<IssuedToken, AppError> {
        self.issue::<AccessClaims>(principal)
    }

    pub fn issue_refresh(&self, principal: &PrincipalClaims) -> Result<IssuedToken, AppError> {
        self.issue::<RefreshClaims>(principal)
    }

    /// Verify a token of kind `C`
    ///
    /// Checks signature, issuer, expiry (no leeway), required claims, and the
    /// `typ` tag.
    pub fn verify<C: SignedClaims>(&self, token: &str) -> Result<C, TokenError> {
        let keys = self.keys(C::KIND);

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "iat", "iss", "sub"]);
        validation.leeway = 0;

        let claims = decode::<C>(token, &keys.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(kind = ?C::KIND, error = %e, "Token verification failed");
                match e.kind() {
                    ErrorKind::ExpiredSignature => TokenError::Expired,
                    ErrorKind::InvalidSignature => TokenError::BadSignature,
                    _ => TokenError::Malformed,
                }
            })?;

        if claims.kind() != C::KIND {
            return Err(TokenError::Malformed);
        }

        Ok(claims)
    }

    fn issue<C: SignedClaims>(&self, principal: &PrincipalClaims) -> Result<IssuedToken, AppError> {
        let keys = self.keys(C::KIND);
        let now = Utc::now().timestamp();
        let exp = now + keys.lifetime_seconds;
        let claims = C::new(principal, &self.issuer, now, exp);

        let token = encode(&Header::new(Algorithm::HS256), &claims, &keys.encoding)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))?;
        let expires_at = Utc
            .timestamp_opt(exp, 0)
            .single()
            .ok_or_else(|| AppError::Internal("Token expiry out of range".to_string()))?;

        Ok(IssuedToken { token, expires_at })
    }

    fn keys(&self, kind: TokenKind) -> &KeyPair {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
        }
    }
}
