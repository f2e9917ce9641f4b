/// JWT Claims structures
///
/// Access and refresh tokens carry the same principal payload but are
/// separate types, each tagged with its kind so one can never be accepted
/// in place of the other.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::principal::{Principal, Role};

/// Token kind tag, serialized as the `typ` claim
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// The identity payload shared by both token kinds
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PrincipalClaims {
    pub id: Uuid,
    pub display_name: String,
    pub role: Role,
}

impl From<&Principal> for PrincipalClaims {
    fn from(principal: &Principal) -> Self {
        Self {
            id: principal.id,
            display_name: principal.display_name.clone(),
            role: principal.role,
        }
    }
}

/// Claims common to every signed token kind
pub trait SignedClaims: Serialize + for<'de> Deserialize<'de> {
    const KIND: TokenKind;

    fn new(principal: &PrincipalClaims, issuer: &str, issued_at: i64, expires_at: i64) -> Self;

    fn kind(&self) -> TokenKind;

    fn principal(&self) -> PrincipalClaims;
}

/// Claims of a short-lived access token
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct AccessClaims {
    /// Subject (principal id)
    pub sub: Uuid,
    /// Display name
    pub name: String,
    pub role: Role,
    pub typ: TokenKind,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: Uuid,
}

/// Claims of a long-lived refresh token
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RefreshClaims {
    pub sub: Uuid,
    pub name: String,
    pub role: Role,
    pub typ: TokenKind,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    /// Random id; keeps two refresh tokens minted in the same second distinct
    pub jti: Uuid,
}

impl SignedClaims for AccessClaims {
    const KIND: TokenKind = TokenKind::Access;

    fn new(principal: &PrincipalClaims, issuer: &str, issued_at: i64, expires_at: i64) -> Self {
        Self {
            sub: principal.id,
            name: principal.display_name.clone(),
            role: principal.role,
            typ: Self::KIND,
            iss: issuer.to_string(),
            iat: issued_at,
            exp: expires_at,
            jti: Uuid::new_v4(),
        }
    }

    fn kind(&self) -> TokenKind {
        self.typ
    }

    fn principal(&self) -> PrincipalClaims {
        PrincipalClaims {
            id: self.sub,
            display_name: self.name.clone(),
            role: self.role,
        }
    }
}

impl SignedClaims for RefreshClaims {
    const KIND: TokenKind = TokenKind::Refresh;

    fn new(principal: &PrincipalClaims, issuer: &str, issued_at: i64, expires_at: i64) -> Self {
        Self {
            sub: principal.id,
            name: principal.display_name.clone(),
            role: principal.role,
            typ: Self::KIND,
            iss: issuer.to_string(),
            iat: issued_at,
            exp: expires_at,
            jti: Uuid::new_v4(),
        }
    }

    fn kind(&self) -> TokenKind {
        self.typ
    }

    fn principal(&self) -> PrincipalClaims {
        PrincipalClaims {
            id: self.sub,
            display_name: self.name.clone(),
            role: self.role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal() -> PrincipalClaims {
        PrincipalClaims {
            id: Uuid::new_v4(),
            display_name: "Nina Simone".to_string(),
            role: Role::Admin,
        }
    }

    #[test]
    fn test_claims_creation() {
        let principal = principal();
        let claims = RefreshClaims::new(&principal, "test", 100, 200);

        assert_eq!(claims.sub, principal.id);
        assert_eq!(claims.typ, TokenKind::Refresh);
        assert_eq!(claims.iss, "test");
        assert_eq!(claims.exp, 200);
        assert_eq!(claims.principal(), principal);
    }

    #[test]
    fn test_jti_is_unique_per_token() {
        let principal = principal();
        let a = RefreshClaims::new(&principal, "test", 100, 200);
        let b = RefreshClaims::new(&principal, "test", 100, 200);

        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let claims = AccessClaims::new(&principal(), "test", 100, 200);
        let mut value = serde_json::to_value(&claims).unwrap();
        value["admin"] = serde_json::json!(true);

        assert!(serde_json::from_value::<AccessClaims>(value).is_err());
    }

    #[test]
    fn test_missing_role_rejected() {
        let claims = AccessClaims::new(&principal(), "test", 100, 200);
        let mut value = serde_json::to_value(&claims).unwrap();
        value.as_object_mut().unwrap().remove("role");

        assert!(serde_json::from_value::<AccessClaims>(value).is_err());
    }
}
