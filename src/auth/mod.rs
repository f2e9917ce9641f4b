/// Authentication module
///
/// Token signing/verification, claim types, the principal read model, and
/// login-time credential verification.

mod claims;
mod codec;
mod password;
mod principal;

pub use claims::{AccessClaims, PrincipalClaims, RefreshClaims, SignedClaims, TokenKind};
pub use codec::{IssuedToken, TokenCodec};
pub use password::{
    hash_password, verify_password, CredentialRecord, CredentialVerifier,
    InMemoryCredentialVerifier, PgCredentialVerifier,
};
pub use principal::{Principal, Role};
