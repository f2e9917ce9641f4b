/// Session Management Routes
///
/// The "manage my devices" surface. All routes require a valid access token;
/// the refresh cookie, when present, identifies the caller's own session.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{AccessClaims, CredentialVerifier, RefreshClaims};
use crate::error::{AppError, AuthError, ErrorContext, TokenError};
use crate::routes::auth::refresh_token_from;
use crate::session::SessionStore;
use crate::startup::AppState;

#[derive(Serialize, Deserialize, Debug)]
pub struct RevokeOthersResponse {
    pub revoked: u64,
}

/// GET /auth/sessions
pub async fn list_sessions<S: SessionStore, V: CredentialVerifier>(
    req: HttpRequest,
    claims: web::ReqData<AccessClaims>,
    state: web::Data<AppState<S, V>>,
) -> Result<HttpResponse, AppError> {
    let current = refresh_token_from(&req, &state.auth);
    let sessions = state
        .revocation
        .list_sessions(claims.sub, current.as_deref())
        .await?;

    Ok(HttpResponse::Ok().json(sessions))
}

/// DELETE /auth/sessions/{session_id}
///
/// # Errors
/// - 404: No live session with that id belongs to the caller
pub async fn revoke_session<S: SessionStore, V: CredentialVerifier>(
    path: web::Path<Uuid>,
    claims: web::ReqData<AccessClaims>,
    state: web::Data<AppState<S, V>>,
) -> Result<HttpResponse, AppError> {
    state
        .revocation
        .revoke_session(path.into_inner(), claims.sub)
        .await?;

    Ok(HttpResponse::NoContent().finish())
}

/// POST /auth/sessions/revoke-others
///
/// Sign out every other device. The refresh cookie must belong to the
/// principal named by the access token and back a live session.
pub async fn revoke_other_sessions<S: SessionStore, V: CredentialVerifier>(
    req: HttpRequest,
    claims: web::ReqData<AccessClaims>,
    state: web::Data<AppState<S, V>>,
) -> HttpResponse {
    let context = ErrorContext::new("revoke_others").with_principal_id(claims.sub);

    match revoke_others_for(&req, &claims, &state).await {
        Ok(revoked) => HttpResponse::Ok().json(RevokeOthersResponse { revoked }),
        Err(e) => context.respond(&e),
    }
}

async fn revoke_others_for<S: SessionStore, V: CredentialVerifier>(
    req: &HttpRequest,
    claims: &AccessClaims,
    state: &AppState<S, V>,
) -> Result<u64, AppError> {
    let current = refresh_token_from(req, &state.auth).ok_or(AuthError::MissingToken)?;

    let refresh: RefreshClaims = state.codec.verify(&current)?;
    if refresh.sub != claims.sub {
        tracing::warn!(
            principal_id = %claims.sub,
            "Refresh cookie belongs to a different principal"
        );
        return Err(TokenError::Malformed.into());
    }

    state.revocation.revoke_others(claims.sub, &current).await
}
