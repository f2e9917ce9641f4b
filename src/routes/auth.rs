/// Authentication Routes
///
/// Login, refresh-token rotation, logout, and the current principal.
/// The refresh token only ever travels in an HTTP-only cookie scoped to
/// `/auth`; the access token is returned in the JSON body.

use actix_web::cookie::{time::OffsetDateTime, Cookie, SameSite};
use actix_web::http::header::USER_AGENT;
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::{AccessClaims, CredentialVerifier, IssuedToken, PrincipalClaims, SignedClaims};
use crate::configuration::AuthSettings;
use crate::error::{AppError, AuthError, ErrorContext};
use crate::session::{device_tag, SessionStore, SessionTokens};
use crate::startup::AppState;

/// Path every refresh-token cookie is scoped to
pub const REFRESH_COOKIE_PATH: &str = "/auth";

#[derive(Deserialize)]
pub struct LoginRequest {
    pub identifier: String,
    pub secret: String,
}

/// Response body after login or rotation
#[derive(Serialize, Deserialize, Debug)]
pub struct AuthResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub expires_at: DateTime<Utc>,
    pub principal: PrincipalClaims,
}

/// Device tag from the `User-Agent` header and the TCP peer address.
/// Forwarding headers are client-controlled and ignored.
pub(crate) fn request_device_tag(req: &HttpRequest) -> String {
    let user_agent = req.headers().get(USER_AGENT).and_then(|v| v.to_str().ok());
    let peer = req.peer_addr().map(|addr| addr.ip().to_string());
    device_tag(user_agent, peer.as_deref())
}

pub(crate) fn refresh_token_from(req: &HttpRequest, settings: &AuthSettings) -> Option<String> {
    req.cookie(&settings.refresh_cookie_name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

fn refresh_cookie(settings: &AuthSettings, refresh: &IssuedToken) -> Cookie<'static> {
    let mut cookie = Cookie::build(settings.refresh_cookie_name.clone(), refresh.token.clone())
        .path(REFRESH_COOKIE_PATH)
        .http_only(true)
        .secure(settings.cookie_secure)
        .same_site(SameSite::Strict)
        .finish();
    if let Ok(expires) = OffsetDateTime::from_unix_timestamp(refresh.expires_at.timestamp()) {
        cookie.set_expires(expires);
    }
    cookie
}

fn removal_cookie(settings: &AuthSettings) -> Cookie<'static> {
    let mut cookie = Cookie::build(settings.refresh_cookie_name.clone(), "")
        .path(REFRESH_COOKIE_PATH)
        .http_only(true)
        .secure(settings.cookie_secure)
        .same_site(SameSite::Strict)
        .finish();
    cookie.make_removal();
    cookie
}

fn token_response(settings: &AuthSettings, expires_in: i64, tokens: SessionTokens) -> HttpResponse {
    HttpResponse::Ok()
        .cookie(refresh_cookie(settings, &tokens.refresh))
        .json(AuthResponse {
            access_token: tokens.access.token,
            token_type: "Bearer".to_string(),
            expires_in,
            expires_at: tokens.access.expires_at,
            principal: tokens.principal,
        })
}

/// POST /auth/login
///
/// Verify credentials, open a session (evicting the oldest ones over the
/// limit), and return a fresh token pair.
///
/// # Errors
/// - 401: Invalid credentials (unknown identifier, wrong secret, deleted account)
/// - 403: Account is inactive
/// - 503: Session store unavailable (safe to retry)
pub async fn login<S: SessionStore, V: CredentialVerifier>(
    req: HttpRequest,
    form: web::Json<LoginRequest>,
    state: web::Data<AppState<S, V>>,
) -> HttpResponse {
    let context = ErrorContext::new("login");

    let principal = match state
        .verifier
        .verify_credentials(&form.identifier, &form.secret)
        .await
    {
        Ok(principal) => principal,
        Err(e) => return context.respond(&e),
    };
    let context = context.with_principal_id(principal.id);

    match state
        .coordinator
        .establish(&principal, &request_device_tag(&req))
        .await
    {
        Ok(tokens) => {
            tracing::info!(
                request_id = %context.request_id,
                principal_id = %principal.id,
                session_id = %tokens.session_id,
                "Principal logged in"
            );
            token_response(&state.auth, state.codec.access_lifetime_seconds(), tokens)
        }
        Err(e) => context.respond(&e),
    }
}

/// POST /auth/refresh
///
/// Exchange the refresh-token cookie for a new pair. Every failure that
/// requires re-authentication also clears the cookie.
///
/// # Errors
/// - 401: Missing, invalid, expired, or already-used refresh token
/// - 503: Session store unavailable (safe to retry with the same cookie)
pub async fn refresh<S: SessionStore, V: CredentialVerifier>(
    req: HttpRequest,
    state: web::Data<AppState<S, V>>,
) -> HttpResponse {
    let context = ErrorContext::new("token_refresh");

    let result = match refresh_token_from(&req, &state.auth) {
        Some(token) => state.coordinator.rotate(&token, &request_device_tag(&req)).await,
        None => Err(AuthError::MissingToken.into()),
    };

    match result {
        Ok(tokens) => {
            tracing::info!(
                request_id = %context.request_id,
                principal_id = %tokens.principal.id,
                session_id = %tokens.session_id,
                "Token refreshed"
            );
            token_response(&state.auth, state.codec.access_lifetime_seconds(), tokens)
        }
        Err(e) => {
            let mut response = context.respond(&e);
            if e.requires_reauthentication() {
                if let Err(err) = response.add_cookie(&removal_cookie(&state.auth)) {
                    tracing::error!(error = %err, "Failed to clear refresh cookie");
                }
            }
            response
        }
    }
}

/// POST /auth/logout
///
/// Revoke the session behind the refresh cookie, if any, and clear the
/// cookie. Logging out twice is not an error.
pub async fn logout<S: SessionStore, V: CredentialVerifier>(
    req: HttpRequest,
    state: web::Data<AppState<S, V>>,
) -> Result<HttpResponse, AppError> {
    if let Some(token) = refresh_token_from(&req, &state.auth) {
        state.revocation.logout(&token).await?;
    }

    Ok(HttpResponse::NoContent()
        .cookie(removal_cookie(&state.auth))
        .finish())
}

/// GET /auth/me
///
/// **Requires a valid access token.**
pub async fn current_principal(claims: web::ReqData<AccessClaims>) -> HttpResponse {
    HttpResponse::Ok().json(claims.into_inner().principal())
}
