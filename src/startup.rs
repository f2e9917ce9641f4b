use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;

use crate::auth::{CredentialVerifier, TokenCodec};
use crate::configuration::AuthSettings;
use crate::middleware::{JwtMiddleware, RequestLogger};
use crate::routes::{
    current_principal, health_check, list_sessions, login, logout, refresh,
    revoke_other_sessions, revoke_session,
};
use crate::session::{RevocationService, RotationCoordinator, SessionLimiter, SessionStore};

/// Shared state handed to every handler
pub struct AppState<S: SessionStore, V: CredentialVerifier> {
    pub verifier: V,
    pub coordinator: RotationCoordinator<S>,
    pub revocation: RevocationService<S>,
    pub codec: Arc<TokenCodec>,
    pub auth: AuthSettings,
}

impl<S: SessionStore, V: CredentialVerifier> AppState<S, V> {
    pub fn new(store: Arc<S>, verifier: V, auth: AuthSettings) -> Self {
        let codec = Arc::new(TokenCodec::new(&auth));
        let coordinator = RotationCoordinator::new(
            store.clone(),
            codec.clone(),
            SessionLimiter::new(auth.max_sessions),
            auth.request_timeout(),
        );

        Self {
            verifier,
            coordinator,
            revocation: RevocationService::new(store),
            codec,
            auth,
        }
    }
}

pub fn run<S: SessionStore, V: CredentialVerifier>(
    listener: TcpListener,
    state: AppState<S, V>,
) -> Result<Server, std::io::Error> {
    let codec = state.codec.clone();
    let state = web::Data::new(state);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(RequestLogger)
            .app_data(state.clone())
            .route("/health_check", web::get().to(health_check))
            .service(
                web::scope("/auth")
                    // Public: authenticated by credentials or the refresh cookie
                    .route("/login", web::post().to(login::<S, V>))
                    .route("/refresh", web::post().to(refresh::<S, V>))
                    .route("/logout", web::post().to(logout::<S, V>))
                    // Protected: require an access token
                    .service(
                        web::resource("/me")
                            .wrap(JwtMiddleware::new(codec.clone()))
                            .route(web::get().to(current_principal)),
                    )
                    .service(
                        web::scope("/sessions")
                            .wrap(JwtMiddleware::new(codec.clone()))
                            .route("", web::get().to(list_sessions::<S, V>))
                            .route("/revoke-others", web::post().to(revoke_other_sessions::<S, V>))
                            .route("/{session_id}", web::delete().to(revoke_session::<S, V>)),
                    ),
            )
    })
    .listen(listener)?
    .run();

    Ok(server)
}
