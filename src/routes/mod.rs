mod auth;
mod health_check;
mod sessions;

pub use auth::{current_principal, login, logout, refresh, AuthResponse, LoginRequest};
pub use health_check::health_check;
pub use sessions::{list_sessions, revoke_other_sessions, revoke_session, RevokeOthersResponse};
