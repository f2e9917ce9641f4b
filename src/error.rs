/// Error Handling Module
///
/// Unified error handling for the session core and its HTTP surface:
/// 1. Domain-specific error types (token, auth, database)
/// 2. A single `AppError` used for control flow
/// 3. HTTP response mapping with structured logging
/// 4. Error context enrichment for audit logs

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use std::error::Error as StdError;
use std::fmt;

/// ============================================================================
/// 1. DOMAIN-SPECIFIC ERROR TYPES
/// ============================================================================

/// Why a signed token was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    Expired,
    Malformed,
    BadSignature,
}

impl TokenError {
    /// Short label used as a structured log field
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenError::Expired => "expired",
            TokenError::Malformed => "malformed",
            TokenError::BadSignature => "bad_signature",
        }
    }
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenError::Expired => write!(f, "token has expired"),
            TokenError::Malformed => write!(f, "token is malformed"),
            TokenError::BadSignature => write!(f, "token signature is invalid"),
        }
    }
}

impl StdError for TokenError {}

/// Session store errors
#[derive(Debug)]
pub enum DatabaseError {
    /// Transient infrastructure failure; the whole operation may be retried
    Unavailable(String),
    Query(String),
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseError::Unavailable(msg) => write!(f, "Session store unavailable: {}", msg),
            DatabaseError::Query(msg) => write!(f, "Query error: {}", msg),
        }
    }
}

impl StdError for DatabaseError {}

/// Authentication and session errors
#[derive(Debug)]
pub enum AuthError {
    InvalidCredentials,
    AccountInactive,
    MissingToken,
    InvalidToken(TokenError),
    /// A correctly signed refresh token whose session is already dead
    TokenReuseDetected,
    SessionNotFound,
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::InvalidCredentials => write!(f, "Invalid credentials"),
            AuthError::AccountInactive => write!(f, "Account is inactive"),
            AuthError::MissingToken => write!(f, "Missing authentication token"),
            AuthError::InvalidToken(e) => write!(f, "Invalid token: {}", e),
            AuthError::TokenReuseDetected => write!(f, "Refresh token reuse detected"),
            AuthError::SessionNotFound => write!(f, "Session not found"),
        }
    }
}

impl StdError for AuthError {}

/// ============================================================================
/// 2. UNIFIED APPLICATION ERROR TYPE
/// ============================================================================

#[derive(Debug)]
pub enum AppError {
    Auth(AuthError),
    Database(DatabaseError),
    Config(String),
    Internal(String),
}

impl AppError {
    /// Errors after which the client must sign in again.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            AppError::Auth(
                AuthError::MissingToken | AuthError::InvalidToken(_) | AuthError::TokenReuseDetected
            )
        )
    }

    /// Errors the client may retry with the same input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Database(DatabaseError::Unavailable(_)))
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Auth(e) => write!(f, "{}", e),
            AppError::Database(e) => write!(f, "{}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl StdError for AppError {}

// ============================================================================
// FROM IMPLEMENTATIONS
// ============================================================================

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        AppError::Auth(err)
    }
}

impl From<TokenError> for AppError {
    fn from(err: TokenError) -> Self {
        AppError::Auth(AuthError::InvalidToken(err))
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        AppError::Database(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                AppError::Database(DatabaseError::Unavailable(err.to_string()))
            }
            other => AppError::Database(DatabaseError::Query(other.to_string())),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

// ============================================================================
// 3. HTTP RESPONSE MAPPING
// ============================================================================

/// Error response structure for HTTP responses
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub error_id: String,
    pub message: String,
    pub code: String,
    pub status: u16,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_id: String, message: String, code: String, status: u16) -> Self {
        Self {
            error_id,
            message,
            code,
            status,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Trait for converting errors to HTTP responses with proper logging
pub trait ErrorHandler {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse);
}

impl ErrorHandler for AppError {
    fn error_response(&self, request_id: &str) -> (StatusCode, ErrorResponse) {
        let (status, code, message) = match self {
            AppError::Auth(e) => match e {
                AuthError::InvalidCredentials => (
                    StatusCode::UNAUTHORIZED,
                    "INVALID_CREDENTIALS",
                    "Invalid credentials",
                ),
                AuthError::AccountInactive => (
                    StatusCode::FORBIDDEN,
                    "ACCOUNT_INACTIVE",
                    "Account is inactive",
                ),
                // One body for every token failure: clients cannot tell reuse from expiry
                AuthError::MissingToken
                | AuthError::InvalidToken(_)
                | AuthError::TokenReuseDetected => (
                    StatusCode::UNAUTHORIZED,
                    "REAUTHENTICATE",
                    "Re-authentication required",
                ),
                AuthError::SessionNotFound => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", "Session not found")
                }
            },
            AppError::Database(DatabaseError::Unavailable(_)) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                "Session store temporarily unavailable",
            ),
            AppError::Database(DatabaseError::Query(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "Database error occurred",
            ),
            AppError::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "CONFIG_ERROR",
                "Server configuration error",
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "Internal server error",
            ),
        };

        let error_response = ErrorResponse::new(
            request_id.to_string(),
            message.to_string(),
            code.to_string(),
            status.as_u16(),
        );

        (status, error_response)
    }
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        ErrorContext::new("http_request").respond(self)
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Auth(AuthError::AccountInactive) => StatusCode::FORBIDDEN,
            AppError::Auth(AuthError::SessionNotFound) => StatusCode::NOT_FOUND,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::Database(DatabaseError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) | AppError::Config(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

// ============================================================================
// 4. ERROR CONTEXT ENRICHMENT
// ============================================================================

/// Request-scoped context attached to error log lines and error bodies
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub request_id: String,
    pub principal_id: Option<String>,
    pub operation: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            principal_id: None,
            operation: operation.into(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn with_principal_id(mut self, principal_id: impl ToString) -> Self {
        self.principal_id = Some(principal_id.to_string());
        self
    }

    /// Log `error` and build its HTTP response; the body's `error_id` is
    /// this context's `request_id`
    pub fn respond(&self, error: &AppError) -> HttpResponse {
        self.log_error(error);

        let (status, mut body) = ErrorHandler::error_response(error, &self.request_id);
        body.timestamp = self.timestamp.to_rfc3339();
        HttpResponse::build(status).json(body)
    }

    pub fn log_error(&self, error: &AppError) {
        let request_id = self.request_id.as_str();
        let operation = self.operation.as_str();
        let principal_id = self.principal_id.as_deref().unwrap_or("-");

        match error {
            AppError::Auth(AuthError::TokenReuseDetected) => {
                tracing::warn!(
                    request_id,
                    operation,
                    principal_id,
                    reason = "token_reuse",
                    "Refresh token reuse rejected"
                );
            }
            AppError::Auth(AuthError::InvalidToken(kind)) => {
                tracing::warn!(
                    request_id,
                    operation,
                    principal_id,
                    reason = kind.as_str(),
                    "Token rejected"
                );
            }
            AppError::Auth(e) => {
                tracing::warn!(request_id, operation, principal_id, error = %e, "Authentication error");
            }
            AppError::Database(e) => {
                tracing::error!(
                    request_id,
                    operation,
                    principal_id,
                    error = %e,
                    retryable = error.is_retryable(),
                    "Session store error"
                );
            }
            AppError::Config(msg) => {
                tracing::error!(request_id, operation, error = %msg, "Configuration error");
            }
            AppError::Internal(msg) => {
                tracing::error!(request_id, operation, principal_id, error = %msg, "Internal error");
            }
        }
    }
}
