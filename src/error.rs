use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::tokens::TokenError;

/// DbError
///
/// Classification of persistence failures. Every layer above the repository reports
/// these classes with their own status and code, and none of them retries on its own
/// (retrying is reserved for `retry::retry_database_operation`).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DbError {
    #[error("database connection failed: {0}")]
    Connection(String),
    #[error("database operation timed out: {0}")]
    Timeout(String),
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),
    #[error("foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),
    #[error("database error: {0}")]
    Other(String),
}

// Postgres `query_canceled`, raised when `statement_timeout` fires.
const PG_QUERY_CANCELED: &str = "57014";

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => DbError::Connection(err.to_string()),
            sqlx::Error::PoolTimedOut => DbError::Timeout(err.to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                DbError::UniqueViolation(db.message().to_string())
            }
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                DbError::ForeignKeyViolation(db.message().to_string())
            }
            sqlx::Error::Database(db) if db.code().as_deref() == Some(PG_QUERY_CANCELED) => {
                DbError::Timeout(db.message().to_string())
            }
            _ => DbError::Other(err.to_string()),
        }
    }
}

/// ErrorBody
///
/// The JSON shape of every rejected request. `code` is stable and machine-readable,
/// `message` is meant for humans and never carries backend internals.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub message: String,
    pub code: String,
}

/// ApiError
///
/// Every failure a route can produce. Each variant maps to exactly one HTTP status
/// and one error code:
///
/// * 400: input validation (`Validation`)
/// * 401: authentication (missing/expired/invalid tokens, unknown user, bad credentials)
/// * 403: authorization (suspended account, role mismatch)
/// * 404/409: missing or conflicting records
/// * 408/500/503: backend and configuration failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    Validation { code: &'static str, message: String },

    #[error("no access token provided")]
    NoToken,
    #[error("access token expired")]
    TokenExpired,
    #[error("access token is invalid")]
    InvalidToken,
    #[error("access token is not yet active")]
    TokenNotActive,
    #[error("user not found")]
    UserNotFound,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("no refresh token provided")]
    NoRefreshToken,
    #[error("request is not authenticated")]
    NotAuthenticated,

    #[error("account suspended")]
    AccountSuspended,
    #[error("insufficient permissions, required role: {required}")]
    InsufficientPermissions { required: String },

    #[error("{message}")]
    NotFound { code: &'static str, message: String },
    #[error("{message}")]
    Conflict { code: &'static str, message: String },

    #[error(transparent)]
    Database(#[from] DbError),
    #[error("transaction timed out")]
    TransactionTimeout,
    #[error("configuration error: {0}")]
    Config(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        ApiError::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        ApiError::NotFound {
            code,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation { .. } => StatusCode::BAD_REQUEST,
            ApiError::NoToken
            | ApiError::TokenExpired
            | ApiError::InvalidToken
            | ApiError::TokenNotActive
            | ApiError::UserNotFound
            | ApiError::InvalidCredentials
            | ApiError::NoRefreshToken
            | ApiError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            ApiError::AccountSuspended | ApiError::InsufficientPermissions { .. } => {
                StatusCode::FORBIDDEN
            }
            ApiError::NotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::Database(DbError::Connection(_)) | ApiError::TransactionTimeout => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Database(DbError::Timeout(_)) => StatusCode::REQUEST_TIMEOUT,
            ApiError::Database(_) | ApiError::Config(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation { code, .. }
            | ApiError::NotFound { code, .. }
            | ApiError::Conflict { code, .. } => *code,
            ApiError::NoToken => "NO_TOKEN",
            ApiError::TokenExpired => "TOKEN_EXPIRED",
            ApiError::InvalidToken => "INVALID_TOKEN",
            ApiError::TokenNotActive => "TOKEN_NOT_ACTIVE",
            ApiError::UserNotFound => "USER_NOT_FOUND",
            ApiError::InvalidCredentials => "INVALID_CREDENTIALS",
            ApiError::NoRefreshToken => "NO_REFRESH_TOKEN",
            ApiError::NotAuthenticated => "NOT_AUTHENTICATED",
            ApiError::AccountSuspended => "ACCOUNT_SUSPENDED",
            ApiError::InsufficientPermissions { .. } => "INSUFFICIENT_PERMISSIONS",
            ApiError::Database(DbError::Connection(_)) => "DB_CONNECTION_ERROR",
            ApiError::Database(DbError::Timeout(_)) => "DB_TIMEOUT",
            ApiError::Database(_) => "DB_ERROR",
            ApiError::TransactionTimeout => "TRANSACTION_TIMEOUT",
            ApiError::Config(_) => "CONFIG_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Short title placed in the `error` field of the body.
    fn title(&self) -> &'static str {
        match self {
            ApiError::Validation { .. } => "Validation failed",
            ApiError::NoToken | ApiError::NotAuthenticated => "Authentication required",
            ApiError::TokenExpired => "Token expired",
            ApiError::InvalidToken => "Invalid token",
            ApiError::TokenNotActive => "Token not active",
            ApiError::UserNotFound => "User not found",
            ApiError::InvalidCredentials => "Authentication failed",
            ApiError::NoRefreshToken => "Refresh token required",
            ApiError::AccountSuspended => "Account suspended",
            ApiError::InsufficientPermissions { .. } => "Insufficient permissions",
            ApiError::NotFound { .. } => "Not found",
            ApiError::Conflict { .. } => "Conflict",
            ApiError::Database(DbError::Connection(_)) => "Service unavailable",
            ApiError::Database(DbError::Timeout(_)) => "Request timeout",
            ApiError::TransactionTimeout => "Database busy",
            ApiError::Database(_) => "Database error",
            ApiError::Config(_) => "Server configuration error",
            ApiError::Internal(_) => "Internal server error",
        }
    }

    fn public_message(&self) -> String {
        match self {
            ApiError::Validation { message, .. }
            | ApiError::NotFound { message, .. }
            | ApiError::Conflict { message, .. } => message.clone(),
            ApiError::NoToken => "No access token provided. Please log in.".to_string(),
            ApiError::TokenExpired => "Your session has expired. Please log in again.".to_string(),
            ApiError::InvalidToken => {
                "Authentication token is invalid. Please log in again.".to_string()
            }
            ApiError::TokenNotActive => "Authentication token is not yet active.".to_string(),
            ApiError::UserNotFound => {
                "Your account could not be found. Please contact support.".to_string()
            }
            ApiError::InvalidCredentials => "Invalid credentials".to_string(),
            ApiError::NoRefreshToken => "No refresh token provided".to_string(),
            ApiError::NotAuthenticated => {
                "You must be logged in to access this resource.".to_string()
            }
            ApiError::AccountSuspended => {
                "Your account has been suspended. Please contact support.".to_string()
            }
            ApiError::InsufficientPermissions { required } => {
                format!("Access denied. Required role: {}.", required)
            }
            ApiError::Database(DbError::Connection(_)) => {
                "Unable to connect to database. Please try again later.".to_string()
            }
            ApiError::Database(DbError::Timeout(_)) => {
                "Database query timed out. Please try again.".to_string()
            }
            ApiError::TransactionTimeout => {
                "Database is currently busy. Please try again in a moment.".to_string()
            }
            ApiError::Database(_) => {
                "A database error occurred. Please try again.".to_string()
            }
            ApiError::Config(_) => {
                "Authentication service is not properly configured".to_string()
            }
            ApiError::Internal(_) => "An unexpected error occurred".to_string(),
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            success: false,
            error: self.title().to_string(),
            message: self.public_message(),
            code: self.code().to_string(),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => ApiError::TokenExpired,
            TokenError::NotActive => ApiError::TokenNotActive,
            TokenError::Invalid => ApiError::InvalidToken,
            TokenError::MissingSecret(_) | TokenError::IdenticalSecrets | TokenError::Signing(_) => {
                ApiError::Config(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Backend detail stays in the log; the body only carries the generic message.
        if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
            tracing::error!(code = self.code(), error = %self, "request failed");
        }
        (status, Json(self.body())).into_response()
    }
}
