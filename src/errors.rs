use chrono::{DateTime, Utc};
use miette::Diagnostic;
use std::time::Duration;
use thiserror::Error;

/// Failures surfaced by the identity store.
///
/// Messages never include the user identifier: it doubles as a bearer
/// credential and must stay out of logs.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("Database error: {0}")]
    #[diagnostic(code(scopekeeper::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("Storage operation timed out after {0:?}")]
    #[diagnostic(
        code(scopekeeper::timeout),
        help("Raise database.operation_timeout_secs or check database health")
    )]
    Timeout(Duration),

    #[error("User not found")]
    #[diagnostic(code(scopekeeper::not_found))]
    NotFound,

    #[error("User already exists")]
    #[diagnostic(code(scopekeeper::already_exists))]
    AlreadyExists,
}

/// Outcome of an authentication query that did not succeed.
#[derive(Debug, Error, Diagnostic)]
pub enum AuthError {
    #[error("User not found")]
    #[diagnostic(code(scopekeeper::auth::user_not_found))]
    UserNotFound,

    #[error("Scope `{scope}` is not granted")]
    #[diagnostic(code(scopekeeper::auth::scope_not_granted))]
    ScopeNotGranted { scope: String },

    #[error("Scope `{scope}` expired at {expired_at}")]
    #[diagnostic(code(scopekeeper::auth::scope_expired))]
    ScopeExpired {
        scope: String,
        expired_at: DateTime<Utc>,
    },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(StoreError),
}

impl From<StoreError> for AuthError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound => AuthError::UserNotFound,
            other => AuthError::Store(other),
        }
    }
}
