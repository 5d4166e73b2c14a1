//! Single-scope authentication: does this identifier hold a valid grant?

use crate::errors::AuthError;
use crate::scopes::{self, Grant};
use crate::storage::IdentityStore;
use chrono::{DateTime, Utc};

/// Check that `id` holds a grant for `scope` that is still valid at `now`.
///
/// The three failure outcomes stay distinct so callers can log precisely,
/// even when they answer all of them alike.
pub async fn authenticate(
    store: &IdentityStore,
    id: &str,
    scope: &str,
    now: DateTime<Utc>,
) -> Result<Grant, AuthError> {
    let grants = store.get_scopes(id).await?;
    check_grant(&grants, scope, now).cloned()
}

pub fn check_grant<'a>(
    grants: &'a [Grant],
    scope: &str,
    now: DateTime<Utc>,
) -> Result<&'a Grant, AuthError> {
    let grant = scopes::find_grant(grants, scope).ok_or_else(|| AuthError::ScopeNotGranted {
        scope: scope.to_string(),
    })?;
    if !grant.is_valid_at(now) {
        return Err(AuthError::ScopeExpired {
            scope: scope.to_string(),
            expired_at: grant.expires_at,
        });
    }
    Ok(grant)
}
