use chrono::{DateTime, Utc};
use std::num::NonZeroU32;
use scopekeeper::expiry::Expiry;
use scopekeeper::scopes::Grant;
use scopekeeper::storage::{self, IdentityStore, User};

/// Builder for creating test users
pub struct UserBuilder {
    id: String,
    name: String,
    grants: Vec<Grant>,
}

impl UserBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            id: storage::random_id(),
            name: name.to_string(),
            grants: Vec::new(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_grant(mut self, scope: &str, expires_at: DateTime<Utc>) -> Self {
        self.grants.push(Grant::new(scope, expires_at));
        self
    }

    pub fn with_expiry(self, scope: &str, expiry: Expiry) -> Self {
        self.with_grant(scope, expiry.resolve())
    }

    /// Grant valid until the end of tomorrow
    pub fn with_scope(self, scope: &str) -> Self {
        self.with_expiry(scope, Expiry::Days(NonZeroU32::MIN))
    }

    pub fn with_expired_scope(self, scope: &str) -> Self {
        self.with_expiry(scope, Expiry::Expired)
    }

    pub fn with_permanent_scope(self, scope: &str) -> Self {
        self.with_expiry(scope, Expiry::Never)
    }

    pub async fn create(self, store: &IdentityStore) -> User {
        store
            .create_user(&self.id, &self.name, &self.grants)
            .await
            .expect("Failed to create test user")
    }
}
