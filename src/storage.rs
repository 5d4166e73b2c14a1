use crate::entities;
use crate::errors::StoreError;
use crate::scopes::{self, Grant};
use crate::settings::Database as DbCfg;
use base64ct::Encoding;
use chrono::{DateTime, Utc};
use migration::{Migrator, MigratorTrait};
use rand::RngCore;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr,
    EntityTrait, NotSet, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::time::Duration;

/// Random bytes per identifier, 64 characters once encoded.
pub const ID_BYTES: usize = 48;

/// Identifier collisions are astronomically unlikely; a few retries cover
/// them without risking a loop.
const REGISTER_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub created_at: i64,
    pub grants: Vec<Grant>,
}

/// Owner of all user records and their scope grants.
///
/// Every operation runs under the configured timeout. Scope mutations on one
/// user are single atomic statements or a single transaction, never a
/// read-modify-write of the whole record.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    db: DatabaseConnection,
    timeout: Duration,
}

pub async fn init(cfg: &DbCfg) -> Result<IdentityStore, StoreError> {
    IdentityStore::connect(cfg).await
}

impl IdentityStore {
    /// Connect, then bring the schema up to date.
    pub async fn connect(cfg: &DbCfg) -> Result<Self, StoreError> {
        let mut opts = ConnectOptions::new(cfg.url.clone());
        opts.max_connections(cfg.max_connections)
            .connect_timeout(cfg.operation_timeout())
            .acquire_timeout(cfg.operation_timeout())
            .sqlx_logging(false);

        let db = Database::connect(opts).await?;
        Migrator::up(&db, None).await?;
        tracing::info!(backend = ?db.get_database_backend(), "Identity store ready");

        Ok(Self::new(db, cfg.operation_timeout()))
    }

    pub fn new(db: DatabaseConnection, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    pub async fn close(self) -> Result<(), StoreError> {
        self.db.close().await?;
        tracing::info!("Identity store closed");
        Ok(())
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, op).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        }
    }

    /// Insert a new user with its initial grants. A colliding identifier is
    /// reported as `AlreadyExists`, never overwritten.
    pub async fn create_user(
        &self,
        id: &str,
        name: &str,
        grants: &[Grant],
    ) -> Result<User, StoreError> {
        self.bounded(self.create_user_op(id, name, grants)).await
    }

    /// Create a user under a freshly generated identifier.
    pub async fn register_user(&self, name: &str, grants: &[Grant]) -> Result<User, StoreError> {
        for attempt in 1..=REGISTER_ATTEMPTS {
            match self.create_user(&random_id(), name, grants).await {
                Err(StoreError::AlreadyExists) => {
                    tracing::warn!(attempt, "Generated identifier collided, retrying");
                }
                other => return other,
            }
        }
        Err(StoreError::AlreadyExists)
    }

    pub async fn get_user(&self, id: &str) -> Result<User, StoreError> {
        self.bounded(self.get_user_op(id)).await
    }

    pub async fn get_scopes(&self, id: &str) -> Result<Vec<Grant>, StoreError> {
        Ok(self.get_user(id).await?.grants)
    }

    /// Every user, in creation order.
    pub async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        self.bounded(self.list_users_op()).await
    }

    /// Users holding at least one grant that is no longer valid at `now`.
    pub async fn find_users_with_expired_scopes(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<User>, StoreError> {
        self.bounded(self.expired_users_op(now)).await
    }

    /// All-of check over deduplicated `names`. With `require_unexpired`, each
    /// matching grant must also be valid right now. Unknown users hold nothing.
    pub async fn has_all_scopes<I, S>(
        &self,
        id: &str,
        names: I,
        require_unexpired: bool,
    ) -> Result<bool, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = scopes::scope_set(names);
        self.bounded(self.has_all_scopes_op(id, &names, require_unexpired))
            .await
    }

    /// Upsert by scope name: each given grant replaces any grant with the same
    /// name, other grants stay untouched.
    pub async fn replace_scopes(&self, id: &str, grants: &[Grant]) -> Result<(), StoreError> {
        self.bounded(self.replace_scopes_op(id, grants)).await
    }

    /// Full overwrite: afterwards the user holds exactly `grants`.
    pub async fn set_all_scopes(&self, id: &str, grants: &[Grant]) -> Result<(), StoreError> {
        self.bounded(self.set_all_scopes_op(id, grants)).await
    }

    /// Drop every grant named in `names`. Returns how many were removed.
    pub async fn remove_scopes<I, S>(&self, id: &str, names: I) -> Result<u64, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = scopes::scope_set(names);
        self.bounded(self.remove_scopes_op(id, &names)).await
    }

    async fn create_user_op(
        &self,
        id: &str,
        name: &str,
        grants: &[Grant],
    ) -> Result<User, StoreError> {
        use entities::user::{ActiveModel, Column, Entity};

        let created_at = Utc::now().timestamp();
        let grants = scopes::dedupe_grants(grants);

        let user = ActiveModel {
            seq: NotSet,
            id: Set(id.to_string()),
            name: Set(name.to_string()),
            created_at: Set(created_at),
        };

        let txn = self.db.begin().await?;
        let inserted = Entity::insert(user)
            .on_conflict(OnConflict::column(Column::Id).do_nothing().to_owned())
            .exec_without_returning(&txn)
            .await?;
        if inserted == 0 {
            txn.rollback().await?;
            return Err(StoreError::AlreadyExists);
        }
        insert_grants(&txn, id, &grants, created_at).await?;
        txn.commit().await?;

        Ok(User {
            id: id.to_string(),
            name: name.to_string(),
            created_at,
            grants,
        })
    }

    async fn get_user_op(&self, id: &str) -> Result<User, StoreError> {
        use entities::{grant::Column, user};

        let user = entities::User::find()
            .filter(user::Column::Id.eq(id))
            .one(&self.db)
            .await?
            .ok_or(StoreError::NotFound)?;

        let grants = entities::Grant::find()
            .filter(Column::UserId.eq(id))
            .order_by_asc(Column::GrantedAt)
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await?;

        Ok(assemble(vec![user], grants).remove(0))
    }

    async fn list_users_op(&self) -> Result<Vec<User>, StoreError> {
        use entities::{grant, user};

        let users = entities::User::find()
            .order_by_asc(user::Column::Seq)
            .all(&self.db)
            .await?;
        let grants = entities::Grant::find()
            .order_by_asc(grant::Column::GrantedAt)
            .order_by_asc(grant::Column::Id)
            .all(&self.db)
            .await?;

        Ok(assemble(users, grants))
    }

    async fn expired_users_op(&self, now: DateTime<Utc>) -> Result<Vec<User>, StoreError> {
        use entities::{grant, user};

        let ids: BTreeSet<String> = entities::Grant::find()
            .filter(grant::Column::ExpiresAt.lte(now.timestamp()))
            .all(&self.db)
            .await?
            .into_iter()
            .map(|g| g.user_id)
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let users = entities::User::find()
            .filter(user::Column::Id.is_in(ids.iter().cloned()))
            .order_by_asc(user::Column::Seq)
            .all(&self.db)
            .await?;
        let grants = entities::Grant::find()
            .filter(grant::Column::UserId.is_in(ids))
            .order_by_asc(grant::Column::GrantedAt)
            .order_by_asc(grant::Column::Id)
            .all(&self.db)
            .await?;

        Ok(assemble(users, grants))
    }

    async fn has_all_scopes_op(
        &self,
        id: &str,
        names: &BTreeSet<String>,
        require_unexpired: bool,
    ) -> Result<bool, StoreError> {
        use entities::grant::Column;

        if !user_exists(&self.db, id).await? {
            return Ok(false);
        }
        if names.is_empty() {
            return Ok(true);
        }

        let grants: Vec<Grant> = entities::Grant::find()
            .filter(Column::UserId.eq(id))
            .filter(Column::Scope.is_in(names.iter().cloned()))
            .all(&self.db)
            .await?
            .into_iter()
            .map(to_grant)
            .collect();

        let valid_at = require_unexpired.then(Utc::now);
        Ok(scopes::holds_all(&grants, names, valid_at))
    }

    async fn replace_scopes_op(&self, id: &str, grants: &[Grant]) -> Result<(), StoreError> {
        use entities::grant::Column;

        // Users are never deleted, so existence cannot change under us.
        if !user_exists(&self.db, id).await? {
            return Err(StoreError::NotFound);
        }
        let grants = scopes::dedupe_grants(grants);
        if grants.is_empty() {
            return Ok(());
        }

        let now = Utc::now().timestamp();
        let models = grants.iter().map(|g| grant_model(id, g, now));

        // One statement: each named grant is swapped in place, so no reader
        // sees it missing and racing upserts cannot duplicate it.
        entities::Grant::insert_many(models)
            .on_conflict(
                OnConflict::columns([Column::UserId, Column::Scope])
                    .update_columns([Column::ExpiresAt, Column::GrantedAt])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        tracing::debug!(count = grants.len(), "Upserted scope grants");
        Ok(())
    }

    async fn set_all_scopes_op(&self, id: &str, grants: &[Grant]) -> Result<(), StoreError> {
        use entities::grant::Column;

        let grants = scopes::dedupe_grants(grants);
        let now = Utc::now().timestamp();

        // Write first so the transaction takes the write lock up front.
        let txn = self.db.begin().await?;
        entities::Grant::delete_many()
            .filter(Column::UserId.eq(id))
            .exec(&txn)
            .await?;
        if !user_exists(&txn, id).await? {
            txn.rollback().await?;
            return Err(StoreError::NotFound);
        }
        insert_grants(&txn, id, &grants, now).await?;
        txn.commit().await?;

        Ok(())
    }

    async fn remove_scopes_op(&self, id: &str, names: &BTreeSet<String>) -> Result<u64, StoreError> {
        use entities::grant::Column;

        if !user_exists(&self.db, id).await? {
            return Err(StoreError::NotFound);
        }
        if names.is_empty() {
            return Ok(0);
        }

        let result = entities::Grant::delete_many()
            .filter(Column::UserId.eq(id))
            .filter(Column::Scope.is_in(names.iter().cloned()))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }
}

/// Opaque identifier: `ID_BYTES` random bytes, URL-safe base64.
pub fn random_id() -> String {
    let mut bytes = [0u8; ID_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64ct::Base64UrlUnpadded::encode_string(&bytes)
}

async fn user_exists<C: ConnectionTrait>(conn: &C, id: &str) -> Result<bool, DbErr> {
    Ok(entities::User::find()
        .filter(entities::user::Column::Id.eq(id))
        .one(conn)
        .await?
        .is_some())
}

async fn insert_grants<C: ConnectionTrait>(
    conn: &C,
    user_id: &str,
    grants: &[Grant],
    now: i64,
) -> Result<(), DbErr> {
    if grants.is_empty() {
        return Ok(());
    }
    entities::Grant::insert_many(grants.iter().map(|g| grant_model(user_id, g, now)))
        .exec_without_returning(conn)
        .await?;
    Ok(())
}

fn grant_model(user_id: &str, grant: &Grant, now: i64) -> entities::grant::ActiveModel {
    entities::grant::ActiveModel {
        id: Default::default(),
        user_id: Set(user_id.to_string()),
        scope: Set(grant.scope.clone()),
        expires_at: Set(grant.expires_at.timestamp()),
        granted_at: Set(now),
    }
}

fn to_grant(model: entities::grant::Model) -> Grant {
    Grant::new(model.scope, from_timestamp(model.expires_at))
}

fn from_timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap_or(if secs < 0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

/// Attach grant rows (already in display order) to their users, keeping the
/// order of `users`.
fn assemble(users: Vec<entities::user::Model>, grants: Vec<entities::grant::Model>) -> Vec<User> {
    let mut by_user: HashMap<String, Vec<Grant>> = HashMap::new();
    for grant in grants {
        by_user
            .entry(grant.user_id.clone())
            .or_default()
            .push(to_grant(grant));
    }

    users
        .into_iter()
        .map(|u| User {
            grants: by_user.remove(&u.id).unwrap_or_default(),
            id: u.id,
            name: u.name,
            created_at: u.created_at,
        })
        .collect()
}
