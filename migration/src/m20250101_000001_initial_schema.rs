use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Enable foreign keys for SQLite
        if manager.get_database_backend() == sea_orm::DatabaseBackend::Sqlite {
            manager
                .get_connection()
                .execute_unprepared("PRAGMA foreign_keys = ON")
                .await?;
        }

        // Create users table; `seq` records insertion order
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(auto_id(manager, Users::Seq))
                    .col(ColumnDef::new(Users::Id).string().not_null().unique_key())
                    .col(string(Users::Name))
                    .col(big_integer(Users::CreatedAt))
                    .to_owned(),
            )
            .await?;

        // Create grants table, one row per (user, scope)
        manager
            .create_table(
                Table::create()
                    .table(Grants::Table)
                    .if_not_exists()
                    .col(auto_id(manager, Grants::Id))
                    .col(string(Grants::UserId))
                    .col(string(Grants::Scope))
                    .col(big_integer(Grants::ExpiresAt))
                    .col(big_integer(Grants::GrantedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_grants_user_id")
                            .from(Grants::Table, Grants::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Upserts target this index: at most one grant per scope name per user
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_grants_user_scope")
                    .table(Grants::Table)
                    .col(Grants::UserId)
                    .col(Grants::Scope)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_grants_expires_at")
                    .table(Grants::Table)
                    .col(Grants::ExpiresAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Grants::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await
    }
}

// SQLite only autoincrements an INTEGER primary key
fn auto_id<T: IntoIden>(manager: &SchemaManager, name: T) -> ColumnDef {
    let mut col = ColumnDef::new(name);
    match manager.get_database_backend() {
        sea_orm::DatabaseBackend::Postgres => col.big_integer(),
        _ => col.integer(),
    };
    col.not_null().auto_increment().primary_key().to_owned()
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Seq,
    Id,
    Name,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Grants {
    Table,
    Id,
    UserId,
    Scope,
    ExpiresAt,
    GrantedAt,
}
