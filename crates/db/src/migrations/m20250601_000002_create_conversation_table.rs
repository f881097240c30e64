//! Create `conversation` table migration.

use sea_orm_migration::prelude::*;

use super::m20250601_000001_create_user_table::User;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Conversation::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Conversation::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Conversation::Kind).string_len(16).not_null())
                    .col(ColumnDef::new(Conversation::Title).string_len(255))
                    .col(ColumnDef::new(Conversation::IconPath).string_len(512))
                    .col(ColumnDef::new(Conversation::CreatorId).big_integer().not_null())
                    .col(ColumnDef::new(Conversation::DirectKey).string_len(64))
                    // No foreign key: message rows reference conversation as well
                    .col(ColumnDef::new(Conversation::LastMessageId).big_integer())
                    .col(
                        ColumnDef::new(Conversation::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Conversation::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_conversation_creator")
                            .from(Conversation::Table, Conversation::CreatorId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // At most one direct conversation per unordered pair of users
        manager
            .create_index(
                Index::create()
                    .name("uq_conversation_direct_key")
                    .table(Conversation::Table)
                    .col(Conversation::DirectKey)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_conversation_creator_id")
                    .table(Conversation::Table)
                    .col(Conversation::CreatorId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Conversation::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum Conversation {
    Table,
    Id,
    Kind,
    Title,
    IconPath,
    CreatorId,
    DirectKey,
    LastMessageId,
    CreatedAt,
    UpdatedAt,
}
