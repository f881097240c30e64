//! Create `message_hidden` table migration.

use sea_orm_migration::prelude::*;

use super::m20250601_000001_create_user_table::User;
use super::m20250601_000004_create_message_table::Message;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MessageHidden::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MessageHidden::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(MessageHidden::MessageId).big_integer().not_null())
                    .col(ColumnDef::new(MessageHidden::UserId).big_integer().not_null())
                    .col(
                        ColumnDef::new(MessageHidden::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_message_hidden_message")
                            .from(MessageHidden::Table, MessageHidden::MessageId)
                            .to(Message::Table, Message::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_message_hidden_user")
                            .from(MessageHidden::Table, MessageHidden::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uq_message_hidden_message_user")
                    .table(MessageHidden::Table)
                    .col(MessageHidden::MessageId)
                    .col(MessageHidden::UserId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_message_hidden_user_id")
                    .table(MessageHidden::Table)
                    .col(MessageHidden::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MessageHidden::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum MessageHidden {
    Table,
    Id,
    MessageId,
    UserId,
    CreatedAt,
}
