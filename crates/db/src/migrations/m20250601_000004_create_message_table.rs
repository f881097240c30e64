//! Create `message` table migration.

use sea_orm_migration::prelude::*;

use super::m20250601_000001_create_user_table::User;
use super::m20250601_000002_create_conversation_table::Conversation;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Message::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Message::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Message::ConversationId).big_integer().not_null())
                    .col(ColumnDef::new(Message::SenderId).big_integer().not_null())
                    .col(ColumnDef::new(Message::MessageType).string_len(16).not_null())
                    .col(ColumnDef::new(Message::Body).text())
                    .col(ColumnDef::new(Message::ReplyToId).big_integer())
                    .col(ColumnDef::new(Message::ClientId).string_len(64))
                    .col(
                        ColumnDef::new(Message::Status)
                            .string_len(16)
                            .not_null()
                            .default("active"),
                    )
                    .col(ColumnDef::new(Message::DeliveredAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Message::ReadAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Message::EditedAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(Message::DeletedAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(Message::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Message::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_message_conversation")
                            .from(Message::Table, Message::ConversationId)
                            .to(Conversation::Table, Conversation::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_message_sender")
                            .from(Message::Table, Message::SenderId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Keyset pagination: (conversation_id, created_at, id)
        manager
            .create_index(
                Index::create()
                    .name("idx_message_conversation_created")
                    .table(Message::Table)
                    .col(Message::ConversationId)
                    .col(Message::CreatedAt)
                    .col(Message::Id)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_message_sender_id")
                    .table(Message::Table)
                    .col(Message::SenderId)
                    .to_owned(),
            )
            .await?;

        // Retried sends carry the same client id
        manager
            .create_index(
                Index::create()
                    .name("uq_message_client_id")
                    .table(Message::Table)
                    .col(Message::ConversationId)
                    .col(Message::SenderId)
                    .col(Message::ClientId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Message::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum Message {
    Table,
    Id,
    ConversationId,
    SenderId,
    MessageType,
    Body,
    ReplyToId,
    ClientId,
    Status,
    DeliveredAt,
    ReadAt,
    EditedAt,
    DeletedAt,
    CreatedAt,
    UpdatedAt,
}
