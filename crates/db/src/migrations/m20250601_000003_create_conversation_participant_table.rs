//! Create `conversation_participant` table migration.

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
                    .table(ConversationParticipant::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ConversationParticipant::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(ConversationParticipant::ConversationId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConversationParticipant::UserId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ConversationParticipant::Role)
                            .string_len(16)
                            .not_null()
                            .default("member"),
                    )
                    .col(ColumnDef::new(ConversationParticipant::LastReadMessageId).big_integer())
                    .col(
                        ColumnDef::new(ConversationParticipant::Pinned)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(ConversationParticipant::MutedUntil)
                            .timestamp_with_time_zone(),
                    )
                    .col(
                        ColumnDef::new(ConversationParticipant::ArchivedAt)
                            .timestamp_with_time_zone(),
                    )
                    .col(
                        ColumnDef::new(ConversationParticipant::JoinedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ConversationParticipant::LeftAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_conversation_participant_conversation")
                            .from(
                                ConversationParticipant::Table,
                                ConversationParticipant::ConversationId,
                            )
                            .to(Conversation::Table, Conversation::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_conversation_participant_user")
                            .from(ConversationParticipant::Table, ConversationParticipant::UserId)
                            .to(User::Table, User::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One row per (conversation, user); leaving and rejoining reuse it
        manager
            .create_index(
                Index::create()
                    .name("uq_conversation_participant_member")
                    .table(ConversationParticipant::Table)
                    .col(ConversationParticipant::ConversationId)
                    .col(ConversationParticipant::UserId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // Index: user_id for conversation lists
        manager
            .create_index(
                Index::create()
                    .name("idx_conversation_participant_user_id")
                    .table(ConversationParticipant::Table)
                    .col(ConversationParticipant::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ConversationParticipant::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum ConversationParticipant {
    Table,
    Id,
    ConversationId,
    UserId,
    Role,
    LastReadMessageId,
    Pinned,
    MutedUntil,
    ArchivedAt,
    JoinedAt,
    LeftAt,
}
