//! Create `message_attachment` table migration.

use sea_orm_migration::prelude::*;

use super::m20250601_000004_create_message_table::Message;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(MessageAttachment::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MessageAttachment::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(MessageAttachment::MessageId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(MessageAttachment::Disk).string_len(64).not_null())
                    .col(ColumnDef::new(MessageAttachment::Path).string_len(512).not_null())
                    .col(ColumnDef::new(MessageAttachment::Mime).string_len(255).not_null())
                    .col(ColumnDef::new(MessageAttachment::Size).big_integer().not_null())
                    .col(ColumnDef::new(MessageAttachment::Width).integer())
                    .col(ColumnDef::new(MessageAttachment::Height).integer())
                    .col(ColumnDef::new(MessageAttachment::OriginalName).string_len(255))
                    .col(ColumnDef::new(MessageAttachment::Metadata).json())
                    .col(
                        ColumnDef::new(MessageAttachment::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(MessageAttachment::PurgedAt).timestamp_with_time_zone())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_message_attachment_message")
                            .from(MessageAttachment::Table, MessageAttachment::MessageId)
                            .to(Message::Table, Message::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_message_attachment_message_id")
                    .table(MessageAttachment::Table)
                    .col(MessageAttachment::MessageId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MessageAttachment::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum MessageAttachment {
    Table,
    Id,
    MessageId,
    Disk,
    Path,
    Mime,
    Size,
    Width,
    Height,
    OriginalName,
    Metadata,
    CreatedAt,
    PurgedAt,
}
