//! Conversation participant entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Role of a participant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize, Default,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum ParticipantRole {
    #[sea_orm(string_value = "owner")]
    Owner,
    #[sea_orm(string_value = "admin")]
    Admin,
    #[default]
    #[sea_orm(string_value = "member")]
    Member,
}

impl ParticipantRole {
    /// Check if the role can add members and change group metadata.
    #[must_use]
    pub const fn can_manage(&self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }
}

/// Membership of a user in a conversation. A row with `left_at` set is inactive
/// and gets reused if the user is added again.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "conversation_participant")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(indexed)]
    pub conversation_id: i64,

    #[sea_orm(indexed)]
    pub user_id: i64,

    pub role: ParticipantRole,

    /// Read cursor. Only ever moves forward.
    #[sea_orm(nullable)]
    pub last_read_message_id: Option<i64>,

    #[sea_orm(default_value = false)]
    pub pinned: bool,

    #[sea_orm(nullable)]
    pub muted_until: Option<DateTimeWithTimeZone>,

    /// Archived for this participant only.
    #[sea_orm(nullable)]
    pub archived_at: Option<DateTimeWithTimeZone>,

    pub joined_at: DateTimeWithTimeZone,

    #[sea_orm(nullable)]
    pub left_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.left_at.is_none()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::conversation::Entity",
        from = "Column::ConversationId",
        to = "super::conversation::Column::Id",
        on_delete = "Cascade"
    )]
    Conversation,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id",
        on_delete = "Cascade"
    )]
    User,
}

impl Related<super::conversation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Conversation.def()
    }
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
