//! Conversation entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Kind of conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum ConversationType {
    /// Exactly two participants, at most one per pair of users.
    #[sea_orm(string_value = "direct")]
    Direct,
    /// Any number of participants with roles.
    #[sea_orm(string_value = "group")]
    Group,
}

impl ConversationType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "conversation")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    pub kind: ConversationType,

    /// Group title
    #[sea_orm(nullable)]
    pub title: Option<String>,

    #[sea_orm(nullable)]
    pub icon_path: Option<String>,

    #[sea_orm(indexed)]
    pub creator_id: i64,

    /// Sorted `"low:high"` user id pair, set for direct conversations only.
    /// The unique index on it serializes concurrent direct creation.
    #[sea_orm(unique, nullable)]
    pub direct_key: Option<String>,

    /// Newest message that is not soft-deleted.
    #[sea_orm(nullable)]
    pub last_message_id: Option<i64>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::conversation_participant::Entity")]
    ConversationParticipant,
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::CreatorId",
        to = "super::user::Column::Id"
    )]
    Creator,
    #[sea_orm(
        belongs_to = "super::message::Entity",
        from = "Column::LastMessageId",
        to = "super::message::Column::Id"
    )]
    LastMessage,
}

impl Related<super::conversation_participant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ConversationParticipant.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Canonical key of the direct conversation between two users.
#[must_use]
pub fn direct_key(user_a: i64, user_b: i64) -> String {
    let (low, high) = if user_a <= user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    };
    format!("{low}:{high}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_key_is_order_independent() {
        assert_eq!(direct_key(7, 3), "3:7");
        assert_eq!(direct_key(3, 7), "3:7");
    }
}
