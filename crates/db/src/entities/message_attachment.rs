//! Message attachment entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "message_attachment")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(indexed)]
    pub message_id: i64,

    /// Storage disk the file was written to.
    pub disk: String,

    /// Key of the file on the disk.
    pub path: String,

    pub mime: String,

    pub size: i64,

    #[sea_orm(nullable)]
    pub width: Option<i32>,

    #[sea_orm(nullable)]
    pub height: Option<i32>,

    #[sea_orm(nullable)]
    pub original_name: Option<String>,

    /// Free-form metadata, e.g. `thumbnail_path` and `md5`.
    #[sea_orm(nullable)]
    pub metadata: Option<Json>,

    pub created_at: DateTimeWithTimeZone,

    /// Set once the files of a deleted message were removed from the disk.
    #[sea_orm(nullable)]
    pub purged_at: Option<DateTimeWithTimeZone>,
}

impl Model {
    /// Key of the generated thumbnail, if any.
    #[must_use]
    pub fn thumbnail_path(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("thumbnail_path"))
            .and_then(serde_json::Value::as_str)
    }

    #[must_use]
    pub fn is_image(&self) -> bool {
        self.mime.starts_with("image/")
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::message::Entity",
        from = "Column::MessageId",
        to = "super::message::Column::Id",
        on_delete = "Cascade"
    )]
    Message,
}

impl Related<super::message::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Message.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
