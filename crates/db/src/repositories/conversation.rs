//! Conversation and participant repository.

use std::sync::Arc;

use crate::entities::{
    Conversation, ConversationParticipant, Message, User, conversation,
    conversation::ConversationType, conversation_participant,
    conversation_participant::ParticipantRole, message, user,
};
use crate::repositories::is_unique_violation;
use atrium_common::{AppError, AppResult};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait, JoinType, Order,
    QueryFilter, QueryOrder, QuerySelect, RelationTrait, Set, TransactionTrait,
    prelude::DateTimeWithTimeZone,
    sea_query::{Expr, Func, Query},
};

/// Filters for a user's conversation list.
#[derive(Debug, Clone, Default)]
pub struct ConversationListFilter {
    /// Matches group titles and any active participant's display name.
    pub search: Option<String>,
    /// List archived conversations instead of the inbox.
    pub archived: bool,
    pub limit: u64,
    pub offset: u64,
}

/// Repository for conversations and their participants.
#[derive(Clone)]
pub struct ConversationRepository {
    db: Arc<DatabaseConnection>,
}

impl ConversationRepository {
    /// Create a new conversation repository.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find a conversation by ID.
    pub async fn find_by_id(&self, id: i64) -> AppResult<Option<conversation::Model>> {
        Conversation::find_by_id(id)
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find a conversation by ID, returning an error if not found.
    pub async fn get_by_id(&self, id: i64) -> AppResult<conversation::Model> {
        self.find_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Conversation {id}")))
    }

    /// Find conversations by IDs.
    pub async fn find_by_ids(&self, ids: &[i64]) -> AppResult<Vec<conversation::Model>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        Conversation::find()
            .filter(conversation::Column::Id.is_in(ids.iter().copied()))
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find the direct conversation between two users, in either direction.
    pub async fn find_direct(
        &self,
        user_a: i64,
        user_b: i64,
    ) -> AppResult<Option<conversation::Model>> {
        Conversation::find()
            .filter(conversation::Column::Kind.eq(ConversationType::Direct))
            .filter(conversation::Column::DirectKey.eq(conversation::direct_key(user_a, user_b)))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Create a direct conversation and both participant rows atomically.
    ///
    /// Fails with [`AppError::ConflictDuplicateDirect`] when another transaction
    /// created the same pair first.
    pub async fn create_direct(
        &self,
        creator_id: i64,
        partner_id: i64,
        now: DateTimeWithTimeZone,
    ) -> AppResult<conversation::Model> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let created = conversation::ActiveModel {
            kind: Set(ConversationType::Direct),
            title: Set(None),
            icon_path: Set(None),
            creator_id: Set(creator_id),
            direct_key: Set(Some(conversation::direct_key(creator_id, partner_id))),
            last_message_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::ConflictDuplicateDirect
            } else {
                AppError::Database(e.to_string())
            }
        })?;

        for user_id in [creator_id, partner_id] {
            new_participant(created.id, user_id, ParticipantRole::Member, now)
                .insert(&txn)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
        }

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(created)
    }

    /// Create a group conversation with the creator as owner and everyone else as member.
    pub async fn create_group(
        &self,
        creator_id: i64,
        title: Option<String>,
        icon_path: Option<String>,
        member_ids: &[i64],
        now: DateTimeWithTimeZone,
    ) -> AppResult<conversation::Model> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let created = conversation::ActiveModel {
            kind: Set(ConversationType::Group),
            title: Set(title),
            icon_path: Set(icon_path),
            creator_id: Set(creator_id),
            direct_key: Set(None),
            last_message_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&txn)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        new_participant(created.id, creator_id, ParticipantRole::Owner, now)
            .insert(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        for &user_id in member_ids.iter().filter(|&&id| id != creator_id) {
            new_participant(created.id, user_id, ParticipantRole::Member, now)
                .insert(&txn)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
        }

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(created)
    }

    /// Update a conversation.
    pub async fn update(&self, model: conversation::ActiveModel) -> AppResult<conversation::Model> {
        model
            .update(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Bump `updated_at`.
    pub async fn touch(&self, id: i64, now: DateTimeWithTimeZone) -> AppResult<()> {
        touch_conversation(self.db.as_ref(), id, now).await
    }

    /// Conversations the user actively participates in, most recent activity first.
    pub async fn list_for_user(
        &self,
        user_id: i64,
        filter: &ConversationListFilter,
    ) -> AppResult<Vec<conversation::Model>> {
        let mut membership = Query::select();
        membership
            .column(conversation_participant::Column::ConversationId)
            .from(ConversationParticipant)
            .and_where(conversation_participant::Column::UserId.eq(user_id))
            .and_where(conversation_participant::Column::LeftAt.is_null());
        if filter.archived {
            membership.and_where(conversation_participant::Column::ArchivedAt.is_not_null());
        } else {
            membership.and_where(conversation_participant::Column::ArchivedAt.is_null());
        }

        let mut query = Conversation::find()
            .filter(conversation::Column::Id.in_subquery(membership.to_owned()))
            .join(JoinType::LeftJoin, conversation::Relation::LastMessage.def());

        if let Some(search) = filter
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            let pattern = format!("%{}%", search.to_lowercase());

            let by_participant = Query::select()
                .column((
                    ConversationParticipant,
                    conversation_participant::Column::ConversationId,
                ))
                .from(ConversationParticipant)
                .inner_join(
                    User,
                    Expr::col((User, user::Column::Id)).equals((
                        ConversationParticipant,
                        conversation_participant::Column::UserId,
                    )),
                )
                .and_where(
                    Expr::col((ConversationParticipant, conversation_participant::Column::LeftAt))
                        .is_null(),
                )
                .and_where(
                    Expr::expr(Func::lower(Expr::col((User, user::Column::DisplayName))))
                        .like(pattern.clone()),
                )
                .to_owned();

            query = query.filter(
                Condition::any()
                    .add(
                        Expr::expr(Func::lower(Expr::col((
                            Conversation,
                            conversation::Column::Title,
                        ))))
                        .like(pattern),
                    )
                    .add(conversation::Column::Id.in_subquery(by_participant)),
            );
        }

        query
            .order_by(
                Expr::cust(r#"COALESCE("message"."created_at", "conversation"."created_at")"#),
                Order::Desc,
            )
            .order_by_desc(conversation::Column::Id)
            .offset(filter.offset)
            .limit(filter.limit)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    // ==================== Participants ====================

    /// Find the participant row of a user, active or not.
    pub async fn find_participant(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> AppResult<Option<conversation_participant::Model>> {
        ConversationParticipant::find()
            .filter(conversation_participant::Column::ConversationId.eq(conversation_id))
            .filter(conversation_participant::Column::UserId.eq(user_id))
            .one(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Find the participant row of a user if they have not left.
    pub async fn find_active_participant(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> AppResult<Option<conversation_participant::Model>> {
        Ok(self
            .find_participant(conversation_id, user_id)
            .await?
            .filter(conversation_participant::Model::is_active))
    }

    /// Active participants in join order.
    pub async fn find_active_participants(
        &self,
        conversation_id: i64,
    ) -> AppResult<Vec<conversation_participant::Model>> {
        ConversationParticipant::find()
            .filter(conversation_participant::Column::ConversationId.eq(conversation_id))
            .filter(conversation_participant::Column::LeftAt.is_null())
            .order_by_asc(conversation_participant::Column::JoinedAt)
            .order_by_asc(conversation_participant::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Active participants of several conversations together with their users.
    pub async fn find_active_participants_with_users(
        &self,
        conversation_ids: &[i64],
    ) -> AppResult<Vec<(conversation_participant::Model, user::Model)>> {
        if conversation_ids.is_empty() {
            return Ok(vec![]);
        }

        let rows = ConversationParticipant::find()
            .find_also_related(User)
            .filter(
                conversation_participant::Column::ConversationId
                    .is_in(conversation_ids.iter().copied()),
            )
            .filter(conversation_participant::Column::LeftAt.is_null())
            .order_by_asc(conversation_participant::Column::JoinedAt)
            .order_by_asc(conversation_participant::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .filter_map(|(participant, user)| user.map(|u| (participant, u)))
            .collect())
    }

    /// Update a participant row.
    pub async fn update_participant(
        &self,
        model: conversation_participant::ActiveModel,
    ) -> AppResult<conversation_participant::Model> {
        model
            .update(self.db.as_ref())
            .await
            .map_err(|e| AppError::Database(e.to_string()))
    }

    /// Add users to a conversation as members in one transaction.
    ///
    /// Departed users get their old row back with a fresh `joined_at`; active
    /// participants are skipped. Returns the users actually added, and bumps
    /// `updated_at` when there are any.
    pub async fn add_members(
        &self,
        conversation_id: i64,
        user_ids: &[i64],
        now: DateTimeWithTimeZone,
    ) -> AppResult<Vec<i64>> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let mut added = Vec::new();
        for &user_id in user_ids {
            let existing = ConversationParticipant::find()
                .filter(conversation_participant::Column::ConversationId.eq(conversation_id))
                .filter(conversation_participant::Column::UserId.eq(user_id))
                .one(&txn)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;

            match existing {
                Some(participant) if participant.is_active() => continue,
                Some(departed) => {
                    let mut active: conversation_participant::ActiveModel = departed.into();
                    active.left_at = Set(None);
                    active.joined_at = Set(now);
                    active.role = Set(ParticipantRole::Member);
                    active.archived_at = Set(None);
                    active
                        .update(&txn)
                        .await
                        .map_err(|e| AppError::Database(e.to_string()))?;
                }
                None => {
                    new_participant(conversation_id, user_id, ParticipantRole::Member, now)
                        .insert(&txn)
                        .await
                        .map_err(|e| {
                            if is_unique_violation(&e) {
                                AppError::Conflict(format!(
                                    "User {user_id} is already a participant of conversation {conversation_id}"
                                ))
                            } else {
                                AppError::Database(e.to_string())
                            }
                        })?;
                }
            }
            added.push(user_id);
        }

        if !added.is_empty() {
            touch_conversation(&txn, conversation_id, now).await?;
        }

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(added)
    }

    /// Mark a participant as departed in one transaction.
    ///
    /// When the departing user was the owner, the earliest-joined remaining
    /// participant becomes owner; their user id is returned.
    pub async fn remove_participant(
        &self,
        participant: conversation_participant::Model,
        now: DateTimeWithTimeZone,
    ) -> AppResult<Option<i64>> {
        let conversation_id = participant.conversation_id;
        let was_owner = participant.role == ParticipantRole::Owner;

        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let mut leaving: conversation_participant::ActiveModel = participant.into();
        leaving.left_at = Set(Some(now));
        leaving
            .update(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let mut successor_id = None;
        if was_owner {
            let successor = ConversationParticipant::find()
                .filter(conversation_participant::Column::ConversationId.eq(conversation_id))
                .filter(conversation_participant::Column::LeftAt.is_null())
                .order_by_asc(conversation_participant::Column::JoinedAt)
                .order_by_asc(conversation_participant::Column::Id)
                .one(&txn)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;

            if let Some(successor) = successor {
                successor_id = Some(successor.user_id);
                let mut promoted: conversation_participant::ActiveModel = successor.into();
                promoted.role = Set(ParticipantRole::Owner);
                promoted
                    .update(&txn)
                    .await
                    .map_err(|e| AppError::Database(e.to_string()))?;
            }
        }

        touch_conversation(&txn, conversation_id, now).await?;

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(successor_id)
    }

    /// Move a participant's read cursor forward to `message_id`.
    ///
    /// The cursor never moves backward: returns `false` without writing when it
    /// already points at or past `message_id`. When it advances, messages from
    /// other senders up to the cursor get their `read_at` stamped.
    pub async fn advance_read_cursor(
        &self,
        conversation_id: i64,
        user_id: i64,
        message_id: i64,
        now: DateTimeWithTimeZone,
    ) -> AppResult<bool> {
        let txn = self
            .db
            .begin()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let result = ConversationParticipant::update_many()
            .col_expr(
                conversation_participant::Column::LastReadMessageId,
                Expr::value(message_id),
            )
            .filter(conversation_participant::Column::ConversationId.eq(conversation_id))
            .filter(conversation_participant::Column::UserId.eq(user_id))
            .filter(conversation_participant::Column::LeftAt.is_null())
            .filter(
                Condition::any()
                    .add(conversation_participant::Column::LastReadMessageId.is_null())
                    .add(conversation_participant::Column::LastReadMessageId.lt(message_id)),
            )
            .exec(&txn)
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let advanced = result.rows_affected > 0;
        if advanced {
            Message::update_many()
                .col_expr(message::Column::ReadAt, Expr::value(now))
                .filter(message::Column::ConversationId.eq(conversation_id))
                .filter(message::Column::Id.lte(message_id))
                .filter(message::Column::SenderId.ne(user_id))
                .filter(message::Column::ReadAt.is_null())
                .exec(&txn)
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;
        }

        txn.commit()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(advanced)
    }
}

async fn touch_conversation<C: ConnectionTrait>(
    db: &C,
    id: i64,
    now: DateTimeWithTimeZone,
) -> AppResult<()> {
    Conversation::update_many()
        .col_expr(conversation::Column::UpdatedAt, Expr::value(now))
        .filter(conversation::Column::Id.eq(id))
        .exec(db)
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;
    Ok(())
}

fn new_participant(
    conversation_id: i64,
    user_id: i64,
    role: ParticipantRole,
    now: DateTimeWithTimeZone,
) -> conversation_participant::ActiveModel {
    conversation_participant::ActiveModel {
        conversation_id: Set(conversation_id),
        user_id: Set(user_id),
        role: Set(role),
        last_read_message_id: Set(None),
        pinned: Set(false),
        muted_until: Set(None),
        archived_at: Set(None),
        joined_at: Set(now),
        left_at: Set(None),
        ..Default::default()
    }
}
