//! Conversation service.
//!
//! Direct deduplication, group membership and the per-participant flags
//! (archive, pin, mute). Summaries returned here carry the caller's own
//! unread count and flags.

use std::collections::{BTreeSet, HashMap};

use atrium_common::{
    AppError, AppResult, ClockService, ConversationSummary, RealtimeEvent,
    events::{DeltaCause, LastMessagePreview},
};
use atrium_db::{
    entities::{
        conversation, conversation::ConversationType, conversation_participant, user,
    },
    repositories::{ConversationListFilter, ConversationRepository, UserRepository},
};
use chrono::{DateTime, Utc};
use sea_orm::Set;
use serde::Deserialize;
use tracing::{info, warn};
use validator::Validate;

use crate::services::{
    access::{Denial, require_participant},
    broadcaster::EventBroadcaster,
    event_publisher::EventPublisherService,
    message::MessageService,
    views,
};

/// Default number of conversations per list page.
const DEFAULT_LIST_LIMIT: u64 = 20;

/// Maximum number of conversations per list page.
const MAX_LIST_LIMIT: u64 = 100;

/// Input for creating a group conversation.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateGroupInput {
    #[validate(length(min = 1, max = 128))]
    pub title: Option<String>,
    #[validate(length(max = 512))]
    pub icon_path: Option<String>,
    #[validate(length(min = 1, max = 256))]
    pub member_ids: Vec<i64>,
}

/// Input for changing group metadata. An empty string clears the field.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateGroupInput {
    #[validate(length(max = 128))]
    pub title: Option<String>,
    #[validate(length(max = 512))]
    pub icon_path: Option<String>,
}

/// Filters for the conversation list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListConversationsInput {
    pub search: Option<String>,
    #[serde(default)]
    pub archived: bool,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Conversation service.
#[derive(Clone)]
pub struct ConversationService {
    conversation_repo: ConversationRepository,
    user_repo: UserRepository,
    message_service: MessageService,
    broadcaster: EventBroadcaster,
    clock: ClockService,
}

impl ConversationService {
    /// Create a new conversation service.
    #[must_use]
    pub fn new(
        conversation_repo: ConversationRepository,
        user_repo: UserRepository,
        message_service: MessageService,
        clock: ClockService,
    ) -> Self {
        Self {
            conversation_repo,
            user_repo,
            message_service,
            broadcaster: EventBroadcaster::default(),
            clock,
        }
    }

    /// Set the event publisher.
    pub fn set_event_publisher(&mut self, publisher: EventPublisherService) {
        self.broadcaster = EventBroadcaster::new(publisher);
    }

    /// Return the direct conversation between two users, creating it on first use.
    ///
    /// Concurrent calls for the same pair converge on one row: the loser of the
    /// insert race reads the winner's conversation back.
    pub async fn create_or_reuse_direct(
        &self,
        user_id: i64,
        partner_id: i64,
    ) -> AppResult<ConversationSummary> {
        if user_id == partner_id {
            return Err(AppError::Validation(
                "Cannot start a direct conversation with yourself".to_string(),
            ));
        }
        self.user_repo.get_by_id(partner_id).await?;

        let conversation = match self.conversation_repo.find_direct(user_id, partner_id).await? {
            Some(existing) => existing,
            None => match self
                .conversation_repo
                .create_direct(user_id, partner_id, self.clock.now().into())
                .await
            {
                Ok(created) => {
                    info!(conversation_id = created.id, user_id, partner_id, "Created direct conversation");
                    created
                }
                Err(AppError::ConflictDuplicateDirect) => self
                    .conversation_repo
                    .find_direct(user_id, partner_id)
                    .await?
                    .ok_or_else(|| {
                        AppError::Internal("Direct conversation vanished after conflict".to_string())
                    })?,
                Err(e) => return Err(e),
            },
        };

        self.summary_for(&conversation, user_id).await
    }

    /// Create a group with the creator as owner.
    pub async fn create_group(
        &self,
        creator_id: i64,
        input: CreateGroupInput,
    ) -> AppResult<ConversationSummary> {
        input.validate()?;

        let member_ids: Vec<i64> = input
            .member_ids
            .iter()
            .copied()
            .filter(|&id| id != creator_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if member_ids.is_empty() {
            return Err(AppError::Validation(
                "A group needs at least one other member".to_string(),
            ));
        }
        self.require_users(&member_ids).await?;

        let conversation = self
            .conversation_repo
            .create_group(
                creator_id,
                input.title.filter(|t| !t.trim().is_empty()),
                input.icon_path.filter(|p| !p.is_empty()),
                &member_ids,
                self.clock.now().into(),
            )
            .await?;

        info!(
            conversation_id = conversation.id,
            creator_id,
            members = member_ids.len(),
            "Created group conversation"
        );

        self.announce_joined(&conversation, &member_ids).await;
        self.summary_for(&conversation, creator_id).await
    }

    /// Change title or icon of a group. Owners and admins only.
    pub async fn update_group(
        &self,
        conversation_id: i64,
        actor_id: i64,
        input: UpdateGroupInput,
    ) -> AppResult<ConversationSummary> {
        input.validate()?;

        let conversation = self.get_group(conversation_id).await?;
        let actor = require_participant(
            &self.conversation_repo,
            conversation_id,
            actor_id,
            Denial::Forbidden,
        )
        .await?;
        if !actor.role.can_manage() {
            return Err(AppError::Forbidden(
                "Only owners and admins can change the group".to_string(),
            ));
        }

        let mut active: conversation::ActiveModel = conversation.into();
        if let Some(title) = input.title {
            active.title = Set(Some(title).filter(|t| !t.trim().is_empty()));
        }
        if let Some(icon_path) = input.icon_path {
            active.icon_path = Set(Some(icon_path).filter(|p| !p.is_empty()));
        }
        active.updated_at = Set(self.clock.now().into());
        let updated = self.conversation_repo.update(active).await?;

        self.announce_updated(&updated).await;
        self.summary_for(&updated, actor_id).await
    }

    /// Add members to a group. Departed members get their old row back.
    pub async fn add_members(
        &self,
        conversation_id: i64,
        actor_id: i64,
        user_ids: &[i64],
    ) -> AppResult<ConversationSummary> {
        let conversation = self.get_group(conversation_id).await?;
        let actor = require_participant(
            &self.conversation_repo,
            conversation_id,
            actor_id,
            Denial::Forbidden,
        )
        .await?;
        if !actor.role.can_manage() {
            return Err(AppError::Forbidden(
                "Only owners and admins can add members".to_string(),
            ));
        }

        let user_ids: Vec<i64> = user_ids
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        self.require_users(&user_ids).await?;

        let added = self
            .conversation_repo
            .add_members(conversation_id, &user_ids, self.clock.now().into())
            .await?;

        if added.is_empty() {
            return self.summary_for(&conversation, actor_id).await;
        }

        let conversation = self.conversation_repo.get_by_id(conversation_id).await?;

        info!(conversation_id, actor_id, added = added.len(), "Added group members");

        self.announce_updated(&conversation).await;
        self.announce_joined(&conversation, &added).await;
        self.summary_for(&conversation, actor_id).await
    }

    /// Leave a group. An owner hands ownership to the earliest-joined remaining member.
    pub async fn leave(&self, conversation_id: i64, user_id: i64) -> AppResult<()> {
        let conversation = self.conversation_repo.get_by_id(conversation_id).await?;
        if conversation.kind != ConversationType::Group {
            return Err(AppError::Validation(
                "Direct conversations cannot be left".to_string(),
            ));
        }
        let participant = require_participant(
            &self.conversation_repo,
            conversation_id,
            user_id,
            Denial::Forbidden,
        )
        .await?;

        let successor = self
            .conversation_repo
            .remove_participant(participant, self.clock.now().into())
            .await?;
        if let Some(successor_id) = successor {
            info!(conversation_id, from = user_id, to = successor_id, "Transferred group ownership");
        }

        let conversation = self.conversation_repo.get_by_id(conversation_id).await?;
        self.announce_updated(&conversation).await;
        Ok(())
    }

    /// Flip the caller's archive flag. Returns whether the conversation is now archived.
    pub async fn toggle_archive(&self, conversation_id: i64, user_id: i64) -> AppResult<bool> {
        let participant = require_participant(
            &self.conversation_repo,
            conversation_id,
            user_id,
            Denial::Forbidden,
        )
        .await?;

        let archived = participant.archived_at.is_none();
        let mut active: conversation_participant::ActiveModel = participant.into();
        active.archived_at = Set(archived.then(|| self.clock.now().into()));
        self.conversation_repo.update_participant(active).await?;
        Ok(archived)
    }

    /// Flip the caller's pin flag. Returns whether the conversation is now pinned.
    pub async fn toggle_pin(&self, conversation_id: i64, user_id: i64) -> AppResult<bool> {
        let participant = require_participant(
            &self.conversation_repo,
            conversation_id,
            user_id,
            Denial::Forbidden,
        )
        .await?;

        let pinned = !participant.pinned;
        let mut active: conversation_participant::ActiveModel = participant.into();
        active.pinned = Set(pinned);
        self.conversation_repo.update_participant(active).await?;
        Ok(pinned)
    }

    /// Mute notifications until the given time, or unmute with `None`.
    pub async fn mute(
        &self,
        conversation_id: i64,
        user_id: i64,
        until: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        let participant = require_participant(
            &self.conversation_repo,
            conversation_id,
            user_id,
            Denial::Forbidden,
        )
        .await?;

        let mut active: conversation_participant::ActiveModel = participant.into();
        active.muted_until = Set(until.map(Into::into));
        self.conversation_repo.update_participant(active).await?;
        Ok(())
    }

    /// Conversations of a user, most recent activity first.
    pub async fn list_for_user(
        &self,
        user_id: i64,
        input: ListConversationsInput,
    ) -> AppResult<Vec<ConversationSummary>> {
        let filter = ConversationListFilter {
            search: input.search,
            archived: input.archived,
            limit: input
                .limit
                .unwrap_or(DEFAULT_LIST_LIMIT)
                .clamp(1, MAX_LIST_LIMIT),
            offset: input.offset.unwrap_or(0),
        };

        let conversations = self.conversation_repo.list_for_user(user_id, &filter).await?;
        self.summarize(&conversations, user_id).await
    }

    /// Summary of one conversation for one of its active participants.
    pub async fn get_for_user(
        &self,
        conversation_id: i64,
        user_id: i64,
    ) -> AppResult<ConversationSummary> {
        let conversation = self
            .conversation_repo
            .find_by_id(conversation_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Conversation {conversation_id}")))?;
        require_participant(
            &self.conversation_repo,
            conversation_id,
            user_id,
            Denial::NotFound,
        )
        .await?;

        self.summary_for(&conversation, user_id).await
    }

    async fn summary_for(
        &self,
        conversation: &conversation::Model,
        user_id: i64,
    ) -> AppResult<ConversationSummary> {
        self.summarize(std::slice::from_ref(conversation), user_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound(format!("Conversation {}", conversation.id)))
    }

    /// Build summaries for the viewer, keeping the input order. Conversations
    /// the viewer is not active in are skipped.
    async fn summarize(
        &self,
        conversations: &[conversation::Model],
        viewer_id: i64,
    ) -> AppResult<Vec<ConversationSummary>> {
        if conversations.is_empty() {
            return Ok(vec![]);
        }

        let ids: Vec<i64> = conversations.iter().map(|c| c.id).collect();
        let rows = self
            .conversation_repo
            .find_active_participants_with_users(&ids)
            .await?;

        let mut participants: HashMap<i64, Vec<(conversation_participant::Model, user::Model)>> =
            HashMap::new();
        for row in rows {
            participants.entry(row.0.conversation_id).or_default().push(row);
        }

        let mut previews: HashMap<i64, LastMessagePreview> = self
            .message_service
            .last_message_previews(conversations)
            .await?
            .into_iter()
            .collect();

        let mut summaries = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let members = participants.remove(&conversation.id).unwrap_or_default();
            let Some(own) = members
                .iter()
                .find(|(p, _)| p.user_id == viewer_id)
                .map(|(p, _)| p.clone())
            else {
                continue;
            };

            let unread_count = self
                .message_service
                .count_unread(conversation.id, viewer_id, own.last_read_message_id)
                .await?;

            summaries.push(ConversationSummary {
                id: conversation.id,
                kind: conversation.kind.as_str().to_string(),
                title: conversation.title.clone(),
                icon_path: conversation.icon_path.clone(),
                creator_id: conversation.creator_id,
                participants: members
                    .iter()
                    .map(|(p, u)| views::participant_view(p, u))
                    .collect(),
                last_message: previews.remove(&conversation.id),
                unread_count,
                last_read_message_id: own.last_read_message_id,
                pinned: own.pinned,
                muted_until: own.muted_until.map(views::utc),
                archived: own.archived_at.is_some(),
                created_at: views::utc(conversation.created_at),
                updated_at: views::utc(conversation.updated_at),
            });
        }

        Ok(summaries)
    }

    async fn get_group(&self, conversation_id: i64) -> AppResult<conversation::Model> {
        let conversation = self.conversation_repo.get_by_id(conversation_id).await?;
        if conversation.kind != ConversationType::Group {
            return Err(AppError::Validation(format!(
                "Conversation {conversation_id} is not a group"
            )));
        }
        Ok(conversation)
    }

    async fn require_users(&self, user_ids: &[i64]) -> AppResult<()> {
        let found = self.user_repo.find_by_ids(user_ids).await?;
        if let Some(missing) = user_ids
            .iter()
            .find(|id| !found.iter().any(|u| u.id == **id))
        {
            return Err(AppError::NotFound(format!("User {missing}")));
        }
        Ok(())
    }

    /// Publish the current snapshot on the conversation channel.
    async fn announce_updated(&self, conversation: &conversation::Model) {
        match self
            .conversation_repo
            .find_active_participants_with_users(&[conversation.id])
            .await
        {
            Ok(participants) => {
                let snapshot = views::conversation_snapshot(conversation, &participants);
                self.broadcaster
                    .to_conversation(conversation.id, RealtimeEvent::ConversationUpdated(snapshot))
                    .await;
            }
            Err(e) => {
                warn!(error = %e, conversation_id = conversation.id, "Failed to load participants for broadcast");
            }
        }
    }

    /// Tell newly added members about the conversation on their own channels.
    async fn announce_joined(&self, conversation: &conversation::Model, user_ids: &[i64]) {
        let preview = match self.message_service.last_message_preview(conversation).await {
            Ok(preview) => preview,
            Err(e) => {
                warn!(error = %e, conversation_id = conversation.id, "Failed to load last message for broadcast");
                None
            }
        };
        let delta = views::list_delta(conversation, preview, DeltaCause::Joined, None);
        self.broadcaster
            .to_users(
                user_ids.iter().copied(),
                &RealtimeEvent::ConversationListDelta(delta),
            )
            .await;
    }
}
