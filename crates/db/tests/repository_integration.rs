//! Repository tests against a migrated SQLite database.

#![allow(clippy::unwrap_used)]

use std::collections::HashSet;

use atrium_common::AppError;
use atrium_db::entities::{
    conversation::ConversationType, conversation_participant::ParticipantRole,
    message::MessageType,
};
use atrium_db::repositories::{
    AttachmentRepository, ConversationListFilter, ConversationRepository, MessageRepository,
    NewAttachment, NewMessage, PageCursor,
};
use atrium_db::test_utils::{TestDatabase, create_user};
use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use sea_orm::Set;

fn at(ms: i64) -> DateTime<FixedOffset> {
    (Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap() + Duration::milliseconds(ms)).into()
}

fn text(conversation_id: i64, sender_id: i64, body: &str, created_at: DateTime<FixedOffset>) -> NewMessage {
    NewMessage {
        conversation_id,
        sender_id,
        message_type: MessageType::Text,
        body: Some(body.to_string()),
        reply_to_id: None,
        client_id: None,
        created_at,
    }
}

#[tokio::test]
async fn test_direct_conversation_is_unique_per_pair() {
    let db = TestDatabase::new().await.unwrap();
    let alice = create_user(db.connection(), "alice", "Alice").await.unwrap();
    let bob = create_user(db.connection(), "bob", "Bob").await.unwrap();
    let repo = ConversationRepository::new(db.shared());

    let created = repo.create_direct(alice.id, bob.id, at(0)).await.unwrap();
    assert_eq!(created.kind, ConversationType::Direct);

    let found = repo.find_direct(bob.id, alice.id).await.unwrap().unwrap();
    assert_eq!(found.id, created.id);

    let err = repo.create_direct(bob.id, alice.id, at(1)).await.unwrap_err();
    assert!(matches!(err, AppError::ConflictDuplicateDirect));

    let participants = repo.find_active_participants(created.id).await.unwrap();
    assert_eq!(participants.len(), 2);
}

#[tokio::test]
async fn test_append_moves_pointer_and_sender_cursor() {
    let db = TestDatabase::new().await.unwrap();
    let alice = create_user(db.connection(), "alice", "Alice").await.unwrap();
    let bob = create_user(db.connection(), "bob", "Bob").await.unwrap();
    let conversations = ConversationRepository::new(db.shared());
    let messages = MessageRepository::new(db.shared());

    let conversation = conversations.create_direct(alice.id, bob.id, at(0)).await.unwrap();

    let attachment = NewAttachment {
        disk: "local".to_string(),
        path: "messages/attachments/a.txt".to_string(),
        mime: "text/plain".to_string(),
        size: 3,
        width: None,
        height: None,
        original_name: Some("a.txt".to_string()),
        metadata: None,
    };
    let (sent, attachments) = messages
        .append(text(conversation.id, alice.id, "hi", at(10)), vec![attachment])
        .await
        .unwrap();

    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].message_id, sent.id);
    assert_eq!(sent.delivered_at, Some(at(10)));

    let conversation = conversations.get_by_id(conversation.id).await.unwrap();
    assert_eq!(conversation.last_message_id, Some(sent.id));
    assert_eq!(conversation.updated_at, at(10));

    let sender = conversations
        .find_active_participant(conversation.id, alice.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sender.last_read_message_id, Some(sent.id));
    let recipient = conversations
        .find_active_participant(conversation.id, bob.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(recipient.last_read_message_id, None);

    assert_eq!(
        messages.count_unread(conversation.id, bob.id, None).await.unwrap(),
        1
    );
    assert_eq!(
        messages
            .count_unread(conversation.id, alice.id, sender.last_read_message_id)
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_soft_delete_recomputes_last_message() {
    let db = TestDatabase::new().await.unwrap();
    let alice = create_user(db.connection(), "alice", "Alice").await.unwrap();
    let bob = create_user(db.connection(), "bob", "Bob").await.unwrap();
    let conversations = ConversationRepository::new(db.shared());
    let messages = MessageRepository::new(db.shared());
    let conversation = conversations.create_direct(alice.id, bob.id, at(0)).await.unwrap();

    let (first, _) = messages
        .append(text(conversation.id, alice.id, "one", at(10)), vec![])
        .await
        .unwrap();
    let (second, _) = messages
        .append(text(conversation.id, bob.id, "two", at(20)), vec![])
        .await
        .unwrap();

    let outcome = messages.soft_delete(second.id, at(30)).await.unwrap();
    assert!(outcome.pointer_moved);
    assert_eq!(outcome.conversation.last_message_id, Some(first.id));
    assert!(outcome.message.is_deleted());

    let outcome = messages.soft_delete(first.id, at(40)).await.unwrap();
    assert_eq!(outcome.conversation.last_message_id, None);

    let err = messages.soft_delete(first.id, at(50)).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    assert_eq!(messages.count_in_conversation(conversation.id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_page_keyset_with_colliding_timestamps() {
    let db = TestDatabase::new().await.unwrap();
    let alice = create_user(db.connection(), "alice", "Alice").await.unwrap();
    let bob = create_user(db.connection(), "bob", "Bob").await.unwrap();
    let conversations = ConversationRepository::new(db.shared());
    let messages = MessageRepository::new(db.shared());
    let conversation = conversations.create_direct(alice.id, bob.id, at(0)).await.unwrap();

    // Every third message shares its timestamp with the previous one
    let mut ms = 0;
    for i in 0..30 {
        if i % 3 != 0 {
            ms += 1;
        }
        messages
            .append(text(conversation.id, alice.id, &format!("m{i}"), at(ms)), vec![])
            .await
            .unwrap();
    }

    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    let mut before = None;
    loop {
        let page = messages
            .page(conversation.id, bob.id, before, 7)
            .await
            .unwrap();
        if page.is_empty() {
            break;
        }
        for m in &page {
            assert!(seen.insert(m.id), "duplicate message {}", m.id);
            keys.push((m.created_at, m.id));
        }
        let last = page.last().unwrap();
        before = Some(PageCursor {
            created_at: last.created_at,
            id: last.id,
        });
    }

    assert_eq!(seen.len(), 30);
    assert!(keys.windows(2).all(|w| w[0] > w[1]));
}

#[tokio::test]
async fn test_hidden_messages_are_excluded_for_that_user_only() {
    let db = TestDatabase::new().await.unwrap();
    let alice = create_user(db.connection(), "alice", "Alice").await.unwrap();
    let bob = create_user(db.connection(), "bob", "Bob").await.unwrap();
    let conversations = ConversationRepository::new(db.shared());
    let messages = MessageRepository::new(db.shared());
    let conversation = conversations.create_direct(alice.id, bob.id, at(0)).await.unwrap();

    let (sent, _) = messages
        .append(text(conversation.id, alice.id, "secret", at(5)), vec![])
        .await
        .unwrap();

    messages.hide_for_user(sent.id, bob.id, at(6)).await.unwrap();
    messages.hide_for_user(sent.id, bob.id, at(7)).await.unwrap();

    assert!(messages.page(conversation.id, bob.id, None, 10).await.unwrap().is_empty());
    assert_eq!(messages.page(conversation.id, alice.id, None, 10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_read_cursor_only_moves_forward() {
    let db = TestDatabase::new().await.unwrap();
    let alice = create_user(db.connection(), "alice", "Alice").await.unwrap();
    let bob = create_user(db.connection(), "bob", "Bob").await.unwrap();
    let conversations = ConversationRepository::new(db.shared());
    let messages = MessageRepository::new(db.shared());
    let conversation = conversations.create_direct(alice.id, bob.id, at(0)).await.unwrap();

    let (first, _) = messages
        .append(text(conversation.id, alice.id, "one", at(1)), vec![])
        .await
        .unwrap();
    let (second, _) = messages
        .append(text(conversation.id, alice.id, "two", at(2)), vec![])
        .await
        .unwrap();

    assert!(
        conversations
            .advance_read_cursor(conversation.id, bob.id, second.id, at(3))
            .await
            .unwrap()
    );
    assert!(
        !conversations
            .advance_read_cursor(conversation.id, bob.id, first.id, at(4))
            .await
            .unwrap()
    );

    let participant = conversations
        .find_active_participant(conversation.id, bob.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(participant.last_read_message_id, Some(second.id));

    let first = messages.find_by_id(first.id).await.unwrap().unwrap();
    assert_eq!(first.read_at, Some(at(3)));
}

#[tokio::test]
async fn test_list_for_user_orders_filters_and_searches() {
    let db = TestDatabase::new().await.unwrap();
    let alice = create_user(db.connection(), "alice", "Alice").await.unwrap();
    let bob = create_user(db.connection(), "bob", "Bob Builder").await.unwrap();
    let carol = create_user(db.connection(), "carol", "Carol").await.unwrap();
    let conversations = ConversationRepository::new(db.shared());
    let messages = MessageRepository::new(db.shared());

    let with_bob = conversations.create_direct(alice.id, bob.id, at(0)).await.unwrap();
    let group = conversations
        .create_group(alice.id, Some("Reading Club".to_string()), None, &[carol.id], at(100))
        .await
        .unwrap();
    let with_carol = conversations.create_direct(alice.id, carol.id, at(50)).await.unwrap();

    // Activity in the oldest conversation moves it to the top
    messages
        .append(text(with_bob.id, bob.id, "hey", at(200)), vec![])
        .await
        .unwrap();

    let inbox = ConversationListFilter {
        limit: 10,
        ..Default::default()
    };
    let ids: Vec<i64> = conversations
        .list_for_user(alice.id, &inbox)
        .await
        .unwrap()
        .iter()
        .map(|c| c.id)
        .collect();
    assert_eq!(ids, vec![with_bob.id, group.id, with_carol.id]);

    let search = ConversationListFilter {
        search: Some("builder".to_string()),
        limit: 10,
        ..Default::default()
    };
    let found = conversations.list_for_user(alice.id, &search).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, with_bob.id);

    let search = ConversationListFilter {
        search: Some("club".to_string()),
        limit: 10,
        ..Default::default()
    };
    let found = conversations.list_for_user(alice.id, &search).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, group.id);

    let search = ConversationListFilter {
        search: Some("alice".to_string()),
        limit: 10,
        ..Default::default()
    };
    let found = conversations.list_for_user(alice.id, &search).await.unwrap();
    assert_eq!(found.len(), 3);

    // Archive one for alice only
    let participant = conversations
        .find_active_participant(group.id, alice.id)
        .await
        .unwrap()
        .unwrap();
    let mut active: atrium_db::entities::conversation_participant::ActiveModel =
        participant.into();
    active.archived_at = Set(Some(at(300)));
    conversations.update_participant(active).await.unwrap();

    let inbox_ids: Vec<i64> = conversations
        .list_for_user(alice.id, &inbox)
        .await
        .unwrap()
        .iter()
        .map(|c| c.id)
        .collect();
    assert!(!inbox_ids.contains(&group.id));

    let archived = ConversationListFilter {
        archived: true,
        limit: 10,
        ..Default::default()
    };
    let archived = conversations.list_for_user(alice.id, &archived).await.unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].id, group.id);

    // Carol still sees the group in her inbox
    let carol_ids: Vec<i64> = conversations
        .list_for_user(carol.id, &inbox)
        .await
        .unwrap()
        .iter()
        .map(|c| c.id)
        .collect();
    assert!(carol_ids.contains(&group.id));
}

#[tokio::test]
async fn test_purgeable_attachments_belong_to_deleted_messages() {
    let db = TestDatabase::new().await.unwrap();
    let alice = create_user(db.connection(), "alice", "Alice").await.unwrap();
    let bob = create_user(db.connection(), "bob", "Bob").await.unwrap();
    let conversations = ConversationRepository::new(db.shared());
    let messages = MessageRepository::new(db.shared());
    let attachments = AttachmentRepository::new(db.shared());
    let conversation = conversations.create_direct(alice.id, bob.id, at(0)).await.unwrap();

    let file = |name: &str| NewAttachment {
        disk: "local".to_string(),
        path: format!("messages/attachments/{name}"),
        mime: "application/pdf".to_string(),
        size: 10,
        width: None,
        height: None,
        original_name: None,
        metadata: None,
    };

    let (kept, _) = messages
        .append(text(conversation.id, alice.id, "keep", at(1)), vec![file("a.pdf")])
        .await
        .unwrap();
    let (gone, gone_files) = messages
        .append(text(conversation.id, alice.id, "gone", at(2)), vec![file("b.pdf")])
        .await
        .unwrap();
    messages.soft_delete(gone.id, at(3)).await.unwrap();

    let purgeable = attachments.find_purgeable(10).await.unwrap();
    assert_eq!(purgeable.len(), 1);
    assert_eq!(purgeable[0].id, gone_files[0].id);

    attachments.mark_purged(purgeable[0].id, at(4)).await.unwrap();
    assert!(attachments.find_purgeable(10).await.unwrap().is_empty());

    let (attachment, owner) = attachments
        .find_with_message(gone_files[0].id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(owner.id, gone.id);
    assert_eq!(attachment.purged_at, Some(at(4)));
    assert_ne!(kept.id, gone.id);
}

#[tokio::test]
async fn test_rejoining_reuses_participant_row() {
    let db = TestDatabase::new().await.unwrap();
    let alice = create_user(db.connection(), "alice", "Alice").await.unwrap();
    let bob = create_user(db.connection(), "bob", "Bob").await.unwrap();
    let carol = create_user(db.connection(), "carol", "Carol").await.unwrap();
    let conversations = ConversationRepository::new(db.shared());

    let group = conversations
        .create_group(alice.id, Some("g".to_string()), None, &[bob.id], at(0))
        .await
        .unwrap();
    let original = conversations.find_participant(group.id, bob.id).await.unwrap().unwrap();

    let successor = conversations
        .remove_participant(original.clone(), at(1))
        .await
        .unwrap();
    assert_eq!(successor, None);
    assert!(
        conversations
            .find_active_participant(group.id, bob.id)
            .await
            .unwrap()
            .is_none()
    );

    let added = conversations
        .add_members(group.id, &[alice.id, bob.id, carol.id], at(2))
        .await
        .unwrap();
    assert_eq!(added, vec![bob.id, carol.id]);

    let rejoined = conversations.find_participant(group.id, bob.id).await.unwrap().unwrap();
    assert_eq!(rejoined.id, original.id);
    assert!(rejoined.is_active());
    assert_eq!(rejoined.joined_at, at(2));
    assert_eq!(conversations.find_active_participants(group.id).await.unwrap().len(), 3);
    assert_eq!(conversations.get_by_id(group.id).await.unwrap().updated_at, at(2));

    let none_added = conversations.add_members(group.id, &[bob.id], at(3)).await.unwrap();
    assert!(none_added.is_empty());
    assert_eq!(conversations.get_by_id(group.id).await.unwrap().updated_at, at(2));
}

#[tokio::test]
async fn test_failed_add_members_adds_nobody() {
    let db = TestDatabase::new().await.unwrap();
    let alice = create_user(db.connection(), "alice", "Alice").await.unwrap();
    let bob = create_user(db.connection(), "bob", "Bob").await.unwrap();
    let carol = create_user(db.connection(), "carol", "Carol").await.unwrap();
    let conversations = ConversationRepository::new(db.shared());

    let group = conversations
        .create_group(alice.id, None, None, &[bob.id], at(0))
        .await
        .unwrap();

    let missing_user = carol.id + 1_000;
    let result = conversations
        .add_members(group.id, &[carol.id, missing_user], at(1))
        .await;
    assert!(result.is_err());

    assert!(
        conversations
            .find_participant(group.id, carol.id)
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(conversations.get_by_id(group.id).await.unwrap().updated_at, at(0));
}

#[tokio::test]
async fn test_owner_leaving_promotes_earliest_member_in_same_write() {
    let db = TestDatabase::new().await.unwrap();
    let alice = create_user(db.connection(), "alice", "Alice").await.unwrap();
    let bob = create_user(db.connection(), "bob", "Bob").await.unwrap();
    let carol = create_user(db.connection(), "carol", "Carol").await.unwrap();
    let conversations = ConversationRepository::new(db.shared());

    let group = conversations
        .create_group(alice.id, None, None, &[bob.id], at(0))
        .await
        .unwrap();
    conversations.add_members(group.id, &[carol.id], at(1)).await.unwrap();

    let owner = conversations.find_participant(group.id, alice.id).await.unwrap().unwrap();
    let successor = conversations.remove_participant(owner, at(2)).await.unwrap();
    assert_eq!(successor, Some(bob.id));

    let active = conversations.find_active_participants(group.id).await.unwrap();
    let owners: Vec<i64> = active
        .iter()
        .filter(|p| p.role == ParticipantRole::Owner)
        .map(|p| p.user_id)
        .collect();
    assert_eq!(owners, vec![bob.id]);
    assert_eq!(active.len(), 2);
    assert_eq!(conversations.get_by_id(group.id).await.unwrap().updated_at, at(2));
}
