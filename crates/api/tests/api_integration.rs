//! API integration tests.
//!
//! Every test drives the full router against a throwaway SQLite database.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use atrium_api::{AppState, RealtimeHub, app, request_body_limit};
use atrium_common::{ClockService, LocalStorage, MessagingConfig, StorageSettings, SystemClock};
use atrium_core::{
    AttachmentService, ConversationService, MessageService, MessagingService, UserService,
};
use atrium_db::repositories::{
    AttachmentRepository, ConversationRepository, MessageRepository, UserRepository,
};
use atrium_db::test_utils::TestDatabase;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
    response::Response,
};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "atrium-test-boundary";

struct TestApp {
    router: Router,
    _db: TestDatabase,
    _files: TempDir,
}

impl TestApp {
    async fn new() -> Self {
        let db = TestDatabase::new().await.unwrap();
        let conn = db.shared();
        let files = tempfile::tempdir().unwrap();
        let clock: ClockService = Arc::new(SystemClock);
        let hub = RealtimeHub::new();

        let settings = StorageSettings {
            base_path: files.path().to_path_buf(),
            ..StorageSettings::default()
        };
        let storage = Arc::new(LocalStorage::new(
            settings.disk.clone(),
            settings.base_path.clone(),
            settings.base_url.clone(),
        ));
        let body_limit = request_body_limit(&settings);

        let message_service = MessageService::new(
            MessageRepository::new(conn.clone()),
            UserRepository::new(conn.clone()),
            clock.clone(),
            MessagingConfig::default(),
        );
        let attachment_service = AttachmentService::new(
            storage,
            AttachmentRepository::new(conn.clone()),
            ConversationRepository::new(conn.clone()),
            settings,
            clock.clone(),
        );
        let mut conversation_service = ConversationService::new(
            ConversationRepository::new(conn.clone()),
            UserRepository::new(conn.clone()),
            message_service.clone(),
            clock.clone(),
        );
        conversation_service.set_event_publisher(Arc::new(hub.clone()));
        let mut messaging_service = MessagingService::new(
            ConversationRepository::new(conn.clone()),
            message_service,
            attachment_service.clone(),
            clock.clone(),
        );
        messaging_service.set_event_publisher(Arc::new(hub.clone()));

        let state = AppState {
            user_service: UserService::new(UserRepository::new(conn), clock),
            conversation_service,
            messaging_service,
            attachment_service,
            realtime: hub,
        };

        Self {
            router: app(state, body_limit),
            _db: db,
            _files: files,
        }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn call(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.send(request).await;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    /// Register a user and return `(id, token)`.
    async fn signup(&self, username: &str) -> (i64, String) {
        let (status, body) = self
            .call(json_request(
                "POST",
                "/api/users",
                None,
                &json!({"username": username, "display_name": username.to_uppercase()}),
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        (
            body["data"]["id"].as_i64().unwrap(),
            body["data"]["token"].as_str().unwrap().to_string(),
        )
    }

    async fn direct(&self, token: &str, partner_id: i64) -> i64 {
        let (status, body) = self
            .call(json_request(
                "POST",
                "/api/conversations",
                Some(token),
                &json!({"type": "direct", "user_id": partner_id}),
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"]["id"].as_i64().unwrap()
    }

    async fn send_text(&self, token: &str, conversation_id: i64, text: &str) -> Value {
        let (status, body) = self
            .call(json_request(
                "POST",
                &format!("/api/conversations/{conversation_id}/messages"),
                Some(token),
                &json!({"body": text}),
            ))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"].clone()
    }
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: &Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

fn multipart_send(uri: &str, token: &str, text: &str, file_name: &str, file: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"body\"\r\n\r\n{text}\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"attachments\"; filename=\"{file_name}\"\r\nContent-Type: text/plain\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(file);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_requests_without_token_are_unauthorized() {
    let app = TestApp::new().await;

    let response = app
        .send(Request::builder().uri("/api/conversations").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.send(get("/api/users/me", "not-a-token")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_signup_and_me() {
    let app = TestApp::new().await;
    let (id, token) = app.signup("alice").await;

    let (status, body) = app.call(get("/api/users/me", &token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["id"], id);
    assert_eq!(body["data"]["display_name"], "ALICE");
    assert!(body["data"].get("token").is_none());
}

#[tokio::test]
async fn test_direct_conversation_is_reused() {
    let app = TestApp::new().await;
    let (_, alice) = app.signup("alice").await;
    let (bob_id, _) = app.signup("bob").await;

    let first = app.direct(&alice, bob_id).await;
    let second = app.direct(&alice, bob_id).await;
    assert_eq!(first, second);

    let (status, body) = app
        .call(json_request(
            "POST",
            "/api/conversations",
            Some(&alice),
            &json!({"type": "direct"}),
        ))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_message_round_trip_with_unread_and_read() {
    let app = TestApp::new().await;
    let (_, alice) = app.signup("alice").await;
    let (bob_id, bob) = app.signup("bob").await;
    let conversation_id = app.direct(&alice, bob_id).await;

    let first = app.send_text(&alice, conversation_id, "hello").await;
    let second = app.send_text(&alice, conversation_id, "are you there?").await;
    assert_eq!(first["message_type"], "text");

    let (status, body) = app.call(get("/api/conversations", &bob)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["id"], conversation_id);
    assert_eq!(body["data"][0]["unread_count"], 2);
    assert_eq!(body["data"][0]["last_message"]["preview"], "are you there?");

    let (status, body) = app
        .call(get(
            &format!("/api/conversations/{conversation_id}/messages?limit=1"),
            &bob,
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["messages"][0]["id"], second["id"]);
    assert_eq!(body["data"]["next_before"], second["id"]);

    let (status, body) = app
        .call(json_request(
            "POST",
            &format!("/api/conversations/{conversation_id}/read"),
            Some(&bob),
            &json!({"last_read_message_id": second["id"]}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["advanced"], true);
    assert_eq!(body["data"]["unread_count"], 0);

    let (_, body) = app
        .call(json_request(
            "POST",
            &format!("/api/conversations/{conversation_id}/read"),
            Some(&bob),
            &json!({"last_read_message_id": first["id"]}),
        ))
        .await;
    assert_eq!(body["data"]["advanced"], false);
    assert_eq!(body["data"]["last_read_message_id"], second["id"]);
}

#[tokio::test]
async fn test_unknown_cursor_is_rejected() {
    let app = TestApp::new().await;
    let (_, alice) = app.signup("alice").await;
    let (bob_id, _) = app.signup("bob").await;
    let conversation_id = app.direct(&alice, bob_id).await;

    let (status, body) = app
        .call(get(
            &format!("/api/conversations/{conversation_id}/messages?before=999999"),
            &alice,
        ))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "INVALID_CURSOR");
}

#[tokio::test]
async fn test_edit_and_delete_permissions() {
    let app = TestApp::new().await;
    let (_, alice) = app.signup("alice").await;
    let (bob_id, bob) = app.signup("bob").await;
    let conversation_id = app.direct(&alice, bob_id).await;
    let message = app.send_text(&alice, conversation_id, "draft").await;
    let message_uri = format!("/api/messages/{}", message["id"]);

    let (status, body) = app
        .call(json_request("PATCH", &message_uri, Some(&alice), &json!({"body": "final"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["body"], "final");
    assert!(body["data"]["edited_at"].is_string());

    let (status, _) = app
        .call(json_request("PATCH", &message_uri, Some(&bob), &json!({"body": "mine now"})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .call(json_request("DELETE", &format!("{message_uri}?scope=all"), Some(&bob), &json!({})))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .call(json_request("DELETE", &format!("{message_uri}?scope=me"), Some(&bob), &json!({})))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let history = format!("/api/conversations/{conversation_id}/messages");
    let (_, body) = app.call(get(&history, &bob)).await;
    assert_eq!(body["data"]["messages"].as_array().unwrap().len(), 0);
    let (_, body) = app.call(get(&history, &alice)).await;
    assert_eq!(body["data"]["messages"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_multipart_attachment_is_served_to_participants() {
    let app = TestApp::new().await;
    let (_, alice) = app.signup("alice").await;
    let (bob_id, bob) = app.signup("bob").await;
    let (_, mallory) = app.signup("mallory").await;
    let conversation_id = app.direct(&alice, bob_id).await;

    let (status, body) = app
        .call(multipart_send(
            &format!("/api/conversations/{conversation_id}/messages"),
            &alice,
            "see attached",
            "notes.txt",
            b"secret notes",
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["body"], "see attached");
    let url = body["data"]["attachments"][0]["url"].as_str().unwrap().to_string();

    let response = app.send(get(&url, &bob)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "inline; filename=\"notes.txt\""
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"secret notes");

    let response = app.send(get(&format!("{url}/download"), &bob)).await;
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"notes.txt\""
    );

    let response = app.send(get(&url, &mallory)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.send(get(&format!("{url}/thumbnail"), &bob)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_outsiders_cannot_see_conversations() {
    let app = TestApp::new().await;
    let (_, alice) = app.signup("alice").await;
    let (bob_id, bob) = app.signup("bob").await;
    let (_, mallory) = app.signup("mallory").await;
    let conversation_id = app.direct(&alice, bob_id).await;

    let (status, _) = app
        .call(get(&format!("/api/conversations/{conversation_id}"), &mallory))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let stream = format!("/api/streaming/conversations/{conversation_id}");
    let response = app.send(get(&stream, &mallory)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app.send(get(&stream, &bob)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );
}

#[tokio::test]
async fn test_group_management() {
    let app = TestApp::new().await;
    let (_, alice) = app.signup("alice").await;
    let (bob_id, bob) = app.signup("bob").await;
    let (carol_id, _) = app.signup("carol").await;

    let (status, body) = app
        .call(json_request(
            "POST",
            "/api/conversations",
            Some(&alice),
            &json!({"type": "group", "user_ids": [bob_id], "title": "Crew"}),
        ))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let group_id = body["data"]["id"].as_i64().unwrap();
    assert_eq!(body["data"]["kind"], "group");

    let (status, _) = app
        .call(json_request(
            "POST",
            &format!("/api/conversations/{group_id}/members"),
            Some(&bob),
            &json!({"user_ids": [carol_id]}),
        ))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .call(json_request(
            "POST",
            &format!("/api/conversations/{group_id}/members"),
            Some(&alice),
            &json!({"user_ids": [carol_id]}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["participants"].as_array().unwrap().len(), 3);

    let (status, body) = app
        .call(json_request(
            "POST",
            &format!("/api/conversations/{group_id}/pin"),
            Some(&bob),
            &json!({}),
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["pinned"], true);

    let (status, _) = app
        .call(json_request(
            "POST",
            &format!("/api/conversations/{group_id}/leave"),
            Some(&bob),
            &json!({}),
        ))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app
        .call(get(&format!("/api/conversations/{group_id}"), &bob))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
