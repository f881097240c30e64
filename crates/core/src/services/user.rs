//! User service.

use atrium_common::{AppError, AppResult, ClockService, IdGenerator};
use atrium_db::{entities::user, repositories::UserRepository};
use sea_orm::Set;
use serde::Deserialize;
use validator::Validate;

/// Input for creating a new user.
#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserInput {
    #[validate(length(min = 1, max = 64))]
    pub username: String,

    #[validate(length(min = 1, max = 128))]
    pub display_name: String,

    #[validate(length(max = 512))]
    pub avatar_url: Option<String>,
}

/// User service for business logic.
#[derive(Clone)]
pub struct UserService {
    user_repo: UserRepository,
    id_gen: IdGenerator,
    clock: ClockService,
}

impl UserService {
    /// Create a new user service.
    #[must_use]
    pub const fn new(user_repo: UserRepository, clock: ClockService) -> Self {
        Self {
            user_repo,
            id_gen: IdGenerator::new(),
            clock,
        }
    }

    /// Create a user with a fresh access token.
    pub async fn create(&self, input: CreateUserInput) -> AppResult<user::Model> {
        input.validate()?;

        let model = user::ActiveModel {
            username: Set(input.username),
            display_name: Set(input.display_name),
            avatar_url: Set(input.avatar_url),
            token: Set(Some(self.id_gen.generate_token())),
            created_at: Set(self.clock.now().into()),
            ..Default::default()
        };

        self.user_repo.create(model).await
    }

    /// Resolve a bearer token to its user.
    pub async fn authenticate(&self, token: &str) -> AppResult<user::Model> {
        if token.is_empty() {
            return Err(AppError::Unauthorized);
        }
        self.user_repo
            .find_by_token(token)
            .await?
            .ok_or(AppError::Unauthorized)
    }

    /// Get a user by ID.
    pub async fn get(&self, id: i64) -> AppResult<user::Model> {
        self.user_repo.get_by_id(id).await
    }
}
