use async_trait::async_trait;
use snapfeed_common::{
    model::{
        Id, ModelValidationError,
        post::{CommentText, PartialComment, PartialPost, Post, PostContent, PostMarker},
        user::{NewUser, User, UserCredentials, UserMarker, Username},
    },
    snowflake::SnowflakeError,
};
use std::fmt::Debug;
use thiserror::Error;

pub type Result<T, E = DbError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("An object in the database was invalid: {0}")]
    Data(#[from] ModelValidationError),
    #[error("Could not generate an id: {0}")]
    Snowflake(#[from] SnowflakeError),
    #[error("Username {} is already taken.", .0.get())]
    UsernameTaken(Username),
    #[error("User with id {0} was not found.")]
    UnknownUser(Id<UserMarker>),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Persistence for users and posts.
///
/// Operations that address a post return `None` when it does not exist.
#[async_trait]
pub trait Store: Debug + Send + Sync {
    async fn create_user(&self, user: &NewUser) -> Result<User>;

    async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>>;

    async fn fetch_credentials(&self, username: &Username) -> Result<Option<UserCredentials>>;

    async fn create_post(&self, owner: Id<UserMarker>, content: &PostContent)
    -> Result<PartialPost>;

    /// All posts, newest first.
    async fn fetch_feed(&self) -> Result<Vec<Post>>;

    /// Adds the like if `user_id` has not liked the post yet and removes it
    /// otherwise. Returns the resulting number of likes.
    async fn toggle_like(
        &self,
        post_id: Id<PostMarker>,
        user_id: Id<UserMarker>,
    ) -> Result<Option<usize>>;

    /// Appends a comment and returns all comments of the post in order.
    async fn add_comment(
        &self,
        post_id: Id<PostMarker>,
        user_id: Id<UserMarker>,
        text: &CommentText,
    ) -> Result<Option<Vec<PartialComment>>>;
}
