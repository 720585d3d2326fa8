use crate::store::{DbError, Result, Store};
use async_trait::async_trait;
use snapfeed_common::{
    model::{
        Id, SnapfeedSnowflakeGenerator,
        post::{
            Comment, CommentMarker, CommentText, PartialComment, PartialPost, Post, PostContent,
            PostMarker,
        },
        user::{NewUser, User, UserCredentials, UserMarker, Username},
    },
    snowflake::WorkerId,
};
use std::sync::{Mutex, MutexGuard, PoisonError};
use time::OffsetDateTime;

#[derive(Debug, Default)]
struct MemoryState {
    generator: SnapfeedSnowflakeGenerator,
    users: Vec<UserCredentials>,
    posts: Vec<PartialPost>,
}

impl MemoryState {
    fn user(&self, user_id: Id<UserMarker>) -> Option<&User> {
        self.users
            .iter()
            .map(|credentials| &credentials.user)
            .find(|user| user.id == user_id)
    }

    fn require_user(&self, user_id: Id<UserMarker>) -> Result<&User> {
        self.user(user_id).ok_or(DbError::UnknownUser(user_id))
    }

    fn has_post(&self, post_id: Id<PostMarker>) -> bool {
        self.posts.iter().any(|post| post.id == post_id)
    }

    fn post_mut(&mut self, post_id: Id<PostMarker>) -> Option<&mut PartialPost> {
        self.posts.iter_mut().find(|post| post.id == post_id)
    }
}

/// A process-local [`Store`] that forgets everything on restart.
///
/// Each operation runs under a single lock, so concurrent toggles and
/// appends never lose updates.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(worker_id: WorkerId) -> Self {
        let state = MemoryState {
            generator: SnapfeedSnowflakeGenerator::new(worker_id),
            ..MemoryState::default()
        };

        Self {
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_user(&self, user: &NewUser) -> Result<User> {
        let mut state = self.lock();

        if state
            .users
            .iter()
            .any(|credentials| credentials.user.username == user.username)
        {
            return Err(DbError::UsernameTaken(user.username.clone()));
        }

        let created = User {
            id: state.generator.generate()?.into(),
            username: user.username.clone(),
            profile_picture: user.profile_picture.clone(),
        };
        state.users.push(UserCredentials {
            user: created.clone(),
            password: user.password.clone(),
        });

        Ok(created)
    }

    async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>> {
        Ok(self.lock().user(user_id).cloned())
    }

    async fn fetch_credentials(&self, username: &Username) -> Result<Option<UserCredentials>> {
        let credentials = self
            .lock()
            .users
            .iter()
            .find(|credentials| &credentials.user.username == username)
            .cloned();

        Ok(credentials)
    }

    async fn create_post(
        &self,
        owner: Id<UserMarker>,
        content: &PostContent,
    ) -> Result<PartialPost> {
        let mut state = self.lock();
        state.require_user(owner)?;

        let now = OffsetDateTime::now_utc();
        let post = PartialPost::new(
            state.generator.generate_at(now)?.into(),
            owner,
            content.clone(),
            now,
        );
        state.posts.push(post.clone());

        Ok(post)
    }

    async fn fetch_feed(&self) -> Result<Vec<Post>> {
        let state = self.lock();

        let mut posts = state
            .posts
            .iter()
            .map(|post| -> Result<Post> {
                let comments = post
                    .comments
                    .iter()
                    .map(|comment| -> Result<Comment> {
                        Ok(Comment {
                            id: comment.id,
                            owner: state.require_user(comment.owner)?.clone(),
                            text: comment.text.clone(),
                            created_at: comment.created_at,
                        })
                    })
                    .collect::<Result<_>>()?;

                Ok(Post {
                    id: post.id,
                    owner: state.require_user(post.owner)?.clone(),
                    content: post.content.clone(),
                    likes: post.likes.clone(),
                    comments,
                    created_at: post.created_at,
                    updated_at: post.updated_at,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        posts.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(posts)
    }

    async fn toggle_like(
        &self,
        post_id: Id<PostMarker>,
        user_id: Id<UserMarker>,
    ) -> Result<Option<usize>> {
        let mut state = self.lock();
        if !state.has_post(post_id) {
            return Ok(None);
        }
        state.require_user(user_id)?;

        let Some(post) = state.post_mut(post_id) else {
            return Ok(None);
        };

        if let Some(index) = post.likes.iter().position(|like| *like == user_id) {
            post.likes.remove(index);
        } else {
            post.likes.push(user_id);
        }
        post.updated_at = OffsetDateTime::now_utc();

        Ok(Some(post.likes.len()))
    }

    async fn add_comment(
        &self,
        post_id: Id<PostMarker>,
        user_id: Id<UserMarker>,
        text: &CommentText,
    ) -> Result<Option<Vec<PartialComment>>> {
        let mut state = self.lock();
        if !state.has_post(post_id) {
            return Ok(None);
        }
        state.require_user(user_id)?;

        let now = OffsetDateTime::now_utc();
        let comment_id: Id<CommentMarker> = state.generator.generate_at(now)?.into();

        let Some(post) = state.post_mut(post_id) else {
            return Ok(None);
        };

        post.comments.push(PartialComment {
            id: comment_id,
            owner: user_id,
            text: text.clone(),
            created_at: now,
        });
        post.updated_at = now;

        Ok(Some(post.comments.clone()))
    }
}
