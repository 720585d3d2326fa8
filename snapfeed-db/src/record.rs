use snapfeed_common::model::{
    Id, ModelValidationError,
    auth::PasswordDigest,
    post::{Comment, CommentText, PartialComment, PartialPost, PostContent},
    user::{User, UserCredentials, Username},
};
use sqlx::FromRow;
use time::OffsetDateTime;

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct UserRecord {
    pub user_snowflake: i64,
    pub username: String,
    pub profile_picture: Option<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct CredentialsRecord {
    pub user_snowflake: i64,
    pub username: String,
    pub profile_picture: Option<String>,
    pub password_digest: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct PostRecord {
    pub post_snowflake: i64,
    pub user_snowflake: i64,
    pub caption: Option<String>,
    pub image: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct FeedPostRecord {
    #[sqlx(flatten)]
    pub post: PostRecord,
    #[sqlx(flatten)]
    pub owner: UserRecord,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, FromRow)]
pub(crate) struct LikeRecord {
    pub post_snowflake: i64,
    pub user_snowflake: i64,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct CommentRecord {
    pub comment_snowflake: i64,
    pub post_snowflake: i64,
    pub user_snowflake: i64,
    pub text: String,
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct FeedCommentRecord {
    #[sqlx(flatten)]
    pub comment: CommentRecord,
    #[sqlx(flatten)]
    pub owner: UserRecord,
}

impl TryFrom<UserRecord> for User {
    type Error = ModelValidationError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.user_snowflake),
            username: Username::new(value.username)?,
            profile_picture: value.profile_picture,
        })
    }
}

impl TryFrom<CredentialsRecord> for UserCredentials {
    type Error = ModelValidationError;

    fn try_from(value: CredentialsRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            user: User {
                id: Id::from_db(value.user_snowflake),
                username: Username::new(value.username)?,
                profile_picture: value.profile_picture,
            },
            password: PasswordDigest::from_stored(value.password_digest),
        })
    }
}

impl TryFrom<PostRecord> for PartialPost {
    type Error = ModelValidationError;

    fn try_from(value: PostRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.post_snowflake),
            owner: Id::from_db(value.user_snowflake),
            content: PostContent::new(value.caption, Some(value.image))?,
            likes: Vec::new(),
            comments: Vec::new(),
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

impl TryFrom<CommentRecord> for PartialComment {
    type Error = ModelValidationError;

    fn try_from(value: CommentRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.comment_snowflake),
            owner: Id::from_db(value.user_snowflake),
            text: CommentText::new(Some(value.text))?,
            created_at: value.created_at,
        })
    }
}

impl TryFrom<FeedCommentRecord> for Comment {
    type Error = ModelValidationError;

    fn try_from(value: FeedCommentRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Id::from_db(value.comment.comment_snowflake),
            owner: value.owner.try_into()?,
            text: CommentText::new(Some(value.comment.text))?,
            created_at: value.comment.created_at,
        })
    }
}
