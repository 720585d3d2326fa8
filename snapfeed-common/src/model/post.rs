use crate::model::{
    Id,
    user::{User, UserMarker},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

pub const CAPTION_MAX_LEN: usize = 500;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct CommentMarker;

/// A post with its owner and comment owners resolved, as served in the feed.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Id<PostMarker>,
    pub owner: User,
    #[serde(flatten)]
    pub content: PostContent,
    pub likes: Vec<Id<UserMarker>>,
    pub comments: Vec<Comment>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialPost {
    pub id: Id<PostMarker>,
    pub owner: Id<UserMarker>,
    #[serde(flatten)]
    pub content: PostContent,
    pub likes: Vec<Id<UserMarker>>,
    pub comments: Vec<PartialComment>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Id<CommentMarker>,
    pub owner: User,
    pub text: CommentText,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialComment {
    pub id: Id<CommentMarker>,
    pub owner: Id<UserMarker>,
    pub text: CommentText,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl PartialPost {
    #[must_use]
    pub fn new(
        id: Id<PostMarker>,
        owner: Id<UserMarker>,
        content: PostContent,
        created_at: OffsetDateTime,
    ) -> Self {
        Self {
            id,
            owner,
            content,
            likes: Vec::new(),
            comments: Vec::new(),
            created_at,
            updated_at: created_at,
        }
    }
}

/// The parts of a post its owner chooses.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct PostContent {
    pub caption: Option<String>,
    pub image: String,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Caption must be at most {CAPTION_MAX_LEN} characters long, got {0}")]
pub struct CaptionTooLongError(usize);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Image is required")]
pub struct MissingImageError;

impl PostContent {
    pub fn new(caption: Option<String>, image: Option<String>) -> Result<Self, PostContentError> {
        let image = image
            .filter(|image| !image.trim().is_empty())
            .ok_or(MissingImageError)?;

        if let Some(caption) = &caption {
            let len = caption.chars().count();
            if len > CAPTION_MAX_LEN {
                return Err(CaptionTooLongError(len).into());
            }
        }

        Ok(Self { caption, image })
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum PostContentError {
    #[error(transparent)]
    Caption(#[from] CaptionTooLongError),
    #[error(transparent)]
    Image(#[from] MissingImageError),
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentText(String);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Comment cannot be empty")]
pub struct EmptyCommentError;

impl CommentText {
    pub fn new(text: Option<String>) -> Result<Self, EmptyCommentError> {
        text.filter(|text| !text.trim().is_empty())
            .map(Self)
            .ok_or(EmptyCommentError)
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use crate::model::post::{
        CAPTION_MAX_LEN, CaptionTooLongError, CommentText, EmptyCommentError, MissingImageError,
        PostContent, PostContentError,
    };

    #[test]
    fn image_is_required() {
        assert_eq!(
            PostContent::new(Some("caption".into()), None),
            Err(PostContentError::Image(MissingImageError))
        );
        assert_eq!(
            PostContent::new(None, Some(" \t".into())),
            Err(PostContentError::Image(MissingImageError))
        );

        let content = PostContent::new(None, Some("a.jpg".into())).unwrap();
        assert_eq!(content.image, "a.jpg");
        assert_eq!(content.caption, None);
    }

    #[test]
    fn caption_length_counts_characters() {
        let longest = "ü".repeat(CAPTION_MAX_LEN);
        assert!(PostContent::new(Some(longest), Some("a.jpg".into())).is_ok());

        let too_long = "x".repeat(CAPTION_MAX_LEN + 1);
        assert_eq!(
            PostContent::new(Some(too_long), Some("a.jpg".into())),
            Err(PostContentError::Caption(CaptionTooLongError(
                CAPTION_MAX_LEN + 1
            )))
        );
    }

    #[test]
    fn comment_text_must_not_be_blank() {
        assert_eq!(CommentText::new(None), Err(EmptyCommentError));
        assert_eq!(CommentText::new(Some(String::new())), Err(EmptyCommentError));
        assert_eq!(CommentText::new(Some("  \n ".into())), Err(EmptyCommentError));
        assert_eq!(CommentText::new(Some("hi".into())).unwrap().get(), "hi");
    }
}
