use crate::{
    record::{
        CommentRecord, CredentialsRecord, FeedCommentRecord, FeedPostRecord, LikeRecord,
        PostRecord, UserRecord,
    },
    store::{DbError, Result, Store},
};
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
use sqlx::{
    PgConnection, PgPool,
    migrate::Migrator,
    postgres::PgPoolOptions,
    query, query_as, query_scalar,
};
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};
use time::OffsetDateTime;
use tracing::{debug, info};

static MIGRATOR: Migrator = sqlx::migrate!();

#[derive(Debug)]
pub struct DbClient {
    pool: PgPool,
    snowflake_generator: Mutex<SnapfeedSnowflakeGenerator>,
}

fn unknown_user_on_foreign_key_violation(
    user_id: Id<UserMarker>,
) -> impl FnOnce(sqlx::Error) -> DbError {
    move |err| match err {
        sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
            DbError::UnknownUser(user_id)
        }
        err => err.into(),
    }
}

/// Locks the post row for the rest of the transaction.
async fn lock_post(conn: &mut PgConnection, post_id: Id<PostMarker>) -> Result<bool> {
    let locked = query_scalar::<_, i64>(
        "
        SELECT posts.post_snowflake
        FROM posts.posts
        WHERE posts.post_snowflake = $1
        FOR UPDATE
        ",
    )
    .bind(post_id.to_db())
    .fetch_optional(conn)
    .await?;

    Ok(locked.is_some())
}

async fn touch_post(
    conn: &mut PgConnection,
    post_id: Id<PostMarker>,
    now: OffsetDateTime,
) -> Result<()> {
    query("UPDATE posts.posts SET updated_at = $2 WHERE post_snowflake = $1")
        .bind(post_id.to_db())
        .bind(now)
        .execute(conn)
        .await?;

    Ok(())
}

impl DbClient {
    #[must_use]
    pub fn new(pool: PgPool, worker_id: WorkerId) -> Self {
        let snowflake_generator = Mutex::new(SnapfeedSnowflakeGenerator::new(worker_id));

        Self {
            pool,
            snowflake_generator,
        }
    }

    /// Connects to the database and brings its schema up to date.
    pub async fn connect(url: &str, max_connections: u32, worker_id: WorkerId) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        MIGRATOR.run(&pool).await?;
        info!("Database migrations applied");

        Ok(Self::new(pool, worker_id))
    }

    fn next_id<Marker>(&self, now: OffsetDateTime) -> Result<Id<Marker>> {
        let snowflake = self
            .snowflake_generator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .generate_at(now)?;

        Ok(snowflake.into())
    }
}

#[async_trait]
impl Store for DbClient {
    async fn create_user(&self, user: &NewUser) -> Result<User> {
        let user_id = self.next_id::<UserMarker>(OffsetDateTime::now_utc())?;

        let record = query_as::<_, UserRecord>(
            "
            INSERT INTO users.users (user_snowflake, username, password_digest, profile_picture)
            VALUES ($1, $2, $3, $4)
            RETURNING user_snowflake, username, profile_picture
            ",
        )
        .bind(user_id.to_db())
        .bind(user.username.get())
        .bind(user.password.as_str())
        .bind(user.profile_picture.as_deref())
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DbError::UsernameTaken(user.username.clone())
            }
            err => err.into(),
        })?;

        Ok(User::try_from(record)?)
    }

    async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>> {
        let record = query_as::<_, UserRecord>(
            "
            SELECT
                users.user_snowflake,
                users.username,
                users.profile_picture
            FROM
                users.users
            WHERE
                users.user_snowflake = $1
            ",
        )
        .bind(user_id.to_db())
        .fetch_optional(&self.pool)
        .await?;

        let user = record.map(User::try_from).transpose()?;
        Ok(user)
    }

    async fn fetch_credentials(&self, username: &Username) -> Result<Option<UserCredentials>> {
        let record = query_as::<_, CredentialsRecord>(
            "
            SELECT
                users.user_snowflake,
                users.username,
                users.profile_picture,
                users.password_digest
            FROM
                users.users
            WHERE
                users.username = $1
            ",
        )
        .bind(username.get())
        .fetch_optional(&self.pool)
        .await?;

        let credentials = record.map(UserCredentials::try_from).transpose()?;
        Ok(credentials)
    }

    async fn create_post(
        &self,
        owner: Id<UserMarker>,
        content: &PostContent,
    ) -> Result<PartialPost> {
        let now = OffsetDateTime::now_utc();
        let post_id = self.next_id::<PostMarker>(now)?;

        let record = query_as::<_, PostRecord>(
            "
            INSERT INTO posts.posts
                (post_snowflake, user_snowflake, caption, image, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            RETURNING post_snowflake, user_snowflake, caption, image, created_at, updated_at
            ",
        )
        .bind(post_id.to_db())
        .bind(owner.to_db())
        .bind(content.caption.as_deref())
        .bind(&content.image)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(unknown_user_on_foreign_key_violation(owner))?;

        debug!(%post_id, %owner, "Inserted post");
        Ok(PartialPost::try_from(record)?)
    }

    async fn fetch_feed(&self) -> Result<Vec<Post>> {
        let post_records = query_as::<_, FeedPostRecord>(
            "
            SELECT
                posts.post_snowflake,
                posts.user_snowflake,
                posts.caption,
                posts.image,
                posts.created_at,
                posts.updated_at,
                users.username,
                users.profile_picture
            FROM
                posts.posts JOIN users.users USING (user_snowflake)
            ORDER BY
                posts.created_at DESC,
                posts.post_snowflake DESC
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        let like_records = query_as::<_, LikeRecord>(
            "
            SELECT post_snowflake, user_snowflake
            FROM posts.likes
            ORDER BY liked_at, user_snowflake
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        let comment_records = query_as::<_, FeedCommentRecord>(
            "
            SELECT
                comments.comment_snowflake,
                comments.post_snowflake,
                comments.user_snowflake,
                comments.text,
                comments.created_at,
                users.username,
                users.profile_picture
            FROM
                posts.comments JOIN users.users USING (user_snowflake)
            ORDER BY
                comments.created_at,
                comments.comment_snowflake
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut likes: HashMap<i64, Vec<Id<UserMarker>>> = HashMap::new();
        for like in like_records {
            likes
                .entry(like.post_snowflake)
                .or_default()
                .push(Id::from_db(like.user_snowflake));
        }

        let mut comments: HashMap<i64, Vec<Comment>> = HashMap::new();
        for record in comment_records {
            comments
                .entry(record.comment.post_snowflake)
                .or_default()
                .push(record.try_into()?);
        }

        post_records
            .into_iter()
            .map(|record| -> Result<Post> {
                let post_snowflake = record.post.post_snowflake;
                let partial = PartialPost::try_from(record.post)?;

                Ok(Post {
                    id: partial.id,
                    owner: record.owner.try_into()?,
                    content: partial.content,
                    likes: likes.remove(&post_snowflake).unwrap_or_default(),
                    comments: comments.remove(&post_snowflake).unwrap_or_default(),
                    created_at: partial.created_at,
                    updated_at: partial.updated_at,
                })
            })
            .collect()
    }

    async fn toggle_like(
        &self,
        post_id: Id<PostMarker>,
        user_id: Id<UserMarker>,
    ) -> Result<Option<usize>> {
        let mut tx = self.pool.begin().await?;

        if !lock_post(&mut tx, post_id).await? {
            return Ok(None);
        }

        let now = OffsetDateTime::now_utc();
        let removed = query(
            "
            DELETE FROM posts.likes
            WHERE post_snowflake = $1 AND user_snowflake = $2
            ",
        )
        .bind(post_id.to_db())
        .bind(user_id.to_db())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if removed == 0 {
            query(
                "
                INSERT INTO posts.likes (post_snowflake, user_snowflake, liked_at)
                VALUES ($1, $2, $3)
                ",
            )
            .bind(post_id.to_db())
            .bind(user_id.to_db())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(unknown_user_on_foreign_key_violation(user_id))?;
        }

        touch_post(&mut tx, post_id, now).await?;

        let count = query_scalar::<_, i64>(
            "SELECT count(*) FROM posts.likes WHERE post_snowflake = $1",
        )
        .bind(post_id.to_db())
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(usize::try_from(count).unwrap_or_default()))
    }

    async fn add_comment(
        &self,
        post_id: Id<PostMarker>,
        user_id: Id<UserMarker>,
        text: &CommentText,
    ) -> Result<Option<Vec<PartialComment>>> {
        let mut tx = self.pool.begin().await?;

        if !lock_post(&mut tx, post_id).await? {
            return Ok(None);
        }

        let now = OffsetDateTime::now_utc();
        let comment_id = self.next_id::<CommentMarker>(now)?;

        query(
            "
            INSERT INTO posts.comments
                (comment_snowflake, post_snowflake, user_snowflake, text, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ",
        )
        .bind(comment_id.to_db())
        .bind(post_id.to_db())
        .bind(user_id.to_db())
        .bind(text.get())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(unknown_user_on_foreign_key_violation(user_id))?;

        touch_post(&mut tx, post_id, now).await?;

        let records = query_as::<_, CommentRecord>(
            "
            SELECT comment_snowflake, post_snowflake, user_snowflake, text, created_at
            FROM posts.comments
            WHERE post_snowflake = $1
            ORDER BY created_at, comment_snowflake
            ",
        )
        .bind(post_id.to_db())
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        let comments: Vec<PartialComment> = records
            .into_iter()
            .map(PartialComment::try_from)
            .collect::<Result<_, _>>()?;
        Ok(Some(comments))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        client::DbClient,
        store::{DbError, Store},
    };
    use snapfeed_common::{
        model::{
            Id,
            auth::PasswordDigest,
            post::{CommentText, PostContent},
            user::{NewUser, User, Username},
        },
        snowflake::WorkerId,
    };
    use sqlx::PgPool;

    fn client(pool: PgPool) -> DbClient {
        DbClient::new(pool, WorkerId::default())
    }

    async fn user(client: &DbClient, name: &str) -> User {
        client
            .create_user(&NewUser {
                username: Username::new(name.into()).unwrap(),
                password: PasswordDigest::from_stored("digest".into()),
                profile_picture: Some(format!("{name}.png")),
            })
            .await
            .unwrap()
    }

    fn content(image: &str) -> PostContent {
        PostContent::new(Some("caption".into()), Some(image.into())).unwrap()
    }

    #[sqlx::test]
    #[ignore = "needs a PostgreSQL server in DATABASE_URL"]
    async fn usernames_are_unique(pool: PgPool) {
        let client = client(pool);
        let alice = user(&client, "alice").await;

        let duplicate = client
            .create_user(&NewUser {
                username: Username::new("alice".into()).unwrap(),
                password: PasswordDigest::from_stored("other".into()),
                profile_picture: None,
            })
            .await;
        assert!(matches!(duplicate, Err(DbError::UsernameTaken(_))));

        let credentials = client
            .fetch_credentials(&alice.username)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(credentials.user, alice);
        assert_eq!(credentials.password.as_str(), "digest");
        assert_eq!(client.fetch_user(alice.id).await.unwrap(), Some(alice));
    }

    #[sqlx::test]
    #[ignore = "needs a PostgreSQL server in DATABASE_URL"]
    async fn toggle_like_adds_then_removes(pool: PgPool) {
        let client = client(pool);
        let alice = user(&client, "alice").await;
        let bob = user(&client, "bob").await;
        let post = client.create_post(alice.id, &content("a.jpg")).await.unwrap();

        assert_eq!(client.toggle_like(post.id, bob.id).await.unwrap(), Some(1));
        assert_eq!(client.toggle_like(post.id, alice.id).await.unwrap(), Some(2));
        assert_eq!(client.toggle_like(post.id, bob.id).await.unwrap(), Some(1));

        let feed = client.fetch_feed().await.unwrap();
        assert_eq!(feed[0].likes, vec![alice.id]);
        assert!(feed[0].updated_at >= feed[0].created_at);
    }

    #[sqlx::test]
    #[ignore = "needs a PostgreSQL server in DATABASE_URL"]
    async fn missing_post_and_unknown_user(pool: PgPool) {
        let client = client(pool);
        let alice = user(&client, "alice").await;
        let post = client.create_post(alice.id, &content("a.jpg")).await.unwrap();
        let ghost = Id::from(99_u64);
        let text = CommentText::new(Some("hi".into())).unwrap();

        assert_eq!(client.toggle_like(Id::from(1_u64), ghost).await.unwrap(), None);
        assert_eq!(
            client
                .add_comment(Id::from(1_u64), alice.id, &text)
                .await
                .unwrap(),
            None
        );
        assert!(matches!(
            client.create_post(ghost, &content("b.jpg")).await,
            Err(DbError::UnknownUser(id)) if id == ghost
        ));
        assert!(matches!(
            client.toggle_like(post.id, ghost).await,
            Err(DbError::UnknownUser(_))
        ));
    }

    #[sqlx::test]
    #[ignore = "needs a PostgreSQL server in DATABASE_URL"]
    async fn feed_resolves_owners_and_comments(pool: PgPool) {
        let client = client(pool);
        let alice = user(&client, "alice").await;
        let bob = user(&client, "bob").await;

        let first = client.create_post(alice.id, &content("a.jpg")).await.unwrap();
        let second = client.create_post(bob.id, &content("b.jpg")).await.unwrap();

        for (author, text) in [(bob.id, "first"), (alice.id, "second")] {
            let text = CommentText::new(Some(text.into())).unwrap();
            client.add_comment(first.id, author, &text).await.unwrap();
        }

        let feed = client.fetch_feed().await.unwrap();
        assert_eq!(
            feed.iter().map(|post| post.id).collect::<Vec<_>>(),
            vec![second.id, first.id]
        );
        assert_eq!(feed[0].owner, bob);
        assert_eq!(feed[1].owner, alice);
        assert_eq!(feed[1].content.caption.as_deref(), Some("caption"));

        let comments = &feed[1].comments;
        assert_eq!(comments.len(), 2);
        assert_eq!(comments[0].owner, bob);
        assert_eq!(comments[0].text.get(), "first");
        assert_eq!(comments[1].owner, alice);
        assert!(feed[0].comments.is_empty());
    }
}
