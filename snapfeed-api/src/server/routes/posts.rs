use crate::server::{
    Result, ServerError, ServerRouter, ServerState,
    auth::{AuthenticatedUser, require_authentication},
    json::{Created, Json, Message},
};
use axum::{extract::State, middleware};
use axum_extra::routing::{RouterExt, TypedPath};
use serde::{Deserialize, Serialize};
use snapfeed_common::model::{
    Id, ModelValidationError,
    post::{CommentText, PartialComment, PartialPost, Post, PostContent, PostMarker},
};
use snapfeed_db::store::Store;
use std::sync::Arc;
use tracing::info;

/// Post routes. Every one of them requires a valid bearer token.
pub fn routes(state: &ServerState) -> ServerRouter {
    ServerRouter::new()
        .typed_post(create_post)
        .typed_get(get_feed)
        .typed_post(toggle_like)
        .typed_post(add_comment)
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_authentication,
        ))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/api/posts/create", rejection(ServerError))]
struct CreatePostPath();

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct CreatePostRequest {
    caption: Option<String>,
    image: Option<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
struct PostBody {
    post: PartialPost,
}

async fn create_post(
    CreatePostPath(): CreatePostPath,
    State(store): State<Arc<dyn Store>>,
    user: AuthenticatedUser,
    Json(request): Json<CreatePostRequest>,
) -> Result<Created<Message<PostBody>>> {
    let content =
        PostContent::new(request.caption, request.image).map_err(ModelValidationError::from)?;

    let post = store.create_post(user.user_id(), &content).await?;
    info!(post_id = %post.id, owner = %post.owner, "Post created");

    Ok(Created(Message::new("Post created", PostBody { post })))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/api/posts/feed", rejection(ServerError))]
struct FeedPath();

async fn get_feed(
    FeedPath(): FeedPath,
    State(store): State<Arc<dyn Store>>,
) -> Result<Json<Vec<Post>>> {
    let posts = store.fetch_feed().await?;

    Ok(Json(posts))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/api/posts/{id}/like", rejection(ServerError))]
struct LikePath {
    id: Id<PostMarker>,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Serialize)]
struct LikesBody {
    likes: usize,
}

async fn toggle_like(
    LikePath { id }: LikePath,
    State(store): State<Arc<dyn Store>>,
    user: AuthenticatedUser,
) -> Result<Json<Message<LikesBody>>> {
    let likes = store
        .toggle_like(id, user.user_id())
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    Ok(Json(Message::new("Post updated", LikesBody { likes })))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/api/posts/{id}/comment", rejection(ServerError))]
struct CommentPath {
    id: Id<PostMarker>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct CommentRequest {
    text: Option<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
struct CommentsBody {
    comments: Vec<PartialComment>,
}

async fn add_comment(
    CommentPath { id }: CommentPath,
    State(store): State<Arc<dyn Store>>,
    user: AuthenticatedUser,
    Json(request): Json<CommentRequest>,
) -> Result<Json<Message<CommentsBody>>> {
    let text = CommentText::new(request.text).map_err(ModelValidationError::from)?;

    let comments = store
        .add_comment(id, user.user_id(), &text)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;

    Ok(Json(Message::new("Comment added", CommentsBody { comments })))
}

#[cfg(test)]
mod tests {
    use crate::server::test_util::TestApp;
    use axum::http::{Method, StatusCode};
    use serde_json::{Value, json};
    use snapfeed_common::model::{Id, user::UserMarker};
    use time::{Duration, OffsetDateTime};

    async fn create(app: &TestApp, token: &str, body: Value) -> (StatusCode, Value) {
        app.send(Method::POST, "/api/posts/create", Some(token), Some(body))
            .await
    }

    async fn feed(app: &TestApp, token: &str) -> Vec<Value> {
        let (status, body) = app
            .send(Method::GET, "/api/posts/feed", Some(token), None)
            .await;
        assert_eq!(status, StatusCode::OK);

        match body {
            Value::Array(posts) => posts,
            other => panic!("feed was not an array: {other}"),
        }
    }

    #[tokio::test]
    async fn like_and_comment_scenario() {
        let app = TestApp::new();
        let (owner, owner_token) = app.user("owner").await;
        let (_, u1_token) = app.user("u1").await;
        let (u2, u2_token) = app.user("u2").await;

        let (status, body) = create(&app, &owner_token, json!({ "image": "a.jpg" })).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["message"], "Post created");
        let post = &body["post"];
        assert_eq!(post["image"], "a.jpg");
        assert_eq!(post["owner"], owner.id.to_string());
        assert_eq!(post["likes"], json!([]));
        assert_eq!(post["comments"], json!([]));
        assert!(post["createdAt"].is_string());
        let post_id = post["id"].as_str().unwrap().to_owned();

        let like_uri = format!("/api/posts/{post_id}/like");
        let (status, body) = app.send(Method::POST, &like_uri, Some(&u1_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["likes"], 1);

        let (status, body) = app.send(Method::POST, &like_uri, Some(&u1_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["likes"], 0);

        let (status, body) = app
            .send(
                Method::POST,
                &format!("/api/posts/{post_id}/comment"),
                Some(&u2_token),
                Some(json!({ "text": "hi" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Comment added");
        let comments = body["comments"].as_array().unwrap();
        assert_eq!(comments.len(), 1);
        assert_eq!(comments[0]["owner"], u2.id.to_string());
        assert_eq!(comments[0]["text"], "hi");
    }

    #[tokio::test]
    async fn create_requires_image() {
        let app = TestApp::new();
        let (_, token) = app.user("alice").await;

        for body in [json!({ "caption": "no image" }), json!({ "image": "" })] {
            let (status, body) = create(&app, &token, body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["message"], "Image is required");
        }

        let (status, _) = create(
            &app,
            &token,
            json!({ "caption": "x".repeat(501), "image": "a.jpg" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert!(feed(&app, &token).await.is_empty());
    }

    #[tokio::test]
    async fn feed_is_newest_first_with_resolved_owners() {
        let app = TestApp::new();
        let (alice, alice_token) = app.user("alice").await;
        let (_, bob_token) = app.user("bob").await;

        let (_, first) = create(&app, &alice_token, json!({ "image": "first.jpg" })).await;
        let (_, second) = create(
            &app,
            &bob_token,
            json!({ "caption": "second", "image": "second.jpg" }),
        )
        .await;

        app.send(
            Method::POST,
            &format!("/api/posts/{}/comment", first["post"]["id"].as_str().unwrap()),
            Some(&bob_token),
            Some(json!({ "text": "nice" })),
        )
        .await;

        let posts = feed(&app, &alice_token).await;
        assert_eq!(posts.len(), 2);
        assert_eq!(posts[0]["id"], second["post"]["id"]);
        assert_eq!(posts[0]["caption"], "second");
        assert_eq!(posts[0]["owner"]["username"], "bob");
        assert_eq!(posts[1]["id"], first["post"]["id"]);
        assert_eq!(posts[1]["owner"]["id"], alice.id.to_string());
        assert_eq!(
            posts[1]["owner"]["profilePicture"],
            "https://img.example/alice.png"
        );
        assert_eq!(posts[1]["comments"][0]["owner"]["username"], "bob");
        assert_eq!(posts[1]["comments"][0]["text"], "nice");
    }

    #[tokio::test]
    async fn blank_comment_is_rejected_without_mutation() {
        let app = TestApp::new();
        let (_, token) = app.user("alice").await;
        let (_, created) = create(&app, &token, json!({ "image": "a.jpg" })).await;
        let comment_uri = format!("/api/posts/{}/comment", created["post"]["id"].as_str().unwrap());

        for body in [json!({ "text": "" }), json!({ "text": "   " }), json!({})] {
            let (status, body) = app
                .send(Method::POST, &comment_uri, Some(&token), Some(body))
                .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["message"], "Comment cannot be empty");
        }

        assert_eq!(feed(&app, &token).await[0]["comments"], json!([]));
    }

    #[tokio::test]
    async fn unknown_posts_are_not_found() {
        let app = TestApp::new();
        let (_, token) = app.user("alice").await;

        let (status, body) = app
            .send(Method::POST, "/api/posts/12345/like", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Post not found");

        let (status, _) = app
            .send(
                Method::POST,
                "/api/posts/12345/comment",
                Some(&token),
                Some(json!({ "text": "hi" })),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = app
            .send(Method::POST, "/api/posts/not-an-id/like", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unauthenticated_requests_are_rejected_without_mutation() {
        let app = TestApp::new();
        let (alice, token) = app.user("alice").await;
        let (_, created) = create(&app, &token, json!({ "image": "a.jpg" })).await;
        let post_id = created["post"]["id"].as_str().unwrap().to_owned();

        let expired = app
            .token_keys
            .issue_at(alice.id, OffsetDateTime::now_utc() - Duration::days(2))
            .unwrap();
        let requests = [
            (Method::POST, "/api/posts/create".to_owned(), Some(json!({ "image": "b.jpg" }))),
            (Method::GET, "/api/posts/feed".to_owned(), None),
            (Method::POST, format!("/api/posts/{post_id}/like"), None),
            (
                Method::POST,
                format!("/api/posts/{post_id}/comment"),
                Some(json!({ "text": "hi" })),
            ),
        ];

        for (method, uri, body) in requests {
            let (status, response) = app.send(method.clone(), &uri, None, body.clone()).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{method} {uri}");
            assert_eq!(response["message"], "No token provided");

            for bad_token in [expired.as_str(), "garbage"] {
                let (status, response) = app
                    .send(method.clone(), &uri, Some(bad_token), body.clone())
                    .await;
                assert_eq!(status, StatusCode::UNAUTHORIZED, "{method} {uri}");
                assert_eq!(response["message"], "Invalid token");
            }
        }

        let posts = feed(&app, &token).await;
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0]["likes"], json!([]));
        assert_eq!(posts[0]["comments"], json!([]));
    }

    #[tokio::test]
    async fn valid_token_for_unknown_user_cannot_post() {
        let app = TestApp::new();
        let token = app.token_keys.issue(Id::<UserMarker>::from(7_u64)).unwrap();

        let (status, _) = create(&app, &token, json!({ "image": "a.jpg" })).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(feed(&app, &token).await.is_empty());
    }
}
