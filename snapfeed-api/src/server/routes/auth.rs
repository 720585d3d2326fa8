use crate::server::{
    Result, ServerError, ServerRouter,
    json::{Created, Json, Message},
};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use serde::{Deserialize, Serialize};
use snapfeed_common::model::{
    ModelValidationError,
    auth::{Password, PasswordDigest, TokenKeys},
    user::{NewUser, User, Username},
};
use snapfeed_db::store::Store;
use std::sync::Arc;
use tokio::task;
use tracing::info;

pub fn routes() -> ServerRouter {
    ServerRouter::new().typed_post(register).typed_post(login)
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
struct SessionBody {
    token: String,
    user: User,
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/api/auth/register", rejection(ServerError))]
struct RegisterPath();

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    username: String,
    password: String,
    profile_picture: Option<String>,
}

async fn register(
    RegisterPath(): RegisterPath,
    State(store): State<Arc<dyn Store>>,
    State(token_keys): State<Arc<TokenKeys>>,
    Json(request): Json<RegisterRequest>,
) -> Result<Created<Message<SessionBody>>> {
    let username = Username::new(request.username).map_err(ModelValidationError::from)?;
    let password = Password::new(request.password).map_err(ModelValidationError::from)?;

    let digest = task::spawn_blocking(move || PasswordDigest::hash(&password)).await??;

    let user = store
        .create_user(&NewUser {
            username,
            password: digest,
            profile_picture: request.profile_picture,
        })
        .await?;
    info!(user_id = %user.id, username = user.username.get(), "User registered");

    let token = token_keys
        .issue(user.id)
        .map_err(ServerError::TokenIssue)?;

    Ok(Created(Message::new(
        "User registered",
        SessionBody { token, user },
    )))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/api/auth/login", rejection(ServerError))]
struct LoginPath();

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

async fn login(
    LoginPath(): LoginPath,
    State(store): State<Arc<dyn Store>>,
    State(token_keys): State<Arc<TokenKeys>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<Message<SessionBody>>> {
    let username = Username::new(request.username).map_err(|_| ServerError::InvalidCredentials)?;

    let credentials = store
        .fetch_credentials(&username)
        .await?
        .ok_or(ServerError::InvalidCredentials)?;

    let digest = credentials.password;
    let password = request.password;
    let verified = task::spawn_blocking(move || digest.verify(&password)).await??;
    if !verified {
        return Err(ServerError::InvalidCredentials);
    }

    let token = token_keys
        .issue(credentials.user.id)
        .map_err(ServerError::TokenIssue)?;

    Ok(Json(Message::new(
        "Login successful",
        SessionBody {
            token,
            user: credentials.user,
        },
    )))
}
