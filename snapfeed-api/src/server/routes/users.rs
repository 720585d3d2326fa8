use crate::server::{Result, ServerError, ServerRouter, json::Json};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use serde::Deserialize;
use snapfeed_common::model::{
    Id,
    user::{User, UserMarker},
};
use snapfeed_db::store::Store;
use std::sync::Arc;

pub fn routes() -> ServerRouter {
    ServerRouter::new().typed_get(get_user)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/api/users/{id}", rejection(ServerError))]
struct GetUserPath {
    id: Id<UserMarker>,
}

async fn get_user(
    GetUserPath { id }: GetUserPath,
    State(store): State<Arc<dyn Store>>,
) -> Result<Json<User>> {
    let user = store
        .fetch_user(id)
        .await?
        .ok_or(ServerError::UserByIdNotFound(id))?;

    Ok(Json(user))
}
