use crate::server::{ServerRouter, ServerState};
use axum::Router;

mod auth;
mod posts;
mod users;

pub fn routes(state: &ServerState) -> ServerRouter {
    Router::new()
        .merge(auth::routes())
        .merge(posts::routes(state))
        .merge(users::routes())
}
