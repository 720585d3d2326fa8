use axum::{
    Router,
    extract::{
        FromRef, Request,
        rejection::{JsonRejection, PathRejection},
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use json::Json;
use serde::Serialize;
use snapfeed_common::model::{
    Id, ModelValidationError,
    auth::{PasswordHashError, TokenError, TokenKeys},
    post::PostMarker,
    user::UserMarker,
};
use snapfeed_db::store::{DbError, Store};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinError;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;

mod auth;
mod json;
mod routes;

pub type ServerRouter = Router<ServerState>;

#[derive(Clone, Debug, FromRef)]
pub struct ServerState {
    pub store: Arc<dyn Store>,
    pub token_keys: Arc<TokenKeys>,
}

/// The complete application, ready to be served.
pub fn app(state: ServerState) -> Router {
    routes::routes(&state)
        .fallback(fallback)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn fallback(request: Request) -> ServerError {
    ServerError::UnknownRoute(request.into_parts().0.uri)
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown route requested: {0}")]
    UnknownRoute(Uri),
    #[error("Path rejected: {0}")]
    PathRejection(#[from] PathRejection),
    #[error("Incoming JSON rejected: {0}")]
    JsonRejection(#[from] JsonRejection),
    #[error("JSON response could not be serialized: {0}")]
    JsonResponse(#[from] serde_json::Error),
    #[error("No token provided")]
    MissingToken,
    #[error("Invalid token")]
    InvalidToken(#[source] TokenError),
    #[error("The auth token could not be issued: {0}")]
    TokenIssue(#[source] TokenError),
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error(transparent)]
    Validation(#[from] ModelValidationError),
    #[error(transparent)]
    PasswordHash(#[from] PasswordHashError),
    #[error("Blocking task failed: {0}")]
    Blocking(#[from] JoinError),
    #[error(transparent)]
    Database(#[from] DbError),
    #[error("Post not found")]
    PostByIdNotFound(Id<PostMarker>),
    #[error("User with id {0} was not found.")]
    UserByIdNotFound(Id<UserMarker>),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::UnknownRoute(_)
            | ServerError::PathRejection(_)
            | ServerError::PostByIdNotFound(_)
            | ServerError::UserByIdNotFound(_)
            | ServerError::Database(DbError::UnknownUser(_)) => StatusCode::NOT_FOUND,
            ServerError::MissingToken
            | ServerError::InvalidToken(_)
            | ServerError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ServerError::JsonRejection(_) | ServerError::Validation(_) => StatusCode::BAD_REQUEST,
            ServerError::Database(DbError::UsernameTaken(_)) => StatusCode::CONFLICT,
            ServerError::JsonResponse(_)
            | ServerError::TokenIssue(_)
            | ServerError::PasswordHash(_)
            | ServerError::Blocking(_)
            | ServerError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
struct ErrorResponse {
    status: u16,
    message: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();

        error!(error = %self, %status, "Replying with error");

        let error_response = ErrorResponse {
            status: status.as_u16(),
            message: self.to_string(),
        };
        (status, Json(error_response)).into_response()
    }
}
