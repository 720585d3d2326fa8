use crate::server::{Result, ServerError};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use axum_extra::{TypedHeader, typed_header::TypedHeaderRejection};
use headers::{Authorization, authorization::Bearer};
use snapfeed_common::model::{Id, auth::TokenKeys, user::UserMarker};
use std::sync::Arc;
use tracing::debug;

type AuthorizationHeader = TypedHeader<Authorization<Bearer>>;

/// The user a request's bearer token was issued to.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct AuthenticatedUser {
    id: Id<UserMarker>,
}

impl AuthenticatedUser {
    #[must_use]
    pub fn user_id(self) -> Id<UserMarker> {
        self.id
    }
}

/// Verifies the bearer token and attaches the [`AuthenticatedUser`] to the
/// request before it reaches any handler.
pub async fn require_authentication(
    State(token_keys): State<Arc<TokenKeys>>,
    header: std::result::Result<AuthorizationHeader, TypedHeaderRejection>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let header = header.map_err(|rejection| {
        debug!(%rejection, "Request carried no usable bearer token");
        ServerError::MissingToken
    })?;

    let id = token_keys
        .verify(header.token())
        .map_err(ServerError::InvalidToken)?;

    request.extensions_mut().insert(AuthenticatedUser { id });
    Ok(next.run(request).await)
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .copied()
            .ok_or(ServerError::MissingToken)
    }
}
