use crate::server::ServerError;
use axum::{
    Json as AxumJson,
    extract::FromRequest,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::TypedHeader;
use headers::ContentType;
use serde::Serialize;

/// JSON body extractor and response whose failures surface as [`ServerError`].
#[derive(FromRequest, Debug, Clone, Copy, Default)]
#[from_request(via(AxumJson), rejection(ServerError))]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        match serde_json::to_vec(&self.0) {
            Ok(json) => (TypedHeader(ContentType::json()), json).into_response(),
            Err(err) => ServerError::JsonResponse(err).into_response(),
        }
    }
}

/// A JSON response with status `201 Created`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Created<T>(pub T);

impl<T: Serialize> IntoResponse for Created<T> {
    fn into_response(self) -> Response {
        (StatusCode::CREATED, Json(self.0)).into_response()
    }
}

/// A response body carrying a human readable outcome next to its payload.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct Message<T> {
    pub message: &'static str,
    #[serde(flatten)]
    pub payload: T,
}

impl<T> Message<T> {
    pub fn new(message: &'static str, payload: T) -> Self {
        Self { message, payload }
    }
}
