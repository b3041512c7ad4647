pub mod account;
pub mod health;
pub mod keys;
pub mod ssh_login;

use crate::{
    consumer::{credentials::extract_bearer_token, identity::User, ConsumerState},
    error::Error,
};
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::debug;

/// Resolve the bearer token to a user.
///
/// Missing token is 401, unknown or expired token is 403.
pub(crate) async fn require_user(
    headers: &HeaderMap,
    state: &ConsumerState,
) -> Result<User, Response> {
    let Some(token) = extract_bearer_token(headers) else {
        return Err(reject(StatusCode::UNAUTHORIZED, "missing bearer token"));
    };

    let Some(user_id) = state.credentials.resolve(&token).await else {
        debug!("rejected unknown or expired bearer token");
        return Err(reject(StatusCode::FORBIDDEN, "invalid or expired token"));
    };

    state
        .users
        .get(user_id)
        .await
        .ok_or_else(|| Error::NotFound("user").into_response())
}

pub(crate) fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "success": false, "message": message }))).into_response()
}
