//! Self-service management of registered SSH public keys.

use crate::{
    consumer::{handlers::require_user, identity::SshKey, ConsumerState},
    error::Error,
};
use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct AddKeyRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub public_key: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct KeyList {
    pub success: bool,
    pub keys: Vec<SshKey>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct KeyChange {
    pub success: bool,
    pub message: String,
    pub key: SshKey,
}

#[utoipa::path(
    get,
    path = "/user/ssh-keys",
    responses(
        (status = 200, description = "Registered keys", body = KeyList),
        (status = 401, description = "Missing bearer token"),
        (status = 403, description = "Invalid or expired bearer token"),
    ),
    tag = "ssh-keys",
)]
pub async fn list_keys(
    headers: HeaderMap,
    Extension(state): Extension<Arc<ConsumerState>>,
) -> impl IntoResponse {
    match require_user(&headers, &state).await {
        Ok(user) => (
            StatusCode::OK,
            Json(KeyList {
                success: true,
                keys: user.ssh_keys,
            }),
        )
            .into_response(),
        Err(response) => response,
    }
}

#[utoipa::path(
    post,
    path = "/user/ssh-keys",
    request_body = AddKeyRequest,
    responses(
        (status = 200, description = "Key registered", body = KeyChange),
        (status = 400, description = "Missing or malformed public key"),
        (status = 401, description = "Missing bearer token"),
        (status = 403, description = "Invalid or expired bearer token"),
        (status = 409, description = "Key or key name already registered"),
    ),
    tag = "ssh-keys",
)]
#[instrument(skip(headers, state, payload))]
pub async fn add_key(
    headers: HeaderMap,
    Extension(state): Extension<Arc<ConsumerState>>,
    Json(payload): Json<AddKeyRequest>,
) -> impl IntoResponse {
    let user = match require_user(&headers, &state).await {
        Ok(user) => user,
        Err(response) => return response,
    };

    match state
        .users
        .add_key(user.id, payload.name.as_deref(), &payload.public_key)
        .await
    {
        Ok(key) => (
            StatusCode::OK,
            Json(KeyChange {
                success: true,
                message: "SSH public key added".to_string(),
                key,
            }),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    delete,
    path = "/user/ssh-keys/{id}",
    params(
        ("id" = String, Path, description = "Key id")
    ),
    responses(
        (status = 200, description = "Key removed", body = KeyChange),
        (status = 401, description = "Missing bearer token"),
        (status = 403, description = "Invalid or expired bearer token"),
        (status = 404, description = "Unknown key"),
    ),
    tag = "ssh-keys",
)]
#[instrument(skip(headers, state))]
pub async fn delete_key(
    headers: HeaderMap,
    Extension(state): Extension<Arc<ConsumerState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let user = match require_user(&headers, &state).await {
        Ok(user) => user,
        Err(response) => return response,
    };

    let Ok(key_id) = Uuid::parse_str(id.trim()) else {
        return Error::NotFound("ssh key").into_response();
    };

    match state.users.remove_key(user.id, key_id).await {
        Ok(key) => (
            StatusCode::OK,
            Json(KeyChange {
                success: true,
                message: "SSH public key removed".to_string(),
                key,
            }),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}
