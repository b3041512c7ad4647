//! Registration, password login and the current-user view.

use crate::{
    consumer::{
        handlers::{reject, require_user},
        identity::PublicUser,
        ConsumerState,
    },
    error::Error,
};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UserResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub user: PublicUser,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub success: bool,
    pub message: String,
    pub token: String,
    pub user: PublicUser,
}

#[utoipa::path(
    post,
    path = "/register",
    request_body = Credentials,
    responses(
        (status = 200, description = "User registered", body = UserResponse),
        (status = 400, description = "Missing or too short username or password"),
        (status = 409, description = "Username already taken"),
    ),
    tag = "account",
)]
#[instrument(skip(state, payload))]
pub async fn register(
    Extension(state): Extension<Arc<ConsumerState>>,
    Json(payload): Json<Credentials>,
) -> impl IntoResponse {
    match state
        .users
        .register(&payload.username, &payload.password)
        .await
    {
        Ok(user) => (
            StatusCode::OK,
            Json(UserResponse {
                success: true,
                message: Some("Registration successful".to_string()),
                user,
            }),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/login/password",
    request_body = Credentials,
    responses(
        (status = 200, description = "Logged in", body = LoginResponse),
        (status = 400, description = "Missing username or password"),
        (status = 401, description = "Wrong username or password"),
    ),
    tag = "account",
)]
#[instrument(skip(state, payload))]
pub async fn login_password(
    Extension(state): Extension<Arc<ConsumerState>>,
    Json(payload): Json<Credentials>,
) -> impl IntoResponse {
    if payload.username.trim().is_empty() || payload.password.is_empty() {
        return Error::Validation("username and password are required".to_string())
            .into_response();
    }

    let user = match state
        .users
        .authenticate(&payload.username, &payload.password)
        .await
    {
        Ok(Some(user)) => user,
        Ok(None) => {
            return reject(StatusCode::UNAUTHORIZED, "invalid username or password");
        }
        Err(err) => return err.into_response(),
    };

    match state.credentials.issue(user.id).await {
        Ok(token) => {
            info!(username = %user.username, "password login");
            (
                StatusCode::OK,
                Json(LoginResponse {
                    success: true,
                    message: "Login successful".to_string(),
                    token,
                    user: user.sanitized(),
                }),
            )
                .into_response()
        }
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/user/me",
    responses(
        (status = 200, description = "The authenticated user", body = UserResponse),
        (status = 401, description = "Missing bearer token"),
        (status = 403, description = "Invalid or expired bearer token"),
    ),
    tag = "account",
)]
pub async fn me(
    headers: HeaderMap,
    Extension(state): Extension<Arc<ConsumerState>>,
) -> impl IntoResponse {
    match require_user(&headers, &state).await {
        Ok(user) => (
            StatusCode::OK,
            Json(UserResponse {
                success: true,
                message: None,
                user: user.sanitized(),
            }),
        )
            .into_response(),
        Err(response) => response,
    }
}
