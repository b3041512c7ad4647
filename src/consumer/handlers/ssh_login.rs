//! Passwordless login: start a session, then poll it until it resolves.

use crate::{
    consumer::{
        broker::{LoginPoll, LoginTicket},
        identity::PublicUser,
        ConsumerState,
    },
    error::Error,
};
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct SshLoginRequest {
    #[serde(default)]
    pub username: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SshLoginStarted {
    pub success: bool,
    pub session_id: String,
    pub ssh_command: String,
    pub code: String,
    /// Epoch milliseconds.
    pub expires_at: u64,
    /// Milliseconds.
    pub expires_in: u64,
}

impl From<LoginTicket> for SshLoginStarted {
    fn from(ticket: LoginTicket) -> Self {
        Self {
            success: true,
            session_id: ticket.session_id,
            ssh_command: ticket.ssh_command,
            code: ticket.code,
            expires_at: ticket.expires_at,
            expires_in: ticket.expires_in,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoginStatus {
    Invalid,
    Expired,
    Denied,
    KeyMismatch,
    Success,
    Authenticating,
    Pending,
    Error,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SshLoginPoll {
    pub success: bool,
    pub status: LoginStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<PublicUser>,
    /// Milliseconds left on the remote code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_time: Option<u64>,
}

impl SshLoginPoll {
    fn failed(status: LoginStatus, message: &str) -> Self {
        Self {
            success: false,
            status,
            message: message.to_string(),
            token: None,
            user: None,
            remaining_time: None,
        }
    }

    fn waiting(status: LoginStatus, message: &str, remaining_ms: u64) -> Self {
        Self {
            success: true,
            remaining_time: Some(remaining_ms),
            ..Self::failed(status, message)
        }
    }
}

/// HTTP status and body for one poll outcome.
fn render(poll: LoginPoll) -> (StatusCode, SshLoginPoll) {
    match poll {
        LoginPoll::Invalid => (
            StatusCode::NOT_FOUND,
            SshLoginPoll::failed(LoginStatus::Invalid, "Invalid session id"),
        ),
        LoginPoll::Expired => (
            StatusCode::OK,
            SshLoginPoll::failed(LoginStatus::Expired, "Session expired"),
        ),
        LoginPoll::Denied => (
            StatusCode::OK,
            SshLoginPoll::failed(LoginStatus::Denied, "The request was denied"),
        ),
        LoginPoll::KeyMismatch => (
            StatusCode::OK,
            SshLoginPoll::failed(
                LoginStatus::KeyMismatch,
                "SSH public key does not belong to this account",
            ),
        ),
        LoginPoll::Success { token, user } => (
            StatusCode::OK,
            SshLoginPoll {
                success: true,
                token: Some(token),
                user: Some(user),
                ..SshLoginPoll::failed(LoginStatus::Success, "SSH login successful")
            },
        ),
        LoginPoll::Authenticating { remaining } => (
            StatusCode::OK,
            SshLoginPoll::waiting(
                LoginStatus::Authenticating,
                "Waiting for the user to confirm",
                millis(remaining),
            ),
        ),
        LoginPoll::Pending { remaining } => (
            StatusCode::OK,
            SshLoginPoll::waiting(
                LoginStatus::Pending,
                "Waiting for SSH connection",
                millis(remaining),
            ),
        ),
    }
}

fn millis(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[utoipa::path(
    post,
    path = "/login/ssh/init",
    request_body = SshLoginRequest,
    responses(
        (status = 200, description = "Login session started", body = SshLoginStarted),
        (status = 400, description = "Missing username or no registered keys"),
        (status = 404, description = "Unknown user"),
        (status = 502, description = "Verification service unreachable"),
    ),
    tag = "ssh-login",
)]
#[instrument(skip(state))]
pub async fn ssh_init(
    Extension(state): Extension<Arc<ConsumerState>>,
    Json(payload): Json<SshLoginRequest>,
) -> impl IntoResponse {
    match state.broker.init(&payload.username).await {
        Ok(ticket) => (StatusCode::OK, Json(SshLoginStarted::from(ticket))).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/login/ssh/poll/{session_id}",
    params(
        ("session_id" = String, Path, description = "Session id returned by /login/ssh/init")
    ),
    responses(
        (status = 200, description = "Current state of the login", body = SshLoginPoll),
        (status = 404, description = "Unknown session", body = SshLoginPoll),
        (status = 502, description = "Verification service unreachable", body = SshLoginPoll),
    ),
    tag = "ssh-login",
)]
#[instrument(skip(state))]
pub async fn ssh_poll(
    Extension(state): Extension<Arc<ConsumerState>>,
    Path(session_id): Path<String>,
) -> impl IntoResponse {
    match state.broker.poll(&session_id).await {
        Ok(poll) => {
            let (status, body) = render(poll);
            (status, Json(body)).into_response()
        }
        Err(Error::UpstreamUnavailable(_)) => (
            StatusCode::BAD_GATEWAY,
            Json(SshLoginPoll::failed(
                LoginStatus::Error,
                "SSH authentication service unavailable",
            )),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}
