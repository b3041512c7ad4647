//! Code creation and polling.
//!
//! Both handlers always answer `200 OK`; the outcome lives in the JSON body. A poll
//! that observes a terminal status removes the code, so the consumer must act on the
//! first terminal reply it gets.

use crate::{
    api::SshHint,
    epoch_millis,
    registry::{PollOutcome, Registry},
};
use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug, Default, Clone)]
pub struct GenerateCodeRequest {
    /// Free text shown to the approver in the SSH dialog.
    #[serde(default)]
    pub purpose: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedCode {
    pub success: bool,
    pub code: String,
    /// Epoch milliseconds.
    pub expires_at: u64,
    /// TTL in milliseconds.
    pub expires_in: u64,
    pub ssh_command: String,
    pub purpose: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VerifyStatus {
    Invalid,
    Expired,
    Denied,
    Success,
    Authenticating,
    Pending,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub success: bool,
    pub status: VerifyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    /// Milliseconds left before the code expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_time: Option<u64>,
    pub message: String,
}

impl VerifyResponse {
    fn terminal(success: bool, status: VerifyStatus, message: &str) -> Self {
        Self {
            success,
            status,
            public_key: None,
            expires_at: None,
            remaining_time: None,
            message: message.to_string(),
        }
    }
}

impl From<PollOutcome> for VerifyResponse {
    fn from(outcome: PollOutcome) -> Self {
        match outcome {
            PollOutcome::Invalid => {
                Self::terminal(false, VerifyStatus::Invalid, "Verification code not found")
            }
            PollOutcome::Expired => {
                Self::terminal(false, VerifyStatus::Expired, "Verification code expired")
            }
            PollOutcome::Denied => Self::terminal(
                false,
                VerifyStatus::Denied,
                "Authentication request was denied",
            ),
            PollOutcome::Success { public_key } => Self {
                public_key: Some(public_key.to_string()),
                ..Self::terminal(true, VerifyStatus::Success, "Authentication successful")
            },
            PollOutcome::Authenticating {
                expires_at,
                remaining,
            } => Self {
                expires_at: Some(epoch_millis(expires_at)),
                remaining_time: Some(millis(remaining)),
                ..Self::terminal(
                    true,
                    VerifyStatus::Authenticating,
                    "Waiting for the user to confirm",
                )
            },
            PollOutcome::Pending {
                expires_at,
                remaining,
            } => Self {
                expires_at: Some(epoch_millis(expires_at)),
                remaining_time: Some(millis(remaining)),
                ..Self::terminal(true, VerifyStatus::Pending, "Waiting for SSH connection")
            },
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[utoipa::path(
    post,
    path = "/api/auth/generate-code",
    request_body(
        content = GenerateCodeRequest,
        description = "Optional purpose shown to the approver",
        content_type = "application/json"
    ),
    responses(
        (status = 200, description = "Code created", body = GeneratedCode)
    ),
    tag = "auth",
)]
#[instrument(skip(registry, hint, payload))]
pub async fn generate_code(
    Extension(registry): Extension<Arc<Registry>>,
    Extension(hint): Extension<SshHint>,
    payload: Option<Json<GenerateCodeRequest>>,
) -> impl IntoResponse {
    let purpose = payload.and_then(|Json(request)| request.purpose);
    let record = registry.create(purpose.as_deref()).await;

    info!(code = %record.code, "generated code");

    let body = GeneratedCode {
        success: true,
        ssh_command: hint.command(&record.code),
        expires_at: epoch_millis(record.expires_at),
        expires_in: millis(registry.config().ttl()),
        code: record.code,
        purpose: record.purpose,
    };
    (StatusCode::OK, Json(body))
}

#[utoipa::path(
    get,
    path = "/api/auth/verify/{code}",
    params(
        ("code" = String, Path, description = "One-time code returned by generate-code")
    ),
    responses(
        (status = 200, description = "Current status of the code", body = VerifyResponse)
    ),
    tag = "auth",
)]
#[instrument(skip(registry))]
pub async fn verify(
    Extension(registry): Extension<Arc<Registry>>,
    Path(code): Path<String>,
) -> impl IntoResponse {
    let outcome = registry.poll(&code).await;
    let response = VerifyResponse::from(outcome);

    if matches!(
        response.status,
        VerifyStatus::Success | VerifyStatus::Denied | VerifyStatus::Expired
    ) {
        info!(%code, status = ?response.status, "terminal status delivered");
    } else {
        debug!(%code, status = ?response.status, "polled");
    }

    (StatusCode::OK, Json(response))
}
