use crate::{api::handlers::health::x_app_headers, consumer::ConsumerState, epoch_millis};
use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::SystemTime};
use utoipa::ToSchema;

pub const SERVICE_NAME: &str = "Demo Application";

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    success: bool,
    service: String,
    status: String,
    timestamp: u64,
    auth_service_url: String,
    active_logins: usize,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Consumer is running", body = Health)
    ),
    tag = "health",
)]
pub async fn health(Extension(state): Extension<Arc<ConsumerState>>) -> impl IntoResponse {
    let health = Health {
        success: true,
        service: SERVICE_NAME.to_string(),
        status: "running".to_string(),
        timestamp: epoch_millis(SystemTime::now()),
        auth_service_url: state.auth_service_url.clone(),
        active_logins: state.broker.active_count().await,
    };

    (StatusCode::OK, x_app_headers(), Json(health))
}
