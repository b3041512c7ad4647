//! Health probe for the verification endpoint.

use crate::{epoch_millis, registry::Registry, GIT_COMMIT_HASH};
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::SystemTime};
use tracing::debug;
use utoipa::ToSchema;

pub const SERVICE_NAME: &str = "SSH Authentication Service";

#[derive(ToSchema, Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    success: bool,
    service: String,
    status: String,
    timestamp: u64,
    active_codes: usize,
    commit: String,
    version: String,
}

#[utoipa::path(
    get,
    path= "/health",
    responses (
        (status = 200, description = "Service is running", body = Health)
    ),
    tag = "health",
)]
/// Report liveness and the number of outstanding codes.
pub async fn health(method: Method, registry: Extension<Arc<Registry>>) -> impl IntoResponse {
    let health = Health {
        success: true,
        service: SERVICE_NAME.to_string(),
        status: "running".to_string(),
        timestamp: epoch_millis(SystemTime::now()),
        active_codes: registry.active_count().await,
        commit: GIT_COMMIT_HASH.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    (StatusCode::OK, x_app_headers(), body)
}

/// `X-App: name:version:short_hash`, attached to every health reply.
pub(crate) fn x_app_headers() -> HeaderMap {
    let short_hash = if GIT_COMMIT_HASH.len() > 7 {
        &GIT_COMMIT_HASH[0..7]
    } else {
        ""
    };

    format!(
        "{}:{}:{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_hash
    )
    .parse::<HeaderValue>()
    .map(|x_app_header_value| {
        debug!("X-App header: {:?}", x_app_header_value);

        let mut headers = HeaderMap::new();
        headers.insert("X-App", x_app_header_value);
        headers
    })
    .map_err(|err| {
        debug!("Failed to parse X-App header: {}", err);
    })
    .unwrap_or_else(|()| HeaderMap::new())
}
