//! HTTP verification endpoint.
//!
//! Creates codes and reports their status. It shares the [`Registry`] with the SSH
//! gateway running in the same process.

use crate::{
    api::handlers::{codes, health, root},
    registry::Registry,
};
use anyhow::Result;
use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Method, Request},
    routing::{get, options},
    Extension, Router,
};
use std::{future::Future, sync::Arc};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{debug_span, info, Span};
use ulid::Ulid;
use utoipa_axum::{router::OpenApiRouter, routes};

pub mod handlers;
pub(crate) mod openapi;

pub use handlers::codes::{GenerateCodeRequest, GeneratedCode, VerifyResponse, VerifyStatus};

pub const DEFAULT_HTTP_PORT: u16 = 3000;
pub const DEFAULT_SSH_HOST: &str = "localhost";

/// Where operators should point their SSH client, rendered into `sshCommand`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshHint {
    host: String,
    port: u16,
}

impl SshHint {
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    #[must_use]
    pub fn command(&self, code: &str) -> String {
        format!("ssh {code}@{} -p {}", self.host, self.port)
    }
}

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    // Reuse the same router wiring and only return the generated OpenAPI spec.
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Routes added outside (like `OPTIONS /health` and `/`) are intentionally not documented.
fn api_router() -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(openapi::cargo_openapi("sshauth verification"))
        .routes(routes!(health::health))
        .routes(routes!(codes::generate_code))
        .routes(routes!(codes::verify));

    router.get_openapi_mut().tags = Some(vec![
        openapi::tag("auth", "One-time SSH verification codes"),
        openapi::tag("health", "Service health"),
    ]);

    router
}

/// Fully layered application, ready to serve.
pub fn app(registry: Arc<Registry>, hint: SshHint) -> Router {
    let (router, _openapi) = api_router().split_for_parts();
    let router = router
        .route("/", get(root::root))
        .route("/health", options(health::health))
        .layer(
            ServiceBuilder::new()
                .layer(Extension(registry))
                .layer(Extension(hint)),
        );

    with_middleware(router, &[Method::GET, Method::POST])
}

/// Request id, tracing and CORS layers shared by every HTTP surface.
pub(crate) fn with_middleware(router: Router, methods: &[Method]) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(methods.to_vec())
        .allow_headers(Any)
        // allow requests from any origin
        .allow_origin(Any);

    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors),
    )
}

/// Serve `app` on `[::]:port` until `shutdown` resolves.
///
/// # Errors
/// Returns an error if the port cannot be bound or the server fails.
pub async fn new(
    port: u16,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

// span
fn make_span(request: &Request<Body>) -> Span {
    let headers = request.headers();
    let path = request.uri().path();
    let request_id = headers
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");

    debug_span!("http-request", path, ?headers, request_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{CapturedKey, RegistryConfig, Transition};
    use anyhow::Result;
    use axum::http::{header::CONTENT_TYPE, StatusCode};
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_app(registry: Arc<Registry>) -> Router {
        app(registry, SshHint::new("auth.example.com", 2222))
    }

    async fn json_body(response: axum::response::Response) -> Result<Value> {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn generate(app: &Router, body: &str) -> Result<Value> {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/auth/generate-code")
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        json_body(response).await
    }

    async fn verify(app: &Router, code: &str) -> Result<Value> {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/auth/verify/{code}"))
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        json_body(response).await
    }

    #[test]
    fn ssh_hint_renders_command() {
        let hint = SshHint::new("localhost", 2222);
        assert_eq!(hint.command("a1b2c3d4"), "ssh a1b2c3d4@localhost -p 2222");
    }

    #[tokio::test]
    async fn generate_then_poll_is_pending() -> Result<()> {
        let registry = Arc::new(Registry::default());
        let app = test_app(registry.clone());

        let created = generate(&app, r#"{"purpose":"login"}"#).await?;
        let code = created["code"].as_str().unwrap_or_default().to_string();
        assert_eq!(created["success"], true);
        assert_eq!(created["purpose"], "login");
        assert_eq!(created["expiresIn"], 300_000);
        assert_eq!(
            created["sshCommand"],
            format!("ssh {code}@auth.example.com -p 2222")
        );

        let polled = verify(&app, &code).await?;
        assert_eq!(polled["status"], "pending");
        assert!(polled["remainingTime"].as_u64().unwrap_or(u64::MAX) <= 300_000);
        assert_eq!(polled["expiresAt"], created["expiresAt"]);
        Ok(())
    }

    #[tokio::test]
    async fn generate_without_body_uses_default_purpose() -> Result<()> {
        let app = test_app(Arc::new(Registry::default()));
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/api/auth/generate-code")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await?;
        assert_eq!(body["purpose"], crate::registry::DEFAULT_PURPOSE);
        Ok(())
    }

    #[tokio::test]
    async fn approved_code_is_delivered_once_then_invalid() -> Result<()> {
        let registry = Arc::new(Registry::default());
        let app = test_app(registry.clone());
        let created = generate(&app, r#"{"purpose":"login"}"#).await?;
        let code = created["code"].as_str().unwrap_or_default().to_string();

        let key = CapturedKey::new("ssh-ed25519", "AAAAC3NzaC1lZDI1NTE5AAAAIK");
        registry
            .transition(&code, Transition::Capture(key.clone()))
            .await?;
        assert_eq!(verify(&app, &code).await?["status"], "authenticating");

        registry.confirm(&code, &key, true).await?;

        let first = verify(&app, &code).await?;
        assert_eq!(first["status"], "success");
        assert_eq!(first["publicKey"], key.to_string());

        let second = verify(&app, &code).await?;
        assert_eq!(second["status"], "invalid");
        assert_eq!(second["success"], false);
        Ok(())
    }

    #[tokio::test]
    async fn unconnected_code_expires() -> Result<()> {
        let registry = Arc::new(Registry::new(
            RegistryConfig::new().with_ttl(Duration::from_millis(100)),
        ));
        let app = test_app(registry);
        let created = generate(&app, "{}").await?;
        let code = created["code"].as_str().unwrap_or_default().to_string();

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(verify(&app, &code).await?["status"], "expired");
        assert_eq!(verify(&app, &code).await?["status"], "invalid");
        Ok(())
    }

    #[tokio::test]
    async fn health_reports_active_codes() -> Result<()> {
        let registry = Arc::new(Registry::default());
        registry.create(None).await;
        let app = test_app(registry);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-app"));
        assert!(response.headers().contains_key("x-request-id"));
        let body = json_body(response).await?;
        assert_eq!(body["status"], "running");
        assert_eq!(body["activeCodes"], 1);

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/health")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn root_lists_endpoints() -> Result<()> {
        let app = test_app(Arc::new(Registry::default()));
        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty())?)
            .await?;
        let body = json_body(response).await?;
        assert!(body["endpoints"]["GET /health"].is_string());
        Ok(())
    }

    #[test]
    fn openapi_documents_routes() {
        let doc = openapi();
        assert!(doc.paths.paths.contains_key("/api/auth/generate-code"));
        assert!(doc.paths.paths.contains_key("/api/auth/verify/{code}"));
        assert!(doc.paths.paths.contains_key("/health"));
    }
}
