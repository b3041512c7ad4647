//! Consumer application: local identities plus SSH-confirmed login.
//!
//! Flow:
//! 1) A user registers and uploads one or more SSH public keys.
//! 2) `POST /login/ssh/init` asks the authentication service for a code and opens
//!    a local login session bound to that user.
//! 3) The user runs the returned `ssh` command and approves the request.
//! 4) `GET /login/ssh/poll/{session_id}` forwards to the verification endpoint; on
//!    success the approved key is matched against the user's keys and a bearer
//!    token is issued.

use crate::{
    api::{self, with_middleware},
    consumer::{
        broker::LoginSessionBroker,
        client::HttpVerificationClient,
        credentials::{CredentialStore, DEFAULT_TOKEN_TTL},
        handlers::{account, health, keys, ssh_login},
        identity::UserStore,
    },
    registry::DEFAULT_SWEEP_INTERVAL,
};
use anyhow::Result;
use axum::{extract::Extension, http::Method, Router};
use std::{sync::Arc, time::Duration};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::debug;
use utoipa_axum::{router::OpenApiRouter, routes};

pub mod broker;
pub mod client;
pub mod credentials;
pub mod handlers;
pub mod identity;
pub mod password;

pub const DEFAULT_CONSUMER_PORT: u16 = 4000;
pub const DEFAULT_AUTH_SERVICE_URL: &str = "http://localhost:3000";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerConfig {
    port: u16,
    auth_service_url: String,
    token_ttl: Duration,
    sweep_interval: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_CONSUMER_PORT,
            auth_service_url: DEFAULT_AUTH_SERVICE_URL.to_string(),
            token_ttl: DEFAULT_TOKEN_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl ConsumerConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_auth_service_url(mut self, url: impl Into<String>) -> Self {
        self.auth_service_url = url.into();
        self
    }

    #[must_use]
    pub const fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    #[must_use]
    pub const fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn auth_service_url(&self) -> &str {
        &self.auth_service_url
    }

    #[must_use]
    pub const fn token_ttl(&self) -> Duration {
        self.token_ttl
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }
}

/// Everything the consumer handlers share.
#[derive(Debug)]
pub struct ConsumerState {
    pub users: Arc<UserStore>,
    pub credentials: Arc<CredentialStore>,
    pub broker: LoginSessionBroker,
    pub auth_service_url: String,
}

impl ConsumerState {
    /// # Errors
    /// Returns an error if the authentication service URL is unusable.
    pub fn new(config: &ConsumerConfig) -> Result<Self> {
        let client = HttpVerificationClient::new(config.auth_service_url())?;
        let users = Arc::new(UserStore::new());
        let credentials = Arc::new(CredentialStore::new(config.token_ttl()));

        Ok(Self {
            broker: LoginSessionBroker::new(client, users.clone(), credentials.clone()),
            users,
            credentials,
            auth_service_url: config.auth_service_url().to_string(),
        })
    }
}

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

fn api_router() -> OpenApiRouter {
    let mut router = OpenApiRouter::with_openapi(api::openapi::cargo_openapi("sshauth consumer"))
        .routes(routes!(health::health))
        .routes(routes!(account::register))
        .routes(routes!(account::login_password))
        .routes(routes!(account::me))
        .routes(routes!(ssh_login::ssh_init))
        .routes(routes!(ssh_login::ssh_poll))
        .routes(routes!(keys::list_keys, keys::add_key))
        .routes(routes!(keys::delete_key));

    router.get_openapi_mut().tags = Some(vec![
        api::openapi::tag("account", "Registration, password login and profile"),
        api::openapi::tag("ssh-login", "Passwordless login confirmed over SSH"),
        api::openapi::tag("ssh-keys", "Registered SSH public keys"),
        api::openapi::tag("health", "Service health"),
    ]);

    router
}

/// Fully layered consumer application, ready to serve.
pub fn app(state: Arc<ConsumerState>) -> Router {
    let (router, _openapi) = api_router().split_for_parts();
    let router = router.layer(Extension(state));

    with_middleware(router, &[Method::GET, Method::POST, Method::DELETE])
}

/// Periodically drop expired login sessions and bearer tokens.
pub fn spawn_sweeper(state: Arc<ConsumerState>, period: Duration) -> JoinHandle<()> {
    let period = period.max(Duration::from_millis(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let sessions = state.broker.sweep().await;
            let tokens = state.credentials.sweep().await;
            if sessions + tokens > 0 {
                debug!(sessions, tokens, "consumer sweep");
            }
        }
    })
}
