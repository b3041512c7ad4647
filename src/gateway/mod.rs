//! SSH protocol gateway.
//!
//! A deliberately narrow SSH server: public-key authentication only, the username is
//! a one-time code, and a session offers nothing but the confirmation dialog (shell)
//! or a canned acknowledgement (exec). Each connection runs independently; the
//! registry is the only shared state.

use crate::registry::Registry;
use anyhow::{Context, Result};
use russh::{MethodKind, MethodSet};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

pub mod dialog;
mod handler;
pub mod host_key;

pub use handler::ConnectionHandler;

pub const DEFAULT_SSH_PORT: u16 = 2222;
pub const DEFAULT_HOST_KEY_PATH: &str = "ssh_host_ed25519_key";
pub const DEFAULT_CLOSE_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    port: u16,
    host_key_path: PathBuf,
    close_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_SSH_PORT,
            host_key_path: PathBuf::from(DEFAULT_HOST_KEY_PATH),
            close_delay: DEFAULT_CLOSE_DELAY,
        }
    }
}

impl GatewayConfig {
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
    pub fn with_host_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.host_key_path = path.into();
        self
    }

    #[must_use]
    pub const fn with_close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }

    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    #[must_use]
    pub fn host_key_path(&self) -> &std::path::Path {
        &self.host_key_path
    }

    #[must_use]
    pub const fn close_delay(&self) -> Duration {
        self.close_delay
    }
}

/// Bind the SSH port and serve connections until the task is dropped.
///
/// # Errors
/// Returns an error if the port cannot be bound or the host key cannot be loaded.
pub async fn serve(config: GatewayConfig, registry: Arc<Registry>) -> Result<()> {
    let listener = TcpListener::bind(format!("::0:{}", config.port()))
        .await
        .with_context(|| format!("Failed to bind SSH port {}", config.port()))?;
    info!("SSH gateway listening on [::]:{}", config.port());

    serve_listener(listener, config, registry).await
}

/// Serve SSH connections on an already bound listener.
///
/// # Errors
/// Returns an error if the host key cannot be loaded or generated.
pub async fn serve_listener(
    listener: TcpListener,
    config: GatewayConfig,
    registry: Arc<Registry>,
) -> Result<()> {
    let key = host_key::load_or_generate(config.host_key_path()).await?;

    let russh_config = Arc::new(russh::server::Config {
        auth_rejection_time: Duration::from_secs(1),
        auth_rejection_time_initial: Some(Duration::from_secs(0)),
        // A connection is useless once its code has expired.
        inactivity_timeout: Some(registry.config().ttl()),
        methods: MethodSet::from(&[MethodKind::PublicKey][..]),
        keys: vec![key],
        ..Default::default()
    });

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!("SSH accept error: {}", err);
                continue;
            }
        };
        debug!("SSH connection from {}", peer_addr);

        let handler =
            ConnectionHandler::new(registry.clone(), config.close_delay(), Some(peer_addr));
        let russh_config = russh_config.clone();

        tokio::spawn(async move {
            match russh::server::run_stream(russh_config, stream, handler).await {
                Ok(session) => {
                    if let Err(e) = session.await {
                        warn!("SSH session error from {}: {}", peer_addr, e);
                    }
                }
                Err(e) => warn!("SSH connection error from {}: {}", peer_addr, e),
            }
            debug!("SSH connection from {} closed", peer_addr);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builders() {
        let config = GatewayConfig::new()
            .with_port(2022)
            .with_host_key_path("/tmp/key")
            .with_close_delay(Duration::from_millis(5));
        assert_eq!(config.port(), 2022);
        assert_eq!(config.host_key_path(), std::path::Path::new("/tmp/key"));
        assert_eq!(config.close_delay(), Duration::from_millis(5));
    }

    #[test]
    fn config_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.port(), DEFAULT_SSH_PORT);
        assert_eq!(config.close_delay(), DEFAULT_CLOSE_DELAY);
    }
}
