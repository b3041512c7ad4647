use crate::{
    api::{self, SshHint},
    cli::{
        actions::{log_entries, shutdown_signal},
        telemetry,
    },
    gateway::{self, GatewayConfig},
    registry::{self, Registry, RegistryConfig},
};
use anyhow::{Context, Result};
use std::{sync::Arc, time::Duration};
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub http_port: u16,
    pub ssh_port: u16,
    pub ssh_host: String,
    pub host_key: String,
    pub code_ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl Args {
    fn registry_config(&self) -> RegistryConfig {
        RegistryConfig::new()
            .with_ttl(Duration::from_secs(self.code_ttl_seconds))
            .with_sweep_interval(Duration::from_secs(self.sweep_interval_seconds))
    }

    fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig::new()
            .with_port(self.ssh_port)
            .with_host_key_path(&self.host_key)
    }
}

/// Run the SSH gateway and the verification endpoint over one shared registry.
/// # Errors
/// Returns an error if either listener cannot be bound, the host key cannot be
/// loaded, or a server fails.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let registry = Arc::new(Registry::new(args.registry_config()));
    let sweeper = registry::spawn_sweeper(registry.clone());

    let app = api::app(
        registry.clone(),
        SshHint::new(args.ssh_host.clone(), args.ssh_port),
    );

    let result = tokio::select! {
        result = gateway::serve(args.gateway_config(), registry.clone()) => {
            result.context("SSH gateway stopped")
        }
        result = api::new(args.http_port, app, shutdown_signal()) => {
            result.context("verification endpoint stopped")
        }
    };

    sweeper.abort();
    info!("{} outstanding codes discarded", registry.active_count().await);
    telemetry::shutdown_tracer();

    result
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("http", format!("tcp:{}", args.http_port)),
        ("ssh", format!("tcp:{}", args.ssh_port)),
        ("ssh_host", args.ssh_host.clone()),
        ("host_key", args.host_key.clone()),
        ("code_ttl", format!("{}s", args.code_ttl_seconds)),
        ("sweep_interval", format!("{}s", args.sweep_interval_seconds)),
    ];
    log_entries("Startup configuration", &entries);
}
