use crate::{
    api,
    cli::{
        actions::{log_entries, shutdown_signal},
        telemetry,
    },
    consumer::{self, ConsumerConfig, ConsumerState},
};
use anyhow::Result;
use std::{sync::Arc, time::Duration};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub auth_service_url: String,
    pub token_ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl Args {
    fn config(&self) -> ConsumerConfig {
        ConsumerConfig::new()
            .with_port(self.port)
            .with_auth_service_url(&self.auth_service_url)
            .with_token_ttl(Duration::from_secs(self.token_ttl_seconds))
            .with_sweep_interval(Duration::from_secs(self.sweep_interval_seconds))
    }
}

/// Run the consumer application against a verification endpoint.
/// # Errors
/// Returns an error if the verification endpoint URL is unusable or the server fails.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let config = args.config();
    let state = Arc::new(ConsumerState::new(&config)?);
    let sweeper = consumer::spawn_sweeper(state.clone(), config.sweep_interval());

    let result = api::new(config.port(), consumer::app(state), shutdown_signal()).await;

    sweeper.abort();
    telemetry::shutdown_tracer();

    result
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("auth_service_url", args.auth_service_url.clone()),
        ("token_ttl", format!("{}s", args.token_ttl_seconds)),
        ("sweep_interval", format!("{}s", args.sweep_interval_seconds)),
    ];
    log_entries("Startup configuration", &entries);
}
