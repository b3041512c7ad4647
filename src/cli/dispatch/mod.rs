//! Map validated CLI matches to an action.

use crate::cli::{
    actions::{consumer, server, Action},
    commands,
};
use anyhow::{anyhow, Result};

/// Map validated CLI matches to the selected subcommand's action.
///
/// # Errors
/// Returns an error if no known subcommand was given or its arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    match matches.subcommand() {
        Some((commands::server::NAME, sub)) => {
            let options = commands::server::Options::parse(sub)?;
            Ok(Action::Server(server::Args {
                http_port: options.http_port,
                ssh_port: options.ssh_port,
                ssh_host: options.ssh_host,
                host_key: options.host_key,
                code_ttl_seconds: options.code_ttl_seconds,
                sweep_interval_seconds: options.sweep_interval_seconds,
            }))
        }
        Some((commands::consumer::NAME, sub)) => {
            let options = commands::consumer::Options::parse(sub)?;
            Ok(Action::Consumer(consumer::Args {
                port: options.port,
                auth_service_url: options.auth_service_url,
                token_ttl_seconds: options.token_ttl_seconds,
                sweep_interval_seconds: options.sweep_interval_seconds,
            }))
        }
        Some((name, _)) => Err(anyhow!("unknown subcommand: {name}")),
        None => Err(anyhow!("missing subcommand")),
    }
}
