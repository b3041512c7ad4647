use crate::consumer::DEFAULT_AUTH_SERVICE_URL;
use anyhow::{Context, Result};
use clap::{Arg, Command};

pub const NAME: &str = "consumer";
pub const ARG_PORT: &str = "port";
pub const ARG_AUTH_SERVICE_URL: &str = "auth-service-url";
pub const ARG_TOKEN_TTL: &str = "token-ttl";
pub const ARG_SWEEP_INTERVAL: &str = "sweep-interval";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub port: u16,
    pub auth_service_url: String,
    pub token_ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl Options {
    /// # Errors
    /// Returns an error if a defaulted argument is somehow missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        Ok(Self {
            port: matches
                .get_one::<u16>(ARG_PORT)
                .copied()
                .context("missing required argument: --port")?,
            auth_service_url: matches
                .get_one::<String>(ARG_AUTH_SERVICE_URL)
                .cloned()
                .context("missing required argument: --auth-service-url")?,
            token_ttl_seconds: matches
                .get_one::<u64>(ARG_TOKEN_TTL)
                .copied()
                .context("missing required argument: --token-ttl")?,
            sweep_interval_seconds: matches
                .get_one::<u64>(ARG_SWEEP_INTERVAL)
                .copied()
                .context("missing required argument: --sweep-interval")?,
        })
    }
}

#[must_use]
pub fn subcommand() -> Command {
    Command::new(NAME)
        .about("Run the demo application that logs users in over SSH")
        .arg(
            Arg::new(ARG_PORT)
                .short('p')
                .long(ARG_PORT)
                .help("Port to listen on")
                .default_value("4000")
                .env("SSHAUTH_CONSUMER_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_AUTH_SERVICE_URL)
                .long(ARG_AUTH_SERVICE_URL)
                .help("Base URL of the verification endpoint")
                .default_value(DEFAULT_AUTH_SERVICE_URL)
                .env("SSHAUTH_AUTH_SERVICE_URL"),
        )
        .arg(
            Arg::new(ARG_TOKEN_TTL)
                .long(ARG_TOKEN_TTL)
                .help("Bearer token lifetime in seconds")
                .default_value("86400")
                .env("SSHAUTH_TOKEN_TTL")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_SWEEP_INTERVAL)
                .long(ARG_SWEEP_INTERVAL)
                .help("Seconds between sweeps of abandoned login sessions")
                .default_value("60")
                .env("SSHAUTH_CONSUMER_SWEEP_INTERVAL")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
