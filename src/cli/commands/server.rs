use crate::{api::DEFAULT_SSH_HOST, gateway::DEFAULT_HOST_KEY_PATH};
use anyhow::{Context, Result};
use clap::{Arg, Command};

pub const NAME: &str = "server";
pub const ARG_HTTP_PORT: &str = "http-port";
pub const ARG_SSH_PORT: &str = "ssh-port";
pub const ARG_SSH_HOST: &str = "ssh-host";
pub const ARG_HOST_KEY: &str = "host-key";
pub const ARG_CODE_TTL: &str = "code-ttl";
pub const ARG_SWEEP_INTERVAL: &str = "sweep-interval";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub http_port: u16,
    pub ssh_port: u16,
    pub ssh_host: String,
    pub host_key: String,
    pub code_ttl_seconds: u64,
    pub sweep_interval_seconds: u64,
}

impl Options {
    /// # Errors
    /// Returns an error if a defaulted argument is somehow missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        Ok(Self {
            http_port: matches
                .get_one::<u16>(ARG_HTTP_PORT)
                .copied()
                .context("missing required argument: --http-port")?,
            ssh_port: matches
                .get_one::<u16>(ARG_SSH_PORT)
                .copied()
                .context("missing required argument: --ssh-port")?,
            ssh_host: matches
                .get_one::<String>(ARG_SSH_HOST)
                .cloned()
                .context("missing required argument: --ssh-host")?,
            host_key: matches
                .get_one::<String>(ARG_HOST_KEY)
                .cloned()
                .context("missing required argument: --host-key")?,
            code_ttl_seconds: matches
                .get_one::<u64>(ARG_CODE_TTL)
                .copied()
                .context("missing required argument: --code-ttl")?,
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
        .about("Run the SSH gateway and the verification endpoint")
        .arg(
            Arg::new(ARG_HTTP_PORT)
                .long(ARG_HTTP_PORT)
                .help("HTTP port for the verification endpoint")
                .default_value("3000")
                .env("SSHAUTH_HTTP_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_SSH_PORT)
                .long(ARG_SSH_PORT)
                .help("SSH port for the gateway")
                .default_value("2222")
                .env("SSHAUTH_SSH_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new(ARG_SSH_HOST)
                .long(ARG_SSH_HOST)
                .help("Public SSH host shown in the connection hint")
                .default_value(DEFAULT_SSH_HOST)
                .env("SSHAUTH_SSH_HOST"),
        )
        .arg(
            Arg::new(ARG_HOST_KEY)
                .long(ARG_HOST_KEY)
                .help("Path to the SSH host key, generated on first start")
                .default_value(DEFAULT_HOST_KEY_PATH)
                .env("SSHAUTH_HOST_KEY"),
        )
        .arg(
            Arg::new(ARG_CODE_TTL)
                .long(ARG_CODE_TTL)
                .help("Code lifetime in seconds")
                .default_value("300")
                .env("SSHAUTH_CODE_TTL")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_SWEEP_INTERVAL)
                .long(ARG_SWEEP_INTERVAL)
                .help("Seconds between expiry sweeps")
                .default_value("60")
                .env("SSHAUTH_SWEEP_INTERVAL")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}
