//! # Sshauth (Passwordless SSH Out-of-Band Authentication)
//!
//! `sshauth` lets a person prove possession of an SSH key to a web application
//! without typing a password. The application asks for a short-lived one-time
//! code, the person connects with `ssh <code>@host`, the SSH gateway captures the
//! presented public key and asks, in the terminal, whether to approve the request.
//! The application polls for the result and matches the recovered key against
//! the keys registered for the claimed identity.
//!
//! ## Components
//!
//! - [`registry`]: process-wide store of one-time codes and their lifecycle
//!   (`pending → authenticating → success | denied`, or `expired`).
//! - [`gateway`]: the SSH server. Accepts only public-key authentication, uses the
//!   SSH username as the code, and runs the confirmation dialog over the session
//!   channel.
//! - [`api`]: the HTTP verification endpoint used to create and poll codes.
//! - [`consumer`]: a consuming application with users, registered SSH keys and the
//!   login session broker that drives the polling protocol.
//!
//! ## Single delivery
//!
//! Terminal outcomes are delivered to exactly one poller. The record is removed as
//! soon as a terminal status is observed, so later polls on the same code read as
//! `invalid`. A restart drops every outstanding code.

pub mod api;
pub mod cli;
pub mod consumer;
pub mod error;
pub mod gateway;
pub mod registry;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

/// Milliseconds since the Unix epoch, the unit used on every HTTP surface.
#[must_use]
pub fn epoch_millis(time: std::time::SystemTime) -> u64 {
    time.duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
