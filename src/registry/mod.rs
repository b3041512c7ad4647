//! In-memory registry of one-time authentication codes.
//!
//! Lifecycle of a record:
//! 1) `create` stamps a random code as `pending` with a fixed TTL.
//! 2) The SSH gateway captures the presented key (`authenticating`). A later
//!    capture for the same code replaces the key until the record is confirmed.
//! 3) The confirmation dialog resolves it to `success` or `denied`. Both are
//!    compare-and-set on the captured key, so a connection whose key was replaced
//!    cannot confirm.
//! 4) `poll` hands a terminal status to exactly one caller and removes the record.
//!
//! Any record past `expires_at` reads as `expired`, whatever its status. The
//! sweeper removes such records in the background, and removal is idempotent, so a
//! sweep racing a poll never fails.
//!
//! The store is process-local: a restart invalidates every outstanding code.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt,
    sync::Arc,
    time::{Duration, SystemTime},
};
use tokio::{sync::Mutex, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info};
use utoipa::ToSchema;

mod key;

pub use key::CapturedKey;

pub const DEFAULT_CODE_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_RECENCY_WINDOW: Duration = Duration::from_secs(10);
pub const DEFAULT_PURPOSE: &str = "未指定用途";

// 4 random bytes, rendered as 8 lowercase hex chars.
const CODE_BYTES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    ttl: Duration,
    sweep_interval: Duration,
    recency_window: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CODE_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            recency_window: DEFAULT_RECENCY_WINDOW,
        }
    }
}

impl RegistryConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    #[must_use]
    pub const fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_recency_window(mut self, window: Duration) -> Self {
        self.recency_window = window;
        self
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    #[must_use]
    pub const fn recency_window(&self) -> Duration {
        self.recency_window
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pending,
    Authenticating,
    Success,
    Denied,
    Expired,
}

impl Status {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Denied | Self::Expired)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Authenticating => "authenticating",
            Self::Success => "success",
            Self::Denied => "denied",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCode {
    pub code: String,
    pub status: Status,
    pub captured_key: Option<CapturedKey>,
    pub captured_at: Option<SystemTime>,
    pub purpose: String,
    pub created_at: SystemTime,
    pub expires_at: SystemTime,
    pub last_transition_at: SystemTime,
}

impl AuthCode {
    fn new(code: String, purpose: String, now: SystemTime, ttl: Duration) -> Self {
        Self {
            code,
            status: Status::Pending,
            captured_key: None,
            captured_at: None,
            purpose,
            created_at: now,
            expires_at: now + ttl,
            last_transition_at: now,
        }
    }

    #[must_use]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }

    #[must_use]
    pub fn remaining_at(&self, now: SystemTime) -> Duration {
        self.expires_at.duration_since(now).unwrap_or(Duration::ZERO)
    }

    fn set_status(&mut self, status: Status, now: SystemTime) {
        self.status = status;
        self.last_transition_at = now;
    }

    fn mark_expired(&mut self, now: SystemTime) {
        self.captured_key = None;
        self.set_status(Status::Expired, now);
    }
}

/// A requested state change, carrying its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Capture(CapturedKey),
    Approve,
    Deny,
    Expire,
}

impl Transition {
    #[must_use]
    pub const fn target(&self) -> Status {
        match self {
            Self::Capture(_) => Status::Authenticating,
            Self::Approve => Status::Success,
            Self::Deny => Status::Denied,
            Self::Expire => Status::Expired,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("unknown code")]
    NotFound,
    #[error("code expired")]
    Expired,
    #[error("cannot move a {from} code to {to}")]
    Illegal { from: Status, to: Status },
    #[error("code is {0}, not awaiting confirmation")]
    NotAwaitingConfirmation(Status),
    #[error("captured key was replaced by another connection")]
    KeySuperseded,
    #[error("key was captured outside the recency window")]
    Stale,
}

/// What a single poll observed. Terminal variants are only ever returned once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Invalid,
    Expired,
    Denied,
    Success {
        public_key: CapturedKey,
    },
    Authenticating {
        expires_at: SystemTime,
        remaining: Duration,
    },
    Pending {
        expires_at: SystemTime,
        remaining: Duration,
    },
}

#[derive(Debug)]
pub struct Registry {
    config: RegistryConfig,
    records: Mutex<HashMap<String, AuthCode>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl Registry {
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            records: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Create a `pending` record. A missing or blank purpose falls back to
    /// [`DEFAULT_PURPOSE`].
    pub async fn create(&self, purpose: Option<&str>) -> AuthCode {
        let purpose = purpose
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_PURPOSE)
            .to_string();
        let now = SystemTime::now();

        let mut records = self.records.lock().await;
        let code = loop {
            let candidate = generate_code();
            if !records.contains_key(&candidate) {
                break candidate;
            }
        };
        let record = AuthCode::new(code.clone(), purpose, now, self.config.ttl);
        records.insert(code, record.clone());
        drop(records);

        info!(code = %record.code, purpose = %record.purpose, "code created");
        record
    }

    pub async fn get(&self, code: &str) -> Option<AuthCode> {
        self.records.lock().await.get(code).cloned()
    }

    /// Apply a transition in place.
    ///
    /// # Errors
    /// `NotFound` if the code is absent, `Expired` if its TTL elapsed (the record is
    /// marked expired as a side effect), `Illegal` if the lifecycle forbids the move.
    pub async fn transition(
        &self,
        code: &str,
        transition: Transition,
    ) -> Result<AuthCode, TransitionError> {
        self.apply(code, transition, None, SystemTime::now()).await
    }

    /// Resolve an `authenticating` record, but only if it still holds `key`.
    ///
    /// # Errors
    /// Same as [`Registry::transition`], plus `KeySuperseded` when another connection
    /// captured a different key in the meantime.
    pub async fn confirm(
        &self,
        code: &str,
        key: &CapturedKey,
        approve: bool,
    ) -> Result<AuthCode, TransitionError> {
        let transition = if approve {
            Transition::Approve
        } else {
            Transition::Deny
        };
        self.apply(code, transition, Some(key), SystemTime::now())
            .await
    }

    /// Check that `code` is awaiting confirmation for `key` and that the capture
    /// happened within the recency window.
    ///
    /// # Errors
    /// `NotFound`, `Expired`, `NotAwaitingConfirmation`, `KeySuperseded` or `Stale`.
    pub async fn fresh_capture(
        &self,
        code: &str,
        key: &CapturedKey,
    ) -> Result<AuthCode, TransitionError> {
        let now = SystemTime::now();
        let mut records = self.records.lock().await;
        let record = records.get_mut(code).ok_or(TransitionError::NotFound)?;

        if record.is_expired_at(now) {
            record.mark_expired(now);
            return Err(TransitionError::Expired);
        }
        if record.status != Status::Authenticating {
            return Err(TransitionError::NotAwaitingConfirmation(record.status));
        }
        if record.captured_key.as_ref() != Some(key) {
            return Err(TransitionError::KeySuperseded);
        }
        let age = record
            .captured_at
            .and_then(|at| now.duration_since(at).ok())
            .unwrap_or(Duration::ZERO);
        if record.captured_at.is_none() || age > self.config.recency_window {
            return Err(TransitionError::Stale);
        }

        Ok(record.clone())
    }

    async fn apply(
        &self,
        code: &str,
        transition: Transition,
        expected_key: Option<&CapturedKey>,
        now: SystemTime,
    ) -> Result<AuthCode, TransitionError> {
        let mut records = self.records.lock().await;
        let record = records.get_mut(code).ok_or(TransitionError::NotFound)?;

        if record.is_expired_at(now) && transition != Transition::Expire {
            record.mark_expired(now);
            return Err(TransitionError::Expired);
        }

        let from = record.status;
        let to = transition.target();
        match (from, transition) {
            (Status::Pending | Status::Authenticating, Transition::Capture(key)) => {
                record.captured_key = Some(key);
                record.captured_at = Some(now);
                record.set_status(Status::Authenticating, now);
            }
            (Status::Authenticating, Transition::Approve) => {
                ensure_key(record, expected_key)?;
                record.set_status(Status::Success, now);
            }
            (Status::Authenticating, Transition::Deny) => {
                ensure_key(record, expected_key)?;
                record.captured_key = None;
                record.set_status(Status::Denied, now);
            }
            (_, Transition::Expire) => record.mark_expired(now),
            (Status::Pending, Transition::Approve | Transition::Deny) => {
                return Err(TransitionError::NotAwaitingConfirmation(from));
            }
            _ => return Err(TransitionError::Illegal { from, to }),
        }

        debug!(code, %from, %to, "code transitioned");
        Ok(record.clone())
    }

    /// Observe a code. Terminal statuses remove the record, so each one is delivered
    /// to exactly one caller and every later poll sees `Invalid`.
    pub async fn poll(&self, code: &str) -> PollOutcome {
        let now = SystemTime::now();
        let mut records = self.records.lock().await;

        let Some(record) = records.get(code) else {
            return PollOutcome::Invalid;
        };
        let status = if record.is_expired_at(now) {
            Status::Expired
        } else {
            record.status
        };
        let expires_at = record.expires_at;
        let remaining = record.remaining_at(now);

        match status {
            Status::Pending => PollOutcome::Pending {
                expires_at,
                remaining,
            },
            Status::Authenticating => PollOutcome::Authenticating {
                expires_at,
                remaining,
            },
            Status::Success => match records.remove(code).and_then(|r| r.captured_key) {
                Some(public_key) => PollOutcome::Success { public_key },
                None => PollOutcome::Invalid,
            },
            Status::Denied => {
                records.remove(code);
                PollOutcome::Denied
            }
            Status::Expired => {
                records.remove(code);
                PollOutcome::Expired
            }
        }
    }

    /// Remove every record past its expiry. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = SystemTime::now();
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, record| !record.is_expired_at(now));
        before - records.len()
    }

    pub async fn active_count(&self) -> usize {
        self.records.lock().await.len()
    }
}

fn ensure_key(record: &AuthCode, expected: Option<&CapturedKey>) -> Result<(), TransitionError> {
    match expected {
        Some(key) if record.captured_key.as_ref() != Some(key) => {
            Err(TransitionError::KeySuperseded)
        }
        _ => Ok(()),
    }
}

fn generate_code() -> String {
    let mut bytes = [0u8; CODE_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Run [`Registry::sweep`] on the configured period, independent of request traffic.
pub fn spawn_sweeper(registry: Arc<Registry>) -> JoinHandle<()> {
    let period = registry
        .config()
        .sweep_interval()
        .max(Duration::from_millis(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = registry.sweep().await;
            if removed > 0 {
                debug!(removed, "swept expired codes");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn key(material: &str) -> CapturedKey {
        CapturedKey::new("ssh-ed25519", material)
    }

    fn short_lived() -> Registry {
        Registry::new(RegistryConfig::new().with_ttl(Duration::from_millis(100)))
    }

    #[tokio::test]
    async fn created_code_polls_pending_within_ttl() {
        let registry = Registry::default();
        let record = registry.create(Some("login")).await;

        assert_eq!(record.status, Status::Pending);
        assert_eq!(record.purpose, "login");
        match registry.poll(&record.code).await {
            PollOutcome::Pending { remaining, .. } => assert!(remaining <= DEFAULT_CODE_TTL),
            other => panic!("expected pending, got {other:?}"),
        }
        // Non-terminal polls keep the record.
        assert_eq!(registry.active_count().await, 1);
    }

    #[tokio::test]
    async fn codes_are_short_lowercase_hex_and_unique() {
        let registry = Registry::default();
        let mut seen = HashSet::new();
        for _ in 0..64 {
            let code = registry.create(None).await.code;
            assert_eq!(code.len(), CODE_BYTES * 2);
            assert!(code
                .chars()
                .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
            assert!(seen.insert(code));
        }
    }

    #[tokio::test]
    async fn blank_purpose_uses_default() {
        let registry = Registry::default();
        assert_eq!(registry.create(None).await.purpose, DEFAULT_PURPOSE);
        assert_eq!(registry.create(Some("   ")).await.purpose, DEFAULT_PURPOSE);
    }

    #[tokio::test]
    async fn approved_code_is_delivered_once() -> Result<(), TransitionError> {
        let registry = Registry::default();
        let code = registry.create(Some("login")).await.code;
        let k = key("AAAAK");

        let captured = registry.transition(&code, Transition::Capture(k.clone())).await?;
        assert_eq!(captured.status, Status::Authenticating);
        assert!(captured.captured_at.is_some());

        registry.confirm(&code, &k, true).await?;

        assert_eq!(
            registry.poll(&code).await,
            PollOutcome::Success { public_key: k }
        );
        assert_eq!(registry.poll(&code).await, PollOutcome::Invalid);
        Ok(())
    }

    #[tokio::test]
    async fn denial_discards_the_captured_key() -> Result<(), TransitionError> {
        let registry = Registry::default();
        let code = registry.create(None).await.code;
        let k = key("AAAAK");

        registry.transition(&code, Transition::Capture(k.clone())).await?;
        let denied = registry.confirm(&code, &k, false).await?;
        assert_eq!(denied.status, Status::Denied);
        assert!(denied.captured_key.is_none());

        assert_eq!(registry.poll(&code).await, PollOutcome::Denied);
        assert_eq!(registry.poll(&code).await, PollOutcome::Invalid);
        Ok(())
    }

    #[tokio::test]
    async fn expired_code_is_reported_once() {
        let registry = short_lived();
        let code = registry.create(None).await.code;

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(registry.poll(&code).await, PollOutcome::Expired);
        assert_eq!(registry.poll(&code).await, PollOutcome::Invalid);
    }

    #[tokio::test]
    async fn expiry_wins_over_an_unpolled_success() -> Result<(), TransitionError> {
        let registry = short_lived();
        let code = registry.create(None).await.code;
        let k = key("AAAAK");
        registry.transition(&code, Transition::Capture(k.clone())).await?;
        registry.confirm(&code, &k, true).await?;

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(registry.poll(&code).await, PollOutcome::Expired);
        Ok(())
    }

    #[tokio::test]
    async fn capture_after_expiry_marks_expired() {
        let registry = short_lived();
        let code = registry.create(None).await.code;
        tokio::time::sleep(Duration::from_millis(150)).await;

        let result = registry
            .transition(&code, Transition::Capture(key("AAAAK")))
            .await;
        assert_eq!(result, Err(TransitionError::Expired));
        assert_eq!(
            registry.get(&code).await.map(|r| r.status),
            Some(Status::Expired)
        );
    }

    #[tokio::test]
    async fn last_capture_wins_and_fences_the_earlier_connection() -> Result<(), TransitionError>
    {
        let registry = Registry::default();
        let code = registry.create(None).await.code;
        let first = key("FIRST");
        let second = key("SECOND");

        registry.transition(&code, Transition::Capture(first.clone())).await?;
        registry.transition(&code, Transition::Capture(second.clone())).await?;

        assert_eq!(
            registry.confirm(&code, &first, true).await,
            Err(TransitionError::KeySuperseded)
        );
        assert_eq!(
            registry.fresh_capture(&code, &first).await,
            Err(TransitionError::KeySuperseded)
        );

        registry.confirm(&code, &second, true).await?;
        assert_eq!(
            registry.poll(&code).await,
            PollOutcome::Success { public_key: second }
        );
        Ok(())
    }

    #[tokio::test]
    async fn terminal_records_reject_capture() -> Result<(), TransitionError> {
        let registry = Registry::default();
        let code = registry.create(None).await.code;
        let k = key("AAAAK");
        registry.transition(&code, Transition::Capture(k.clone())).await?;
        registry.confirm(&code, &k, true).await?;

        assert_eq!(
            registry
                .transition(&code, Transition::Capture(key("OTHER")))
                .await,
            Err(TransitionError::Illegal {
                from: Status::Success,
                to: Status::Authenticating,
            })
        );
        Ok(())
    }

    #[tokio::test]
    async fn confirmation_requires_a_capture() {
        let registry = Registry::default();
        let code = registry.create(None).await.code;

        assert_eq!(
            registry.transition(&code, Transition::Approve).await,
            Err(TransitionError::NotAwaitingConfirmation(Status::Pending))
        );
        assert_eq!(
            registry.transition("deadbeef", Transition::Approve).await,
            Err(TransitionError::NotFound)
        );
    }

    #[tokio::test]
    async fn fresh_capture_enforces_recency_window() -> Result<(), TransitionError> {
        let registry =
            Registry::new(RegistryConfig::new().with_recency_window(Duration::from_millis(50)));
        let code = registry.create(None).await.code;
        let k = key("AAAAK");
        registry.transition(&code, Transition::Capture(k.clone())).await?;

        assert_eq!(registry.fresh_capture(&code, &k).await?.code, code);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(
            registry.fresh_capture(&code, &k).await,
            Err(TransitionError::Stale)
        );
        Ok(())
    }

    #[tokio::test]
    async fn sweep_is_idempotent() {
        let registry = short_lived();
        let code = registry.create(None).await.code;
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(registry.sweep().await, 1);
        assert_eq!(registry.sweep().await, 0);
        assert_eq!(registry.poll(&code).await, PollOutcome::Invalid);
    }

    #[tokio::test]
    async fn sweeper_runs_without_traffic() {
        let registry = Arc::new(Registry::new(
            RegistryConfig::new()
                .with_ttl(Duration::from_millis(10))
                .with_sweep_interval(Duration::from_millis(10)),
        ));
        registry.create(None).await;

        let handle = spawn_sweeper(registry.clone());
        tokio::time::sleep(Duration::from_millis(80)).await;
        handle.abort();

        assert_eq!(registry.active_count().await, 0);
    }
}
