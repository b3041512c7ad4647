//! Login sessions driven by SSH confirmation.
//!
//! A session binds one local identity to one remote code. Polling forwards to the
//! verification endpoint and interprets its answer for that identity. Each session
//! sits behind its own lock, so two concurrent polls cannot both act on the same
//! terminal answer: the first one resolves the session and the second finds it
//! gone.

use crate::{
    api::VerifyStatus,
    consumer::{
        client::{HttpVerificationClient, VerificationApi},
        credentials::CredentialStore,
        identity::{PublicUser, UserStore},
    },
    error::{Error, Result},
};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Purpose shown in the SSH dialog for a consumer login.
#[must_use]
pub fn login_purpose(username: &str) -> String {
    format!("登录到系统 - 用户: {username}")
}

#[derive(Debug, Clone)]
struct LoginSession {
    user_id: Uuid,
    username: String,
    code: String,
    expires_at: SystemTime,
}

#[derive(Debug)]
struct SessionSlot {
    expires_at: SystemTime,
    session: Arc<Mutex<Option<LoginSession>>>,
}

/// What the caller needs to start the SSH side of a login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginTicket {
    pub session_id: String,
    pub code: String,
    pub ssh_command: String,
    /// Epoch milliseconds.
    pub expires_at: u64,
    /// Milliseconds.
    pub expires_in: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginPoll {
    Invalid,
    Expired,
    Denied,
    KeyMismatch,
    Success { token: String, user: PublicUser },
    Authenticating { remaining: Duration },
    Pending { remaining: Duration },
}

#[derive(Debug)]
pub struct LoginSessionBroker<C = HttpVerificationClient> {
    client: C,
    users: Arc<UserStore>,
    credentials: Arc<CredentialStore>,
    sessions: RwLock<HashMap<String, SessionSlot>>,
}

impl<C: VerificationApi> LoginSessionBroker<C> {
    #[must_use]
    pub fn new(client: C, users: Arc<UserStore>, credentials: Arc<CredentialStore>) -> Self {
        Self {
            client,
            users,
            credentials,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Request a code for `username` and open a local session for it.
    ///
    /// # Errors
    /// `Validation` for an empty username or an identity without keys, `NotFound`
    /// for an unknown identity, `UpstreamUnavailable` if no code could be obtained.
    /// Nothing is requested remotely unless the identity checks pass.
    pub async fn init(&self, username: &str) -> Result<LoginTicket> {
        let username = username.trim();
        if username.is_empty() {
            return Err(Error::Validation("username is required".to_string()));
        }
        let user = self
            .users
            .find_by_username(username)
            .await
            .ok_or(Error::NotFound("user"))?;
        if user.ssh_keys.is_empty() {
            return Err(Error::Validation(
                "no SSH keys registered for this account".to_string(),
            ));
        }

        let generated = self.client.generate_code(&login_purpose(username)).await?;

        let session_id = Uuid::new_v4().simple().to_string();
        let expires_at = UNIX_EPOCH + Duration::from_millis(generated.expires_at);
        let session = LoginSession {
            user_id: user.id,
            username: user.username.clone(),
            code: generated.code.clone(),
            expires_at,
        };
        self.sessions.write().await.insert(
            session_id.clone(),
            SessionSlot {
                expires_at,
                session: Arc::new(Mutex::new(Some(session))),
            },
        );

        info!(username, code = %generated.code, "ssh login started");

        Ok(LoginTicket {
            session_id,
            code: generated.code,
            ssh_command: generated.ssh_command,
            expires_at: generated.expires_at,
            expires_in: generated.expires_in,
        })
    }

    /// Advance a session by one poll of its remote code.
    ///
    /// # Errors
    /// `UpstreamUnavailable` if the verification endpoint could not be asked. The
    /// session is kept so the caller can poll again. `Internal` if a credential
    /// cannot be issued.
    pub async fn poll(&self, session_id: &str) -> Result<LoginPoll> {
        let Some(slot) = self
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|slot| slot.session.clone())
        else {
            return Ok(LoginPoll::Invalid);
        };

        let mut guard = slot.lock().await;
        let Some(session) = guard.clone() else {
            return Ok(LoginPoll::Invalid);
        };

        if SystemTime::now() >= session.expires_at {
            self.close(session_id, &mut guard).await;
            return Ok(LoginPoll::Expired);
        }

        let response = match self.client.verify(&session.code).await {
            Ok(response) => response,
            Err(err) => {
                warn!(session_id, "verification poll failed: {err}");
                return Err(err);
            }
        };
        let remaining = Duration::from_millis(response.remaining_time.unwrap_or_default());

        let outcome = match response.status {
            VerifyStatus::Pending => return Ok(LoginPoll::Pending { remaining }),
            VerifyStatus::Authenticating => return Ok(LoginPoll::Authenticating { remaining }),
            VerifyStatus::Invalid => LoginPoll::Invalid,
            VerifyStatus::Expired => LoginPoll::Expired,
            VerifyStatus::Denied => LoginPoll::Denied,
            VerifyStatus::Success => {
                // The remote code is consumed whatever happens next.
                self.close(session_id, &mut guard).await;
                let presented = response.public_key.unwrap_or_default();
                return self.bind(&session, &presented).await;
            }
        };

        self.close(session_id, &mut guard).await;
        info!(session_id, username = %session.username, ?outcome, "ssh login ended");
        Ok(outcome)
    }

    async fn bind(&self, session: &LoginSession, presented: &str) -> Result<LoginPoll> {
        let user = self.users.get(session.user_id).await;
        let Some(user) = user.filter(|user| user.matching_key(presented).is_some()) else {
            warn!(username = %session.username, "approved key is not registered to this account");
            return Ok(LoginPoll::KeyMismatch);
        };

        let token = self.credentials.issue(user.id).await?;
        info!(username = %user.username, "ssh login succeeded");
        Ok(LoginPoll::Success {
            token,
            user: user.sanitized(),
        })
    }

    async fn close(&self, session_id: &str, guard: &mut Option<LoginSession>) {
        guard.take();
        self.sessions.write().await.remove(session_id);
    }

    /// Drop sessions past their mirrored expiry. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = SystemTime::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, slot| slot.expires_at > now);
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, "expired login sessions swept");
        }
        removed
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::api::{GeneratedCode, VerifyResponse};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) const KEY: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl";

    /// Scripted verification endpoint. Once the script runs out every poll answers
    /// `invalid`, like a consumed code.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedApi {
        pub ttl: Duration,
        pub replies: std::sync::Mutex<VecDeque<Result<VerifyResponse>>>,
        pub generated: AtomicUsize,
        pub polls: AtomicUsize,
    }

    impl ScriptedApi {
        pub(crate) fn new(replies: Vec<Result<VerifyResponse>>) -> Self {
            Self {
                ttl: Duration::from_secs(300),
                replies: std::sync::Mutex::new(replies.into()),
                ..Self::default()
            }
        }
    }

    pub(crate) fn reply(status: VerifyStatus, public_key: Option<&str>) -> Result<VerifyResponse> {
        Ok(VerifyResponse {
            success: !matches!(
                status,
                VerifyStatus::Invalid | VerifyStatus::Expired | VerifyStatus::Denied
            ),
            status,
            public_key: public_key.map(str::to_string),
            expires_at: None,
            remaining_time: Some(1_000),
            message: String::new(),
        })
    }

    impl VerificationApi for ScriptedApi {
        async fn generate_code(&self, purpose: &str) -> Result<GeneratedCode> {
            let n = self.generated.fetch_add(1, Ordering::SeqCst);
            let expires_at = SystemTime::now() + self.ttl;
            let expires_at = u64::try_from(
                expires_at
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_millis(),
            )
            .unwrap_or(u64::MAX);
            Ok(GeneratedCode {
                success: true,
                code: format!("{n:08x}"),
                expires_at,
                expires_in: u64::try_from(self.ttl.as_millis()).unwrap_or(u64::MAX),
                ssh_command: format!("ssh {n:08x}@localhost -p 2222"),
                purpose: purpose.to_string(),
            })
        }

        async fn verify(&self, _code: &str) -> Result<VerifyResponse> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .replies
                .lock()
                .map(|mut replies| replies.pop_front())
                .unwrap_or_default();
            next.unwrap_or_else(|| reply(VerifyStatus::Invalid, None))
        }
    }

    async fn broker_with(
        api: ScriptedApi,
    ) -> anyhow::Result<(LoginSessionBroker<ScriptedApi>, Arc<CredentialStore>, Uuid)> {
        let users = Arc::new(UserStore::new());
        let alice = users.register("alice", "secret1").await?;
        users.add_key(alice.id, Some("laptop"), KEY).await?;
        let credentials = Arc::new(CredentialStore::default());
        Ok((
            LoginSessionBroker::new(api, users, credentials.clone()),
            credentials,
            alice.id,
        ))
    }

    #[test]
    fn purpose_names_the_user() {
        assert_eq!(login_purpose("alice"), "登录到系统 - 用户: alice");
    }

    #[tokio::test]
    async fn init_checks_identity_before_requesting_a_code() -> anyhow::Result<()> {
        let (broker, _, _) = broker_with(ScriptedApi::new(vec![])).await?;
        broker.users.register("bob", "secret1").await?;

        assert!(matches!(broker.init("  ").await, Err(Error::Validation(_))));
        assert_eq!(broker.init("nobody").await.err(), Some(Error::NotFound("user")));
        assert!(matches!(broker.init("bob").await, Err(Error::Validation(_))));
        assert_eq!(broker.client.generated.load(Ordering::SeqCst), 0);

        let ticket = broker.init("alice").await?;
        assert_eq!(ticket.code, "00000000");
        assert_eq!(ticket.expires_in, 300_000);
        assert_eq!(broker.active_count().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn matching_key_issues_a_credential_once() -> anyhow::Result<()> {
        let api = ScriptedApi::new(vec![
            reply(VerifyStatus::Pending, None),
            reply(VerifyStatus::Authenticating, None),
            reply(VerifyStatus::Success, Some(&format!("{KEY}\n"))),
        ]);
        let (broker, credentials, alice) = broker_with(api).await?;
        let ticket = broker.init("alice").await?;

        assert!(matches!(
            broker.poll(&ticket.session_id).await?,
            LoginPoll::Pending { .. }
        ));
        assert!(matches!(
            broker.poll(&ticket.session_id).await?,
            LoginPoll::Authenticating { remaining } if remaining == Duration::from_secs(1)
        ));

        let LoginPoll::Success { token, user } = broker.poll(&ticket.session_id).await? else {
            anyhow::bail!("expected success");
        };
        assert_eq!(user.username, "alice");
        assert_eq!(credentials.resolve(&token).await, Some(alice));

        assert_eq!(broker.poll(&ticket.session_id).await?, LoginPoll::Invalid);
        assert_eq!(broker.active_count().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn foreign_key_is_a_mismatch() -> anyhow::Result<()> {
        let api = ScriptedApi::new(vec![reply(
            VerifyStatus::Success,
            Some("ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIForeignKey"),
        )]);
        let (broker, _, _) = broker_with(api).await?;
        let ticket = broker.init("alice").await?;

        assert_eq!(broker.poll(&ticket.session_id).await?, LoginPoll::KeyMismatch);
        assert_eq!(broker.poll(&ticket.session_id).await?, LoginPoll::Invalid);
        Ok(())
    }

    #[tokio::test]
    async fn terminal_failures_close_the_session() -> anyhow::Result<()> {
        for (status, expected) in [
            (VerifyStatus::Denied, LoginPoll::Denied),
            (VerifyStatus::Expired, LoginPoll::Expired),
            (VerifyStatus::Invalid, LoginPoll::Invalid),
        ] {
            let (broker, _, _) = broker_with(ScriptedApi::new(vec![reply(status, None)])).await?;
            let ticket = broker.init("alice").await?;
            assert_eq!(broker.poll(&ticket.session_id).await?, expected);
            assert_eq!(broker.active_count().await, 0);
        }
        Ok(())
    }

    #[tokio::test]
    async fn upstream_failure_keeps_the_session() -> anyhow::Result<()> {
        let api = ScriptedApi::new(vec![
            Err(Error::UpstreamUnavailable("down".to_string())),
            reply(VerifyStatus::Pending, None),
        ]);
        let (broker, _, _) = broker_with(api).await?;
        let ticket = broker.init("alice").await?;

        assert!(matches!(
            broker.poll(&ticket.session_id).await,
            Err(Error::UpstreamUnavailable(_))
        ));
        assert!(matches!(
            broker.poll(&ticket.session_id).await?,
            LoginPoll::Pending { .. }
        ));
        Ok(())
    }

    #[tokio::test]
    async fn locally_expired_session_is_not_forwarded() -> anyhow::Result<()> {
        let mut api = ScriptedApi::new(vec![reply(VerifyStatus::Pending, None)]);
        api.ttl = Duration::from_millis(50);
        let (broker, _, _) = broker_with(api).await?;
        let ticket = broker.init("alice").await?;

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(broker.poll(&ticket.session_id).await?, LoginPoll::Expired);
        assert_eq!(broker.client.polls.load(Ordering::SeqCst), 0);
        assert_eq!(broker.poll(&ticket.session_id).await?, LoginPoll::Invalid);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_polls_issue_one_credential() -> anyhow::Result<()> {
        let api = ScriptedApi::new(vec![
            reply(VerifyStatus::Success, Some(KEY)),
            reply(VerifyStatus::Success, Some(KEY)),
        ]);
        let (broker, _, _) = broker_with(api).await?;
        let broker = Arc::new(broker);
        let ticket = broker.init("alice").await?;

        let polls = (0..4).map(|_| {
            let broker = broker.clone();
            let session_id = ticket.session_id.clone();
            tokio::spawn(async move { broker.poll(&session_id).await })
        });
        let mut successes = 0;
        for handle in polls.collect::<Vec<_>>() {
            if matches!(handle.await??, LoginPoll::Success { .. }) {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(broker.client.polls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn sweep_drops_expired_sessions() -> anyhow::Result<()> {
        let mut api = ScriptedApi::new(vec![]);
        api.ttl = Duration::from_millis(50);
        let (broker, _, _) = broker_with(api).await?;
        broker.init("alice").await?;
        broker.init("alice").await?;

        assert_eq!(broker.sweep().await, 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(broker.sweep().await, 2);
        assert_eq!(broker.active_count().await, 0);
        Ok(())
    }
}
