//! Per-connection SSH handler.
//!
//! Authentication treats the username as a registry code. The key is captured in the
//! signature-verified step and remembered on the connection together with the code,
//! so the confirmation dialog always resolves the code this connection captured.

use crate::{
    gateway::dialog::{self, Decision, Dialog},
    registry::{CapturedKey, Registry, Transition, TransitionError},
};
use russh::{
    keys::PublicKey,
    server::{Auth, Handle, Handler, Msg, Session},
    Channel, ChannelId, CryptoVec, MethodKind, MethodSet,
};
use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

// Buffered keystroke chunks per channel.
const INPUT_BUFFER: usize = 64;

pub struct ConnectionHandler {
    registry: Arc<Registry>,
    close_delay: Duration,
    peer_addr: Option<SocketAddr>,
    captured: Option<(String, CapturedKey)>,
    dialogs: HashMap<ChannelId, mpsc::Sender<Vec<u8>>>,
}

impl ConnectionHandler {
    #[must_use]
    pub fn new(registry: Arc<Registry>, close_delay: Duration, peer_addr: Option<SocketAddr>) -> Self {
        Self {
            registry,
            close_delay,
            peer_addr,
            captured: None,
            dialogs: HashMap::new(),
        }
    }

    fn peer(&self) -> String {
        self.peer_addr
            .map_or_else(|| "unknown".to_string(), |addr| addr.to_string())
    }
}

fn publickey_only() -> Auth {
    Auth::Reject {
        proceed_with_methods: Some(MethodSet::from(&[MethodKind::PublicKey][..])),
        partial_success: false,
    }
}

fn reject() -> Auth {
    Auth::Reject {
        proceed_with_methods: None,
        partial_success: false,
    }
}

fn openssh_key(public_key: &PublicKey) -> Option<CapturedKey> {
    public_key
        .to_openssh()
        .ok()
        .and_then(|line| CapturedKey::parse(&line))
}

fn preview(key: &CapturedKey) -> String {
    key.to_string().chars().take(50).collect()
}

impl Handler for ConnectionHandler {
    type Error = anyhow::Error;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        debug!(user, peer = %self.peer(), "auth none, asking for publickey");
        Ok(publickey_only())
    }

    async fn auth_password(&mut self, user: &str, _password: &str) -> Result<Auth, Self::Error> {
        debug!(user, peer = %self.peer(), "password auth refused");
        Ok(publickey_only())
    }

    async fn auth_keyboard_interactive<'a>(
        &'a mut self,
        user: &str,
        _submethods: &str,
        _response: Option<russh::server::Response<'a>>,
    ) -> Result<Auth, Self::Error> {
        debug!(user, peer = %self.peer(), "keyboard-interactive auth refused");
        Ok(publickey_only())
    }

    async fn auth_publickey_offered(
        &mut self,
        user: &str,
        _public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        let Some(record) = self.registry.get(user).await else {
            info!(code = user, peer = %self.peer(), "unknown code");
            return Ok(reject());
        };

        if record.is_expired_at(std::time::SystemTime::now()) {
            info!(code = user, "expired code");
            let _ = self.registry.transition(user, Transition::Expire).await;
            return Ok(reject());
        }
        if record.status.is_terminal() {
            info!(code = user, status = %record.status, "code already resolved");
            return Ok(reject());
        }

        Ok(Auth::Accept)
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        let Some(key) = openssh_key(public_key) else {
            warn!(code = user, "could not encode presented key");
            return Ok(reject());
        };

        match self
            .registry
            .transition(user, Transition::Capture(key.clone()))
            .await
        {
            Ok(_) => {
                info!(code = user, peer = %self.peer(), key = %preview(&key), "key captured, waiting for confirmation");
                self.captured = Some((user.to_string(), key));
                Ok(Auth::Accept)
            }
            Err(err) => {
                info!(code = user, peer = %self.peer(), %err, "capture refused");
                Ok(reject())
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        debug!("Session channel opened: {:?}", channel.id());
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel_id: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(term, col_width, row_height, "PTY request");
        let _ = session.channel_success(channel_id);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel_id: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(command = %String::from_utf8_lossy(data), "exec request");
        let _ = session.channel_success(channel_id);
        let _ = session.data(
            channel_id,
            CryptoVec::from_slice(dialog::exec_acknowledgement().as_bytes()),
        );
        let _ = session.exit_status_request(channel_id, 0);
        let _ = session.eof(channel_id);
        let _ = session.close(channel_id);
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel_id: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let _ = session.channel_success(channel_id);
        let handle = session.handle();

        let record = match &self.captured {
            Some((code, key)) => self.registry.fresh_capture(code, key).await,
            None => Err(TransitionError::NotFound),
        };

        let (code, key, purpose) = match (record, self.captured.clone()) {
            (Ok(record), Some((code, key))) => (code, key, record.purpose),
            (result, _) => {
                if let Err(err) = result {
                    warn!(peer = %self.peer(), %err, "no code awaiting confirmation");
                }
                tokio::spawn(async move {
                    let _ = send(&handle, channel_id, dialog::missing_code_message().as_bytes()).await;
                    finish(&handle, channel_id, 1).await;
                });
                return Ok(());
            }
        };

        let (tx, rx) = mpsc::channel(INPUT_BUFFER);
        self.dialogs.insert(channel_id, tx);

        let confirmation = Confirmation {
            handle,
            channel: channel_id,
            registry: self.registry.clone(),
            code,
            key,
            close_delay: self.close_delay,
        };
        tokio::spawn(confirmation.run(purpose, rx));

        Ok(())
    }

    async fn data(
        &mut self,
        channel_id: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(tx) = self.dialogs.get(&channel_id) {
            if !forward_input(tx, data) {
                self.dialogs.remove(&channel_id);
            }
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel_id: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!("Channel EOF: {:?}", channel_id);
        // Dropping the sender ends the dialog without touching the registry.
        self.dialogs.remove(&channel_id);
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel_id: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!("Channel closed: {:?}", channel_id);
        self.dialogs.remove(&channel_id);
        Ok(())
    }
}

/// Hand keystrokes to the dialog task without waiting, since this runs on the
/// session loop. Input that does not fit is dropped; the dialog only needs one line.
/// Returns `false` once the dialog has gone away.
fn forward_input(tx: &mpsc::Sender<Vec<u8>>, data: &[u8]) -> bool {
    match tx.try_send(data.to_vec()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            debug!("dialog input buffer full, dropping keystrokes");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

/// The confirmation dialog running on one channel.
struct Confirmation {
    handle: Handle,
    channel: ChannelId,
    registry: Arc<Registry>,
    code: String,
    key: CapturedKey,
    close_delay: Duration,
}

impl Confirmation {
    async fn run(self, purpose: String, mut input: mpsc::Receiver<Vec<u8>>) {
        let mut dialog = Dialog::new();
        if send(&self.handle, self.channel, dialog.prompt(&purpose).as_bytes())
            .await
            .is_err()
        {
            return;
        }

        let decision = loop {
            let Some(chunk) = input.recv().await else {
                debug!(code = %self.code, "channel closed before a decision");
                return;
            };
            let step = dialog.feed(&chunk);
            if !step.echo.is_empty() && send(&self.handle, self.channel, &step.echo).await.is_err() {
                return;
            }
            if let Some(decision) = step.decision {
                break decision;
            }
        };

        let (message, exit_status) = match self
            .registry
            .confirm(&self.code, &self.key, decision.is_approval())
            .await
        {
            Ok(record) => {
                info!(code = %self.code, status = %record.status, "confirmation recorded");
                (dialog::outcome_message(decision), decision.exit_status())
            }
            Err(err) => {
                warn!(code = %self.code, %err, "confirmation not recorded");
                (dialog::confirmation_failed_message().to_string(), 1)
            }
        };

        let _ = send(&self.handle, self.channel, message.as_bytes()).await;
        if decision != Decision::Interrupt {
            tokio::time::sleep(self.close_delay).await;
        }
        finish(&self.handle, self.channel, exit_status).await;
    }
}

async fn send(handle: &Handle, channel: ChannelId, bytes: &[u8]) -> Result<(), ()> {
    handle
        .data(channel, CryptoVec::from_slice(bytes))
        .await
        .map_err(|_| ())
}

async fn finish(handle: &Handle, channel: ChannelId, exit_status: u32) {
    let _ = handle.exit_status_request(channel, exit_status).await;
    let _ = handle.eof(channel).await;
    let _ = handle.close(channel).await;
}
