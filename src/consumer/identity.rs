//! Registered identities and their SSH public keys.
//!
//! Memory-resident. Keys are stored trimmed; a recovered key matches a registered
//! one when algorithm and key material are equal, so an `authorized_keys` comment
//! on either side is ignored. Possession was already proven by the SSH signature,
//! so nothing is re-verified here.

use crate::{
    consumer::password,
    epoch_millis,
    error::{Error, Result},
    registry::CapturedKey,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, time::SystemTime};
use tokio::sync::RwLock;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

pub const MIN_USERNAME_CHARS: usize = 3;
pub const MIN_PASSWORD_CHARS: usize = 6;
pub const DEFAULT_KEY_NAME: &str = "Unnamed Key";

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SshKey {
    pub id: Uuid,
    pub name: String,
    pub public_key: String,
    /// Epoch milliseconds.
    pub added_at: u64,
}

/// A user as exposed over HTTP, without the password hash.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub ssh_keys: Vec<SshKey>,
    /// Epoch milliseconds.
    pub created_at: u64,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    password_hash: String,
    pub ssh_keys: Vec<SshKey>,
    pub created_at: SystemTime,
}

impl User {
    #[must_use]
    pub fn sanitized(&self) -> PublicUser {
        PublicUser {
            id: self.id,
            username: self.username.clone(),
            ssh_keys: self.ssh_keys.clone(),
            created_at: epoch_millis(self.created_at),
        }
    }

    /// The registered key with the same algorithm and material as `presented`.
    #[must_use]
    pub fn matching_key(&self, presented: &str) -> Option<&SshKey> {
        let presented = CapturedKey::parse(presented)?;
        self.ssh_keys
            .iter()
            .find(|key| CapturedKey::parse(&key.public_key).as_ref() == Some(&presented))
    }
}

/// `algorithm base64` with one of the algorithms OpenSSH prints by default.
#[must_use]
pub fn valid_public_key(public_key: &str) -> bool {
    Regex::new(
        r"^(ssh-rsa|ssh-ed25519|ecdsa-sha2-nistp256|ecdsa-sha2-nistp384|ecdsa-sha2-nistp521)\s+[A-Za-z0-9+/]+=*",
    )
    .is_ok_and(|regex| regex.is_match(public_key.trim()))
}

#[derive(Debug, Default)]
pub struct UserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl UserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an identity.
    ///
    /// # Errors
    /// `Validation` for empty or short fields, `Conflict` if the username is taken,
    /// `Internal` if hashing fails.
    pub async fn register(&self, username: &str, password: &str) -> Result<PublicUser> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(Error::Validation(
                "username and password are required".to_string(),
            ));
        }
        if username.chars().count() < MIN_USERNAME_CHARS {
            return Err(Error::Validation(format!(
                "username must be at least {MIN_USERNAME_CHARS} characters"
            )));
        }
        if password.chars().count() < MIN_PASSWORD_CHARS {
            return Err(Error::Validation(format!(
                "password must be at least {MIN_PASSWORD_CHARS} characters"
            )));
        }
        if self.find_by_username(username).await.is_some() {
            return Err(Error::Conflict("username already exists".to_string()));
        }

        let password_hash = password::hash_password(password)?;

        let mut users = self.users.write().await;
        // Re-check under the write lock; hashing ran unlocked.
        if users.values().any(|user| user.username == username) {
            return Err(Error::Conflict("username already exists".to_string()));
        }
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash,
            ssh_keys: Vec::new(),
            created_at: SystemTime::now(),
        };
        let public = user.sanitized();
        users.insert(user.id, user);

        info!(username, "user registered");
        Ok(public)
    }

    /// Check a username/password pair. `Ok(None)` means the pair is wrong.
    ///
    /// # Errors
    /// `Internal` if the stored hash cannot be parsed.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<Option<User>> {
        let Some(user) = self.find_by_username(username.trim()).await else {
            return Ok(None);
        };
        if password::verify_password(password, &user.password_hash)? {
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }

    pub async fn find_by_username(&self, username: &str) -> Option<User> {
        self.users
            .read()
            .await
            .values()
            .find(|user| user.username == username)
            .cloned()
    }

    pub async fn get(&self, id: Uuid) -> Option<User> {
        self.users.read().await.get(&id).cloned()
    }

    /// Register a public key for a user.
    ///
    /// # Errors
    /// `Validation` for a malformed key, `NotFound` for an unknown user, `Conflict`
    /// if the user already has a key with that name or material.
    pub async fn add_key(
        &self,
        user_id: Uuid,
        name: Option<&str>,
        public_key: &str,
    ) -> Result<SshKey> {
        let public_key = public_key.trim();
        if public_key.is_empty() {
            return Err(Error::Validation("public key is required".to_string()));
        }
        if !valid_public_key(public_key) {
            return Err(Error::Validation("invalid SSH public key format".to_string()));
        }
        let name = name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_KEY_NAME);

        let mut users = self.users.write().await;
        let user = users.get_mut(&user_id).ok_or(Error::NotFound("user"))?;

        if user.matching_key(public_key).is_some() {
            return Err(Error::Conflict("public key already registered".to_string()));
        }
        if name != DEFAULT_KEY_NAME && user.ssh_keys.iter().any(|key| key.name == name) {
            return Err(Error::Conflict(format!("a key named {name} already exists")));
        }

        let key = SshKey {
            id: Uuid::new_v4(),
            name: name.to_string(),
            public_key: public_key.to_string(),
            added_at: epoch_millis(SystemTime::now()),
        };
        user.ssh_keys.push(key.clone());

        info!(username = %user.username, key_name = %key.name, "ssh key added");
        Ok(key)
    }

    /// Remove one key, leaving the others in their original order.
    ///
    /// # Errors
    /// `NotFound` for an unknown user or key.
    pub async fn remove_key(&self, user_id: Uuid, key_id: Uuid) -> Result<SshKey> {
        let mut users = self.users.write().await;
        let user = users.get_mut(&user_id).ok_or(Error::NotFound("user"))?;
        let position = user
            .ssh_keys
            .iter()
            .position(|key| key.id == key_id)
            .ok_or(Error::NotFound("ssh key"))?;
        let key = user.ssh_keys.remove(position);

        info!(username = %user.username, key_name = %key.name, "ssh key removed");
        Ok(key)
    }
}
