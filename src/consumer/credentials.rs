//! Opaque bearer tokens issued after a successful login.
//!
//! The raw token is only handed to the client; the store keeps its SHA-256 hash.

use crate::error::{Error, Result};
use axum::http::{header::AUTHORIZATION, HeaderMap};
use base64::Engine;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::{
    collections::HashMap,
    time::{Duration, SystemTime},
};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy)]
struct Credential {
    user_id: Uuid,
    expires_at: SystemTime,
}

#[derive(Debug)]
pub struct CredentialStore {
    ttl: Duration,
    credentials: RwLock<HashMap<Vec<u8>, Credential>>,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_TTL)
    }
}

impl CredentialStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            credentials: RwLock::new(HashMap::new()),
        }
    }

    /// Issue a fresh token for `user_id`.
    ///
    /// # Errors
    /// `Internal` if the OS random source fails.
    pub async fn issue(&self, user_id: Uuid) -> Result<String> {
        let token = generate_session_token()?;
        let credential = Credential {
            user_id,
            expires_at: SystemTime::now() + self.ttl,
        };
        self.credentials
            .write()
            .await
            .insert(hash_session_token(&token), credential);

        debug!(%user_id, "credential issued");
        Ok(token)
    }

    /// The identity behind `token`, if it is known and unexpired. Expired tokens
    /// are dropped on sight.
    pub async fn resolve(&self, token: &str) -> Option<Uuid> {
        let hash = hash_session_token(token);
        let now = SystemTime::now();

        let credential = self.credentials.read().await.get(&hash).copied()?;
        if credential.expires_at > now {
            return Some(credential.user_id);
        }

        self.credentials.write().await.remove(&hash);
        None
    }

    /// Remove expired tokens. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = SystemTime::now();
        let mut credentials = self.credentials.write().await;
        let before = credentials.len();
        credentials.retain(|_, credential| credential.expires_at > now);
        before - credentials.len()
    }
}

/// 32 random bytes, base64url without padding.
fn generate_session_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| Error::Internal(format!("failed to generate session token: {e}")))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

fn hash_session_token(token: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hasher.finalize().to_vec()
}

/// Token from `Authorization: Bearer <token>`, if present and non-empty.
#[must_use]
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn issued_token_resolves_to_its_user() -> Result<()> {
        let store = CredentialStore::default();
        let user_id = Uuid::new_v4();
        let token = store.issue(user_id).await?;

        assert_eq!(token.len(), 43);
        assert_eq!(store.resolve(&token).await, Some(user_id));
        assert_eq!(store.resolve("forged").await, None);
        Ok(())
    }

    #[tokio::test]
    async fn expired_tokens_stop_resolving() -> Result<()> {
        let store = CredentialStore::new(Duration::from_millis(50));
        let token = store.issue(Uuid::new_v4()).await?;
        store.issue(Uuid::new_v4()).await?;

        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(store.resolve(&token).await, None);
        assert_eq!(store.sweep().await, 1);
        Ok(())
    }

    #[test]
    fn tokens_are_stored_hashed() {
        let hash = hash_session_token("token");
        assert_eq!(hash.len(), 32);
        assert_ne!(hash, b"token".to_vec());
    }

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc "));
        assert_eq!(extract_bearer_token(&headers).as_deref(), Some("abc"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer xyz"));
        assert_eq!(extract_bearer_token(&headers).as_deref(), Some("xyz"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(extract_bearer_token(&headers), None);
    }
}
