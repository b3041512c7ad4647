use anyhow::{Context, Result};
use russh::keys::{
    ssh_key::{rand_core::OsRng, Algorithm, LineEnding},
    PrivateKey,
};
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::info;

/// Load the host identity key, generating and persisting an Ed25519 key on first run.
///
/// # Errors
/// Returns an error if an existing key cannot be parsed, or a new one cannot be written.
pub async fn load_or_generate(path: &Path) -> Result<PrivateKey> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        info!("Loading host key from {}", path.display());
        return russh::keys::load_secret_key(path, None)
            .with_context(|| format!("Failed to load host key from {}", path.display()));
    }

    info!("Generating new Ed25519 host key");
    let key =
        PrivateKey::random(&mut OsRng, Algorithm::Ed25519).context("Failed to generate host key")?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let encoded = key
        .to_openssh(LineEnding::LF)
        .context("Failed to encode host key")?;
    write_private(path, encoded.as_bytes())
        .await
        .with_context(|| format!("Failed to write host key to {}", path.display()))?;

    info!("Saved host key to {}", path.display());
    Ok(key)
}

/// Create `path` readable by the owner only and write `contents` into it.
/// Fails if the file already exists.
async fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(contents).await?;
    file.sync_all().await
}
