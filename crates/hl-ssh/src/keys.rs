//! Per-host key pairs on disk
//!
//! Each host gets `<dir>/<key-name>` and `<dir>/<key-name>.pub`, where
//! `key-name` is derived from the host ID. A pair is only reused if both
//! files exist and the private key parses.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;

use hl_core::traits::KeyStore;
use hl_core::{Host, ProvisioningError, PublicKeyInfo};

/// Comment written into generated public keys
const KEY_COMMENT: &str = "hostlink";

/// Key store backed by a directory of OpenSSH key files
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    dir: PathBuf,
}

impl FileKeyStore {
    /// Create a store rooted at `dir` (created on first generation)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Private key location for `host`
    pub fn private_key_path(&self, host: &Host) -> PathBuf {
        self.dir.join(host.id().key_name())
    }

    /// Public key location for `host`
    pub fn public_key_path(&self, host: &Host) -> PathBuf {
        let mut path = self.private_key_path(host).into_os_string();
        path.push(".pub");
        PathBuf::from(path)
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    async fn load(&self, host: &Host) -> Result<Option<PublicKeyInfo>, ProvisioningError> {
        let private = self.private_key_path(host);
        let public = self.public_key_path(host);
        if !private.exists() || !public.exists() {
            tracing::debug!("No cached key for {} at {:?}", host.address, private);
            return Ok(None);
        }

        match read_key_pair(&private, &public).await {
            Ok(info) => Ok(Some(info)),
            Err(e) => {
                tracing::warn!("Cached key {:?} is unusable: {:#}", private, e);
                Ok(None)
            }
        }
    }

    async fn generate(&self, host: &Host) -> Result<PublicKeyInfo, ProvisioningError> {
        let private = self.private_key_path(host);
        let public = self.public_key_path(host);

        generate_key_pair(&private, &public)
            .await
            .map_err(|e| ProvisioningError::KeyGeneration(format!("{:#}", e)))?;
        read_key_pair(&private, &public)
            .await
            .map_err(|e| ProvisioningError::KeyGeneration(format!("{:#}", e)))
    }
}

/// Run ssh-keygen for a fresh ed25519 pair, replacing any stale files
async fn generate_key_pair(private: &Path, public: &Path) -> Result<()> {
    if let Some(parent) = private.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    // ssh-keygen prompts before overwriting
    for path in [private, public] {
        match tokio::fs::remove_file(path).await {
            Ok(()) => tracing::debug!("Removed stale key file {:?}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("Failed to remove {:?}", path)),
        }
    }

    tracing::info!("Generating new SSH key at {:?}", private);
    let status = tokio::process::Command::new("ssh-keygen")
        .args([
            "-q",
            "-t",
            "ed25519",
            "-f",
            &private.to_string_lossy(),
            "-N",
            "", // No passphrase
            "-C",
            KEY_COMMENT,
        ])
        .status()
        .await
        .context("Failed to run ssh-keygen")?;

    if !status.success() {
        anyhow::bail!("ssh-keygen exited with {}", status);
    }
    Ok(())
}

async fn read_key_pair(private: &Path, public: &Path) -> Result<PublicKeyInfo> {
    let pair = russh_keys::load_secret_key(private, None)
        .with_context(|| format!("Failed to parse private key {:?}", private))?;
    let fingerprint = pair
        .clone_public_key()
        .context("Failed to derive public key")?
        .fingerprint();

    let openssh = tokio::fs::read_to_string(public)
        .await
        .with_context(|| format!("Failed to read public key {:?}", public))?
        .trim()
        .to_string();
    if openssh.is_empty() {
        anyhow::bail!("Public key {:?} is empty", public);
    }

    Ok(PublicKeyInfo {
        openssh,
        fingerprint,
        private_key_path: private.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ssh_keygen_available() -> bool {
        std::process::Command::new("ssh-keygen")
            .arg("-?")
            .output()
            .is_ok()
    }

    #[test]
    fn test_key_paths_follow_host_id() {
        let store = FileKeyStore::new("/keys");
        let host = Host::new("Work", "Work.Example");
        let name = host.id().key_name();
        assert_eq!(store.private_key_path(&host), Path::new("/keys").join(&name));
        assert_eq!(
            store.public_key_path(&host),
            Path::new("/keys").join(format!("{}.pub", name))
        );
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyStore::new(dir.path());
        let host = Host::new("Work", "work.example");
        assert!(store.load(&host).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_key_is_treated_as_missing() {
        let dir = TempDir::new().unwrap();
        let store = FileKeyStore::new(dir.path());
        let host = Host::new("Work", "work.example");
        std::fs::write(store.private_key_path(&host), "not a key").unwrap();
        std::fs::write(store.public_key_path(&host), "ssh-ed25519 AAAA hostlink").unwrap();

        assert!(store.load(&host).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_generate_then_load() {
        if !ssh_keygen_available() {
            return;
        }
        let dir = TempDir::new().unwrap();
        let store = FileKeyStore::new(dir.path().join("keys"));
        let host = Host::new("Work", "work.example");

        let generated = store.generate(&host).await.unwrap();
        assert!(generated.openssh.starts_with("ssh-ed25519 "));
        assert_eq!(generated.private_key_path, store.private_key_path(&host));

        let loaded = store.load(&host).await.unwrap().unwrap();
        assert_eq!(loaded, generated);

        // A second generation replaces the pair rather than prompting
        let replaced = store.generate(&host).await.unwrap();
        assert_ne!(replaced.fingerprint, generated.fingerprint);
    }
}
