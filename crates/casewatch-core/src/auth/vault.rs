use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::Credential;

/// Vault file name in cache directory
const VAULT_FILE: &str = "session.vault";

/// Current on-disk format
const VAULT_VERSION: u8 = 1;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Debug, Serialize, Deserialize)]
struct VaultFile {
    version: u8,
    salt: String,
    nonce: String,
    ciphertext: String,
    saved_at: DateTime<Utc>,
}

/// Encrypted on-disk copy of the credential, used to resume a session after restart.
///
/// ChaCha20-Poly1305 with a key derived by Argon2 from a per-device secret.
pub struct SessionVault {
    cache_dir: PathBuf,
    secret: String,
}

impl SessionVault {
    pub fn new(cache_dir: PathBuf, secret: impl Into<String>) -> Self {
        Self {
            cache_dir,
            secret: secret.into(),
        }
    }

    pub fn exists(&self) -> bool {
        self.vault_path().exists()
    }

    /// Encrypt and write the credential
    pub fn save(&self, credential: &Credential) -> Result<()> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        rand::thread_rng().fill_bytes(&mut nonce);

        let plaintext = serde_json::to_vec(credential).context("Failed to serialize credential")?;
        let cipher = self.cipher(&salt)?;
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_slice())
            .map_err(|_| anyhow!("Failed to encrypt session"))?;

        let file = VaultFile {
            version: VAULT_VERSION,
            salt: hex::encode(salt),
            nonce: hex::encode(nonce),
            ciphertext: hex::encode(ciphertext),
            saved_at: Utc::now(),
        };

        let path = self.vault_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&file)?;
        std::fs::write(&path, contents).context("Failed to write session vault")?;
        debug!(?path, "Session vault saved");
        Ok(())
    }

    /// Read and decrypt the credential. `Ok(None)` when nothing was saved.
    pub fn load(&self) -> Result<Option<Credential>> {
        let path = self.vault_path();
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path).context("Failed to read session vault")?;
        let file: VaultFile = serde_json::from_str(&contents).context("Failed to parse session vault")?;
        if file.version != VAULT_VERSION {
            return Err(anyhow!("Unsupported session vault version {}", file.version));
        }

        let salt = hex::decode(&file.salt).context("Corrupt vault salt")?;
        let nonce = hex::decode(&file.nonce).context("Corrupt vault nonce")?;
        let ciphertext = hex::decode(&file.ciphertext).context("Corrupt vault ciphertext")?;
        if nonce.len() != NONCE_LEN {
            return Err(anyhow!("Corrupt vault nonce length {}", nonce.len()));
        }

        let plaintext = self
            .cipher(&salt)?
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
            .map_err(|_| anyhow!("Failed to decrypt session vault (wrong key or tampered file)"))?;

        let credential = serde_json::from_slice(&plaintext).context("Failed to parse vault credential")?;
        debug!(saved_at = %file.saved_at, "Session vault loaded");
        Ok(Some(credential))
    }

    /// Remove the vault file
    pub fn clear(&self) -> Result<()> {
        let path = self.vault_path();
        if path.exists() {
            std::fs::remove_file(path).context("Failed to remove session vault")?;
        }
        Ok(())
    }

    fn cipher(&self, salt: &[u8]) -> Result<ChaCha20Poly1305> {
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(self.secret.as_bytes(), salt, &mut key)
            .map_err(|e| anyhow!("Failed to derive vault key: {}", e))?;
        Ok(ChaCha20Poly1305::new(Key::from_slice(&key)))
    }

    fn vault_path(&self) -> PathBuf {
        self.cache_dir.join(VAULT_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Identity;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("casewatch-vault-{}", rand::thread_rng().next_u64()))
    }

    fn sample() -> Credential {
        Credential {
            token: "token-abc".to_string(),
            session_id: "sess-42".to_string(),
            identity: Identity {
                name: "analyst".to_string(),
                is_admin: true,
            },
        }
    }

    #[test]
    fn test_vault_restores_saved_credential() {
        let dir = scratch_dir();
        let vault = SessionVault::new(dir.clone(), "device-secret");
        assert!(vault.load().expect("empty vault").is_none());

        vault.save(&sample()).expect("save");
        assert!(vault.exists());

        let raw = std::fs::read_to_string(dir.join(VAULT_FILE)).expect("vault file");
        assert!(!raw.contains("token-abc"));

        assert_eq!(vault.load().expect("load"), Some(sample()));

        vault.clear().expect("clear");
        assert!(!vault.exists());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_vault_rejects_wrong_secret() {
        let dir = scratch_dir();
        SessionVault::new(dir.clone(), "device-secret")
            .save(&sample())
            .expect("save");

        let other = SessionVault::new(dir.clone(), "another-secret");
        assert!(other.load().is_err());
        let _ = std::fs::remove_dir_all(dir);
    }
}
