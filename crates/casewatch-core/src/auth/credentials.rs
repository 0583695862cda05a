use anyhow::{Context, Result};
use keyring::Entry;
use rand::RngCore;

const SERVICE_NAME: &str = "casewatch";

/// Keychain account holding the per-device session vault secret
const VAULT_ACCOUNT: &str = "__session_vault__";

/// Length in bytes of a generated vault secret
const VAULT_SECRET_BYTES: usize = 32;

/// OS keychain access for login secrets and the session vault key
pub struct CredentialStore;

impl CredentialStore {
    /// Store username and password in the OS keychain
    pub fn store(username: &str, password: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, username).context("Failed to create keyring entry")?;
        entry
            .set_password(password)
            .context("Failed to store password in keychain")?;
        Ok(())
    }

    /// Retrieve password for a username from the OS keychain
    pub fn get_password(username: &str) -> Result<String> {
        let entry = Entry::new(SERVICE_NAME, username).context("Failed to create keyring entry")?;
        entry
            .get_password()
            .context("Failed to retrieve password from keychain")
    }

    /// Delete stored credentials for a username
    pub fn delete(username: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, username).context("Failed to create keyring entry")?;
        entry
            .delete_credential()
            .context("Failed to delete credential from keychain")?;
        Ok(())
    }

    /// Check if credentials exist for a username
    pub fn has_credentials(username: &str) -> bool {
        if let Ok(entry) = Entry::new(SERVICE_NAME, username) {
            entry.get_password().is_ok()
        } else {
            false
        }
    }

    /// Secret the session vault key is derived from, created on first use
    pub fn vault_secret() -> Result<String> {
        let entry = Entry::new(SERVICE_NAME, VAULT_ACCOUNT).context("Failed to create keyring entry")?;
        match entry.get_password() {
            Ok(secret) => Ok(secret),
            Err(keyring::Error::NoEntry) => {
                let mut bytes = [0u8; VAULT_SECRET_BYTES];
                rand::thread_rng().fill_bytes(&mut bytes);
                let secret = hex::encode(bytes);
                entry
                    .set_password(&secret)
                    .context("Failed to store vault secret in keychain")?;
                Ok(secret)
            }
            Err(e) => Err(e).context("Failed to retrieve vault secret from keychain"),
        }
    }
}
