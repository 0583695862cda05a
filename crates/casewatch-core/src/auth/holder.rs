use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::api::{with_timeout, Backend};
use crate::models::{Credential, LoginRequest, LoginResponse};
use crate::sync::SyncError;

/// Owns the process-wide credential.
///
/// `login`, `logout` and `restore` are the only write paths; everyone else
/// reads through `current` or a subscription.
pub struct CredentialHolder {
    backend: Arc<dyn Backend>,
    credential: watch::Sender<Option<Credential>>,
    request_timeout: Duration,
}

impl CredentialHolder {
    pub fn new(backend: Arc<dyn Backend>, request_timeout: Duration) -> Self {
        let (credential, _) = watch::channel(None);
        Self {
            backend,
            credential,
            request_timeout,
        }
    }

    /// Get the live credential, if any
    pub fn current(&self) -> Option<Credential> {
        self.credential.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.credential.borrow().is_some()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Credential>> {
        self.credential.subscribe()
    }

    /// Negotiate a session with the server.
    ///
    /// Without `force_login`, a session held by another device comes back as
    /// `SyncError::Conflict` and nothing is stored. Re-issuing the request with
    /// `force_login` takes the session over.
    pub async fn login(&self, request: &LoginRequest) -> Result<Credential, SyncError> {
        if self.is_authenticated() {
            return Err(SyncError::AlreadyAuthenticated);
        }

        let response = with_timeout(self.request_timeout, self.backend.login(request)).await?;

        match response {
            LoginResponse::Conflict(conflict) => {
                if request.force_login {
                    warn!(device = %conflict.existing_device, "Server reported a conflict on forced login");
                } else {
                    info!(device = %conflict.existing_device, "Login blocked by session on another device");
                }
                Err(SyncError::Conflict(conflict))
            }
            LoginResponse::Established(credential) => {
                // A concurrent login may have won while this one was in flight
                if self.is_authenticated() {
                    return Err(SyncError::AlreadyAuthenticated);
                }
                info!(
                    user = %credential.identity.name,
                    forced = request.force_login,
                    "Login successful"
                );
                self.credential.send_replace(Some(credential.clone()));
                Ok(credential)
            }
        }
    }

    /// Adopt a credential saved by an earlier process
    pub fn restore(&self, credential: Credential) -> Result<(), SyncError> {
        if self.is_authenticated() {
            return Err(SyncError::AlreadyAuthenticated);
        }
        info!(user = %credential.identity.name, "Session restored");
        self.credential.send_replace(Some(credential));
        Ok(())
    }

    /// Destroy the credential and tell the server.
    ///
    /// The local credential is gone even when the server cannot be reached;
    /// the returned error only reports the failed notification.
    pub async fn logout(&self) -> Result<(), SyncError> {
        let Some(credential) = self.credential.send_replace(None) else {
            return Ok(());
        };

        info!(user = %credential.identity.name, "Logged out locally");

        match with_timeout(self.request_timeout, self.backend.logout(&credential)).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(error = %e, "Failed to notify server of logout");
                Err(e.into())
            }
        }
    }
}
