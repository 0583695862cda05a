use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{with_timeout, Backend};
use crate::models::Credential;

use super::SyncError;

/// Reason shown when the server revokes a session without saying why
const DEFAULT_INVALIDATION_REASON: &str = "Session ended by server";

/// Liveness state of the current session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub enum SessionState {
    /// No credential
    Idle,
    Active,
    /// The server revoked the session. Stays here until acknowledged.
    Invalidated { reason: String },
}

impl SessionState {
    pub fn is_invalidated(&self) -> bool {
        matches!(self, SessionState::Invalidated { .. })
    }
}

/// Periodic liveness verification of the live credential.
///
/// Only an explicit `valid = false` from the server moves the channel to
/// `Invalidated`. Failed or timed out checks are logged and retried on the
/// next tick. The channel never logs out on its own.
pub struct SessionChannel {
    backend: Arc<dyn Backend>,
    state: watch::Sender<SessionState>,
    request_timeout: Duration,
}

impl SessionChannel {
    pub fn new(backend: Arc<dyn Backend>, request_timeout: Duration) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            backend,
            state,
            request_timeout,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// `SyncError::Invalidated` while a revocation awaits acknowledgement
    pub fn invalidation(&self) -> Option<SyncError> {
        match &*self.state.borrow() {
            SessionState::Invalidated { reason } => Some(SyncError::Invalidated {
                reason: reason.clone(),
            }),
            _ => None,
        }
    }

    /// A credential was created
    pub(crate) fn activate(&self) {
        self.state.send_replace(SessionState::Active);
    }

    /// The credential was destroyed
    pub(crate) fn reset(&self) {
        self.state.send_replace(SessionState::Idle);
    }

    /// Ask the server whether `credential` is still the live session.
    ///
    /// Returns the state after the check. Does nothing unless `Active`.
    pub async fn check(&self, credential: &Credential, epoch: &CancellationToken) -> Result<SessionState, SyncError> {
        if self.state() != SessionState::Active {
            return Ok(self.state());
        }

        let result = tokio::select! {
            biased;
            _ = epoch.cancelled() => return Err(SyncError::NotAuthenticated),
            result = with_timeout(self.request_timeout, self.backend.check_session(credential)) => result,
        };

        match result {
            Ok(liveness) if liveness.valid => {
                debug!(session = %credential.session_id, "Session still valid");
                Ok(self.state())
            }
            Ok(liveness) => {
                let reason = liveness
                    .reason
                    .unwrap_or_else(|| DEFAULT_INVALIDATION_REASON.to_string());
                let changed = self.state.send_if_modified(|state| {
                    if epoch.is_cancelled() || *state != SessionState::Active {
                        return false;
                    }
                    *state = SessionState::Invalidated {
                        reason: reason.clone(),
                    };
                    true
                });
                if changed {
                    warn!(session = %credential.session_id, reason = %reason, "Session invalidated by server");
                }
                Ok(self.state())
            }
            Err(e) => {
                warn!(error = %e, "Session liveness check failed, retrying next tick");
                Err(e.into())
            }
        }
    }
}
