use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::Backend;
use crate::auth::CredentialHolder;
use crate::config::SyncConfig;
use crate::models::{Credential, LoginRequest, ProviderKind, ProviderSnapshot, Readiness, RefreshMode};

use super::poller::{spawn_poller, PollerSet};
use super::provider::ProviderChannel;
use super::session::{SessionChannel, SessionState};
use super::SyncError;

/// Owned context for one client process: the credential, the session channel,
/// both provider channels and the timers that drive them.
///
/// Timers run only while a credential exists. Every path that destroys the
/// credential (logout, acknowledged invalidation) first cancels the timers and
/// any call still in flight, then resets the channels.
///
/// Must be used from within a Tokio runtime.
pub struct SyncContext {
    config: SyncConfig,
    holder: CredentialHolder,
    session: Arc<SessionChannel>,
    bot: Arc<ProviderChannel>,
    quota: Arc<ProviderChannel>,
    pollers: Mutex<Option<PollerSet>>,
}

impl SyncContext {
    pub fn new(backend: Arc<dyn Backend>, config: SyncConfig) -> Self {
        let timeout = config.request_timeout;
        Self {
            config,
            holder: CredentialHolder::new(backend.clone(), timeout),
            session: Arc::new(SessionChannel::new(backend.clone(), timeout)),
            bot: Arc::new(ProviderChannel::new(ProviderKind::Bot, backend.clone(), timeout)),
            quota: Arc::new(ProviderChannel::new(ProviderKind::Quota, backend, timeout)),
            pollers: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // =========================================================================
    // Read model
    // =========================================================================

    pub fn credential(&self) -> Option<Credential> {
        self.holder.current()
    }

    pub fn subscribe_credential(&self) -> watch::Receiver<Option<Credential>> {
        self.holder.subscribe()
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn subscribe_session(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    pub fn snapshot(&self, provider: ProviderKind) -> ProviderSnapshot {
        self.channel(provider).snapshot()
    }

    pub fn subscribe_provider(&self, provider: ProviderKind) -> watch::Receiver<ProviderSnapshot> {
        self.channel(provider).subscribe()
    }

    pub fn readiness(&self, provider: ProviderKind) -> Readiness {
        self.channel(provider).readiness()
    }

    /// True while timers are running for a credential
    pub fn is_polling(&self) -> bool {
        self.pollers().is_some()
    }

    // =========================================================================
    // Session lifecycle
    // =========================================================================

    /// Log in and start the timers. See [`CredentialHolder::login`] for the
    /// conflict protocol.
    pub async fn login(&self, request: &LoginRequest) -> Result<Credential, SyncError> {
        let credential = self.holder.login(request).await?;
        self.start(&credential);
        Ok(credential)
    }

    /// Resume a saved credential. The immediate liveness check decides whether
    /// it is still good.
    pub fn restore(&self, credential: Credential) -> Result<(), SyncError> {
        self.holder.restore(credential.clone())?;
        self.start(&credential);
        Ok(())
    }

    /// Stop every timer, reset the channels and destroy the credential.
    ///
    /// An error only means the server was not told; local state is cleared
    /// regardless.
    pub async fn logout(&self) -> Result<(), SyncError> {
        self.stop();
        self.session.reset();
        self.bot.reset();
        self.quota.reset();
        self.holder.logout().await
    }

    /// Accept a server-side invalidation and log out.
    ///
    /// Returns false when there was nothing to acknowledge.
    pub async fn acknowledge_invalidation(&self) -> bool {
        if !self.session.state().is_invalidated() {
            return false;
        }

        info!("Session invalidation acknowledged");
        if let Err(e) = self.logout().await {
            // The server already dropped this session
            debug!(error = %e, "Logout notification after invalidation failed");
        }
        true
    }

    /// Stop timers and in-flight calls but keep the credential, for process exit
    pub fn shutdown(&self) {
        self.stop();
    }

    // =========================================================================
    // Provider operations
    // =========================================================================

    /// Refresh one provider. Refused while an invalidation awaits acknowledgement.
    pub async fn refresh_provider(&self, provider: ProviderKind, mode: RefreshMode) -> Result<ProviderSnapshot, SyncError> {
        if let Some(err) = self.session.invalidation() {
            return Err(err);
        }
        let (credential, epoch) = self.live()?;
        self.channel(provider).refresh(&credential, mode, &epoch).await
    }

    /// Manual refresh of both providers at once
    pub async fn refresh_all(&self) -> Vec<(ProviderKind, Result<ProviderSnapshot, SyncError>)> {
        let (bot, quota) = futures::future::join(
            self.refresh_provider(ProviderKind::Bot, RefreshMode::Manual),
            self.refresh_provider(ProviderKind::Quota, RefreshMode::Manual),
        )
        .await;
        vec![(ProviderKind::Bot, bot), (ProviderKind::Quota, quota)]
    }

    /// Report one unit of quota spent by another collaborator
    pub fn record_quota_spent(&self) -> Result<ProviderSnapshot, SyncError> {
        self.live()?;
        self.quota.optimistic_decrement()
    }

    /// Flip which provider the rest of the application should prefer
    pub async fn toggle_provider(&self) -> Result<ProviderSnapshot, SyncError> {
        if let Some(err) = self.session.invalidation() {
            return Err(err);
        }
        let (credential, epoch) = self.live()?;
        self.quota.toggle_alternate(&credential, &epoch).await
    }

    // =========================================================================
    // Timers
    // =========================================================================

    fn start(&self, credential: &Credential) {
        let mut pollers = self.pollers();
        if let Some(previous) = pollers.take() {
            previous.stop();
        }

        let epoch = CancellationToken::new();
        let mut set = PollerSet::new(epoch.clone());
        self.session.activate();

        let session = self.session.clone();
        let cred = credential.clone();
        let token = epoch.clone();
        set.push(spawn_poller(
            "session",
            self.config.session_check_interval,
            epoch.clone(),
            move || {
                let session = session.clone();
                let cred = cred.clone();
                let token = token.clone();
                async move {
                    // Failures are logged by the channel and retried next tick
                    let _ = session.check(&cred, &token).await;
                }
            },
        ));

        for channel in [self.bot.clone(), self.quota.clone()] {
            let name = match channel.kind() {
                ProviderKind::Bot => "bot-status",
                ProviderKind::Quota => "quota-status",
            };
            let period = self.config.poll_interval(channel.kind());
            let cred = credential.clone();
            let token = epoch.clone();
            set.push(spawn_poller(name, period, epoch.clone(), move || {
                let channel = channel.clone();
                let cred = cred.clone();
                let token = token.clone();
                async move {
                    let _ = channel.refresh(&cred, RefreshMode::Periodic, &token).await;
                }
            }));
        }

        debug!(user = %credential.identity.name, "Status timers started");
        *pollers = Some(set);
    }

    fn stop(&self) {
        if let Some(set) = self.pollers().take() {
            set.stop();
            debug!("Status timers stopped");
        }
    }

    /// Credential and epoch for a user-initiated call
    fn live(&self) -> Result<(Credential, CancellationToken), SyncError> {
        let credential = self.holder.current().ok_or(SyncError::NotAuthenticated)?;
        let epoch = self
            .pollers()
            .as_ref()
            .map(|set| set.epoch().clone())
            .ok_or(SyncError::NotAuthenticated)?;
        Ok((credential, epoch))
    }

    fn channel(&self, provider: ProviderKind) -> &ProviderChannel {
        match provider {
            ProviderKind::Bot => &self.bot,
            ProviderKind::Quota => &self.quota,
        }
    }

    fn pollers(&self) -> MutexGuard<'_, Option<PollerSet>> {
        self.pollers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for SyncContext {
    fn drop(&mut self) {
        self.stop();
    }
}
