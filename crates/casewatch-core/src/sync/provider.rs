use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{with_timeout, Backend};
use crate::models::{Credential, ProviderKind, ProviderSnapshot, Readiness, RefreshMode};

use super::SyncError;

/// Cached status of one external provider.
///
/// The same component serves both providers; `ProviderKind` decides which
/// operations are allowed. Every write to the snapshot goes through this type
/// and is published to subscribers as it happens.
///
/// Overlapping refreshes are applied in completion order (last completed wins).
pub struct ProviderChannel {
    kind: ProviderKind,
    backend: Arc<dyn Backend>,
    snapshot: watch::Sender<ProviderSnapshot>,
    request_timeout: Duration,
}

impl ProviderChannel {
    pub fn new(kind: ProviderKind, backend: Arc<dyn Backend>, request_timeout: Duration) -> Self {
        let (snapshot, _) = watch::channel(ProviderSnapshot::initial());
        Self {
            kind,
            backend,
            snapshot,
            request_timeout,
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn snapshot(&self) -> ProviderSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProviderSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn readiness(&self) -> Readiness {
        self.snapshot.borrow().readiness()
    }

    /// Replace the snapshot with the server's view.
    ///
    /// Failures are recorded in the snapshot's `error`. A rejected credential
    /// also marks the provider disconnected and unauthorized; any other failure
    /// keeps the last known figures. Manual failures come back as
    /// `SyncError::ProviderOperation`.
    pub async fn refresh(
        &self,
        credential: &Credential,
        mode: RefreshMode,
        epoch: &CancellationToken,
    ) -> Result<ProviderSnapshot, SyncError> {
        if mode == RefreshMode::Manual {
            self.publish(epoch, |snap| {
                snap.loading = true;
            });
        }

        let call = async {
            match mode {
                RefreshMode::Periodic => self.backend.provider_status(self.kind, credential).await,
                RefreshMode::Manual => self.backend.refresh_provider_status(self.kind, credential).await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = epoch.cancelled() => return Err(SyncError::NotAuthenticated),
            result = with_timeout(self.request_timeout, call) => result,
        };

        match result {
            Ok(status) => {
                let fresh = ProviderSnapshot::from_status(status, Utc::now());
                let applied = self.publish(epoch, |snap| *snap = fresh.clone());
                if !applied {
                    return Err(SyncError::NotAuthenticated);
                }
                debug!(
                    provider = %self.kind,
                    ?mode,
                    connected = fresh.connected,
                    remaining = fresh.quota_remaining,
                    "Provider status refreshed"
                );
                Ok(fresh)
            }
            Err(e) => {
                let authorization = e.is_authorization();
                let message = e.to_string();
                self.publish(epoch, |snap| snap.record_failure(message, authorization));
                if authorization {
                    warn!(provider = %self.kind, ?mode, "Provider rejected credential, marking disconnected");
                } else {
                    warn!(provider = %self.kind, ?mode, error = %e, "Provider refresh failed");
                }
                match mode {
                    RefreshMode::Manual => Err(SyncError::ProviderOperation(e)),
                    RefreshMode::Periodic => Err(e.into()),
                }
            }
        }
    }

    /// Account for one unit of quota spent elsewhere, without a server round-trip.
    ///
    /// The next authoritative refresh overwrites the result.
    pub fn optimistic_decrement(&self) -> Result<ProviderSnapshot, SyncError> {
        if !self.kind.supports_optimistic_decrement() {
            return Err(SyncError::Unsupported {
                operation: "optimistic decrement",
                provider: self.kind,
            });
        }

        self.snapshot.send_modify(|snap| snap.decrement_quota());
        let snap = self.snapshot();
        debug!(
            provider = %self.kind,
            used = snap.quota_used,
            remaining = snap.quota_remaining,
            "Quota decremented locally"
        );
        Ok(snap)
    }

    /// Flip the alternate-provider preference on the server.
    ///
    /// Only `preferred_alternate` changes on success; a failure leaves the
    /// snapshot untouched.
    pub async fn toggle_alternate(
        &self,
        credential: &Credential,
        epoch: &CancellationToken,
    ) -> Result<ProviderSnapshot, SyncError> {
        if !self.kind.supports_alternate() {
            return Err(SyncError::Unsupported {
                operation: "alternate toggle",
                provider: self.kind,
            });
        }

        let result = tokio::select! {
            biased;
            _ = epoch.cancelled() => return Err(SyncError::NotAuthenticated),
            result = with_timeout(self.request_timeout, self.backend.toggle_provider_alternate(credential)) => result,
        };

        match result {
            Ok(preferred) => {
                if !self.publish(epoch, |snap| snap.preferred_alternate = preferred) {
                    return Err(SyncError::NotAuthenticated);
                }
                info!(provider = %self.kind, preferred_alternate = preferred, "Provider preference toggled");
                Ok(self.snapshot())
            }
            Err(e) => {
                warn!(provider = %self.kind, error = %e, "Provider toggle failed");
                Err(SyncError::ProviderOperation(e))
            }
        }
    }

    /// Back to the initial shape; the credential is gone
    pub(crate) fn reset(&self) {
        self.snapshot.send_replace(ProviderSnapshot::initial());
    }

    /// Apply `update` unless the epoch it was issued under has ended
    fn publish<F>(&self, epoch: &CancellationToken, update: F) -> bool
    where
        F: FnOnce(&mut ProviderSnapshot),
    {
        self.snapshot.send_if_modified(|snap| {
            if epoch.is_cancelled() {
                return false;
            }
            update(snap);
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use crate::sync::mock::{bot_status, credential, quota_status, MockBackend, Reply};
    use tokio::sync::oneshot;

    fn channel(kind: ProviderKind, backend: &Arc<MockBackend>) -> ProviderChannel {
        ProviderChannel::new(kind, backend.clone(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_periodic_refresh_uses_status_endpoint() {
        let backend = Arc::new(MockBackend::new());
        backend.push_status(ProviderKind::Quota, Reply::Now(Ok(quota_status(300, 12))));
        let quota = channel(ProviderKind::Quota, &backend);
        assert!(quota.snapshot().loading);

        let snap = quota
            .refresh(&credential("analyst"), RefreshMode::Periodic, &CancellationToken::new())
            .await
            .expect("refresh");

        assert_eq!(snap.quota_used, 12);
        assert_eq!(snap.quota_remaining, 288);
        assert!(snap.quota_consistent());
        assert!(!snap.loading);
        assert!(snap.last_updated.is_some());
        assert_eq!(backend.status_calls(ProviderKind::Quota), 1);
        assert_eq!(backend.refresh_calls(ProviderKind::Quota), 0);
    }

    #[tokio::test]
    async fn test_manual_refresh_uses_costly_endpoint() {
        let backend = Arc::new(MockBackend::new());
        let quota = channel(ProviderKind::Quota, &backend);

        quota
            .refresh(&credential("analyst"), RefreshMode::Manual, &CancellationToken::new())
            .await
            .expect("refresh");

        assert_eq!(backend.refresh_calls(ProviderKind::Quota), 1);
        assert_eq!(backend.status_calls(ProviderKind::Quota), 0);
    }

    #[tokio::test]
    async fn test_server_wins_over_optimistic_decrements() {
        let backend = Arc::new(MockBackend::new());
        backend.push_status(ProviderKind::Quota, Reply::Now(Ok(quota_status(300, 0))));
        backend.push_status(ProviderKind::Quota, Reply::Now(Ok(quota_status(300, 3))));
        let quota = channel(ProviderKind::Quota, &backend);
        let cred = credential("analyst");
        let epoch = CancellationToken::new();

        quota.refresh(&cred, RefreshMode::Periodic, &epoch).await.expect("refresh");
        for _ in 0..5 {
            quota.optimistic_decrement().expect("decrement");
        }
        let optimistic = quota.snapshot();
        assert_eq!(optimistic.quota_remaining, 295);
        assert_eq!(optimistic.quota_used, 5);

        let reconciled = quota.refresh(&cred, RefreshMode::Periodic, &epoch).await.expect("refresh");
        assert_eq!(reconciled.quota_used, 3);
        assert_eq!(reconciled.quota_remaining, 297);
    }

    #[tokio::test]
    async fn test_decrement_clamps_at_zero() {
        let backend = Arc::new(MockBackend::new());
        backend.push_status(ProviderKind::Quota, Reply::Now(Ok(quota_status(2, 0))));
        let quota = channel(ProviderKind::Quota, &backend);
        quota
            .refresh(&credential("analyst"), RefreshMode::Periodic, &CancellationToken::new())
            .await
            .expect("refresh");

        for _ in 0..25 {
            let snap = quota.optimistic_decrement().expect("decrement");
            assert!(snap.quota_remaining >= 0);
        }
        assert_eq!(quota.snapshot().quota_remaining, 0);
    }

    #[tokio::test]
    async fn test_bot_rejects_decrement_and_toggle() {
        let backend = Arc::new(MockBackend::new());
        let bot = channel(ProviderKind::Bot, &backend);

        assert!(matches!(
            bot.optimistic_decrement(),
            Err(SyncError::Unsupported {
                provider: ProviderKind::Bot,
                ..
            })
        ));
        assert!(matches!(
            bot.toggle_alternate(&credential("analyst"), &CancellationToken::new()).await,
            Err(SyncError::Unsupported { .. })
        ));
        assert_eq!(backend.toggle_calls(), 0);
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_last_known_status() {
        let backend = Arc::new(MockBackend::new());
        backend.push_status(ProviderKind::Bot, Reply::Now(Ok(bot_status(true, true))));
        backend.push_status(ProviderKind::Bot, Reply::Now(Err(ApiError::ServerError("bad gateway".to_string()))));
        let bot = channel(ProviderKind::Bot, &backend);
        let cred = credential("analyst");
        let epoch = CancellationToken::new();

        bot.refresh(&cred, RefreshMode::Periodic, &epoch).await.expect("refresh");
        let err = bot.refresh(&cred, RefreshMode::Periodic, &epoch).await.expect_err("failure");

        assert!(err.is_transient());
        let snap = bot.snapshot();
        assert!(snap.connected);
        assert!(snap.authorized);
        assert!(!snap.loading);
        assert!(snap.error.as_deref().unwrap_or_default().contains("bad gateway"));
        assert_eq!(bot.readiness(), Readiness::Connected);
    }

    #[tokio::test]
    async fn test_authorization_failure_forces_disconnected() {
        let backend = Arc::new(MockBackend::new());
        backend.push_status(ProviderKind::Bot, Reply::Now(Ok(bot_status(true, true))));
        backend.push_status(ProviderKind::Bot, Reply::Now(Err(ApiError::Unauthorized)));
        let bot = channel(ProviderKind::Bot, &backend);
        let cred = credential("analyst");
        let epoch = CancellationToken::new();

        bot.refresh(&cred, RefreshMode::Periodic, &epoch).await.expect("refresh");
        let err = bot.refresh(&cred, RefreshMode::Periodic, &epoch).await.expect_err("rejected");

        assert!(matches!(err, SyncError::Unauthorized));
        let snap = bot.snapshot();
        assert!(!snap.connected);
        assert!(!snap.authorized);
        assert_eq!(bot.readiness(), Readiness::Disconnected);
    }

    #[tokio::test]
    async fn test_manual_failure_is_provider_operation_error() {
        let backend = Arc::new(MockBackend::new());
        backend.push_refresh(ProviderKind::Quota, Reply::Now(Err(ApiError::RateLimited)));
        let quota = channel(ProviderKind::Quota, &backend);

        let err = quota
            .refresh(&credential("analyst"), RefreshMode::Manual, &CancellationToken::new())
            .await
            .expect_err("failure");

        assert!(matches!(err, SyncError::ProviderOperation(ApiError::RateLimited)));
        assert!(!quota.snapshot().loading);
    }

    #[tokio::test]
    async fn test_authorized_but_disconnected_bot() {
        let backend = Arc::new(MockBackend::new());
        backend.push_status(ProviderKind::Bot, Reply::Now(Ok(bot_status(true, false))));
        let bot = channel(ProviderKind::Bot, &backend);

        bot.refresh(&credential("analyst"), RefreshMode::Periodic, &CancellationToken::new())
            .await
            .expect("refresh");
        assert_eq!(bot.readiness(), Readiness::AuthorizedDisconnected);
    }

    #[tokio::test]
    async fn test_toggle_updates_only_preference() {
        let backend = Arc::new(MockBackend::new());
        backend.push_status(ProviderKind::Quota, Reply::Now(Ok(quota_status(300, 40))));
        backend.push_toggle(Reply::Now(Ok(true)));
        let quota = channel(ProviderKind::Quota, &backend);
        let cred = credential("analyst");
        let epoch = CancellationToken::new();
        quota.refresh(&cred, RefreshMode::Periodic, &epoch).await.expect("refresh");
        let before = quota.snapshot();

        let after = quota.toggle_alternate(&cred, &epoch).await.expect("toggle");

        assert!(after.preferred_alternate);
        assert_eq!(
            ProviderSnapshot {
                preferred_alternate: before.preferred_alternate,
                ..after
            },
            before
        );
    }

    #[tokio::test]
    async fn test_toggle_failure_leaves_snapshot_untouched() {
        let backend = Arc::new(MockBackend::new());
        backend.push_toggle(Reply::Now(Err(ApiError::ServerError("toggle unavailable".to_string()))));
        let quota = channel(ProviderKind::Quota, &backend);
        let before = quota.snapshot();

        let err = quota
            .toggle_alternate(&credential("analyst"), &CancellationToken::new())
            .await
            .expect_err("toggle failure");

        assert!(matches!(err, SyncError::ProviderOperation(_)));
        assert_eq!(quota.snapshot(), before);
        assert!(quota.snapshot().error.is_none());
    }

    #[tokio::test]
    async fn test_overlapping_refreshes_last_completed_wins() {
        let backend = Arc::new(MockBackend::new());
        let (release_first, gate_first) = oneshot::channel();
        let (release_second, gate_second) = oneshot::channel();
        backend.push_refresh(ProviderKind::Quota, Reply::Gated(gate_first, Ok(quota_status(300, 10))));
        backend.push_refresh(ProviderKind::Quota, Reply::Gated(gate_second, Ok(quota_status(300, 20))));
        let quota = channel(ProviderKind::Quota, &backend);
        let cred = credential("analyst");
        let epoch = CancellationToken::new();

        let first = quota.refresh(&cred, RefreshMode::Manual, &epoch);
        let second = quota.refresh(&cred, RefreshMode::Manual, &epoch);
        tokio::pin!(first, second);
        assert!(futures::poll!(&mut first).is_pending());
        assert!(futures::poll!(&mut second).is_pending());

        release_second.send(()).expect("release second");
        assert_eq!(second.await.expect("second").quota_used, 20);
        release_first.send(()).expect("release first");
        assert_eq!(first.await.expect("first").quota_used, 10);

        assert_eq!(quota.snapshot().quota_used, 10);
    }

    #[tokio::test]
    async fn test_result_after_cancellation_is_discarded() {
        let backend = Arc::new(MockBackend::new());
        let (release, gate) = oneshot::channel();
        backend.push_refresh(ProviderKind::Quota, Reply::Gated(gate, Ok(quota_status(300, 99))));
        let quota = channel(ProviderKind::Quota, &backend);
        let cred = credential("analyst");
        let epoch = CancellationToken::new();

        let pending = quota.refresh(&cred, RefreshMode::Manual, &epoch);
        tokio::pin!(pending);
        assert!(futures::poll!(&mut pending).is_pending());

        epoch.cancel();
        quota.reset();
        let _ = release.send(());

        assert!(matches!(pending.await, Err(SyncError::NotAuthenticated)));
        assert_eq!(quota.snapshot(), ProviderSnapshot::initial());
    }
}
