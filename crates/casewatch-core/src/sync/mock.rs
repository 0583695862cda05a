//! Scripted in-memory backend for channel and context tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::api::{ApiError, Backend};
use crate::models::{
    Credential, Identity, LoginRequest, LoginResponse, ProviderKind, ProviderStatus, SessionLiveness,
};

/// One scripted answer
pub(crate) enum Reply<T> {
    Now(Result<T, ApiError>),
    /// Answer once the sender fires (or is dropped)
    Gated(oneshot::Receiver<()>, Result<T, ApiError>),
    /// Never answers; only a timeout or cancellation ends the call
    Never,
}

impl<T> Reply<T> {
    async fn resolve(self) -> Result<T, ApiError> {
        match self {
            Reply::Now(result) => result,
            Reply::Gated(gate, result) => {
                let _ = gate.await;
                result
            }
            Reply::Never => std::future::pending().await,
        }
    }
}

pub(crate) fn credential(name: &str) -> Credential {
    Credential {
        token: format!("token-{}", name),
        session_id: format!("session-{}", name),
        identity: Identity {
            name: name.to_string(),
            is_admin: false,
        },
    }
}

pub(crate) fn quota_status(initial: i64, used: i64) -> ProviderStatus {
    ProviderStatus {
        connected: true,
        authorized: true,
        usable: true,
        quota_initial: initial,
        quota_used: used,
        quota_remaining: Some(initial - used),
        ..Default::default()
    }
}

pub(crate) fn bot_status(authorized: bool, connected: bool) -> ProviderStatus {
    ProviderStatus {
        connected,
        authorized,
        usable: connected && authorized,
        ..Default::default()
    }
}

fn default_status(provider: ProviderKind) -> ProviderStatus {
    match provider {
        ProviderKind::Bot => bot_status(true, true),
        ProviderKind::Quota => quota_status(300, 0),
    }
}

/// Backend whose answers are queued per call; empty queues fall back to a
/// healthy default.
#[derive(Default)]
pub(crate) struct MockBackend {
    logins: Mutex<VecDeque<Reply<LoginResponse>>>,
    login_requests: Mutex<Vec<bool>>,
    logout_error: Mutex<Option<ApiError>>,
    logout_calls: AtomicUsize,
    liveness: Mutex<VecDeque<Reply<SessionLiveness>>>,
    liveness_calls: AtomicUsize,
    statuses: Mutex<HashMap<ProviderKind, VecDeque<Reply<ProviderStatus>>>>,
    status_calls: Mutex<HashMap<ProviderKind, usize>>,
    refreshes: Mutex<HashMap<ProviderKind, VecDeque<Reply<ProviderStatus>>>>,
    refresh_calls: Mutex<HashMap<ProviderKind, usize>>,
    toggles: Mutex<VecDeque<Reply<bool>>>,
    toggle_calls: AtomicUsize,
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_login(&self, reply: Reply<LoginResponse>) {
        self.logins.lock().unwrap().push_back(reply);
    }

    /// `force_login` flag of every login call, in order
    pub(crate) fn login_requests(&self) -> Vec<bool> {
        self.login_requests.lock().unwrap().clone()
    }

    pub(crate) fn fail_logout(&self, err: ApiError) {
        *self.logout_error.lock().unwrap() = Some(err);
    }

    pub(crate) fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn push_liveness(&self, reply: Reply<SessionLiveness>) {
        self.liveness.lock().unwrap().push_back(reply);
    }

    pub(crate) fn liveness_calls(&self) -> usize {
        self.liveness_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn push_status(&self, provider: ProviderKind, reply: Reply<ProviderStatus>) {
        self.statuses.lock().unwrap().entry(provider).or_default().push_back(reply);
    }

    pub(crate) fn status_calls(&self, provider: ProviderKind) -> usize {
        self.status_calls.lock().unwrap().get(&provider).copied().unwrap_or(0)
    }

    pub(crate) fn push_refresh(&self, provider: ProviderKind, reply: Reply<ProviderStatus>) {
        self.refreshes.lock().unwrap().entry(provider).or_default().push_back(reply);
    }

    pub(crate) fn refresh_calls(&self, provider: ProviderKind) -> usize {
        self.refresh_calls.lock().unwrap().get(&provider).copied().unwrap_or(0)
    }

    pub(crate) fn push_toggle(&self, reply: Reply<bool>) {
        self.toggles.lock().unwrap().push_back(reply);
    }

    pub(crate) fn toggle_calls(&self) -> usize {
        self.toggle_calls.load(Ordering::SeqCst)
    }

    /// Total number of calls that only timers make
    pub(crate) fn background_calls(&self) -> usize {
        self.liveness_calls() + self.status_calls(ProviderKind::Bot) + self.status_calls(ProviderKind::Quota)
    }

    fn next_status(
        queues: &Mutex<HashMap<ProviderKind, VecDeque<Reply<ProviderStatus>>>>,
        counts: &Mutex<HashMap<ProviderKind, usize>>,
        provider: ProviderKind,
    ) -> Reply<ProviderStatus> {
        *counts.lock().unwrap().entry(provider).or_default() += 1;
        queues
            .lock()
            .unwrap()
            .get_mut(&provider)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| Reply::Now(Ok(default_status(provider))))
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError> {
        self.login_requests.lock().unwrap().push(request.force_login);
        let reply = self
            .logins
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::Now(Ok(LoginResponse::Established(credential(&request.username)))));
        reply.resolve().await
    }

    async fn logout(&self, _credential: &Credential) -> Result<(), ApiError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        match self.logout_error.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn check_session(&self, _credential: &Credential) -> Result<SessionLiveness, ApiError> {
        self.liveness_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .liveness
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::Now(Ok(SessionLiveness::valid())));
        reply.resolve().await
    }

    async fn provider_status(
        &self,
        provider: ProviderKind,
        _credential: &Credential,
    ) -> Result<ProviderStatus, ApiError> {
        let reply = Self::next_status(&self.statuses, &self.status_calls, provider);
        reply.resolve().await
    }

    async fn refresh_provider_status(
        &self,
        provider: ProviderKind,
        _credential: &Credential,
    ) -> Result<ProviderStatus, ApiError> {
        let reply = Self::next_status(&self.refreshes, &self.refresh_calls, provider);
        reply.resolve().await
    }

    async fn toggle_provider_alternate(&self, _credential: &Credential) -> Result<bool, ApiError> {
        self.toggle_calls.fetch_add(1, Ordering::SeqCst);
        let reply = self
            .toggles
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::Now(Ok(true)));
        reply.resolve().await
    }
}
