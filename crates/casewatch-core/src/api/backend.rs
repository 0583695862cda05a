use async_trait::async_trait;

use crate::models::{Credential, LoginRequest, LoginResponse, ProviderKind, ProviderStatus, SessionLiveness};

use super::ApiError;

/// Server calls the core depends on.
///
/// Every authenticated call takes the credential explicitly; implementations
/// must not cache it.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Negotiate a session. A conflict is an answer, not an error.
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError>;

    async fn logout(&self, credential: &Credential) -> Result<(), ApiError>;

    async fn check_session(&self, credential: &Credential) -> Result<SessionLiveness, ApiError>;

    /// Cached provider status, cheap to call
    async fn provider_status(
        &self,
        provider: ProviderKind,
        credential: &Credential,
    ) -> Result<ProviderStatus, ApiError>;

    /// Ask the provider to re-measure itself. May consume provider quota.
    async fn refresh_provider_status(
        &self,
        provider: ProviderKind,
        credential: &Credential,
    ) -> Result<ProviderStatus, ApiError>;

    /// Flip the alternate-provider preference, returning the new value
    async fn toggle_provider_alternate(&self, credential: &Credential) -> Result<bool, ApiError>;
}

/// Bound a server call by `limit`; an elapsed limit is a transient failure.
pub async fn with_timeout<T, F>(limit: std::time::Duration, call: F) -> Result<T, ApiError>
where
    F: std::future::Future<Output = Result<T, ApiError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ApiError::Timeout(limit.as_secs())),
    }
}
