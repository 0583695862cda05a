use thiserror::Error;

use crate::api::ApiError;
use crate::models::{ProviderKind, SessionConflict};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Another session is active on {}", .0.existing_device)]
    Conflict(SessionConflict),

    #[error("Session invalidated: {reason}")]
    Invalidated { reason: String },

    #[error("Network error: {0}")]
    Transient(#[source] ApiError),

    #[error("Credential rejected by server")]
    Unauthorized,

    #[error("Provider operation failed: {0}")]
    ProviderOperation(#[source] ApiError),

    #[error("Not logged in")]
    NotAuthenticated,

    #[error("Already logged in - log out first")]
    AlreadyAuthenticated,

    #[error("{operation} is not supported by the {provider} provider")]
    Unsupported {
        operation: &'static str,
        provider: ProviderKind,
    },
}

impl From<ApiError> for SyncError {
    fn from(err: ApiError) -> Self {
        if err.is_authorization() {
            SyncError::Unauthorized
        } else {
            SyncError::Transient(err)
        }
    }
}

impl SyncError {
    /// Failed without a server verdict; the next timer tick retries
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transient(_))
    }

    /// Short message suitable for a status line or login prompt
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Conflict(conflict) => format!(
                "You are already logged in on {}. Log in again with force to take over.",
                conflict.existing_device
            ),
            SyncError::Unauthorized => "Invalid username or password".to_string(),
            SyncError::Transient(ApiError::Timeout(_)) => "Connection timed out. Please try again.".to_string(),
            SyncError::Transient(ApiError::NetworkError(_)) => {
                "Unable to connect to server. Check your internet connection.".to_string()
            }
            other => other.to_string(),
        }
    }
}
