//! casewatch core: session liveness and provider status synchronization for
//! the casewatch case-management client.
//!
//! The entry point is [`SyncContext`], built from a [`Backend`] (normally
//! [`ApiClient`]) and a [`SyncConfig`]. Presentation code reads state through
//! the `subscribe_*` receivers and never writes it.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;
pub mod sync;
pub mod utils;

pub use api::{ApiClient, ApiError, Backend};
pub use config::{Config, SyncConfig};
pub use models::{Credential, LoginRequest, ProviderKind, ProviderSnapshot, Readiness, RefreshMode};
pub use sync::{SessionState, SyncContext, SyncError};
