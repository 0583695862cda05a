//! Data models shared by the session and provider status channels.
//!
//! - `Credential`, `Identity`: the live authenticated session
//! - `LoginRequest`, `LoginResponse`, `SessionConflict`: login negotiation
//! - `SessionLiveness`: result of a single liveness check
//! - `ProviderKind`, `ProviderStatus`, `ProviderSnapshot`, `Readiness`:
//!   external provider reachability and quota usage

pub mod credential;
pub mod provider;

pub use credential::{Credential, Identity, LoginRequest, LoginResponse, SessionConflict, SessionLiveness};
pub use provider::{ProviderKind, ProviderSnapshot, ProviderStatus, Readiness, RefreshMode};
