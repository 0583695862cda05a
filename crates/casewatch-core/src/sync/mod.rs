//! Status synchronization core.
//!
//! `SyncContext` owns one `SessionChannel`, one `ProviderChannel` per
//! provider and the timers that drive them. Each channel publishes its state
//! through a `tokio::sync::watch` channel that presentation code subscribes to.

pub mod context;
pub mod error;
mod poller;
pub mod provider;
pub mod session;

#[cfg(test)]
pub(crate) mod mock;

pub use context::SyncContext;
pub use error::SyncError;
pub use provider::ProviderChannel;
pub use session::{SessionChannel, SessionState};
