//! Authentication module for owning the session credential.
//!
//! This module provides:
//! - `CredentialHolder`: the single writer of the live credential
//! - `CredentialStore`: secure OS-level secret storage via keyring
//! - `SessionVault`: encrypted credential file for resuming a session

pub mod credentials;
pub mod holder;
pub mod vault;

pub use credentials::CredentialStore;
pub use holder::CredentialHolder;
pub use vault::SessionVault;
