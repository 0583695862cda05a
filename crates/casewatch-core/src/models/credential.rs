use std::fmt;

use serde::{Deserialize, Serialize};

/// The authenticated user behind a credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct Identity {
    pub name: String,
    pub is_admin: bool,
}

/// A live session: bearer token, server session id and the identity it belongs to.
///
/// At most one of these exists per `CredentialHolder`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    pub session_id: String,
    pub identity: Identity,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("session_id", &self.session_id)
            .field("identity", &self.identity)
            .finish()
    }
}

/// Login parameters. `force_login` overrides a session held by another device.
#[derive(Clone)]
pub struct LoginRequest {
    pub username: String,
    pub secret: String,
    pub device: String,
    pub force_login: bool,
}

impl LoginRequest {
    pub fn new(username: impl Into<String>, secret: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
            device: device.into(),
            force_login: false,
        }
    }

    /// Same request with the device-exclusivity override set
    pub fn forced(&self) -> Self {
        Self {
            force_login: true,
            ..self.clone()
        }
    }
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .field("device", &self.device)
            .field("force_login", &self.force_login)
            .finish_non_exhaustive()
    }
}

/// Another device already holds a session for this account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct SessionConflict {
    pub has_existing_session: bool,
    pub existing_device: String,
}

/// What the server answered to a login attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginResponse {
    Established(Credential),
    Conflict(SessionConflict),
}

/// Server verdict of one liveness check. Never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLiveness {
    pub valid: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

impl SessionLiveness {
    pub fn valid() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn revoked(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}
