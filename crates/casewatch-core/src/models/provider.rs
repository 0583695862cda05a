use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// External data-acquisition providers whose status is cached client-side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub enum ProviderKind {
    /// Bot-based messaging provider; authorization can be revoked at any time
    Bot,
    /// Quota-metered API provider
    Quota,
}

impl ProviderKind {
    /// Identifier used in API paths
    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::Bot => "bot",
            ProviderKind::Quota => "quota",
        }
    }

    /// Get the display name for this provider.
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::Bot => "Bot provider",
            ProviderKind::Quota => "Quota provider",
        }
    }

    /// Only quota spending is reported back by other collaborators
    pub fn supports_optimistic_decrement(&self) -> bool {
        matches!(self, ProviderKind::Quota)
    }

    /// The alternate-provider preference lives on the quota provider
    pub fn supports_alternate(&self) -> bool {
        matches!(self, ProviderKind::Quota)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// How a refresh was triggered.
///
/// `Manual` asks the provider to re-measure itself and may cost quota, so the
/// periodic timer only ever uses `Periodic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    Periodic,
    Manual,
}

/// Authoritative provider status as reported by the server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderStatus {
    pub connected: bool,
    pub authorized: bool,
    pub usable: bool,
    pub quota_initial: i64,
    pub quota_used: i64,
    pub quota_remaining: Option<i64>,
    pub last_updated: Option<DateTime<Utc>>,
    pub preferred_alternate: bool,
    pub status_message: Option<String>,
}

/// Derived three-state readiness of a provider. Computed, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub enum Readiness {
    Disconnected,
    AuthorizedDisconnected,
    Connected,
}

impl Readiness {
    pub fn display_name(&self) -> &'static str {
        match self {
            Readiness::Disconnected => "disconnected",
            Readiness::AuthorizedDisconnected => "authorized, not connected",
            Readiness::Connected => "connected",
        }
    }
}

/// Locally cached view of one provider, published to presentation collaborators.
///
/// `quota_used + quota_remaining == quota_initial` holds right after an
/// authoritative refresh. Optimistic decrements may break it until the next one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct ProviderSnapshot {
    pub connected: bool,
    pub authorized: bool,
    pub usable: bool,
    pub quota_initial: i64,
    pub quota_used: i64,
    pub quota_remaining: i64,
    pub last_updated: Option<DateTime<Utc>>,
    pub preferred_alternate: bool,
    pub status_message: Option<String>,
    pub loading: bool,
    pub error: Option<String>,
}

impl Default for ProviderSnapshot {
    fn default() -> Self {
        Self::initial()
    }
}

impl ProviderSnapshot {
    /// Shape at process start and after the credential is destroyed
    pub fn initial() -> Self {
        Self {
            connected: false,
            authorized: false,
            usable: false,
            quota_initial: 0,
            quota_used: 0,
            quota_remaining: 0,
            last_updated: None,
            preferred_alternate: false,
            status_message: None,
            loading: true,
            error: None,
        }
    }

    /// Build a snapshot from an authoritative status, replacing everything.
    pub fn from_status(status: ProviderStatus, received_at: DateTime<Utc>) -> Self {
        let quota_initial = status.quota_initial.max(0);
        let quota_used = status.quota_used.clamp(0, quota_initial);
        let quota_remaining = quota_initial - quota_used;

        if let Some(reported) = status.quota_remaining {
            if reported != quota_remaining {
                warn!(
                    initial = status.quota_initial,
                    used = status.quota_used,
                    reported,
                    "Server quota figures disagree, using initial - used"
                );
            }
        }

        Self {
            connected: status.connected,
            authorized: status.authorized,
            usable: status.usable,
            quota_initial,
            quota_used,
            quota_remaining,
            last_updated: Some(status.last_updated.unwrap_or(received_at)),
            preferred_alternate: status.preferred_alternate,
            status_message: status.status_message,
            loading: false,
            error: None,
        }
    }

    /// Record a failed refresh.
    ///
    /// Only an authorization failure is knowledge about the provider; any other
    /// failure leaves the last known figures in place.
    pub fn record_failure(&mut self, message: String, authorization_failure: bool) {
        self.loading = false;
        self.error = Some(message);
        if authorization_failure {
            self.connected = false;
            self.authorized = false;
        }
    }

    /// Apply one unit of locally observed quota spending
    pub fn decrement_quota(&mut self) {
        self.quota_used += 1;
        self.quota_remaining = (self.quota_remaining - 1).max(0);
    }

    /// True when the quota triple adds up
    pub fn quota_consistent(&self) -> bool {
        self.quota_used + self.quota_remaining == self.quota_initial
    }

    pub fn readiness(&self) -> Readiness {
        if self.connected && self.authorized {
            Readiness::Connected
        } else if self.authorized {
            Readiness::AuthorizedDisconnected
        } else {
            Readiness::Disconnected
        }
    }
}
