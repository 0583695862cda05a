use chrono::{DateTime, Utc};

use crate::models::{ProviderKind, ProviderSnapshot, Readiness};

/// Human age of a timestamp relative to `now`, e.g. "5m ago"
pub fn age_display(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - at).num_seconds();
    if seconds < 60 {
        // Also covers clock skew
        return "just now".to_string();
    }

    let minutes = seconds / 60;
    if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        let hours = minutes / 60;
        if minutes % 60 >= 30 {
            format!("{}h ago", hours + 1)
        } else {
            format!("{}h ago", hours)
        }
    } else {
        let days = minutes / 1440;
        if (minutes % 1440) / 60 >= 12 {
            format!("{}d ago", days + 1)
        } else {
            format!("{}d ago", days)
        }
    }
}

/// One-line summary of a provider snapshot
pub fn quota_display(kind: ProviderKind, snapshot: &ProviderSnapshot) -> String {
    if snapshot.loading && snapshot.last_updated.is_none() {
        return format!("{}: loading", kind.display_name());
    }

    let mut line = format!("{}: {}", kind.display_name(), snapshot.readiness().display_name());
    if kind == ProviderKind::Quota {
        line.push_str(&format!(
            ", {}/{} left",
            snapshot.quota_remaining, snapshot.quota_initial
        ));
        if snapshot.preferred_alternate {
            line.push_str(", alternate preferred");
        }
    }
    if snapshot.readiness() != Readiness::Connected {
        if let Some(message) = snapshot.status_message.as_deref() {
            line.push_str(&format!(" ({})", truncate(message, 60)));
        }
    }
    if let Some(error) = snapshot.error.as_deref() {
        line.push_str(&format!(" [error: {}]", truncate(error, 60)));
    }
    line
}

/// Truncate to `max_len` characters, adding an ellipsis if needed
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}
