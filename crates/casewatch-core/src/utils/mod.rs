//! Display helpers for presentation layers.

pub mod format;

pub use format::{age_display, quota_display, truncate};
