//! REST API module for the casewatch server.
//!
//! This module provides the `Backend` trait describing every server call the
//! status synchronization core makes, and `ApiClient`, its HTTP implementation.
//!
//! The API uses bearer token authentication; the token and session id are
//! obtained through the login endpoint.

pub mod backend;
pub mod client;
pub mod error;

pub use backend::{with_timeout, Backend};
pub use client::ApiClient;
pub use error::ApiError;
