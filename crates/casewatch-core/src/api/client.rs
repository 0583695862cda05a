//! API client for communicating with the casewatch REST API.
//!
//! This module provides the `ApiClient` struct, the HTTP implementation of
//! [`Backend`] used outside of tests.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{
    Credential, Identity, LoginRequest, LoginResponse, ProviderKind, ProviderStatus, SessionConflict,
    SessionLiveness,
};

use super::{ApiError, Backend};

// ============================================================================
// Constants
// ============================================================================

/// Default server location when the config does not name one
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";

/// Header carrying the server-side session identifier
const SESSION_ID_HEADER: &str = "X-Session-Id";

/// Maximum number of retries for rate-limited (429) requests.
/// 3 retries with exponential backoff usually succeeds without excessive delay.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct LoginBody<'a> {
    username: &'a str,
    password: &'a str,
    #[serde(rename = "deviceInfo")]
    device_info: &'a str,
    #[serde(rename = "forceLogin")]
    force_login: bool,
}

#[derive(Debug, Deserialize)]
struct LoginReply {
    token: Option<String>,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    user: Option<UserReply>,
    #[serde(rename = "sessionConflict", default)]
    session_conflict: bool,
    #[serde(rename = "existingDevice")]
    existing_device: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserReply {
    name: String,
    #[serde(rename = "isAdmin", default)]
    is_admin: bool,
}

#[derive(Debug, Deserialize)]
struct ToggleReply {
    #[serde(rename = "preferredAlternate")]
    preferred_alternate: bool,
}

impl LoginReply {
    fn into_response(self) -> Result<LoginResponse, ApiError> {
        if self.session_conflict {
            return Ok(LoginResponse::Conflict(SessionConflict {
                has_existing_session: true,
                existing_device: self.existing_device.unwrap_or_else(|| "unknown device".to_string()),
            }));
        }

        match (self.token, self.session_id, self.user) {
            (Some(token), Some(session_id), Some(user)) => Ok(LoginResponse::Established(Credential {
                token,
                session_id,
                identity: Identity {
                    name: user.name,
                    is_admin: user.is_admin,
                },
            })),
            _ => Err(ApiError::InvalidResponse(
                "Login reply is missing token, session id or user".to_string(),
            )),
        }
    }
}

fn parse_json<T: DeserializeOwned>(text: &str, what: &str) -> Result<T, ApiError> {
    serde_json::from_str(text).map_err(|e| ApiError::InvalidResponse(format!("Failed to parse {}: {}", what, e)))
}

// ============================================================================
// Client
// ============================================================================

/// API client for the casewatch server.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn auth_headers(credential: &Credential) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        let bearer = header::HeaderValue::from_str(&format!("Bearer {}", credential.token))
            .map_err(|_| ApiError::InvalidResponse("Token is not a valid header value".to_string()))?;
        headers.insert(header::AUTHORIZATION, bearer);
        let session = header::HeaderValue::from_str(&credential.session_id)
            .map_err(|_| ApiError::InvalidResponse("Session id is not a valid header value".to_string()))?;
        headers.insert(SESSION_ID_HEADER, session);
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    /// Returns Ok(Some(response)) for success, Ok(None) for rate limit (should retry),
    /// or Err for other errors.
    async fn check_response_for_retry(response: Response) -> Result<Option<Response>, ApiError> {
        if response.status().is_success() {
            Ok(Some(response))
        } else if response.status() == StatusCode::TOO_MANY_REQUESTS {
            Ok(None)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn send<T, F>(&self, url: &str, build: F) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        F: Fn() -> Result<reqwest::RequestBuilder, ApiError>,
    {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = build()?.send().await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    let text = response.text().await?;
                    return parse_json(&text, url);
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(url = url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, credential: &Credential) -> Result<T, ApiError> {
        let url = self.url(path);
        self.send(&url, || Ok(self.client.get(&url).headers(Self::auth_headers(credential)?)))
            .await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, credential: &Credential) -> Result<T, ApiError> {
        let url = self.url(path);
        self.send(&url, || {
            Ok(self
                .client
                .post(&url)
                .headers(Self::auth_headers(credential)?)
                .json(&serde_json::json!({})))
        })
        .await
    }
}

#[async_trait]
impl Backend for ApiClient {
    async fn login(&self, request: &LoginRequest) -> Result<LoginResponse, ApiError> {
        let url = self.url("auth/login");
        let body = LoginBody {
            username: &request.username,
            password: &request.secret,
            device_info: &request.device,
            force_login: request.force_login,
        };

        let response = self
            .client
            .post(&url)
            .header(header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        debug!(status = %status, force = request.force_login, "Login response received");

        // A conflict arrives as 409 with the same body shape
        if status.is_success() || status == StatusCode::CONFLICT {
            let reply: LoginReply = parse_json(&text, "login response")?;
            if status == StatusCode::CONFLICT && !reply.session_conflict {
                return Ok(LoginResponse::Conflict(SessionConflict {
                    has_existing_session: true,
                    existing_device: reply.existing_device.unwrap_or_else(|| "unknown device".to_string()),
                }));
            }
            return reply.into_response();
        }

        Err(ApiError::from_status(status, &text))
    }

    async fn logout(&self, credential: &Credential) -> Result<(), ApiError> {
        let url = self.url("auth/logout");
        let response = self
            .client
            .post(&url)
            .headers(Self::auth_headers(credential)?)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn check_session(&self, credential: &Credential) -> Result<SessionLiveness, ApiError> {
        self.post("auth/check-session", credential).await
    }

    async fn provider_status(
        &self,
        provider: ProviderKind,
        credential: &Credential,
    ) -> Result<ProviderStatus, ApiError> {
        self.get(&format!("providers/{}/status", provider.id()), credential).await
    }

    async fn refresh_provider_status(
        &self,
        provider: ProviderKind,
        credential: &Credential,
    ) -> Result<ProviderStatus, ApiError> {
        self.post(&format!("providers/{}/refresh", provider.id()), credential).await
    }

    async fn toggle_provider_alternate(&self, credential: &Credential) -> Result<bool, ApiError> {
        let reply: ToggleReply = self.post("providers/toggle-alternate", credential).await?;
        Ok(reply.preferred_alternate)
    }
}
