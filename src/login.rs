//! Remote login call.
//!
//! Thin HTTP wrapper around the login endpoint. Status and body handling
//! live in `parse_login_response` so they can be tested without a server.

use std::fmt;

use serde::{Deserialize, Serialize};

#[cfg(not(target_arch = "wasm32"))]
use crate::config::{HttpTimeouts, SessionConfig};

/// Placeholder some servers send in place of a missing token.
pub const UNDEFINED_TOKEN: &str = "undefined";

/// Identifier and secret posted to the login endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self { username: username.into(), password: password.into() }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Raw login response. Only `token` is interpreted; every other field is
/// kept as-is for the caller.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoginResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl LoginResponse {
    /// The token, unless it is missing, empty, or the `"undefined"` placeholder.
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        self.token
            .as_deref()
            .filter(|token| !token.is_empty() && *token != UNDEFINED_TOKEN)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoginError {
    /// The HTTP request could not be sent or its body not read.
    #[error("login request failed: {0}")]
    Request(String),

    /// The login endpoint returned a non-success HTTP status.
    #[error("login rejected: status {status}")]
    Status { status: u16, body: String },

    /// The login response body was not a JSON object.
    #[error("login response parse failed: {0}")]
    Parse(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

/// Performs the login exchange. Enables mocking in tests.
#[async_trait::async_trait]
pub trait LoginClient: Send + Sync {
    /// Submit `credentials` and return the server's response.
    ///
    /// # Errors
    ///
    /// Returns a [`LoginError`] if the call fails or is rejected.
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, LoginError>;
}

// =============================================================================
// HTTP CLIENT
// =============================================================================

/// `POST`s credentials as JSON to a fixed URL.
#[cfg(not(target_arch = "wasm32"))]
pub struct HttpLoginClient {
    http: reqwest::Client,
    url: String,
}

#[cfg(not(target_arch = "wasm32"))]
impl HttpLoginClient {
    /// # Errors
    ///
    /// Returns [`LoginError::HttpClientBuild`] if the HTTP client fails to build.
    pub fn new(url: impl Into<String>, timeouts: HttpTimeouts) -> Result<Self, LoginError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeouts.request_secs))
            .connect_timeout(std::time::Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| LoginError::HttpClientBuild(e.to_string()))?;
        Ok(Self { http, url: url.into() })
    }

    /// # Errors
    ///
    /// Returns [`LoginError::HttpClientBuild`] if the HTTP client fails to build.
    pub fn from_config(config: &SessionConfig) -> Result<Self, LoginError> {
        Self::new(config.login_url.clone(), config.timeouts)
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[async_trait::async_trait]
impl LoginClient for HttpLoginClient {
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, LoginError> {
        let response = self
            .http
            .post(&self.url)
            .header("Accept", "application/json")
            .json(credentials)
            .send()
            .await
            .map_err(|e| LoginError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| LoginError::Request(e.to_string()))?;

        parse_login_response(status, &body)
    }
}

fn parse_login_response(status: u16, body: &str) -> Result<LoginResponse, LoginError> {
    if !(200..300).contains(&status) {
        return Err(LoginError::Status { status, body: body.to_owned() });
    }
    serde_json::from_str(body).map_err(|e| LoginError::Parse(e.to_string()))
}

#[cfg(test)]
#[path = "login_test.rs"]
mod tests;
