//! Session configuration parsed from environment variables.

use crate::storage::is_valid_key;

pub const DEFAULT_LOGIN_URL: &str = "http://127.0.0.1:3000/api/auth/login";
pub const DEFAULT_STORAGE_KEY: &str = "access_token";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub login_url: String,
    pub storage_key: String,
    pub log_claims: bool,
    pub timeouts: HttpTimeouts,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            login_url: DEFAULT_LOGIN_URL.to_owned(),
            storage_key: DEFAULT_STORAGE_KEY.to_owned(),
            log_claims: false,
            timeouts: HttpTimeouts::default(),
        }
    }
}

impl SessionConfig {
    /// Build typed session config from environment variables.
    ///
    /// Optional:
    /// - `SESSION_LOGIN_URL`: login endpoint, default [`DEFAULT_LOGIN_URL`]
    /// - `SESSION_STORAGE_KEY`: token slot, default `access_token`
    /// - `SESSION_LOG_CLAIMS`: log raw login responses and decoded claims at debug level
    /// - `SESSION_REQUEST_TIMEOUT_SECS`: default 30
    /// - `SESSION_CONNECT_TIMEOUT_SECS`: default 10
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for an invalid storage key or flag value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Same as [`SessionConfig::from_env`], reading values through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for an invalid storage key or flag value.
    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let login_url = lookup("SESSION_LOGIN_URL")
            .unwrap_or_else(|| DEFAULT_LOGIN_URL.to_owned())
            .trim_end_matches('/')
            .to_owned();
        if login_url.is_empty() {
            return Err(ConfigError::Invalid { var: "SESSION_LOGIN_URL", reason: "empty".into() });
        }

        let storage_key = lookup("SESSION_STORAGE_KEY").unwrap_or_else(|| DEFAULT_STORAGE_KEY.to_owned());
        if !is_valid_key(&storage_key) {
            return Err(ConfigError::Invalid {
                var: "SESSION_STORAGE_KEY",
                reason: format!("{storage_key:?} must match [A-Za-z0-9_.-]+"),
            });
        }

        let log_claims = parse_flag("SESSION_LOG_CLAIMS", lookup("SESSION_LOG_CLAIMS").as_deref())?;
        let timeouts = HttpTimeouts {
            request_secs: parse_u64_or(lookup("SESSION_REQUEST_TIMEOUT_SECS").as_deref(), DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_secs: parse_u64_or(lookup("SESSION_CONNECT_TIMEOUT_SECS").as_deref(), DEFAULT_CONNECT_TIMEOUT_SECS),
        };

        Ok(Self { login_url, storage_key, log_claims, timeouts })
    }
}

fn parse_u64_or(raw: Option<&str>, default: u64) -> u64 {
    raw.and_then(|v| v.trim().parse::<u64>().ok()).unwrap_or(default)
}

fn parse_flag(var: &'static str, raw: Option<&str>) -> Result<bool, ConfigError> {
    let Some(raw) = raw else {
        return Ok(false);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid { var, reason: format!("unrecognized flag value '{other}'") }),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
