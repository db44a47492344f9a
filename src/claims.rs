//! Bearer-token claims and the unverified decoder.
//!
//! DESIGN
//! ======
//! Tokens are JWT compact strings. Only the payload segment is read; the
//! signature is never checked. Claims are validated once, here, so the
//! session layer can treat every decode or shape failure the same way.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

/// Decoded token claims.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject; the username.
    #[serde(default)]
    pub sub: Option<String>,
    /// Subject identifier. Integer ids are kept as their decimal string.
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub id: Option<String>,
    /// Expiry in seconds since the Unix epoch.
    #[serde(default, deserialize_with = "deserialize_optional_epoch")]
    pub exp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimsError {
    #[error("token has no payload segment")]
    MissingPayload,
    #[error("token payload is not base64url: {0}")]
    Base64(String),
    #[error("token payload is not a claims object: {0}")]
    Json(String),
    #[error("token has no subject")]
    MissingSubject,
}

impl Claims {
    /// Check the shape the session layer relies on: a non-empty subject.
    ///
    /// # Errors
    ///
    /// Returns [`ClaimsError::MissingSubject`] when `sub` is absent or empty.
    pub fn validate(self) -> Result<Self, ClaimsError> {
        match self.sub.as_deref() {
            Some(sub) if !sub.is_empty() => Ok(self),
            _ => Err(ClaimsError::MissingSubject),
        }
    }

    /// Whether the token expired strictly before `now_millis`.
    /// `None` when the token carries no expiry.
    #[must_use]
    pub fn expired_at(&self, now_millis: i64) -> Option<bool> {
        self.exp.map(|exp| exp.saturating_mul(1000) < now_millis)
    }
}

/// Turns a token string into claims.
pub trait TokenDecoder: Send + Sync {
    /// Decode `token` into raw, unvalidated claims.
    ///
    /// # Errors
    ///
    /// Returns a [`ClaimsError`] when the token is malformed.
    fn decode(&self, token: &str) -> Result<Claims, ClaimsError>;
}

/// Reads the payload segment of a JWT without verifying its signature.
#[derive(Debug, Clone, Copy, Default)]
pub struct JwtDecoder;

impl TokenDecoder for JwtDecoder {
    fn decode(&self, token: &str) -> Result<Claims, ClaimsError> {
        let payload = token
            .split('.')
            .nth(1)
            .filter(|segment| !segment.is_empty())
            .ok_or(ClaimsError::MissingPayload)?;
        let bytes = URL_SAFE_NO_PAD
            .decode(payload.trim_end_matches('='))
            .map_err(|e| ClaimsError::Base64(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| ClaimsError::Json(e.to_string()))
    }
}

fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(id) => Ok(Some(id)),
        serde_json::Value::Number(number) if number.is_i64() || number.is_u64() => Ok(Some(number.to_string())),
        _ => Err(D::Error::custom("expected string or integer id")),
    }
}

fn deserialize_optional_epoch<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                return Ok(Some(int));
            }
            #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
            if let Some(float) = number.as_f64()
                && float.is_finite()
                && float.fract() == 0.0
                && float >= i64::MIN as f64
                && float <= i64::MAX as f64
            {
                return Ok(Some(float as i64));
            }
            Err(D::Error::custom("expected integer-compatible expiry"))
        }
        _ => Err(D::Error::custom("expected numeric expiry")),
    }
}

#[cfg(test)]
#[path = "claims_test.rs"]
mod tests;
