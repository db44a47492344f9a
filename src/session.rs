//! Session context: the client's belief about who is signed in.
//!
//! ARCHITECTURE
//! ============
//! [`SessionContext`] is a cheap, cloneable handle. UI code receives it by
//! injection and reads the current [`SessionUser`] or subscribes to changes.
//! Only the context mutates the user record, through `log_in`, `log_out`,
//! `refresh_from_storage`, and the forced sign-out inside
//! `is_authenticated`.
//!
//! The user record sits in a `watch` channel: readers always see the latest
//! value and subscribers are woken on every transition.
//!
//! TRADE-OFFS
//! ==========
//! Overlapping `log_in` calls are serialized through an async mutex in
//! arrival order, so the last login issued decides the final state. A login
//! future dropped before completion applies nothing.
//!
//! A stored token that cannot be decoded is treated as absent and forces a
//! sign-out, wherever it is read.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};

use crate::claims::{Claims, ClaimsError, JwtDecoder, TokenDecoder};
use crate::clock::{Clock, SystemClock};
use crate::config::{DEFAULT_STORAGE_KEY, SessionConfig};
use crate::login::{Credentials, LoginClient, LoginError, LoginResponse, UNDEFINED_TOKEN};
use crate::storage::{StorageError, TokenStore};

/// Username of the signed-out user.
pub const NULL_USERNAME: &str = "#signedOut";

/// User id of the signed-out user, and of tokens without an `id` claim.
pub const NULL_ID: &str = "null";

// =============================================================================
// SESSION USER
// =============================================================================

/// The authenticated identity as known to the client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub username: String,
    pub user_id: String,
    /// Reserved; never populated.
    pub roles: Option<Vec<String>>,
}

impl SessionUser {
    #[must_use]
    pub fn signed_out() -> Self {
        Self { username: NULL_USERNAME.to_owned(), user_id: NULL_ID.to_owned(), roles: None }
    }

    #[must_use]
    pub fn is_signed_out(&self) -> bool {
        self.username == NULL_USERNAME
    }

    /// Both fields come from the same validated claims.
    fn from_claims(claims: &Claims) -> Self {
        Self {
            username: claims.sub.clone().unwrap_or_else(|| NULL_USERNAME.to_owned()),
            user_id: claims
                .id
                .clone()
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| NULL_ID.to_owned()),
            roles: None,
        }
    }
}

impl Default for SessionUser {
    fn default() -> Self {
        Self::signed_out()
    }
}

// =============================================================================
// SETTINGS / ERRORS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Storage slot holding the token.
    pub storage_key: String,
    /// Log raw login responses and decoded claims at debug level.
    pub log_claims: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self { storage_key: DEFAULT_STORAGE_KEY.to_owned(), log_claims: false }
    }
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        Self { storage_key: config.storage_key.clone(), log_claims: config.log_claims }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The login call itself failed; the error is passed through untouched.
    #[error(transparent)]
    Login(#[from] LoginError),

    /// The login response carried a token that does not decode.
    #[error("login returned an unusable token: {0}")]
    Token(#[from] ClaimsError),

    /// The token could not be written to storage.
    #[error("could not persist token: {0}")]
    Storage(#[from] StorageError),
}

// =============================================================================
// CONTEXT
// =============================================================================

/// Shared handle to the session state. Clones share the same state.
#[derive(Clone)]
pub struct SessionContext {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn TokenStore>,
    login: Arc<dyn LoginClient>,
    decoder: Arc<dyn TokenDecoder>,
    clock: Arc<dyn Clock>,
    settings: SessionSettings,
    user: watch::Sender<SessionUser>,
    login_gate: Mutex<()>,
}

/// Collects the collaborators of a [`SessionContext`].
pub struct SessionContextBuilder {
    store: Arc<dyn TokenStore>,
    login: Arc<dyn LoginClient>,
    decoder: Arc<dyn TokenDecoder>,
    clock: Arc<dyn Clock>,
    settings: SessionSettings,
}

impl SessionContextBuilder {
    #[must_use]
    pub fn decoder(mut self, decoder: Arc<dyn TokenDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn settings(mut self, settings: SessionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Build the context and load the user from the stored token.
    #[must_use]
    pub fn activate(self) -> SessionContext {
        let (user, _) = watch::channel(SessionUser::signed_out());
        let ctx = SessionContext {
            inner: Arc::new(Inner {
                store: self.store,
                login: self.login,
                decoder: self.decoder,
                clock: self.clock,
                settings: self.settings,
                user,
                login_gate: Mutex::new(()),
            }),
        };
        ctx.refresh_from_storage();
        ctx
    }
}

impl SessionContext {
    /// Start building a context. Defaults: [`JwtDecoder`], [`SystemClock`],
    /// [`SessionSettings::default`].
    pub fn builder(store: Arc<dyn TokenStore>, login: Arc<dyn LoginClient>) -> SessionContextBuilder {
        SessionContextBuilder {
            store,
            login,
            decoder: Arc::new(JwtDecoder),
            clock: Arc::new(SystemClock),
            settings: SessionSettings::default(),
        }
    }

    /// Build and activate a context with the default decoder and clock.
    pub fn new(store: Arc<dyn TokenStore>, login: Arc<dyn LoginClient>, settings: SessionSettings) -> Self {
        Self::builder(store, login).settings(settings).activate()
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Snapshot of the current user.
    #[must_use]
    pub fn user(&self) -> SessionUser {
        self.inner.user.borrow().clone()
    }

    #[must_use]
    pub fn current_username(&self) -> String {
        let user = self.inner.user.borrow();
        if user.username.is_empty() { NULL_USERNAME.to_owned() } else { user.username.clone() }
    }

    #[must_use]
    pub fn current_user_id(&self) -> String {
        let user = self.inner.user.borrow();
        if user.user_id.is_empty() { NULL_ID.to_owned() } else { user.user_id.clone() }
    }

    /// Receiver that observes every change to the user record.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionUser> {
        self.inner.user.subscribe()
    }

    #[must_use]
    pub fn storage_key(&self) -> &str {
        &self.inner.settings.storage_key
    }

    /// Whether the stored token is present, decodable, carries an expiry,
    /// and has not expired.
    ///
    /// Signs out as a side effect when the token is expired or corrupt.
    /// A token without `exp` is reported unauthenticated but left in place.
    pub fn is_authenticated(&self) -> bool {
        let Some(token) = self.stored_token() else {
            return false;
        };
        let claims = match self.inspect(&token) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::warn!(error = %e, "stored token is corrupt; signing out");
                self.log_out();
                return false;
            }
        };
        match claims.expired_at(self.inner.clock.now_millis()) {
            Some(true) => {
                tracing::debug!(exp = ?claims.exp, "stored token expired; signing out");
                self.log_out();
                false
            }
            Some(false) => true,
            None => {
                tracing::debug!("stored token has no expiry");
                false
            }
        }
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Load the user from the stored token.
    ///
    /// Missing or placeholder tokens leave the state untouched. A corrupt
    /// token is deleted and the session signed out.
    pub fn refresh_from_storage(&self) {
        let Some(token) = self.stored_token() else {
            tracing::debug!(key = %self.storage_key(), "no stored token");
            return;
        };
        match self.inspect(&token) {
            Ok(claims) => {
                let user = SessionUser::from_claims(&claims);
                tracing::debug!(username = %user.username, user_id = %user.user_id, "session restored from storage");
                self.set_user(user);
            }
            Err(e) => {
                tracing::warn!(error = %e, "stored token is corrupt; signing out");
                self.log_out();
            }
        }
    }

    /// Submit `credentials` and, if the response carries a token, store it
    /// and adopt its identity. The raw response is always returned on
    /// success.
    ///
    /// # Errors
    ///
    /// - [`SessionError::Login`] with the login client's error, unchanged.
    /// - [`SessionError::Token`] if the returned token does not decode.
    /// - [`SessionError::Storage`] if the token cannot be stored.
    ///
    /// The session state and storage are untouched on every error.
    pub async fn log_in(&self, credentials: &Credentials) -> Result<LoginResponse, SessionError> {
        let _gate = self.inner.login_gate.lock().await;

        let response = match self.inner.login.login(credentials).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(username = %credentials.username, error = %e, "login failed");
                return Err(e.into());
            }
        };
        if self.inner.settings.log_claims {
            tracing::debug!(response = %serde_json::to_string(&response).unwrap_or_default(), "login response");
        }

        let Some(token) = response.bearer_token() else {
            tracing::info!(username = %credentials.username, "login succeeded without a token");
            return Ok(response);
        };

        let claims = self.inspect(token).inspect_err(|e| {
            tracing::warn!(username = %credentials.username, error = %e, "login returned an unusable token");
        })?;
        if self.inner.settings.log_claims {
            tracing::debug!(claims = ?claims, "decoded login token");
        }

        self.inner.store.set(self.storage_key(), token)?;
        let user = SessionUser::from_claims(&claims);
        tracing::info!(username = %user.username, user_id = %user.user_id, "logged in");
        self.set_user(user);
        Ok(response)
    }

    /// Delete the stored token and reset to the signed-out user.
    pub fn log_out(&self) {
        if let Err(e) = self.inner.store.remove(self.storage_key()) {
            tracing::warn!(error = %e, "failed to delete stored token");
        }
        self.set_user(SessionUser::signed_out());
        tracing::info!("logged out");
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn stored_token(&self) -> Option<String> {
        self.inner
            .store
            .get(self.storage_key())
            .filter(|token| !token.is_empty() && token != UNDEFINED_TOKEN)
    }

    fn inspect(&self, token: &str) -> Result<Claims, ClaimsError> {
        self.inner.decoder.decode(token)?.validate()
    }

    fn set_user(&self, next: SessionUser) {
        self.inner.user.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("user", &*self.inner.user.borrow())
            .field("settings", &self.inner.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
