//! Client-side session context.
//!
//! SYSTEM CONTEXT
//! ==============
//! UI code receives a [`SessionContext`] handle and asks it who is signed in,
//! whether the stored bearer token is still usable, and to log in or out.
//! The token lives in a host key-value slot ([`TokenStore`]), is decoded
//! without signature verification ([`TokenDecoder`]), and is obtained from a
//! remote login call ([`LoginClient`]).
//!
//! TRADE-OFFS
//! ==========
//! Expiry is read from unverified claims. The context is a client-side
//! belief about identity, never an authorization decision.

pub mod claims;
pub mod clock;
pub mod config;
pub mod login;
pub mod session;
pub mod storage;

pub use claims::{Claims, ClaimsError, JwtDecoder, TokenDecoder};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, HttpTimeouts, SessionConfig};
pub use login::{Credentials, LoginClient, LoginError, LoginResponse};
pub use session::{
    NULL_ID, NULL_USERNAME, SessionContext, SessionContextBuilder, SessionError, SessionSettings, SessionUser,
};
pub use storage::{MemoryTokenStore, StorageError, TokenStore};

#[cfg(not(target_arch = "wasm32"))]
pub use login::HttpLoginClient;
#[cfg(not(target_arch = "wasm32"))]
pub use storage::FileTokenStore;
#[cfg(feature = "hydrate")]
pub use storage::LocalStorageStore;
