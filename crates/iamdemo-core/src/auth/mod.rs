//! Authentication module for the hosted login flow and the local session.
//!
//! This module provides:
//! - `SessionManager`: the session lifecycle (establish, query, end)
//! - `SessionStore`: the key-value port the session is persisted in
//! - `Clock`: the time source expiry is measured against
//! - `Authenticator` / `HostedLogin`: the identity provider round trip
//!
//! Expiry is checked on read. Nothing evicts a stale session except an
//! explicit logout or the next login overwriting it.

pub mod authenticator;
pub mod clock;
pub mod error;
pub mod session;
pub mod storage;

pub use authenticator::{Authenticator, HostedLogin, Profile};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::AuthError;
pub use session::{AuthResult, SessionManager, SessionState, EXPIRES_AT_KEY, SESSION_KEY};
pub use storage::{FileStore, KeyringStore, MemoryStore, SessionStore, StorageError};
