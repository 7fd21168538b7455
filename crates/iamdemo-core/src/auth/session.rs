use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::clock::Clock;
use super::storage::{SessionStore, StorageError};

/// Store key holding the serialized authentication result
pub const SESSION_KEY: &str = "session";

/// Store key holding the expiry instant, in epoch milliseconds
pub const EXPIRES_AT_KEY: &str = "expires_at";

/// What the identity provider hands back after a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResult {
    pub access_token: String,
    pub id_token: String,
    pub token_type: String,
    /// Validity in seconds, as declared by the provider at issuance.
    pub expires_in: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl AuthResult {
    pub fn new(access_token: &str, id_token: &str, token_type: &str, expires_in: i64) -> Self {
        Self {
            access_token: access_token.to_string(),
            id_token: id_token.to_string(),
            token_type: token_type.to_string(),
            expires_in,
            scope: None,
            state: None,
        }
    }

    /// Value for the `Authorization` header, e.g. `Bearer abc`.
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
}

/// Owns the one persisted session.
///
/// Only this type writes the session keys. The write lock keeps the
/// two-key write in `establish_session` and the two-key delete in
/// `end_session` from interleaving.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    write_lock: Mutex<()>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            write_lock: Mutex::new(()),
        }
    }

    /// Persist `result` and its expiry, replacing whatever was stored.
    pub fn establish_session(&self, result: &AuthResult) -> Result<(), StorageError> {
        let expires_at = self
            .clock
            .now_millis()
            .saturating_add(result.expires_in.saturating_mul(1000));
        let session_json = serde_json::to_string(result)?;
        let expires_json = serde_json::to_string(&expires_at)?;

        let _guard = self.write_lock.lock().map_err(|_| StorageError::Poisoned)?;
        self.store.set(SESSION_KEY, &session_json)?;
        if let Err(e) = self.store.set(EXPIRES_AT_KEY, &expires_json) {
            // Neither key may outlive the other, including a previous expiry
            for key in [SESSION_KEY, EXPIRES_AT_KEY] {
                if let Err(rollback) = self.store.remove(key) {
                    warn!(key = key, error = %rollback, "Failed to roll back partial session write");
                }
            }
            return Err(e);
        }

        info!(expires_at = expires_at, token_type = %result.token_type, "Session established");
        Ok(())
    }

    /// True while a stored expiry exists and lies in the future.
    ///
    /// Anything unreadable counts as unauthenticated.
    pub fn is_authenticated(&self) -> bool {
        match self.expires_at() {
            Some(expires_at) => self.clock.now_millis() < expires_at,
            None => false,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.is_authenticated() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        }
    }

    /// Remove the session and its expiry. Safe to call with nothing stored.
    pub fn end_session(&self) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock().map_err(|_| StorageError::Poisoned)?;
        self.store.remove(SESSION_KEY)?;
        self.store.remove(EXPIRES_AT_KEY)?;
        info!("Session ended");
        Ok(())
    }

    /// The stored authentication result, expired or not.
    pub fn session(&self) -> Option<AuthResult> {
        let raw = self.read(SESSION_KEY)?;
        match serde_json::from_str(&raw) {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(error = %e, "Stored session is malformed");
                None
            }
        }
    }

    /// The stored expiry instant in epoch milliseconds.
    pub fn expires_at(&self) -> Option<i64> {
        let raw = self.read(EXPIRES_AT_KEY)?;
        match serde_json::from_str::<i64>(&raw) {
            Ok(expires_at) => Some(expires_at),
            Err(e) => {
                warn!(error = %e, value = %raw, "Stored expiry is not an integer");
                None
            }
        }
    }

    /// Milliseconds left before expiry, floored at zero.
    pub fn remaining_millis(&self) -> i64 {
        self.expires_at()
            .map(|at| at.saturating_sub(self.clock.now_millis()).max(0))
            .unwrap_or(0)
    }

    fn read(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = key, error = %e, "Failed to read from session store");
                None
            }
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::clock::ManualClock;
    use crate::auth::storage::MemoryStore;

    fn manager_at(now: i64) -> (SessionManager, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(now));
        let manager = SessionManager::new(store.clone(), clock.clone());
        (manager, store, clock)
    }

    fn sample() -> AuthResult {
        AuthResult::new("a", "b", "Bearer", 3600)
    }

    #[test]
    fn test_initially_unauthenticated() {
        let (manager, _, _) = manager_at(0);
        assert!(!manager.is_authenticated());
        assert_eq!(manager.state(), SessionState::Unauthenticated);
        assert!(manager.session().is_none());
    }

    #[test]
    fn test_establish_writes_both_keys() {
        let (manager, store, _) = manager_at(5_000);
        manager.establish_session(&sample()).unwrap();

        assert_eq!(
            store.get(EXPIRES_AT_KEY).unwrap().as_deref(),
            Some("3605000")
        );
        let raw = store.get(SESSION_KEY).unwrap().expect("session stored");
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["accessToken"], "a");
        assert_eq!(value["idToken"], "b");
        assert_eq!(value["tokenType"], "Bearer");
        assert_eq!(value["expiresIn"], 3600);
    }

    #[test]
    fn test_expiry_boundary() {
        let (manager, _, clock) = manager_at(0);
        manager.establish_session(&sample()).unwrap();

        clock.set(1_000);
        assert!(manager.is_authenticated());
        clock.set(3_599_999);
        assert!(manager.is_authenticated());
        clock.set(3_600_000);
        assert!(!manager.is_authenticated());
        clock.set(3_600_001);
        assert!(!manager.is_authenticated());
    }

    #[test]
    fn test_expiry_does_not_evict() {
        let (manager, store, clock) = manager_at(0);
        manager.establish_session(&sample()).unwrap();
        clock.advance(10_000_000);

        assert!(!manager.is_authenticated());
        assert!(store.get(SESSION_KEY).unwrap().is_some());
        assert!(store.get(EXPIRES_AT_KEY).unwrap().is_some());
        assert_eq!(manager.session(), Some(sample()));
    }

    #[test]
    fn test_new_session_replaces_old() {
        let (manager, _, clock) = manager_at(0);
        manager.establish_session(&sample()).unwrap();
        clock.set(100_000);
        let second = AuthResult::new("c", "d", "Bearer", 60);
        manager.establish_session(&second).unwrap();

        assert_eq!(manager.session(), Some(second));
        assert_eq!(manager.expires_at(), Some(160_000));
    }

    #[test]
    fn test_end_session_is_idempotent() {
        let (manager, store, _) = manager_at(0);
        manager.establish_session(&sample()).unwrap();

        manager.end_session().unwrap();
        assert!(!manager.is_authenticated());
        assert_eq!(store.get(SESSION_KEY).unwrap(), None);
        assert_eq!(store.get(EXPIRES_AT_KEY).unwrap(), None);

        manager.end_session().unwrap();
        assert_eq!(store.get(SESSION_KEY).unwrap(), None);
        assert_eq!(store.get(EXPIRES_AT_KEY).unwrap(), None);
    }

    #[test]
    fn test_garbage_expiry_is_unauthenticated() {
        let (manager, store, _) = manager_at(0);
        store.set(EXPIRES_AT_KEY, "null").unwrap();
        assert!(!manager.is_authenticated());
        store.set(EXPIRES_AT_KEY, "soon").unwrap();
        assert!(!manager.is_authenticated());
        assert_eq!(manager.expires_at(), None);
    }

    #[test]
    fn test_malformed_session_reads_as_none() {
        let (manager, store, _) = manager_at(0);
        store.set(SESSION_KEY, "{\"accessToken\":1}").unwrap();
        assert!(manager.session().is_none());
    }

    #[test]
    fn test_remaining_millis() {
        let (manager, _, clock) = manager_at(0);
        assert_eq!(manager.remaining_millis(), 0);
        manager.establish_session(&sample()).unwrap();
        clock.set(600_000);
        assert_eq!(manager.remaining_millis(), 3_000_000);
        clock.set(4_000_000);
        assert_eq!(manager.remaining_millis(), 0);
    }

    #[test]
    fn test_authorization_header() {
        assert_eq!(sample().authorization(), "Bearer a");
    }

    #[test]
    fn test_optional_fields_skipped_when_absent() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(!json.contains("scope"));
        assert!(!json.contains("state"));
    }

    /// Memory store whose writes to one key fail once armed.
    struct FailingStore {
        inner: MemoryStore,
        fail_key: &'static str,
        armed: std::sync::atomic::AtomicBool,
    }

    impl SessionStore for FailingStore {
        fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
            if key == self.fail_key && self.armed.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )));
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn test_failed_expiry_write_clears_both_keys() {
        let store = Arc::new(FailingStore {
            inner: MemoryStore::new(),
            fail_key: EXPIRES_AT_KEY,
            armed: std::sync::atomic::AtomicBool::new(false),
        });
        let manager = SessionManager::new(store.clone(), Arc::new(ManualClock::new(0)));
        manager.establish_session(&sample()).unwrap();
        assert!(manager.is_authenticated());

        store.armed.store(true, std::sync::atomic::Ordering::SeqCst);
        let relogin = AuthResult::new("c", "d", "Bearer", 60);
        assert!(manager.establish_session(&relogin).is_err());

        assert_eq!(store.get(SESSION_KEY).unwrap(), None);
        assert_eq!(store.get(EXPIRES_AT_KEY).unwrap(), None);
        assert!(!manager.is_authenticated());
        assert!(manager.session().is_none());
    }

    #[test]
    fn test_remaining_millis_with_extreme_expiry() {
        let (manager, store, clock) = manager_at(1_000);
        store.set(EXPIRES_AT_KEY, &i64::MIN.to_string()).unwrap();
        assert_eq!(manager.remaining_millis(), 0);

        clock.set(-1_000);
        store.set(EXPIRES_AT_KEY, &i64::MAX.to_string()).unwrap();
        assert_eq!(manager.remaining_millis(), i64::MAX);
    }
}
