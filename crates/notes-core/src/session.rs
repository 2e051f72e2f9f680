//! AuthSessionController: the single source of truth for who is signed in.
//!
//! Holds at most one [`Identity`], mirrors it into an [`IdentityStore`] so it
//! survives restarts, and stamps every change with an epoch. Dependents take a
//! [`SessionTicket`] before a remote call and compare epochs afterwards, which
//! is how a result that straddles a sign-out gets discarded.

use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, SharedEventBus, now_millis};
use crate::identity::Identity;
use crate::storage::{IdentityStore, PersistedSession};

/// Proof of a present session at a given epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTicket {
    pub identity: Identity,
    pub epoch: u64,
}

struct SessionState {
    identity: Option<Identity>,
    /// Bumped on every clear and every destructive replace
    epoch: u64,
}

pub struct AuthSessionController {
    store: Box<dyn IdentityStore>,
    state: Mutex<SessionState>,
    events: SharedEventBus,
}

impl AuthSessionController {
    pub fn new(store: Box<dyn IdentityStore>, events: SharedEventBus) -> Self {
        Self {
            store,
            state: Mutex::new(SessionState {
                identity: None,
                epoch: 0,
            }),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn identity(&self) -> Option<Identity> {
        self.lock().identity.clone()
    }

    pub fn is_present(&self) -> bool {
        self.lock().identity.is_some()
    }

    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// The capability check every session-gated operation runs first.
    pub fn require_session(&self) -> Result<SessionTicket> {
        let state = self.lock();
        match &state.identity {
            Some(identity) => Ok(SessionTicket {
                identity: identity.clone(),
                epoch: state.epoch,
            }),
            None => Err(ClientError::Unauthorized("no active session".into())),
        }
    }

    /// Adopt a freshly verified identity, replacing any previous one.
    ///
    /// Adopting the identity already held is a no-op.
    pub fn adopt(&self, identity: Identity) -> Result<()> {
        self.adopt_inner(identity, None, false).map(|_| ())
    }

    /// Adopt only if nothing changed the session since `epoch` was observed.
    ///
    /// Returns `false` (and adopts nothing) when a clear or another adoption
    /// happened while the verification was in flight.
    pub fn adopt_if_current(&self, identity: Identity, epoch: u64) -> Result<bool> {
        self.adopt_inner(identity, Some(epoch), false)
    }

    fn adopt_inner(&self, identity: Identity, expected: Option<u64>, restored: bool) -> Result<bool> {
        let adopted = {
            let mut state = self.lock();
            if let Some(expected) = expected {
                if state.epoch != expected {
                    warn!(
                        user_id = %identity.user_id,
                        "Ignoring login that completed after the session changed"
                    );
                    return Ok(false);
                }
            }
            self.adopt_locked(&mut state, identity, restored)
        };
        if let Some(user_id) = adopted {
            self.announce_adopted(user_id, restored);
        }
        Ok(true)
    }

    /// Install `identity` while the state guard is held.
    ///
    /// The durable copy is written under the same guard, so a concurrent
    /// [`clear`](Self::clear) either runs before (and is replaced) or after
    /// (and erases it). Returns the user id when something changed.
    fn adopt_locked(
        &self,
        state: &mut SessionState,
        identity: Identity,
        restored: bool,
    ) -> Option<String> {
        if state.identity.as_ref() == Some(&identity) {
            debug!(user_id = %identity.user_id, "Identity already adopted");
            return None;
        }
        if !restored {
            // The in-memory session stands even if the durable copy cannot be written
            if let Err(e) = PersistedSession::new(Some(identity.clone()))
                .encode()
                .and_then(|raw| self.store.write(&raw))
            {
                warn!("Failed to persist session: {}", e);
            }
        }
        let user_id = identity.user_id.clone();
        state.identity = Some(identity);
        state.epoch += 1;
        Some(user_id)
    }

    fn announce_adopted(&self, user_id: String, restored: bool) {
        info!(user_id = %user_id, restored, "Session adopted");
        self.events.emit(ClientEvent::SessionAdopted {
            user_id,
            restored,
            timestamp: now_millis(),
        });
    }

    /// Drop the identity and erase the durable copy.
    ///
    /// The in-memory session is always cleared; a storage error is still
    /// reported because a stale record would come back on the next restore.
    pub fn clear(&self) -> Result<()> {
        let (previous, erased) = {
            let mut state = self.lock();
            state.epoch += 1;
            let previous = state.identity.take();
            (previous, self.store.erase())
        };

        match &previous {
            Some(identity) => info!(user_id = %identity.user_id, "Session cleared"),
            None => debug!("Session cleared (none was present)"),
        }
        self.events.emit(ClientEvent::SessionCleared {
            timestamp: now_millis(),
        });

        erased.map_err(ClientError::from)
    }

    /// Adopt the durable identity, if any, without re-verifying it.
    pub fn restore(&self) -> Result<Option<Identity>> {
        let (identity, adopted) = {
            let mut state = self.lock();
            let raw = match self.store.read() {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("Failed to read persisted session: {}", e);
                    return Err(e.into());
                }
            };
            let Some(identity) = raw.as_deref().and_then(PersistedSession::decode) else {
                debug!("No persisted session to restore");
                return Ok(None);
            };
            let adopted = self.adopt_locked(&mut state, identity.clone(), true);
            (identity, adopted)
        };
        if let Some(user_id) = adopted {
            self.announce_adopted(user_id, true);
        }
        Ok(Some(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::storage::InMemoryIdentityStore;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    fn identity(user_id: &str) -> Identity {
        Identity {
            user_id: user_id.into(),
            email: format!("{user_id}@example.com"),
            name: None,
        }
    }

    fn controller() -> (Arc<InMemoryIdentityStore>, AuthSessionController) {
        let store = Arc::new(InMemoryIdentityStore::new());
        let controller =
            AuthSessionController::new(Box::new(Arc::clone(&store)), EventBus::shared());
        (store, controller)
    }

    #[test]
    fn test_adopt_persists_and_clear_erases() {
        let (store, session) = controller();
        session.adopt(identity("u1")).unwrap();

        assert!(session.is_present());
        assert_eq!(
            store.raw().as_deref().and_then(PersistedSession::decode),
            Some(identity("u1"))
        );

        session.clear().unwrap();
        assert!(!session.is_present());
        assert_eq!(store.raw(), None);
    }

    #[test]
    fn test_adopt_is_idempotent_only_for_identical_payloads() {
        let (_store, session) = controller();
        session.adopt(identity("u1")).unwrap();
        let epoch = session.epoch();

        session.adopt(identity("u1")).unwrap();
        assert_eq!(session.epoch(), epoch);

        session.adopt(identity("u2")).unwrap();
        assert_eq!(session.epoch(), epoch + 1);
        assert_eq!(session.identity(), Some(identity("u2")));
    }

    #[test]
    fn test_require_session_without_identity_is_unauthorized() {
        let (_store, session) = controller();
        assert!(matches!(
            session.require_session(),
            Err(ClientError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_login_after_intervening_clear_is_ignored() {
        let (_store, session) = controller();
        let observed = session.epoch();
        session.clear().unwrap();

        assert!(!session.adopt_if_current(identity("u1"), observed).unwrap());
        assert!(!session.is_present());
    }

    /// Parks the first write until the test releases it.
    struct GatedStore {
        inner: InMemoryIdentityStore,
        armed: AtomicBool,
        entered: Barrier,
        release: Barrier,
    }

    impl IdentityStore for GatedStore {
        fn read(&self) -> crate::storage::Result<Option<String>> {
            self.inner.read()
        }

        fn write(&self, record: &str) -> crate::storage::Result<()> {
            if self.armed.swap(false, Ordering::SeqCst) {
                self.entered.wait();
                self.release.wait();
            }
            self.inner.write(record)
        }

        fn erase(&self) -> crate::storage::Result<()> {
            self.inner.erase()
        }
    }

    #[test]
    fn test_clear_during_persist_leaves_no_record() {
        let store = Arc::new(GatedStore {
            inner: InMemoryIdentityStore::new(),
            armed: AtomicBool::new(true),
            entered: Barrier::new(2),
            release: Barrier::new(2),
        });
        let session = Arc::new(AuthSessionController::new(
            Box::new(Arc::clone(&store)),
            EventBus::shared(),
        ));

        let adopting = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.adopt(identity("u1")).unwrap())
        };
        store.entered.wait();

        // Sign-out arrives while the record is still being written
        let clearing = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.clear().unwrap())
        };
        thread::sleep(Duration::from_millis(50));
        store.release.wait();
        adopting.join().unwrap();
        clearing.join().unwrap();

        assert!(!session.is_present());
        assert_eq!(store.inner.raw(), None);

        let next_run =
            AuthSessionController::new(Box::new(Arc::clone(&store)), EventBus::shared());
        assert_eq!(next_run.restore().unwrap(), None);
    }

    #[test]
    fn test_restore_adopts_durable_identity() {
        let raw = PersistedSession::new(Some(identity("u7"))).encode().unwrap();
        let session = AuthSessionController::new(
            Box::new(InMemoryIdentityStore::with_record(raw)),
            EventBus::shared(),
        );

        assert_eq!(session.restore().unwrap(), Some(identity("u7")));
        assert_eq!(session.identity(), Some(identity("u7")));
    }

    #[test]
    fn test_restore_ignores_garbage() {
        let session = AuthSessionController::new(
            Box::new(InMemoryIdentityStore::with_record("{{{")),
            EventBus::shared(),
        );
        assert_eq!(session.restore().unwrap(), None);
        assert!(!session.is_present());
    }
}
