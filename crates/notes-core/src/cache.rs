//! NoteCache: the current user's notes, kept consistent with the server.
//!
//! ```text
//! Uninitialized ──load──> Loading ──ok──> Ready
//!       ▲                    │              │
//!       └──── session cleared or replaced ──┘
//! ```
//!
//! Every operation runs the session capability check first. The cache is
//! stamped with the session epoch it was filled under; once the session moves
//! on, the next access finds the stamp stale and drops everything, so notes
//! never leak from one identity into the next.
//!
//! Creates re-fetch the whole listing instead of inserting locally, so ids and
//! timestamps are always the server's. Deletes remove locally only after the
//! server confirms.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, SharedEventBus, now_millis};
use crate::note::{Note, NoteSet};
use crate::remote::{RemoteAuthority, RemoteError};
use crate::session::{AuthSessionController, SessionTicket};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CacheState {
    Uninitialized,
    Loading,
    Ready,
}

struct CacheInner {
    state: CacheState,
    /// State to fall back to if the running load fails
    settled: CacheState,
    notes: NoteSet,
    epoch: u64,
    /// Only the most recently issued load may replace the set
    load_seq: u64,
    pending_creates: HashSet<(String, String)>,
    pending_deletes: HashSet<String>,
}

impl CacheInner {
    fn reset(&mut self, epoch: u64) {
        self.state = CacheState::Uninitialized;
        self.settled = CacheState::Uninitialized;
        self.notes = NoteSet::new();
        self.epoch = epoch;
        self.load_seq += 1;
    }
}

enum PendingKey {
    Create(String, String),
    Delete(String),
}

/// Releases a single-flight slot when the operation finishes or is dropped.
struct Pending<'a> {
    inner: &'a Mutex<CacheInner>,
    key: PendingKey,
}

impl Drop for Pending<'_> {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match &self.key {
            PendingKey::Create(title, content) => {
                inner.pending_creates.remove(&(title.clone(), content.clone()));
            }
            PendingKey::Delete(id) => {
                inner.pending_deletes.remove(id);
            }
        }
    }
}

pub struct NoteCache<R: RemoteAuthority> {
    remote: Arc<R>,
    session: Arc<AuthSessionController>,
    inner: Mutex<CacheInner>,
    events: SharedEventBus,
}

impl<R: RemoteAuthority> NoteCache<R> {
    pub fn new(remote: Arc<R>, session: Arc<AuthSessionController>, events: SharedEventBus) -> Self {
        let epoch = session.epoch();
        Self {
            remote,
            session,
            inner: Mutex::new(CacheInner {
                state: CacheState::Uninitialized,
                settled: CacheState::Uninitialized,
                notes: NoteSet::new(),
                epoch,
                load_seq: 0,
                pending_creates: HashSet::new(),
                pending_deletes: HashSet::new(),
            }),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Lock, dropping the contents first if the session moved on since they were loaded.
    fn lock_current(&self) -> MutexGuard<'_, CacheInner> {
        let epoch = self.session.epoch();
        let mut inner = self.lock();
        if inner.epoch != epoch {
            if !inner.notes.is_empty() || inner.state != CacheState::Uninitialized {
                debug!(from = inner.epoch, to = epoch, "Session changed, invalidating note cache");
            }
            inner.reset(epoch);
        }
        inner
    }

    pub fn state(&self) -> CacheState {
        self.lock_current().state
    }

    pub fn notes(&self) -> Vec<Note> {
        self.lock_current().notes.to_vec()
    }

    pub fn get(&self, note_id: &str) -> Option<Note> {
        self.lock_current().notes.get(note_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock_current().notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard every cached note and return to `Uninitialized`.
    pub fn invalidate(&self) {
        let epoch = self.session.epoch();
        self.lock().reset(epoch);
        debug!("Note cache invalidated");
    }

    /// The server no longer honours this ticket's session: tear it down.
    fn expire(&self, ticket: &SessionTicket) {
        if self.session.epoch() != ticket.epoch {
            // A newer session already replaced the one this call ran under
            return;
        }
        warn!(user_id = %ticket.identity.user_id, "Server rejected session, signing out");
        if let Err(e) = self.session.clear() {
            warn!("Failed to erase persisted session: {}", e);
        }
        self.invalidate();
    }

    /// Replace the cached set with the server's full listing.
    pub async fn load(&self) -> Result<()> {
        let ticket = self.session.require_session()?;
        let seq = {
            let mut inner = self.lock_current();
            if inner.epoch != ticket.epoch {
                return Err(ClientError::InvalidState("session changed before load".into()));
            }
            inner.load_seq += 1;
            if inner.state != CacheState::Loading {
                inner.settled = inner.state;
            }
            inner.state = CacheState::Loading;
            inner.load_seq
        };

        let user_id = &ticket.identity.user_id;
        debug!(%user_id, seq, "Loading notes");
        match self.remote.list_notes(user_id).await {
            Ok(listing) => {
                let count = {
                    let mut inner = self.lock_current();
                    if inner.epoch != ticket.epoch {
                        warn!(%user_id, "Discarding note listing for a session that ended");
                        return Err(ClientError::InvalidState(
                            "session changed while loading notes".into(),
                        ));
                    }
                    if inner.load_seq != seq {
                        debug!(seq, latest = inner.load_seq, "Discarding superseded note listing");
                        return Ok(());
                    }
                    inner.notes = NoteSet::from_listing(user_id, listing);
                    inner.state = CacheState::Ready;
                    inner.settled = CacheState::Ready;
                    inner.notes.len()
                };
                info!(%user_id, count, "Notes loaded");
                self.events.emit(ClientEvent::NotesLoaded {
                    count,
                    timestamp: now_millis(),
                });
                Ok(())
            }
            Err(RemoteError::Unauthorized(reason)) => {
                self.expire(&ticket);
                Err(ClientError::Unauthorized(reason))
            }
            Err(err) => {
                {
                    let mut inner = self.lock_current();
                    if inner.epoch == ticket.epoch && inner.load_seq == seq {
                        inner.state = inner.settled;
                    }
                }
                warn!(%user_id, "Loading notes failed: {}", err);
                Err(err.into())
            }
        }
    }

    /// Create a note, then re-fetch the listing so the server's id shows up.
    pub async fn create(&self, title: &str, content: &str) -> Result<()> {
        if title.trim().is_empty() || content.trim().is_empty() {
            return Err(ClientError::validation("title and content are both required"));
        }
        let ticket = self.session.require_session()?;

        // Whitespace-only differences count as the same note
        let key = (title.trim().to_string(), content.trim().to_string());
        if !self.lock().pending_creates.insert(key.clone()) {
            return Err(ClientError::AlreadyInProgress("create note"));
        }
        let _pending = Pending {
            inner: &self.inner,
            key: PendingKey::Create(key.0, key.1),
        };

        let user_id = &ticket.identity.user_id;
        debug!(%user_id, "Creating note");
        match self.remote.create_note(user_id, title, content).await {
            Ok(ack) => {
                info!(%user_id, "Note created");
                self.events.emit(ClientEvent::NoteCreated {
                    message: ack.message,
                    timestamp: now_millis(),
                });
                if self.session.epoch() != ticket.epoch {
                    debug!("Session changed during create, skipping refresh");
                    return Ok(());
                }
                self.load().await
            }
            Err(RemoteError::Unauthorized(reason)) => {
                self.expire(&ticket);
                Err(ClientError::Unauthorized(reason))
            }
            Err(err) => {
                warn!(%user_id, "Creating note failed: {}", err);
                Err(err.into())
            }
        }
    }

    /// Delete a note on the server and, once confirmed, locally.
    ///
    /// Returns whether a cached entry was removed.
    pub async fn delete(&self, note_id: &str) -> Result<bool> {
        let note_id = note_id.trim();
        if note_id.is_empty() {
            return Err(ClientError::validation("note id is required"));
        }
        let ticket = self.session.require_session()?;

        if !self.lock().pending_deletes.insert(note_id.to_string()) {
            return Err(ClientError::AlreadyInProgress("delete note"));
        }
        let _pending = Pending {
            inner: &self.inner,
            key: PendingKey::Delete(note_id.to_string()),
        };

        debug!(%note_id, "Deleting note");
        match self.remote.delete_note(note_id).await {
            Ok(()) => {
                let removed = {
                    let mut inner = self.lock_current();
                    inner.epoch == ticket.epoch && inner.notes.remove(note_id).is_some()
                };
                info!(%note_id, removed, "Note deleted");
                self.events.emit(ClientEvent::NoteDeleted {
                    note_id: note_id.to_string(),
                    timestamp: now_millis(),
                });
                Ok(removed)
            }
            Err(RemoteError::Unauthorized(reason)) => {
                self.expire(&ticket);
                Err(ClientError::Unauthorized(reason))
            }
            Err(err) => {
                warn!(%note_id, "Deleting note failed: {}", err);
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::identity::Identity;
    use crate::remote::InMemoryRemote;
    use crate::remote::memory::CallKind;
    use crate::storage::InMemoryIdentityStore;
    use std::pin::{Pin, pin};
    use std::task::Poll;

    /// Poll `fut` once; true if it suspended.
    async fn suspends<F: Future>(mut fut: Pin<&mut F>) -> bool {
        std::future::poll_fn(|cx| Poll::Ready(fut.as_mut().poll(cx).is_pending())).await
    }

    fn identity(user_id: &str) -> Identity {
        Identity {
            user_id: user_id.into(),
            email: format!("{user_id}@example.com"),
            name: None,
        }
    }

    fn setup() -> (Arc<InMemoryRemote>, Arc<AuthSessionController>, NoteCache<InMemoryRemote>) {
        let events = EventBus::shared();
        let remote = Arc::new(InMemoryRemote::new());
        let session = Arc::new(AuthSessionController::new(
            Box::new(InMemoryIdentityStore::new()),
            events.clone(),
        ));
        let cache = NoteCache::new(Arc::clone(&remote), Arc::clone(&session), events);
        (remote, session, cache)
    }

    #[tokio::test]
    async fn test_load_requires_session() {
        let (remote, _session, cache) = setup();
        assert!(matches!(cache.load().await, Err(ClientError::Unauthorized(_))));
        assert!(remote.calls().is_empty());
        assert_eq!(cache.state(), CacheState::Uninitialized);
    }

    #[tokio::test]
    async fn test_load_twice_is_identical() {
        let (remote, session, cache) = setup();
        remote.seed_note("u1", "A", "a");
        remote.seed_note("u1", "B", "b");
        remote.seed_note("u2", "other", "x");
        session.adopt(identity("u1")).unwrap();

        cache.load().await.unwrap();
        let first = cache.notes();
        cache.load().await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(first, cache.notes());
        assert_eq!(cache.state(), CacheState::Ready);
    }

    #[tokio::test]
    async fn test_clear_empties_cache_regardless_of_state() {
        let (remote, session, cache) = setup();
        remote.seed_note("u1", "A", "a");
        session.adopt(identity("u1")).unwrap();
        cache.load().await.unwrap();
        assert_eq!(cache.len(), 1);

        session.clear().unwrap();
        assert_eq!(cache.state(), CacheState::Uninitialized);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_replacing_identity_drops_previous_notes() {
        let (remote, session, cache) = setup();
        remote.seed_note("u1", "mine", "a");
        session.adopt(identity("u1")).unwrap();
        cache.load().await.unwrap();

        session.adopt(identity("u2")).unwrap();
        assert!(cache.notes().is_empty());
        assert_eq!(cache.state(), CacheState::Uninitialized);
    }

    #[tokio::test]
    async fn test_failed_load_restores_previous_state() {
        let (remote, session, cache) = setup();
        remote.seed_note("u1", "A", "a");
        session.adopt(identity("u1")).unwrap();
        cache.load().await.unwrap();

        remote.fail_next(CallKind::ListNotes, RemoteError::Transport("offline".into()));
        assert!(matches!(cache.load().await, Err(ClientError::TransportFailure(_))));
        assert_eq!(cache.state(), CacheState::Ready);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_create_validates_before_remote() {
        let (remote, session, cache) = setup();
        session.adopt(identity("u1")).unwrap();

        for (title, content) in [("", "body"), ("title", ""), ("  ", "  ")] {
            assert!(matches!(
                cache.create(title, content).await,
                Err(ClientError::Validation(_))
            ));
        }
        assert_eq!(remote.call_count(CallKind::CreateNote), 0);
    }

    #[tokio::test]
    async fn test_create_failure_leaves_set_unchanged() {
        let (remote, session, cache) = setup();
        remote.seed_note("u1", "A", "a");
        session.adopt(identity("u1")).unwrap();
        cache.load().await.unwrap();

        remote.fail_next(CallKind::CreateNote, RemoteError::Rejected("quota".into()));
        let err = cache.create("T", "C").await.unwrap_err();
        assert!(matches!(err, ClientError::RemoteRejection(ref r) if r == "quota"));
        assert_eq!(cache.len(), 1);
        assert_eq!(remote.call_count(CallKind::ListNotes), 1);
    }

    #[tokio::test]
    async fn test_duplicate_concurrent_create_is_rejected() {
        let (remote, session, cache) = setup();
        session.adopt(identity("u1")).unwrap();
        remote.yield_before_reply(true);

        let (first, second) = tokio::join!(cache.create("T", "C"), cache.create("T", "C"));
        assert!(first.is_ok());
        assert!(matches!(second, Err(ClientError::AlreadyInProgress(_))));
        assert_eq!(remote.call_count(CallKind::CreateNote), 1);
        assert_eq!(cache.len(), 1);

        // The slot is released once the first create finished
        cache.create("T", "C").await.unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_create_key_ignores_surrounding_whitespace() {
        let (remote, session, cache) = setup();
        session.adopt(identity("u1")).unwrap();
        remote.yield_before_reply(true);

        let (first, second) = tokio::join!(cache.create("T", "C"), cache.create("T ", " C"));
        assert!(first.is_ok());
        assert!(matches!(second, Err(ClientError::AlreadyInProgress(_))));
        assert_eq!(remote.call_count(CallKind::CreateNote), 1);
    }

    #[tokio::test]
    async fn test_state_is_loading_while_listing_is_in_flight() {
        let (remote, session, cache) = setup();
        remote.seed_note("u1", "A", "a");
        session.adopt(identity("u1")).unwrap();
        remote.yield_before_reply(true);

        let mut load = pin!(cache.load());
        assert!(suspends(load.as_mut()).await);
        assert_eq!(cache.state(), CacheState::Loading);

        load.await.unwrap();
        assert_eq!(cache.state(), CacheState::Ready);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_superseded_listing_is_discarded() {
        let (remote, session, cache) = setup();
        remote.seed_note("u1", "A", "a");
        session.adopt(identity("u1")).unwrap();
        remote.yield_before_reply(true);

        let loaded = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&loaded);
        let _sub = cache.events.subscribe(move |event| {
            if let ClientEvent::NotesLoaded { count, .. } = event {
                sink.lock().unwrap().push(*count);
            }
        });

        let mut older = pin!(cache.load());
        assert!(suspends(older.as_mut()).await);
        let mut newer = pin!(cache.load());
        assert!(suspends(newer.as_mut()).await);

        newer.await.unwrap();
        assert_eq!(cache.len(), 1);

        // The older reply now carries a note the newer one never saw
        remote.seed_note("u1", "B", "b");
        older.await.unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.state(), CacheState::Ready);
        assert_eq!(*loaded.lock().unwrap(), vec![1]);
        assert_eq!(remote.call_count(CallKind::ListNotes), 2);
    }

    #[tokio::test]
    async fn test_listing_for_ended_session_is_rejected() {
        let (remote, session, cache) = setup();
        remote.seed_note("u1", "A", "a");
        session.adopt(identity("u1")).unwrap();
        remote.yield_before_reply(true);

        let mut load = pin!(cache.load());
        assert!(suspends(load.as_mut()).await);
        session.clear().unwrap();

        assert!(matches!(load.await, Err(ClientError::InvalidState(_))));
        assert_eq!(cache.state(), CacheState::Uninitialized);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_concurrent_delete_is_rejected() {
        let (remote, session, cache) = setup();
        let a = remote.seed_note("u1", "A", "a");
        remote.seed_note("u1", "B", "b");
        session.adopt(identity("u1")).unwrap();
        cache.load().await.unwrap();
        remote.yield_before_reply(true);

        let (first, second) = tokio::join!(cache.delete(&a), cache.delete(&a));
        assert!(first.unwrap());
        assert!(matches!(second, Err(ClientError::AlreadyInProgress(_))));
        assert_eq!(remote.call_count(CallKind::DeleteNote), 1);
        assert_eq!(cache.len(), 1);

        // Released once the first delete finished; the server no longer has it
        assert!(matches!(cache.delete(&a).await, Err(ClientError::RemoteRejection(_))));
    }

    #[tokio::test]
    async fn test_delete_unknown_id_after_not_found_is_noop() {
        let (remote, session, cache) = setup();
        remote.seed_note("u1", "A", "a");
        session.adopt(identity("u1")).unwrap();
        cache.load().await.unwrap();

        let err = cache.delete("missing").await.unwrap_err();
        assert!(matches!(err, ClientError::RemoteRejection(_)));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_exactly_one() {
        let (remote, session, cache) = setup();
        let a = remote.seed_note("u1", "A", "a");
        remote.seed_note("u1", "B", "b");
        session.adopt(identity("u1")).unwrap();
        cache.load().await.unwrap();

        assert!(cache.delete(&a).await.unwrap());
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&a).is_none());
        assert_eq!(remote.call_count(CallKind::ListNotes), 1);
    }

    #[tokio::test]
    async fn test_delete_requires_id() {
        let (remote, session, cache) = setup();
        session.adopt(identity("u1")).unwrap();
        assert!(matches!(cache.delete(" ").await, Err(ClientError::Validation(_))));
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stale_unauthorized_does_not_clear_newer_session() {
        let (remote, session, cache) = setup();
        session.adopt(identity("u1")).unwrap();
        let old = session.require_session().unwrap();
        session.adopt(identity("u2")).unwrap();

        cache.expire(&old);
        assert_eq!(session.identity(), Some(identity("u2")));
        assert!(remote.calls().is_empty());
    }
}
