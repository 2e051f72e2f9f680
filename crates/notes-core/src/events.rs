//! User-visible notifications emitted by the client.
//!
//! The state machines never show anything themselves; they publish a
//! `ClientEvent` and the presentation layer decides how to surface it.
//! One bus implementation serves both targets: `Arc` + `Mutex` natively,
//! `Rc` + `RefCell` in the browser.

use serde::Serialize;

use crate::error::ErrorKind;

/// Client events for notifications and monitoring.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientEvent {
    /// A one-time code was emailed.
    CodeSent {
        email: String,
        /// Message returned by the server, if any.
        message: Option<String>,
        timestamp: f64,
    },
    /// A submitted code was not accepted.
    VerificationFailed { reason: String, timestamp: f64 },
    /// An identity was adopted (fresh login or restore).
    SessionAdopted {
        #[serde(rename = "userId")]
        user_id: String,
        restored: bool,
        timestamp: f64,
    },
    /// The session was cleared (sign-out or expiry).
    SessionCleared { timestamp: f64 },
    /// The note set was replaced by a full listing.
    NotesLoaded { count: usize, timestamp: f64 },
    /// The server acknowledged a new note.
    NoteCreated {
        message: Option<String>,
        timestamp: f64,
    },
    /// The server acknowledged a deletion.
    NoteDeleted {
        #[serde(rename = "noteId")]
        note_id: String,
        timestamp: f64,
    },
    /// A user action failed and should be reported.
    OperationFailed {
        operation: String,
        kind: ErrorKind,
        message: String,
        timestamp: f64,
    },
}

/// Milliseconds since Unix epoch, for event timestamps.
pub fn now_millis() -> f64 {
    web_time::SystemTime::now()
        .duration_since(web_time::UNIX_EPOCH)
        .map(|d| d.as_millis() as f64)
        .unwrap_or(0.0)
}

// Native listeners may be called from any runtime thread; the browser is
// single-threaded, so there the bounds and the shared pointer are relaxed.

#[cfg(not(target_arch = "wasm32"))]
mod platform {
    pub type Shared<T> = std::sync::Arc<T>;
    pub type WeakShared<T> = std::sync::Weak<T>;
    pub type Slot<T> = std::sync::Mutex<T>;

    /// Listeners must be callable from any runtime thread.
    pub trait ThreadBound: Send + Sync {}
    impl<T: Send + Sync> ThreadBound for T {}

    pub fn with_slot<T, R>(slot: &Slot<T>, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut slot.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

#[cfg(target_arch = "wasm32")]
mod platform {
    pub type Shared<T> = std::rc::Rc<T>;
    pub type WeakShared<T> = std::rc::Weak<T>;
    pub type Slot<T> = std::cell::RefCell<T>;

    pub trait ThreadBound {}
    impl<T> ThreadBound for T {}

    pub fn with_slot<T, R>(slot: &Slot<T>, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut slot.borrow_mut())
    }
}

use std::collections::BTreeMap;

use platform::{Shared, Slot, WeakShared, with_slot};
pub use platform::ThreadBound;

/// A closure that receives [`ClientEvent`]s.
pub trait Listener: Fn(&ClientEvent) + ThreadBound + 'static {}
impl<F: Fn(&ClientEvent) + ThreadBound + 'static> Listener for F {}

/// Handle to the bus shared by the session, both OTP flows and the note cache.
pub type SharedEventBus = Shared<EventBus>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    /// Ordered by id, so listeners run in subscription order
    listeners: BTreeMap<u64, Shared<dyn Listener>>,
}

/// Fan-out of [`ClientEvent`]s to the presentation layer.
///
/// Listeners run outside the registry lock, so a listener may subscribe or
/// drop a [`Subscription`] while being called.
#[derive(Default)]
pub struct EventBus {
    registry: Slot<Registry>,
}

/// Keeps a listener registered. Dropping it removes the listener.
#[must_use = "the listener is removed as soon as the subscription is dropped"]
pub struct Subscription {
    bus: WeakShared<EventBus>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            // Released after the registry lock so the listener's captures can
            // touch the bus while dropping.
            let removed = with_slot(&bus.registry, |r| r.listeners.remove(&self.id));
            drop(removed);
        }
    }
}

impl EventBus {
    pub fn shared() -> SharedEventBus {
        Shared::new(Self::default())
    }

    pub fn subscribe<F>(self: &Shared<Self>, listener: F) -> Subscription
    where
        F: Fn(&ClientEvent) + ThreadBound + 'static,
    {
        let listener: Shared<dyn Listener> = Shared::new(listener);
        let id = with_slot(&self.registry, |r| {
            let id = r.next_id;
            r.next_id += 1;
            r.listeners.insert(id, listener);
            id
        });
        Subscription {
            bus: Shared::downgrade(self),
            id,
        }
    }

    pub fn listener_count(&self) -> usize {
        with_slot(&self.registry, |r| r.listeners.len())
    }

    /// Deliver `event` to every listener registered when the call began.
    pub fn emit(&self, event: ClientEvent) {
        let listeners: Vec<_> =
            with_slot(&self.registry, |r| r.listeners.values().cloned().collect());
        for listener in listeners {
            listener(&event);
        }
    }
}
