//! NotesClient: the one object a front end holds.
//!
//! Owns the session controller, both OTP flows and the note cache, and wires
//! them together: a verified code is adopted as the session and triggers a
//! load, sign-out clears the session and the cache. Every failed user action
//! is also published as [`ClientEvent::OperationFailed`].

use std::sync::Arc;

use tracing::{info, warn};

use crate::cache::{CacheState, NoteCache};
use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, EventBus, SharedEventBus, now_millis};
use crate::identity::{CodeRequest, Identity};
use crate::note::Note;
use crate::otp::{OtpAttempt, OtpChallengeFlow};
use crate::remote::{Ack, RemoteAuthority, RemoteError};
use crate::session::AuthSessionController;
use crate::storage::IdentityStore;

pub struct NotesClient<R: RemoteAuthority> {
    remote: Arc<R>,
    session: Arc<AuthSessionController>,
    notes: NoteCache<R>,
    signup: OtpChallengeFlow<R>,
    signin: OtpChallengeFlow<R>,
    events: SharedEventBus,
}

impl<R: RemoteAuthority> NotesClient<R> {
    pub fn new(remote: Arc<R>, store: Box<dyn IdentityStore>) -> Self {
        let events = EventBus::shared();
        let session = Arc::new(AuthSessionController::new(store, events.clone()));
        Self {
            notes: NoteCache::new(Arc::clone(&remote), Arc::clone(&session), events.clone()),
            signup: OtpChallengeFlow::signup(Arc::clone(&remote), events.clone()),
            signin: OtpChallengeFlow::signin(Arc::clone(&remote), events.clone()),
            remote,
            session,
            events,
        }
    }

    /// Subscribe here to receive [`ClientEvent`]s.
    pub fn events(&self) -> &SharedEventBus {
        &self.events
    }

    pub fn session(&self) -> &AuthSessionController {
        &self.session
    }

    pub fn identity(&self) -> Option<Identity> {
        self.session.identity()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_present()
    }

    pub fn notes(&self) -> Vec<Note> {
        self.notes.notes()
    }

    pub fn note(&self, note_id: &str) -> Option<Note> {
        self.notes.get(note_id)
    }

    pub fn cache_state(&self) -> CacheState {
        self.notes.state()
    }

    pub fn signup_attempt(&self) -> OtpAttempt {
        self.signup.attempt()
    }

    pub fn signin_attempt(&self) -> OtpAttempt {
        self.signin.attempt()
    }

    fn report<T>(&self, operation: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.events.emit(ClientEvent::OperationFailed {
                operation: operation.to_string(),
                kind: e.kind(),
                message: e.to_string(),
                timestamp: now_millis(),
            });
        }
        result
    }

    /// Adopt the persisted identity, if any, and load its notes.
    ///
    /// Returns the identity still held afterwards: a restored session the
    /// server no longer honours is cleared by the load.
    pub async fn restore(&self) -> Result<Option<Identity>> {
        let restored = self.session.restore();
        if self.report("restore session", restored)?.is_none() {
            return Ok(None);
        }
        let loaded = self.notes.load().await;
        // The identity stands even if its notes could not be fetched
        let _ = self.report("load notes", loaded);
        Ok(self.session.identity())
    }

    pub async fn request_signup_code(&self, request: CodeRequest) -> Result<Ack> {
        let result = self.signup.request_code(request).await;
        self.report("request signup code", result)
    }

    pub async fn request_signin_code(&self, email: &str) -> Result<Ack> {
        let result = self.signin.request_code(CodeRequest::signin(email)).await;
        self.report("request signin code", result)
    }

    pub async fn verify_signup_code(&self, code: &str) -> Result<Identity> {
        let result = self.complete(&self.signup, code).await;
        self.report("verify signup code", result)
    }

    pub async fn verify_signin_code(&self, code: &str) -> Result<Identity> {
        let result = self.complete(&self.signin, code).await;
        self.report("verify signin code", result)
    }

    async fn complete(&self, flow: &OtpChallengeFlow<R>, code: &str) -> Result<Identity> {
        let epoch = self.session.epoch();
        let identity = flow.verify_code(code).await?;
        if !self.session.adopt_if_current(identity.clone(), epoch)? {
            return Err(ClientError::InvalidState(
                "session changed while the code was being verified".into(),
            ));
        }
        let loaded = self.notes.load().await;
        let _ = self.report("load notes", loaded);
        Ok(identity)
    }

    pub fn cancel_signup(&self) -> Result<()> {
        self.report("cancel signup", self.signup.cancel())
    }

    pub fn cancel_signin(&self) -> Result<()> {
        self.report("cancel signin", self.signin.cancel())
    }

    /// End the session on the server, then locally.
    ///
    /// A server that already forgot the session counts as success. Any other
    /// failure keeps the local session so the user can retry.
    pub async fn sign_out(&self) -> Result<()> {
        let result = match self.remote.sign_out().await {
            Ok(_) => self.clear_session(),
            Err(RemoteError::Unauthorized(reason)) => {
                info!("Server session already ended: {}", reason);
                self.clear_session()
            }
            Err(err) => {
                warn!("Sign-out failed: {}", err);
                Err(err.into())
            }
        };
        self.report("sign out", result)
    }

    /// Drop the local session and every cached note without contacting the server.
    pub fn clear_session(&self) -> Result<()> {
        let cleared = self.session.clear();
        self.notes.invalidate();
        cleared
    }

    pub async fn load_notes(&self) -> Result<()> {
        let result = self.notes.load().await;
        self.report("load notes", result)
    }

    pub async fn create_note(&self, title: &str, content: &str) -> Result<()> {
        let result = self.notes.create(title, content).await;
        self.report("create note", result)
    }

    pub async fn delete_note(&self, note_id: &str) -> Result<bool> {
        let result = self.notes.delete(note_id).await;
        self.report("delete note", result)
    }
}
