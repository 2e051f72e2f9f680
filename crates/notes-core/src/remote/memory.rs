//! In-memory remote authority for testing.
//!
//! Behaves like the real service closely enough to drive the client end to end:
//! codes must be requested before they can be verified, notes get server ids
//! and timestamps, and an expired session answers `Unauthorized`. Every call is
//! recorded so tests can assert on what went over the wire.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use super::{Ack, RemoteAuthority, RemoteError, Result};
use crate::identity::{Identity, SignupProfile};
use crate::note::Note;

/// A call as observed by the fake server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    RequestSignupCode { email: String },
    CompleteSignup { email: String },
    RequestSigninCode { email: String },
    CompleteSignin { email: String },
    SignOut,
    ListNotes { user_id: String },
    CreateNote { user_id: String, title: String },
    DeleteNote { note_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    RequestSignupCode,
    CompleteSignup,
    RequestSigninCode,
    CompleteSignin,
    SignOut,
    ListNotes,
    CreateNote,
    DeleteNote,
}

impl RemoteCall {
    pub fn kind(&self) -> CallKind {
        match self {
            RemoteCall::RequestSignupCode { .. } => CallKind::RequestSignupCode,
            RemoteCall::CompleteSignup { .. } => CallKind::CompleteSignup,
            RemoteCall::RequestSigninCode { .. } => CallKind::RequestSigninCode,
            RemoteCall::CompleteSignin { .. } => CallKind::CompleteSignin,
            RemoteCall::SignOut => CallKind::SignOut,
            RemoteCall::ListNotes { .. } => CallKind::ListNotes,
            RemoteCall::CreateNote { .. } => CallKind::CreateNote,
            RemoteCall::DeleteNote { .. } => CallKind::DeleteNote,
        }
    }
}

struct FakeState {
    code: String,
    outstanding_codes: HashSet<String>,
    accounts: HashMap<String, Identity>,
    notes: Vec<Note>,
    next_user: u64,
    next_note: u64,
    clock: i64,
    session_valid: bool,
    failures: HashMap<CallKind, VecDeque<RemoteError>>,
    calls: Vec<RemoteCall>,
}

impl FakeState {
    fn take_failure(&mut self, kind: CallKind) -> Option<RemoteError> {
        self.failures.get_mut(&kind).and_then(VecDeque::pop_front)
    }

    fn require_session(&self) -> Result<()> {
        if self.session_valid {
            Ok(())
        } else {
            Err(RemoteError::Unauthorized("Session expired".into()))
        }
    }

    fn check_code(&mut self, email: &str, otp: &str) -> Result<()> {
        if !self.outstanding_codes.contains(email) || otp != self.code {
            return Err(RemoteError::Rejected("Invalid or expired OTP".into()));
        }
        self.outstanding_codes.remove(email);
        Ok(())
    }

    fn tick(&mut self) -> chrono::DateTime<Utc> {
        self.clock += 1;
        Utc.timestamp_opt(self.clock, 0).single().unwrap_or_default()
    }
}

pub struct InMemoryRemote {
    state: Mutex<FakeState>,
    yield_first: AtomicBool,
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                code: "123456".into(),
                outstanding_codes: HashSet::new(),
                accounts: HashMap::new(),
                notes: Vec::new(),
                next_user: 1,
                next_note: 1,
                clock: 1_700_000_000,
                session_valid: true,
                failures: HashMap::new(),
                calls: Vec::new(),
            }),
            yield_first: AtomicBool::new(false),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The code every emailed challenge will accept.
    pub fn set_code(&self, code: &str) {
        self.state().code = code.to_string();
    }

    /// Register an existing account so signin can succeed.
    pub fn register(&self, identity: Identity) {
        self.state().accounts.insert(identity.email.clone(), identity);
    }

    /// Insert a note directly on the server side. Returns its id.
    pub fn seed_note(&self, owner_id: &str, title: &str, content: &str) -> String {
        let mut state = self.state();
        let id = format!("n{}", state.next_note);
        state.next_note += 1;
        let ts = state.tick();
        state.notes.push(Note {
            id: id.clone(),
            owner_id: owner_id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            created_at: ts,
            updated_at: ts,
        });
        id
    }

    /// Make the next call of `kind` fail with `err` (queued, first in first out).
    pub fn fail_next(&self, kind: CallKind, err: RemoteError) {
        self.state().failures.entry(kind).or_default().push_back(err);
    }

    /// Invalidate the server-side session out of band.
    pub fn expire_session(&self) {
        self.state().session_valid = false;
    }

    /// Suspend once before answering, so concurrent callers interleave.
    pub fn yield_before_reply(&self, enabled: bool) {
        self.yield_first.store(enabled, Ordering::Relaxed);
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state().calls.clone()
    }

    pub fn call_count(&self, kind: CallKind) -> usize {
        self.state().calls.iter().filter(|c| c.kind() == kind).count()
    }

    /// Server-side truth for a user's notes.
    pub fn notes_of(&self, user_id: &str) -> Vec<Note> {
        self.state()
            .notes
            .iter()
            .filter(|n| n.owner_id == user_id)
            .cloned()
            .collect()
    }

    /// Record the call, optionally suspend, then report any scripted failure.
    async fn begin(&self, call: RemoteCall) -> Result<()> {
        let kind = call.kind();
        self.state().calls.push(call);
        if self.yield_first.load(Ordering::Relaxed) {
            YieldNow { yielded: false }.await;
        }
        match self.state().take_failure(kind) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

fn sent() -> Ack {
    Ack {
        message: Some("OTP sent successfully".into()),
    }
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl RemoteAuthority for InMemoryRemote {
    async fn request_signup_code(&self, email: &str) -> Result<Ack> {
        self.begin(RemoteCall::RequestSignupCode {
            email: email.to_string(),
        })
        .await?;
        let mut state = self.state();
        if state.accounts.contains_key(email) {
            return Err(RemoteError::Rejected("User already exists".into()));
        }
        state.outstanding_codes.insert(email.to_string());
        Ok(sent())
    }

    async fn complete_signup(&self, profile: &SignupProfile, otp: &str) -> Result<Identity> {
        self.begin(RemoteCall::CompleteSignup {
            email: profile.email.clone(),
        })
        .await?;
        let mut state = self.state();
        state.check_code(&profile.email, otp)?;
        // Skip ids already taken by registered accounts
        let user_id = loop {
            let candidate = format!("u{}", state.next_user);
            state.next_user += 1;
            if !state.accounts.values().any(|a| a.user_id == candidate) {
                break candidate;
            }
        };
        let identity = Identity {
            user_id,
            email: profile.email.clone(),
            name: Some(profile.name.clone()),
        };
        state.accounts.insert(profile.email.clone(), identity.clone());
        state.session_valid = true;
        Ok(identity)
    }

    async fn request_signin_code(&self, email: &str) -> Result<Ack> {
        self.begin(RemoteCall::RequestSigninCode {
            email: email.to_string(),
        })
        .await?;
        let mut state = self.state();
        if !state.accounts.contains_key(email) {
            return Err(RemoteError::Rejected("User not found".into()));
        }
        state.outstanding_codes.insert(email.to_string());
        Ok(sent())
    }

    async fn complete_signin(&self, email: &str, otp: &str) -> Result<Identity> {
        self.begin(RemoteCall::CompleteSignin {
            email: email.to_string(),
        })
        .await?;
        let mut state = self.state();
        state.check_code(email, otp)?;
        let identity = state
            .accounts
            .get(email)
            .cloned()
            .ok_or_else(|| RemoteError::Rejected("User not found".into()))?;
        state.session_valid = true;
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<Ack> {
        self.begin(RemoteCall::SignOut).await?;
        let mut state = self.state();
        state.require_session()?;
        state.session_valid = false;
        Ok(Ack {
            message: Some("Signed out successfully".into()),
        })
    }

    async fn list_notes(&self, user_id: &str) -> Result<Vec<Note>> {
        self.begin(RemoteCall::ListNotes {
            user_id: user_id.to_string(),
        })
        .await?;
        let state = self.state();
        state.require_session()?;
        Ok(state
            .notes
            .iter()
            .filter(|n| n.owner_id == user_id)
            .cloned()
            .collect())
    }

    async fn create_note(&self, user_id: &str, title: &str, content: &str) -> Result<Ack> {
        self.begin(RemoteCall::CreateNote {
            user_id: user_id.to_string(),
            title: title.to_string(),
        })
        .await?;
        self.state().require_session()?;
        self.seed_note(user_id, title, content);
        Ok(Ack {
            message: Some("Note created successfully".into()),
        })
    }

    async fn delete_note(&self, note_id: &str) -> Result<()> {
        self.begin(RemoteCall::DeleteNote {
            note_id: note_id.to_string(),
        })
        .await?;
        let mut state = self.state();
        state.require_session()?;
        let pos = state
            .notes
            .iter()
            .position(|n| n.id == note_id)
            .ok_or_else(|| RemoteError::Rejected("Note not found".into()))?;
        state.notes.remove(pos);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_code_must_be_requested_first() {
        let remote = InMemoryRemote::new();
        remote.register(Identity {
            user_id: "u1".into(),
            email: "a@b.com".into(),
            name: None,
        });

        let err = remote.complete_signin("a@b.com", "123456").await.unwrap_err();
        assert!(matches!(err, RemoteError::Rejected(_)));

        remote.request_signin_code("a@b.com").await.unwrap();
        let identity = remote.complete_signin("a@b.com", "123456").await.unwrap();
        assert_eq!(identity.user_id, "u1");

        // Codes are single use
        assert!(remote.complete_signin("a@b.com", "123456").await.is_err());
    }

    #[tokio::test]
    async fn test_scripted_failure_is_consumed_once() {
        let remote = InMemoryRemote::new();
        remote.fail_next(CallKind::ListNotes, RemoteError::Transport("offline".into()));

        assert!(remote.list_notes("u1").await.is_err());
        assert!(remote.list_notes("u1").await.is_ok());
        assert_eq!(remote.call_count(CallKind::ListNotes), 2);
    }

    #[tokio::test]
    async fn test_expired_session_is_unauthorized() {
        let remote = InMemoryRemote::new();
        remote.expire_session();
        let err = remote.create_note("u1", "t", "c").await.unwrap_err();
        assert!(matches!(err, RemoteError::Unauthorized(_)));
        assert!(remote.notes_of("u1").is_empty());
    }
}
