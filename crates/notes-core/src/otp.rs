//! OtpChallengeFlow: the two-step email → code → identity exchange.
//!
//! ```text
//! Idle ──request_code──> RequestingCode ──ok──> CodeSent ──verify_code──> Verifying ──ok──> Succeeded
//!                              │                   ▲                          │
//!                              └──err──> Failed <──┼──────────err─────────────┘
//!                                          │       │
//!                                          └───────┘ verify again (a code was sent)
//! ```
//!
//! Request and verify are independent, individually retryable steps so that a
//! delivery failure and a wrong code surface as distinct errors. At most one
//! remote call is outstanding per flow; a second call while one is in flight
//! fails with `AlreadyInProgress` without touching the network.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};
use crate::events::{ClientEvent, SharedEventBus, now_millis};
use crate::identity::{CodeRequest, Identity};
use crate::remote::{Ack, RemoteAuthority};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FlowKind {
    Signup,
    Signin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OtpPhase {
    Idle,
    RequestingCode,
    CodeSent,
    Verifying,
    Succeeded,
    Failed,
}

impl OtpPhase {
    /// A remote call is in flight.
    pub fn is_busy(&self) -> bool {
        matches!(self, OtpPhase::RequestingCode | OtpPhase::Verifying)
    }
}

/// Read-only view of the attempt in progress, for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpAttempt {
    pub kind: FlowKind,
    pub email: String,
    pub otp_requested: bool,
    pub phase: OtpPhase,
    pub last_error: Option<String>,
}

struct AttemptState {
    phase: OtpPhase,
    /// Profile the outstanding code was requested for
    request: Option<CodeRequest>,
    otp_requested: bool,
    last_error: Option<String>,
}

impl AttemptState {
    fn idle() -> Self {
        Self {
            phase: OtpPhase::Idle,
            request: None,
            otp_requested: false,
            last_error: None,
        }
    }
}

pub struct OtpChallengeFlow<R: RemoteAuthority> {
    kind: FlowKind,
    remote: Arc<R>,
    state: Mutex<AttemptState>,
    events: SharedEventBus,
}

impl<R: RemoteAuthority> OtpChallengeFlow<R> {
    pub fn new(kind: FlowKind, remote: Arc<R>, events: SharedEventBus) -> Self {
        Self {
            kind,
            remote,
            state: Mutex::new(AttemptState::idle()),
            events,
        }
    }

    pub fn signup(remote: Arc<R>, events: SharedEventBus) -> Self {
        Self::new(FlowKind::Signup, remote, events)
    }

    pub fn signin(remote: Arc<R>, events: SharedEventBus) -> Self {
        Self::new(FlowKind::Signin, remote, events)
    }

    pub fn kind(&self) -> FlowKind {
        self.kind
    }

    fn lock(&self) -> MutexGuard<'_, AttemptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn phase(&self) -> OtpPhase {
        self.lock().phase
    }

    pub fn attempt(&self) -> OtpAttempt {
        let state = self.lock();
        OtpAttempt {
            kind: self.kind,
            email: state
                .request
                .as_ref()
                .map(|r| r.email().to_string())
                .unwrap_or_default(),
            otp_requested: state.otp_requested,
            phase: state.phase,
            last_error: state.last_error.clone(),
        }
    }

    /// Ask the server to email a code for `request`.
    ///
    /// Input is validated locally first; invalid input never reaches the server.
    pub async fn request_code(&self, request: CodeRequest) -> Result<Ack> {
        let request = request.validated()?;
        match (self.kind, &request) {
            (FlowKind::Signup, CodeRequest::Signup(_)) | (FlowKind::Signin, CodeRequest::Signin { .. }) => {}
            (kind, _) => {
                return Err(ClientError::validation(format!(
                    "{kind:?} flow was given the wrong kind of request"
                )));
            }
        }

        let previous = {
            let mut state = self.lock();
            if state.phase.is_busy() {
                return Err(ClientError::AlreadyInProgress("code request"));
            }
            state.phase = OtpPhase::RequestingCode;
            state.request.replace(request.clone())
        };

        debug!(kind = ?self.kind, email = request.email(), "Requesting one-time code");
        let result = match &request {
            CodeRequest::Signup(profile) => self.remote.request_signup_code(&profile.email).await,
            CodeRequest::Signin { email } => self.remote.request_signin_code(email).await,
        };

        match result {
            Ok(ack) => {
                {
                    let mut state = self.lock();
                    state.phase = OtpPhase::CodeSent;
                    state.otp_requested = true;
                    state.last_error = None;
                }
                info!(kind = ?self.kind, email = request.email(), "One-time code sent");
                self.events.emit(ClientEvent::CodeSent {
                    email: request.email().to_string(),
                    message: ack.message.clone(),
                    timestamp: now_millis(),
                });
                Ok(ack)
            }
            Err(err) => {
                {
                    let mut state = self.lock();
                    // A code sent earlier stays verifiable for the profile it was sent to
                    if state.otp_requested {
                        state.request = previous;
                    }
                    state.phase = OtpPhase::Failed;
                    state.last_error = Some(err.reason().to_string());
                }
                warn!(kind = ?self.kind, "Code request failed: {}", err);
                Err(err.into())
            }
        }
    }

    /// Submit the emailed code. On success the server's identity is returned as-is.
    pub async fn verify_code(&self, code: &str) -> Result<Identity> {
        let code = code.trim();
        if code.is_empty() {
            return Err(ClientError::validation("code is required"));
        }

        let request = {
            let mut state = self.lock();
            match state.phase {
                OtpPhase::RequestingCode | OtpPhase::Verifying => {
                    return Err(ClientError::AlreadyInProgress("code verification"));
                }
                OtpPhase::CodeSent => {}
                OtpPhase::Failed if state.otp_requested => {}
                phase => {
                    return Err(ClientError::InvalidState(format!(
                        "no code has been sent (phase {phase:?})"
                    )));
                }
            }
            let request = state
                .request
                .clone()
                .ok_or_else(|| ClientError::InvalidState("no code has been sent".into()))?;
            state.phase = OtpPhase::Verifying;
            request
        };

        debug!(kind = ?self.kind, email = request.email(), "Verifying one-time code");
        let result = match &request {
            CodeRequest::Signup(profile) => self.remote.complete_signup(profile, code).await,
            CodeRequest::Signin { email } => self.remote.complete_signin(email, code).await,
        };

        match result {
            Ok(identity) => {
                *self.lock() = AttemptState {
                    phase: OtpPhase::Succeeded,
                    ..AttemptState::idle()
                };
                info!(kind = ?self.kind, user_id = %identity.user_id, "One-time code accepted");
                Ok(identity)
            }
            Err(err) => {
                {
                    let mut state = self.lock();
                    state.phase = OtpPhase::Failed;
                    state.last_error = Some(err.reason().to_string());
                }
                warn!(kind = ?self.kind, "Code verification failed: {}", err);
                self.events.emit(ClientEvent::VerificationFailed {
                    reason: err.reason().to_string(),
                    timestamp: now_millis(),
                });
                Err(err.into())
            }
        }
    }

    /// Abandon the attempt and return to `Idle`.
    pub fn cancel(&self) -> Result<()> {
        let mut state = self.lock();
        if state.phase.is_busy() {
            return Err(ClientError::AlreadyInProgress("cancel while a request is in flight"));
        }
        *state = AttemptState::idle();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::remote::memory::CallKind;
    use crate::remote::{InMemoryRemote, RemoteError};

    fn signin_flow() -> (Arc<InMemoryRemote>, OtpChallengeFlow<InMemoryRemote>) {
        let remote = Arc::new(InMemoryRemote::new());
        remote.register(Identity {
            user_id: "u1".into(),
            email: "a@b.com".into(),
            name: Some("Ada".into()),
        });
        let flow = OtpChallengeFlow::signin(Arc::clone(&remote), EventBus::shared());
        (remote, flow)
    }

    #[tokio::test]
    async fn test_malformed_email_never_reaches_server() {
        let (remote, flow) = signin_flow();
        for email in ["", "nope", "a@b", "x y@z.com"] {
            let err = flow.request_code(CodeRequest::signin(email)).await.unwrap_err();
            assert!(matches!(err, ClientError::Validation(_)));
        }
        assert!(remote.calls().is_empty());
        assert_eq!(flow.phase(), OtpPhase::Idle);
    }

    #[tokio::test]
    async fn test_wrong_request_kind_is_rejected_locally() {
        let (remote, flow) = signin_flow();
        let err = flow
            .request_code(CodeRequest::signup("Ada", "1990-01-01", "a@b.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Validation(_)));
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_verify_from_idle_is_invalid_state() {
        let (remote, flow) = signin_flow();
        let err = flow.verify_code("123456").await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidState(_)));
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_signin_happy_path() {
        let (_remote, flow) = signin_flow();
        flow.request_code(CodeRequest::signin("a@b.com")).await.unwrap();
        assert_eq!(flow.phase(), OtpPhase::CodeSent);
        assert!(flow.attempt().otp_requested);

        let identity = flow.verify_code("123456").await.unwrap();
        assert_eq!(identity.user_id, "u1");
        assert_eq!(flow.phase(), OtpPhase::Succeeded);
        assert!(!flow.attempt().otp_requested);
    }

    #[tokio::test]
    async fn test_wrong_code_allows_retry_without_new_request() {
        let (remote, flow) = signin_flow();
        flow.request_code(CodeRequest::signin("a@b.com")).await.unwrap();

        let err = flow.verify_code("000000").await.unwrap_err();
        assert!(matches!(err, ClientError::RemoteRejection(_)));
        let attempt = flow.attempt();
        assert_eq!(attempt.phase, OtpPhase::Failed);
        assert!(attempt.otp_requested);
        assert_eq!(attempt.last_error.as_deref(), Some("Invalid or expired OTP"));

        flow.verify_code("123456").await.unwrap();
        assert_eq!(remote.call_count(CallKind::RequestSigninCode), 1);
        assert_eq!(remote.call_count(CallKind::CompleteSignin), 2);
    }

    #[tokio::test]
    async fn test_failed_request_without_code_blocks_verify() {
        let (remote, flow) = signin_flow();
        remote.fail_next(
            CallKind::RequestSigninCode,
            RemoteError::Rejected("Too many requests".into()),
        );

        let err = flow.request_code(CodeRequest::signin("a@b.com")).await.unwrap_err();
        assert!(matches!(err, ClientError::RemoteRejection(_)));
        assert_eq!(flow.phase(), OtpPhase::Failed);
        assert_eq!(flow.attempt().last_error.as_deref(), Some("Too many requests"));

        let err = flow.verify_code("123456").await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_concurrent_code_requests_dispatch_once() {
        let (remote, flow) = signin_flow();
        remote.yield_before_reply(true);

        let (first, second) = tokio::join!(
            flow.request_code(CodeRequest::signin("a@b.com")),
            flow.request_code(CodeRequest::signin("a@b.com")),
        );

        assert!(first.is_ok());
        assert!(matches!(second, Err(ClientError::AlreadyInProgress(_))));
        assert_eq!(remote.call_count(CallKind::RequestSigninCode), 1);
    }

    #[tokio::test]
    async fn test_concurrent_verification_dispatches_once() {
        let (remote, flow) = signin_flow();
        flow.request_code(CodeRequest::signin("a@b.com")).await.unwrap();
        remote.yield_before_reply(true);

        let (first, second) = tokio::join!(flow.verify_code("123456"), flow.verify_code("123456"));

        assert_eq!(first.unwrap().user_id, "u1");
        assert!(matches!(second, Err(ClientError::AlreadyInProgress(_))));
        assert_eq!(remote.call_count(CallKind::CompleteSignin), 1);
        assert_eq!(flow.phase(), OtpPhase::Succeeded);
    }

    #[tokio::test]
    async fn test_cancel_resets_attempt() {
        let (_remote, flow) = signin_flow();
        flow.request_code(CodeRequest::signin("a@b.com")).await.unwrap();
        flow.cancel().unwrap();

        let attempt = flow.attempt();
        assert_eq!(attempt.phase, OtpPhase::Idle);
        assert!(attempt.email.is_empty());
        assert!(matches!(
            flow.verify_code("123456").await,
            Err(ClientError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_signup_identity_matches_server_payload() {
        let remote = Arc::new(InMemoryRemote::new());
        let flow = OtpChallengeFlow::signup(Arc::clone(&remote), EventBus::shared());

        flow.request_code(CodeRequest::signup("Ada", "1990-01-02", "new@b.com"))
            .await
            .unwrap();
        let identity = flow.verify_code(" 123456 ").await.unwrap();

        assert_eq!(
            identity,
            Identity {
                user_id: "u1".into(),
                email: "new@b.com".into(),
                name: Some("Ada".into()),
            }
        );
    }
}
