//! RemoteAuthority trait for the account and note service.
//!
//! Implementations:
//! - `HttpRemote` - JSON over HTTP via reqwest (fetch in the browser)
//! - `InMemoryRemote` - scripted fake for testing
//!
//! The session credential travels with every request (browser cookies or the
//! native cookie store); it never surfaces through this trait.

use async_trait::async_trait;
use thiserror::Error;

use crate::identity::{Identity, SignupProfile};
use crate::note::Note;

pub mod http;
pub mod memory;

pub use http::HttpRemote;
pub use memory::{InMemoryRemote, RemoteCall};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// The server answered with a failure indicator.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// The server no longer accepts the session credential.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// No usable response was obtained.
    #[error("Transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, RemoteError>;

impl RemoteError {
    /// The human-readable reason, without the kind prefix.
    pub fn reason(&self) -> &str {
        match self {
            RemoteError::Rejected(r) | RemoteError::Unauthorized(r) | RemoteError::Transport(r) => r,
        }
    }
}

/// Acknowledgement carrying the server's human-readable message, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ack {
    pub message: Option<String>,
}

/// Remote account and note service.
///
/// On native platforms, implementations must be `Send + Sync` for use across threads.
/// On WASM (wasm32), these bounds are relaxed since WASM is single-threaded.
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg(not(target_arch = "wasm32"))]
pub trait RemoteAuthority: Send + Sync {
    /// Ask the server to email a signup code
    async fn request_signup_code(&self, email: &str) -> Result<Ack>;

    /// Verify a signup code and create the account
    async fn complete_signup(&self, profile: &SignupProfile, otp: &str) -> Result<Identity>;

    /// Ask the server to email a signin code
    async fn request_signin_code(&self, email: &str) -> Result<Ack>;

    /// Verify a signin code and establish the session
    async fn complete_signin(&self, email: &str, otp: &str) -> Result<Identity>;

    /// End the server-side session
    async fn sign_out(&self) -> Result<Ack>;

    /// Full listing of a user's notes, in server order
    async fn list_notes(&self, user_id: &str) -> Result<Vec<Note>>;

    /// Create a note; the server assigns id and timestamps
    async fn create_note(&self, user_id: &str, title: &str, content: &str) -> Result<Ack>;

    /// Delete a note by id
    async fn delete_note(&self, note_id: &str) -> Result<()>;
}

/// Remote account and note service (WASM version without Send + Sync).
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg(target_arch = "wasm32")]
pub trait RemoteAuthority {
    /// Ask the server to email a signup code
    async fn request_signup_code(&self, email: &str) -> Result<Ack>;

    /// Verify a signup code and create the account
    async fn complete_signup(&self, profile: &SignupProfile, otp: &str) -> Result<Identity>;

    /// Ask the server to email a signin code
    async fn request_signin_code(&self, email: &str) -> Result<Ack>;

    /// Verify a signin code and establish the session
    async fn complete_signin(&self, email: &str, otp: &str) -> Result<Identity>;

    /// End the server-side session
    async fn sign_out(&self) -> Result<Ack>;

    /// Full listing of a user's notes, in server order
    async fn list_notes(&self, user_id: &str) -> Result<Vec<Note>>;

    /// Create a note; the server assigns id and timestamps
    async fn create_note(&self, user_id: &str, title: &str, content: &str) -> Result<Ack>;

    /// Delete a note by id
    async fn delete_note(&self, note_id: &str) -> Result<()>;
}
