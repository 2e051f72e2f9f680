//! notes-core: session and note cache logic for the notes client.
//!
//! This crate provides the core functionality for:
//! - Email one-time-code signup and signin (`OtpChallengeFlow`)
//! - Holding, persisting and restoring the signed-in identity (`AuthSessionController`)
//! - A session-gated cache of the user's notes (`NoteCache`)
//! - RemoteAuthority and IdentityStore trait abstractions
//!
//! Front ends (the CLI and the browser bindings) drive everything through
//! [`NotesClient`].

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod note;
pub mod otp;
pub mod remote;
pub mod session;
pub mod storage;

pub use cache::{CacheState, NoteCache};
pub use client::NotesClient;
pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, ErrorKind};
pub use events::{ClientEvent, EventBus, SharedEventBus, Subscription};
pub use identity::{CodeRequest, Identity, SignupProfile, validate_email};
pub use note::{Note, NoteSet};
pub use otp::{FlowKind, OtpAttempt, OtpChallengeFlow, OtpPhase};
pub use remote::{Ack, HttpRemote, InMemoryRemote, RemoteAuthority, RemoteError};
pub use session::{AuthSessionController, SessionTicket};
#[cfg(not(target_arch = "wasm32"))]
pub use storage::FileIdentityStore;
pub use storage::{IdentityStore, InMemoryIdentityStore, PersistedSession, StorageError};
