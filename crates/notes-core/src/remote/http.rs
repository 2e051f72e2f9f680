//! JSON-over-HTTP implementation of [`RemoteAuthority`].
//!
//! Two base URLs are involved: the user API (`/signup`, `/signin`, `/signout`)
//! and the note API (`/allnotes`, `/createnote`, `/deletenote`). Every response
//! is an envelope `{ success, message, ... }`; failures may instead carry
//! `{ error: { message } }`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Ack, RemoteAuthority, RemoteError, Result};
use crate::config::ClientConfig;
use crate::identity::{Identity, SignupProfile};
use crate::note::Note;

const SEND_OTP_FAILED: &str = "Failed to send OTP.";
const SIGNUP_FAILED: &str = "Failed to sign up.";
const SIGNIN_FAILED: &str = "Failed to sign in.";
const SIGNOUT_FAILED: &str = "Failed to sign out.";
const LIST_FAILED: &str = "Failed to load notes.";
const CREATE_FAILED: &str = "Failed to save note.";
const DELETE_FAILED: &str = "An error occurred while deleting the note.";

pub struct HttpRemote {
    client: Client,
    user_api: String,
    note_api: String,
}

impl HttpRemote {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = build_client(config)
            .map_err(|e| RemoteError::Transport(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            user_api: config.user_api_base.trim_end_matches('/').to_string(),
            note_api: config.note_api_base.trim_end_matches('/').to_string(),
        })
    }

    fn user_url(&self, path: &str) -> String {
        format!("{}/{}", self.user_api, path)
    }

    fn note_url(&self, path: &str) -> String {
        format!("{}/{}", self.note_api, path)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        fallback: &str,
    ) -> Result<Envelope<T>> {
        let response = with_credentials(request)
            .send()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        debug!(status = status.as_u16(), bytes = body.len(), "Remote response");
        interpret(status, &body, fallback)
    }
}

#[cfg(not(target_arch = "wasm32"))]
fn build_client(config: &ClientConfig) -> reqwest::Result<Client> {
    Client::builder()
        .cookie_store(true)
        .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
        .build()
}

#[cfg(target_arch = "wasm32")]
fn build_client(_config: &ClientConfig) -> reqwest::Result<Client> {
    Client::builder().build()
}

#[cfg(target_arch = "wasm32")]
fn with_credentials(request: RequestBuilder) -> RequestBuilder {
    request.fetch_credentials_include()
}

#[cfg(not(target_arch = "wasm32"))]
fn with_credentials(request: RequestBuilder) -> RequestBuilder {
    request
}

// ========== Wire format ==========

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(flatten)]
    payload: T,
}

impl<T> Envelope<T> {
    fn ack(&self) -> Ack {
        Ack {
            message: self.message.clone(),
        }
    }
}

/// Failure body; the reason lives in `message` or `error.message`.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl ErrorBody {
    fn reason(self) -> Option<String> {
        self.message
            .filter(|m| !m.trim().is_empty())
            .or_else(|| match self.error {
                Some(serde_json::Value::String(s)) => Some(s),
                Some(serde_json::Value::Object(map)) => map
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string),
                _ => None,
            })
    }
}

#[derive(Debug, Deserialize)]
struct NoPayload {}

#[derive(Debug, Deserialize)]
struct UserPayload {
    #[serde(default)]
    user: Option<Identity>,
}

#[derive(Debug, Deserialize)]
struct NotesPayload {
    #[serde(default)]
    notes: Vec<WireNote>,
}

#[derive(Debug, Deserialize)]
struct WireNote {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "userId")]
    user_id: String,
    #[serde(rename = "Title", default)]
    title: String,
    #[serde(rename = "Content", default)]
    content: String,
    #[serde(rename = "createdAt", default)]
    created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", default)]
    updated_at: DateTime<Utc>,
}

impl From<WireNote> for Note {
    fn from(wire: WireNote) -> Self {
        Note {
            id: wire.id,
            owner_id: wire.user_id,
            title: wire.title,
            content: wire.content,
            created_at: wire.created_at,
            updated_at: wire.updated_at,
        }
    }
}

#[derive(Serialize)]
struct EmailBody<'a> {
    email: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignupBody<'a> {
    name: &'a str,
    date_of_birth: &'a str,
    email: &'a str,
    otp: &'a str,
}

#[derive(Serialize)]
struct SigninBody<'a> {
    email: &'a str,
    otp: &'a str,
}

#[derive(Serialize)]
struct CreateNoteBody<'a> {
    #[serde(rename = "Title")]
    title: &'a str,
    #[serde(rename = "Content")]
    content: &'a str,
    #[serde(rename = "userId")]
    user_id: &'a str,
}

/// Classify a raw response into success payload or [`RemoteError`].
fn interpret<T: DeserializeOwned>(status: StatusCode, body: &str, fallback: &str) -> Result<Envelope<T>> {
    let reason = || {
        serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(ErrorBody::reason)
            .unwrap_or_else(|| fallback.to_string())
    };

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(RemoteError::Unauthorized(reason()));
    }
    if !status.is_success() {
        return Err(RemoteError::Rejected(reason()));
    }

    let envelope: Envelope<T> = serde_json::from_str(body)
        .map_err(|e| RemoteError::Transport(format!("Invalid response body: {e}")))?;
    if !envelope.success {
        return Err(RemoteError::Rejected(reason()));
    }
    Ok(envelope)
}

fn identity_from(envelope: Envelope<UserPayload>, fallback: &str) -> Result<Identity> {
    envelope
        .payload
        .user
        .ok_or_else(|| RemoteError::Rejected(format!("{fallback} (response carried no user)")))
}

#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
impl RemoteAuthority for HttpRemote {
    async fn request_signup_code(&self, email: &str) -> Result<Ack> {
        let request = self
            .client
            .post(self.user_url("signup/send-otp"))
            .json(&EmailBody { email });
        let envelope: Envelope<NoPayload> = self.call(request, SEND_OTP_FAILED).await?;
        Ok(envelope.ack())
    }

    async fn complete_signup(&self, profile: &SignupProfile, otp: &str) -> Result<Identity> {
        let request = self.client.post(self.user_url("signup")).json(&SignupBody {
            name: &profile.name,
            date_of_birth: &profile.date_of_birth,
            email: &profile.email,
            otp,
        });
        let envelope: Envelope<UserPayload> = self.call(request, SIGNUP_FAILED).await?;
        identity_from(envelope, SIGNUP_FAILED)
    }

    async fn request_signin_code(&self, email: &str) -> Result<Ack> {
        let request = self
            .client
            .post(self.user_url("signin/send-otp"))
            .json(&EmailBody { email });
        let envelope: Envelope<NoPayload> = self.call(request, SEND_OTP_FAILED).await?;
        Ok(envelope.ack())
    }

    async fn complete_signin(&self, email: &str, otp: &str) -> Result<Identity> {
        let request = self
            .client
            .post(self.user_url("signin"))
            .json(&SigninBody { email, otp });
        let envelope: Envelope<UserPayload> = self.call(request, SIGNIN_FAILED).await?;
        identity_from(envelope, SIGNIN_FAILED)
    }

    async fn sign_out(&self) -> Result<Ack> {
        let request = self.client.post(self.user_url("signout"));
        let envelope: Envelope<NoPayload> = self.call(request, SIGNOUT_FAILED).await?;
        Ok(envelope.ack())
    }

    async fn list_notes(&self, user_id: &str) -> Result<Vec<Note>> {
        let path = format!("allnotes/{}", urlencoding::encode(user_id));
        let request = self.client.get(self.note_url(&path));
        let envelope: Envelope<NotesPayload> = self.call(request, LIST_FAILED).await?;
        Ok(envelope.payload.notes.into_iter().map(Note::from).collect())
    }

    async fn create_note(&self, user_id: &str, title: &str, content: &str) -> Result<Ack> {
        let request = self
            .client
            .post(self.note_url("createnote"))
            .json(&CreateNoteBody {
                title,
                content,
                user_id,
            });
        let envelope: Envelope<NoPayload> = self.call(request, CREATE_FAILED).await?;
        Ok(envelope.ack())
    }

    async fn delete_note(&self, note_id: &str) -> Result<()> {
        let path = format!("deletenote/{}", urlencoding::encode(note_id));
        let request = self.client.delete(self.note_url(&path));
        let _: Envelope<NoPayload> = self.call(request, DELETE_FAILED).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notes_listing_decodes_server_field_names() {
        let body = r#"{
            "success": true,
            "notes": [
                {"_id": "n1", "userId": "u1", "Title": "Title A", "Content": "Body A",
                 "createdAt": "2024-05-01T10:00:00.000Z", "updatedAt": "2024-05-01T10:00:00.000Z"}
            ]
        }"#;
        let envelope: Envelope<NotesPayload> = interpret(StatusCode::OK, body, LIST_FAILED).unwrap();
        let notes: Vec<Note> = envelope.payload.notes.into_iter().map(Note::from).collect();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].id, "n1");
        assert_eq!(notes[0].owner_id, "u1");
        assert_eq!(notes[0].title, "Title A");
    }

    #[test]
    fn test_signin_payload_yields_identity_unchanged() {
        let body = r#"{"success":true,"message":"Signed in","user":{"userId":"u1","email":"a@b.com","name":"Ada"}}"#;
        let envelope: Envelope<UserPayload> = interpret(StatusCode::OK, body, SIGNIN_FAILED).unwrap();
        assert_eq!(envelope.ack().message.as_deref(), Some("Signed in"));
        let identity = identity_from(envelope, SIGNIN_FAILED).unwrap();
        assert_eq!(
            identity,
            Identity {
                user_id: "u1".into(),
                email: "a@b.com".into(),
                name: Some("Ada".into()),
            }
        );
    }

    #[test]
    fn test_unauthorized_status_is_classified() {
        let err = interpret::<NoPayload>(StatusCode::UNAUTHORIZED, r#"{"message":"Session expired"}"#, LIST_FAILED)
            .unwrap_err();
        assert_eq!(err, RemoteError::Unauthorized("Session expired".into()));
    }

    #[test]
    fn test_rejection_reason_from_nested_error() {
        let err = interpret::<NoPayload>(
            StatusCode::BAD_REQUEST,
            r#"{"success":false,"error":{"message":"Invalid OTP"}}"#,
            SIGNUP_FAILED,
        )
        .unwrap_err();
        assert_eq!(err, RemoteError::Rejected("Invalid OTP".into()));
    }

    #[test]
    fn test_success_false_is_a_rejection() {
        let err = interpret::<NoPayload>(StatusCode::OK, r#"{"success":false}"#, CREATE_FAILED).unwrap_err();
        assert_eq!(err, RemoteError::Rejected(CREATE_FAILED.into()));
    }

    #[test]
    fn test_unparsable_success_body_is_transport_failure() {
        let err = interpret::<NoPayload>(StatusCode::OK, "<html>", CREATE_FAILED).unwrap_err();
        assert!(matches!(err, RemoteError::Transport(_)));
    }

    #[test]
    fn test_missing_user_is_rejected() {
        let envelope: Envelope<UserPayload> =
            interpret(StatusCode::OK, r#"{"success":true}"#, SIGNIN_FAILED).unwrap();
        assert!(matches!(identity_from(envelope, SIGNIN_FAILED), Err(RemoteError::Rejected(_))));
    }
}
