//! Identity and the profile data submitted to obtain one.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid"));

/// The verified user record adopted after a successful OTP exchange.
///
/// Serialized in the same camelCase shape the server returns under `user`,
/// which is also the shape of the persisted session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Profile collected by the signup form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupProfile {
    pub name: String,
    /// ISO date, `YYYY-MM-DD`.
    pub date_of_birth: String,
    pub email: String,
}

/// Input to [`crate::OtpChallengeFlow::request_code`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodeRequest {
    Signup(SignupProfile),
    Signin { email: String },
}

impl CodeRequest {
    pub fn signin(email: impl Into<String>) -> Self {
        CodeRequest::Signin {
            email: email.into(),
        }
    }

    pub fn signup(
        name: impl Into<String>,
        date_of_birth: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        CodeRequest::Signup(SignupProfile {
            name: name.into(),
            date_of_birth: date_of_birth.into(),
            email: email.into(),
        })
    }

    pub fn email(&self) -> &str {
        match self {
            CodeRequest::Signup(profile) => &profile.email,
            CodeRequest::Signin { email } => email,
        }
    }

    /// Check the request locally and return a trimmed copy.
    ///
    /// Never touches the network.
    pub fn validated(&self) -> Result<CodeRequest> {
        match self {
            CodeRequest::Signin { email } => Ok(CodeRequest::Signin {
                email: validate_email(email)?,
            }),
            CodeRequest::Signup(profile) => {
                let name = profile.name.trim();
                if name.is_empty() {
                    return Err(ClientError::validation("name is required"));
                }
                let dob = profile.date_of_birth.trim();
                if dob.is_empty() {
                    return Err(ClientError::validation("date of birth is required"));
                }
                NaiveDate::parse_from_str(dob, "%Y-%m-%d").map_err(|_| {
                    ClientError::validation(format!("date of birth must be YYYY-MM-DD, got {dob:?}"))
                })?;
                Ok(CodeRequest::Signup(SignupProfile {
                    name: name.to_string(),
                    date_of_birth: dob.to_string(),
                    email: validate_email(&profile.email)?,
                }))
            }
        }
    }
}

/// Returns the trimmed address if it is well formed.
pub fn validate_email(email: &str) -> Result<String> {
    let email = email.trim();
    if email.is_empty() {
        return Err(ClientError::validation("email is required"));
    }
    if !EMAIL_RE.is_match(email) {
        return Err(ClientError::validation(format!(
            "{email:?} is not a valid email address"
        )));
    }
    Ok(email.to_string())
}
