//! Client configuration: where the two services live and how long to wait on them.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Environment variable overriding [`ClientConfig::user_api_base`]
pub const USER_API_ENV: &str = "NOTES_USER_API";
/// Environment variable overriding [`ClientConfig::note_api_base`]
pub const NOTE_API_ENV: &str = "NOTES_NOTE_API";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the account service (signup, signin, signout)
    #[serde(default = "default_user_api_base")]
    pub user_api_base: String,

    /// Base URL of the note service
    #[serde(default = "default_note_api_base")]
    pub note_api_base: String,

    /// Per-request timeout in seconds (native only; the browser owns fetch timeouts)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Where the native client keeps the session record
    #[serde(default)]
    pub session_file: Option<String>,
}

fn default_user_api_base() -> String {
    "http://localhost:5000/api/user".to_string()
}

fn default_note_api_base() -> String {
    "http://localhost:5000/api/note".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_api_base: default_user_api_base(),
            note_api_base: default_note_api_base(),
            request_timeout_secs: default_request_timeout(),
            session_file: None,
        }
    }
}

impl ClientConfig {
    /// Parse a JSON document. Missing fields take their defaults.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig =
            serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file, or fall back to defaults if it does not exist.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                let config = Self::from_json(&content)?;
                tracing::info!("Loaded configuration from {:?}", path);
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file found at {:?}, using defaults", path);
                Ok(Self::default())
            }
            Err(e) => Err(ConfigError::Read {
                path: path.display().to_string(),
                message: e.to_string(),
            }),
        }
    }

    /// Apply `NOTES_USER_API` / `NOTES_NOTE_API` overrides.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(
            std::env::var(USER_API_ENV).ok(),
            std::env::var(NOTE_API_ENV).ok(),
        )
    }

    /// Replace either base URL, then re-validate.
    pub fn with_overrides(
        mut self,
        user_api_base: Option<String>,
        note_api_base: Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(base) = user_api_base {
            self.user_api_base = base;
        }
        if let Some(base) = note_api_base {
            self.note_api_base = base;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_base("user_api_base", &self.user_api_base)?;
        check_base("note_api_base", &self.note_api_base)?;
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "request_timeout_secs",
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

fn check_base(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|e| ConfigError::Invalid {
        field,
        message: format!("{value}: {e}"),
    })?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::Invalid {
            field,
            message: format!("unsupported scheme {other:?}"),
        }),
    }
}
