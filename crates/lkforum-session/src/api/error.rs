use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    /// No usable access token and no refresh token to mint one
    #[error("Not authenticated")]
    NoSession,

    #[error("Not authenticated - token refresh rejected (HTTP {status})")]
    RefreshRejected { status: u16 },

    #[error("{message}")]
    RequestRejected { status: u16, message: String },

    /// The server answered 401 to an authenticated call
    #[error("Token expired")]
    Expired,

    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

/// Fallback when a JSON error body has no usable `error` field
const UNKNOWN_ERROR: &str = "Unknown error";

/// Maximum length for response bodies written to the log
const MAX_LOGGED_BODY_LENGTH: usize = 500;

impl AuthError {
    /// Errors meaning the session itself is gone: nothing stored, the refresh
    /// token was refused, or the server answered 401.
    ///
    /// This is narrower than what `AuthClient::fetch` logs out on. `fetch`
    /// discards the session after any failure to obtain a token, including
    /// `NetworkError`, `InvalidResponse` and `InvalidUrl` from the refresh.
    pub fn is_session_error(&self) -> bool {
        matches!(
            self,
            AuthError::NoSession | AuthError::RefreshRejected { .. } | AuthError::Expired
        )
    }

    /// HTTP status the server answered with, if it answered
    pub fn status(&self) -> Option<u16> {
        match self {
            AuthError::RefreshRejected { status } | AuthError::RequestRejected { status, .. } => {
                Some(*status)
            }
            AuthError::Expired => Some(StatusCode::UNAUTHORIZED.as_u16()),
            AuthError::NetworkError(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Build a `RequestRejected` from a non-success response body.
    /// `body` is `None` when the body could not be read.
    pub fn rejected(status: StatusCode, body: Option<&[u8]>) -> Self {
        AuthError::RequestRejected {
            status: status.as_u16(),
            message: error_message(status, body),
        }
    }
}

/// Message for a failed response: the JSON `error` field, else the body
/// text, else `HTTP {status}`.
pub fn error_message(status: StatusCode, body: Option<&[u8]>) -> String {
    let fallback = || format!("HTTP {}", status.as_u16());

    let Some(body) = body else {
        return fallback();
    };

    if let Ok(json) = serde_json::from_slice::<Value>(body) {
        return match json.get("error") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Null) | Some(Value::Bool(false)) | Some(Value::String(_)) | None => {
                UNKNOWN_ERROR.to_string()
            }
            Some(other) => other.to_string(),
        };
    }

    match std::str::from_utf8(body) {
        Ok(text) if !text.is_empty() => text.to_string(),
        _ => fallback(),
    }
}

/// Shorten a response body for logging
pub(crate) fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_LOGGED_BODY_LENGTH {
        return body.to_string();
    }
    let mut end = MAX_LOGGED_BODY_LENGTH;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
}
