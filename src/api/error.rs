use serde::Deserialize;
use thiserror::Error;

use crate::auth::StorageError;

/// Classified failure of a gateway call. This is the only error type that
/// crosses the library boundary; callers never see raw transport errors.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("unauthorized - credential is missing, invalid, or expired")]
    Unauthorized,

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Common shapes the backend wraps error messages in.
#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    detail: Option<String>,
    error: Option<String>,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data.
    /// The cut lands on a char boundary so multibyte bodies cannot panic.
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut cut = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            format!(
                "{}... (truncated, {} total bytes)",
                &body[..cut],
                body.len()
            )
        }
    }

    /// Classify a non-success HTTP status, extracting the server-provided
    /// message when one is present in the body.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        match status.as_u16() {
            401 => ApiError::Unauthorized,
            code => ApiError::Server {
                status: code,
                message: Self::server_message(body),
            },
        }
    }

    fn server_message(body: &str) -> String {
        if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
            if let Some(message) = parsed.message.or(parsed.detail).or(parsed.error) {
                return message;
            }
        }
        if body.trim().is_empty() {
            "request failed".to_string()
        } else {
            Self::truncate_body(body)
        }
    }

    /// Whether this failure revokes the session (HTTP 401).
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}
