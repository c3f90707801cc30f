/// Error taxonomy for submissions
///
/// Every variant is converted into a `Failed` state at the submission
/// boundary; the `Err` value is returned as well so scripted callers can
/// branch on it.
use thiserror::Error;

/// Local precondition violated. Never reaches the network.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please select at least one image")]
    NoFiles,

    #[error("Too many images selected: {actual} (maximum is {max})")]
    TooManyFiles { max: usize, actual: usize },

    #[error("A submission is already in progress")]
    AlreadyInFlight,
}

/// Failure raised below the HTTP status line
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("could not reach server: {0}")]
    Connect(String),

    #[error("request timed out")]
    Timeout,

    #[error("failed to read response: {0}")]
    Body(String),

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else if err.is_body() || err.is_decode() {
            Self::Body(err.to_string())
        } else {
            Self::Other(err.to_string())
        }
    }
}

/// Outcome of a rejected or failed submission
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with a non-success status
    #[error("{message}")]
    Server { status: u16, message: String },

    #[error("Request cancelled")]
    Cancelled,
}

impl SubmitError {
    /// Build a server error, preferring the body text over a status placeholder
    pub fn from_response(status: u16, body: &str) -> Self {
        Self::Server {
            status,
            message: server_message(status, body),
        }
    }

    /// Message shown to the user in the `Failed` state
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

/// The generation server reports failures either as plain text or as
/// `{"error": ...}` / `{"detail": ...}` JSON. Unwrap the JSON forms; plain
/// text is passed through as received.
fn server_message(status: u16, body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return format!("Request failed with status {}", status);
    }

    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(trimmed) {
        for key in ["error", "detail", "message"] {
            if let Some(serde_json::Value::String(text)) = map.get(key) {
                if !text.is_empty() {
                    return text.clone();
                }
            }
        }
    }

    body.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_message_uses_plain_body() {
        let err = SubmitError::from_response(500, "server overloaded");
        assert_eq!(err.user_message(), "server overloaded");
    }

    #[test]
    fn test_server_message_keeps_surrounding_whitespace() {
        let body = "Traceback (most recent call last):\n  File \"app.py\"\nKeyError: 'clips'\n";
        let err = SubmitError::from_response(500, body);
        assert_eq!(err.user_message(), body);

        let err = SubmitError::from_response(500, "  padded  ");
        assert_eq!(err.user_message(), "  padded  ");

        let err = SubmitError::from_response(500, "\n{\"error\": \"No clips were generated.\"}\n");
        assert_eq!(err.user_message(), "No clips were generated.");
    }

    #[test]
    fn test_server_message_empty_body_uses_status() {
        let err = SubmitError::from_response(502, "   ");
        assert_eq!(err.user_message(), "Request failed with status 502");
    }

    #[test]
    fn test_server_message_unwraps_json() {
        let err = SubmitError::from_response(500, r#"{"error": "No clips were generated."}"#);
        assert_eq!(err.user_message(), "No clips were generated.");

        let err = SubmitError::from_response(500, r#"{"detail": "Server is missing keys"}"#);
        assert_eq!(err.user_message(), "Server is missing keys");
    }

    #[test]
    fn test_server_message_keeps_unrecognized_json() {
        let err = SubmitError::from_response(400, r#"{"code": 7}"#);
        assert_eq!(err.user_message(), r#"{"code": 7}"#);
    }

    #[test]
    fn test_validation_messages() {
        let err: SubmitError = ValidationError::TooManyFiles { max: 2, actual: 3 }.into();
        assert!(matches!(err, SubmitError::Validation(_)));
        assert_eq!(
            err.user_message(),
            "Too many images selected: 3 (maximum is 2)"
        );
    }
}
