//! Errors returned by the Apigee management API transport.

use thiserror::Error;

/// A failed call to the Apigee management API.
///
/// Non-2xx responses keep their HTTP status so callers can tell "absent" (404)
/// apart from "rejected" (other 4xx) and "remote fault" (5xx).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// The server answered with a non-2xx status.
    #[error("Status {status}: {body}")]
    Status {
        /// The HTTP status code.
        status: u16,
        /// The response body, as text.
        body: String,
    },

    /// The request never produced a response (DNS, TLS, connection reset, ...).
    #[error("Connection error: {0}")]
    Connection(String),

    /// The request could not be built locally.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ApiError {
    /// Build a status error.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            status,
            body: body.into(),
        }
    }

    /// The HTTP status carried by this error, if the server responded.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the server reported the entity as absent.
    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }

    /// Whether the failure was on the remote side and may succeed on retry.
    pub fn is_server_error(&self) -> bool {
        matches!(self.status_code(), Some(500..=599)) || matches!(self, Self::Connection(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::status(status.as_u16(), err.to_string()),
            None if err.is_builder() => Self::InvalidRequest(err.to_string()),
            None => Self::Connection(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let err = ApiError::status(404, "not here");
        assert!(err.is_not_found());
        assert!(!err.is_server_error());
        assert_eq!(err.status_code(), Some(404));

        let err = ApiError::status(503, "busy");
        assert!(!err.is_not_found());
        assert!(err.is_server_error());

        let err = ApiError::status(409, "conflict");
        assert!(!err.is_not_found());
        assert!(!err.is_server_error());
    }

    #[test]
    fn test_connection_error_has_no_status() {
        let err = ApiError::Connection("reset".to_string());
        assert_eq!(err.status_code(), None);
        assert!(err.is_server_error());
    }

    #[test]
    fn test_display() {
        let err = ApiError::status(400, "bad revision");
        assert_eq!(format!("{}", err), "Status 400: bad revision");
    }
}
