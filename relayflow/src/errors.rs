//! Error types for the relayflow delivery engine.
//!
//! Failures are grouped by where they happen: encoding of a job payload,
//! the transport call itself, a non-success response from the external
//! system, or a statement inside a SQL transaction. Every error converts into
//! a [`JobError`] so it can travel inside an outcome.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Status code attached to payloads that cannot be encoded or decoded.
pub const STATUS_BAD_REQUEST: u16 = 400;
/// Status code attached to jobs interrupted by cancellation.
pub const STATUS_CLIENT_CLOSED: u16 = 499;
/// Status code attached to transport and transaction failures.
pub const STATUS_INTERNAL: u16 = 500;

/// The main error type for relayflow operations.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A payload could not be serialized or deserialized.
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// The external call could not be completed.
    #[error("{0}")]
    Transport(#[from] TransportError),

    /// The external system answered with a failure status.
    #[error("Application error ({status_code}): {message}")]
    Application {
        /// The status returned by the external system.
        status_code: u16,
        /// The response body or message.
        message: String,
    },

    /// A statement failed inside a SQL transaction.
    #[error("{0}")]
    Transaction(#[from] SqlError),

    /// Destination options failed validation.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// A destination or action is not usable as configured.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Delivery was cancelled before the job was attempted.
    #[error("Delivery cancelled: {0}")]
    Cancelled(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Creates an encoding error.
    #[must_use]
    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding(message.into())
    }

    /// Creates an application error from a received status and body.
    #[must_use]
    pub fn application(status_code: u16, message: impl Into<String>) -> Self {
        Self::Application {
            status_code,
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns the status code reported to the scheduler for this error.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Encoding(_) | Self::Validation(_) => STATUS_BAD_REQUEST,
            Self::Application { status_code, .. } => *status_code,
            Self::Cancelled(_) => STATUS_CLIENT_CLOSED,
            Self::Transport(err) if err.is_cancellation() => STATUS_CLIENT_CLOSED,
            Self::Transport(_) | Self::Transaction(_) | Self::Config(_) | Self::Io(_) => {
                STATUS_INTERNAL
            }
        }
    }

    /// Returns true if retrying the same payload can never succeed.
    ///
    /// Only encoding failures are terminal on their own; the terminal nature
    /// of transport and application failures is decided by the destination's
    /// delivery policy.
    #[must_use]
    pub fn is_always_terminal(&self) -> bool {
        matches!(self, Self::Encoding(_))
    }

    /// Converts into the error carried by an outcome.
    #[must_use]
    pub fn to_job_error(&self) -> JobError {
        let message = match self {
            Self::Application { message, .. } => message.clone(),
            other => other.to_string(),
        };
        JobError::new(self.status_code(), message)
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encoding(err.to_string())
    }
}

impl From<RelayError> for JobError {
    fn from(err: RelayError) -> Self {
        err.to_job_error()
    }
}

/// Error carried inside an outcome and surfaced to the scheduler's job log.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{status_code}: {message}")]
pub struct JobError {
    /// The status code (received from the external system or canonical).
    pub status_code: u16,
    /// The response body or error message.
    pub message: String,
}

impl JobError {
    /// Creates a new job error.
    #[must_use]
    pub fn new(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code,
            message: message.into(),
        }
    }

    /// Creates the canonical "Bad Request" error returned by a failed marshal.
    #[must_use]
    pub fn bad_request() -> Self {
        Self::new(STATUS_BAD_REQUEST, "Bad Request")
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("status_code".to_string(), serde_json::json!(self.status_code));
        map.insert("message".to_string(), serde_json::json!(self.message));
        map
    }
}

/// Errors raised by a transport client before any response was received.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The connection could not be established (refused, DNS failure).
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The call did not complete in time.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// The call was cancelled by the caller.
    #[error("Request cancelled: {0}")]
    Cancelled(String),

    /// Any other client-side failure.
    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Creates a connection error.
    #[must_use]
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect(message.into())
    }

    /// Creates a timeout error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout(message.into())
    }

    /// Creates a cancellation error.
    #[must_use]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled(message.into())
    }

    /// Creates a generic transport error.
    #[must_use]
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Returns true if the failure is a cancellation.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }
}

/// Error raised by a SQL connection or transaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SqlError {
    /// The driver message.
    pub message: String,
    /// The query that failed, if any.
    pub query: Option<String>,
}

impl SqlError {
    /// Creates a new SQL error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            query: None,
        }
    }

    /// Attaches the failing query.
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

/// A single problem found while validating destination options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validation {
    /// What is wrong.
    pub message: String,
    /// Where in the options tree the problem is.
    pub path: Vec<String>,
}

/// Error raised when destination options fail validation.
///
/// All problems are collected before returning so the operator sees every
/// missing option at once.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}: {}", summarize(.validations))]
pub struct ValidationError {
    /// The error message.
    pub message: String,
    /// The individual problems.
    pub validations: Vec<Validation>,
}

fn summarize(validations: &[Validation]) -> String {
    validations
        .iter()
        .map(|v| format!("{} ({})", v.message, v.path.join(".")))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    /// Creates an empty validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            validations: Vec::new(),
        }
    }

    /// Records a problem at the given path.
    pub fn push<S: AsRef<str>>(&mut self, message: impl Into<String>, path: &[S]) {
        self.validations.push(Validation {
            message: message.into(),
            path: path.iter().map(|s| s.as_ref().to_string()).collect(),
        });
    }

    /// Returns true if no problem was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.validations.is_empty()
    }

    /// Returns `Ok(())` when nothing was recorded, or `Err(self)` otherwise.
    pub fn into_result(self) -> Result<(), Self> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(RelayError::encoding("bad").status_code(), 400);
        assert_eq!(RelayError::application(422, "nope").status_code(), 422);
        assert_eq!(RelayError::from(TransportError::connect("refused")).status_code(), 500);
        assert_eq!(RelayError::from(TransportError::cancelled("stop")).status_code(), 499);
        assert_eq!(RelayError::from(SqlError::new("syntax")).status_code(), 500);
    }

    #[test]
    fn test_application_error_keeps_body() {
        let job_error = RelayError::application(413, "{\"error\":\"too large\"}").to_job_error();
        assert_eq!(job_error.status_code, 413);
        assert_eq!(job_error.message, "{\"error\":\"too large\"}");
    }

    #[test]
    fn test_serde_json_error_is_encoding() {
        let err: RelayError = serde_json::from_str::<serde_json::Value>("{").unwrap_err().into();
        assert!(err.is_always_terminal());
    }

    #[test]
    fn test_validation_error_collects() {
        let mut err = ValidationError::new("destination/amplitude: Failed to load");
        assert!(err.clone().into_result().is_ok());

        err.push("Amplitude API key must be set", &["Options", "Destinations", "amplitude", "APIKey"]);
        let err = err.into_result().unwrap_err();
        assert_eq!(err.validations.len(), 1);
        assert!(err.to_string().contains("Options.Destinations.amplitude.APIKey"));
    }

    #[test]
    fn test_job_error_to_dict() {
        let dict = JobError::bad_request().to_dict();
        assert_eq!(dict.get("status_code").unwrap(), 400);
        assert_eq!(dict.get("message").unwrap(), "Bad Request");
    }
}
