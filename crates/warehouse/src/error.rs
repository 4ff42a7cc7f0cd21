//! Errors of the Snowflake source.

use std::time::Duration;

use thiserror::Error;
use transfer::SourceError;

/// Errors raised by the Snowflake source.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// The HTTP client could not be constructed.
    #[error("cannot build http client: {0}")]
    Client(#[source] reqwest::Error),

    /// The SQL API could not be reached or the response body was cut short.
    #[error("snowflake request to {url} failed: {source}")]
    Transport {
        /// Endpoint that was called.
        url: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// The SQL API answered with an error status.
    #[error("snowflake answered {status}{}: {message}", .code.as_deref().map(|c| format!(" (code {c})")).unwrap_or_default())]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Snowflake error code, when present.
        code: Option<String>,
        /// Error message from the response body.
        message: String,
    },

    /// The response body did not have the expected shape.
    #[error("unexpected snowflake response: {message}")]
    Decode {
        /// What was wrong with the body.
        message: String,
    },

    /// The statement was still running when the wait budget ran out.
    #[error("statement {handle} still running after {after:?}")]
    Timeout {
        /// Statement handle.
        handle: String,
        /// Time waited.
        after: Duration,
    },
}

impl WarehouseError {
    fn is_connection_failure(&self) -> bool {
        match self {
            WarehouseError::Client(_) | WarehouseError::Transport { .. } => true,
            WarehouseError::Rejected { status, .. } => matches!(status, 401 | 403 | 404),
            WarehouseError::Decode { .. } | WarehouseError::Timeout { .. } => false,
        }
    }
}

impl From<WarehouseError> for SourceError {
    fn from(e: WarehouseError) -> Self {
        if e.is_connection_failure() {
            SourceError::Unavailable {
                message: e.to_string(),
            }
        } else {
            SourceError::ReadFailed {
                message: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_credentials_are_a_connection_failure() {
        let err = WarehouseError::Rejected {
            status: 401,
            code: Some("390303".into()),
            message: "Invalid OAuth access token.".into(),
        };
        assert_eq!(
            err.to_string(),
            "snowflake answered 401 (code 390303): Invalid OAuth access token."
        );
        assert!(matches!(SourceError::from(err), SourceError::Unavailable { .. }));
    }

    #[test]
    fn sql_errors_are_read_failures() {
        let err = WarehouseError::Rejected {
            status: 422,
            code: None,
            message: "SQL compilation error".into(),
        };
        assert_eq!(err.to_string(), "snowflake answered 422: SQL compilation error");
        assert!(matches!(SourceError::from(err), SourceError::ReadFailed { .. }));
    }
}
