//! Errors of the Firebase sinks and their mapping onto [`transfer::SinkError`].

use std::time::Duration;

use thiserror::Error;
use transfer::{RetryPolicy, SinkError};

/// Errors raised by the Firebase adapters.
#[derive(Debug, Error)]
pub enum FirebaseError {
    /// The service-account material is incomplete or malformed.
    #[error("invalid service account: {message}")]
    Credentials {
        /// What is wrong.
        message: String,
    },

    /// The JWT assertion could not be signed.
    #[error("cannot sign token assertion: {message}")]
    Signing {
        /// What went wrong.
        message: String,
    },

    /// The token endpoint refused the assertion.
    #[error("token exchange failed with {status}: {message}")]
    TokenExchange {
        /// HTTP status code.
        status: u16,
        /// Error text from the response.
        message: String,
    },

    /// The HTTP client could not be constructed.
    #[error("cannot build http client: {0}")]
    Client(#[source] reqwest::Error),

    /// The request did not complete.
    #[error("request to {url} failed: {source}")]
    Transport {
        /// Endpoint that was called (without credentials).
        url: String,
        /// Underlying error.
        #[source]
        source: reqwest::Error,
    },

    /// The service answered with an error status.
    #[error("firebase answered {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Error text from the response.
        message: String,
        /// Parsed `Retry-After` header.
        retry_after: Option<Duration>,
    },

    /// The response body did not have the expected shape.
    #[error("unexpected firebase response: {message}")]
    Decode {
        /// What was wrong with the body.
        message: String,
    },

    /// A collection path or document id the store cannot hold.
    #[error("invalid document path: {message}")]
    InvalidPath {
        /// What is wrong with the path.
        message: String,
    },
}

impl From<FirebaseError> for SinkError {
    fn from(e: FirebaseError) -> Self {
        let message = e.to_string();
        match e {
            FirebaseError::Credentials { .. }
            | FirebaseError::Signing { .. }
            | FirebaseError::TokenExchange { .. } => SinkError::Unauthenticated { message },
            FirebaseError::Status { status, .. } if status == 401 || status == 403 => {
                SinkError::Unauthenticated { message }
            }
            FirebaseError::Status {
                status,
                retry_after,
                ..
            } if status == 429 || status >= 500 => SinkError::Request {
                message,
                retry: RetryPolicy::Retryable { after: retry_after },
            },
            FirebaseError::Status { .. } | FirebaseError::Decode { .. } | FirebaseError::Client(_) => {
                SinkError::Request {
                    message,
                    retry: RetryPolicy::NonRetryable,
                }
            }
            FirebaseError::Transport { source, .. } => SinkError::Request {
                message,
                retry: if source.is_timeout() || source.is_connect() || source.is_request() {
                    RetryPolicy::Retryable { after: None }
                } else {
                    RetryPolicy::NonRetryable
                },
            },
            FirebaseError::InvalidPath { .. } => SinkError::Rejected { message },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16, retry_after: Option<Duration>) -> SinkError {
        FirebaseError::Status {
            status: code,
            message: "x".into(),
            retry_after,
        }
        .into()
    }

    #[test]
    fn auth_statuses_are_unauthenticated() {
        assert!(matches!(status(401, None), SinkError::Unauthenticated { .. }));
        assert!(matches!(status(403, None), SinkError::Unauthenticated { .. }));
    }

    #[test]
    fn throttling_and_server_errors_are_retryable() {
        let after = Some(Duration::from_secs(7));
        assert_eq!(status(429, after).retry_policy(), RetryPolicy::Retryable { after });
        assert!(status(503, None).retry_policy().is_retryable());
    }

    #[test]
    fn other_client_errors_are_final() {
        assert_eq!(status(400, None).retry_policy(), RetryPolicy::NonRetryable);
        assert_eq!(status(404, None).retry_policy(), RetryPolicy::NonRetryable);
    }

    #[test]
    fn invalid_paths_are_rejected() {
        let err: SinkError = FirebaseError::InvalidPath {
            message: "even segment count".into(),
        }
        .into();
        assert!(matches!(err, SinkError::Rejected { .. }));
    }
}
