//! firesync Firebase adapters.
//!
//! Implements [`transfer::DocumentSink`] for the two Firebase stores over
//! their REST APIs:
//!
//! - [`RealtimeSink`]: Realtime Database, `PUT /<collection>/<key>.json`.
//! - [`FirestoreSink`]: Cloud Firestore, `PATCH documents/<collection>/<key>`.
//!
//! Both authenticate through a shared [`AccessTokens`] source.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP transport, OAuth, value encoding, and status
//! mapping live here; the [`transfer`] crate sees only
//! [`transfer::DocumentSink`] and [`transfer::SinkError`].
//!
//! ## Status mapping
//!
//! | Response                     | [`transfer::SinkError`]              |
//! |------------------------------|--------------------------------------|
//! | 401, 403, token failures     | `Unauthenticated`                    |
//! | 429, 5xx, timeouts           | `Request`, retryable (`Retry-After`) |
//! | other 4xx                    | `Request`, not retryable             |
//! | bad collection / document id | `Rejected`                           |

use std::time::Duration;

mod auth;
mod error;
mod firestore;
mod http;
mod realtime;

pub use auth::{sign_assertion, AccessTokens, Credentials, ServiceAccount, GOOGLE_TOKEN_URI, SCOPES};
pub use error::FirebaseError;
pub use firestore::{
    check_collection_path, check_document_id, encode_fields, encode_value, FirestoreSink,
    FIRESTORE_API,
};
pub use realtime::RealtimeSink;

/// Builds the HTTP client shared by the token source and the sinks.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, FirebaseError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("firesync/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(FirebaseError::Client)
}
