//! Newtype domain identifiers.
//!
//! Every domain concept that has an identity is represented as a distinct newtype
//! wrapping a primitive. This prevents accidentally interchanging, for example,
//! a [`RecordKey`] with a [`CollectionPath`] even though both are `String` under
//! the hood.
//!
//! ## Key rules
//!
//! Keys and path segments must be acceptable to every supported target store.
//! The rules below are the union of the Firebase Realtime Database and
//! Firestore restrictions:
//!
//! - not empty, at most [`MAX_KEY_BYTES`] bytes;
//! - none of `/`, `.`, `#`, `$`, `[`, `]`;
//! - no ASCII control characters.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length of a single key or path segment, in bytes.
pub const MAX_KEY_BYTES: usize = 768;

const FORBIDDEN_KEY_CHARS: [char; 6] = ['/', '.', '#', '$', '[', ']'];

/// Returns `true` if `segment` may be used as a record key or collection segment.
pub fn is_valid_key_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment.len() <= MAX_KEY_BYTES
        && !segment
            .chars()
            .any(|c| c.is_ascii_control() || FORBIDDEN_KEY_CHARS.contains(&c))
}

// ---------------------------------------------------------------------------
// Macro for validated String-wrapped newtypes.
// Generates: struct, new() returning Option<Self>, as_str(), Display.
// ---------------------------------------------------------------------------
macro_rules! string_id {
    (
        $(#[$attr:meta])*
        $name:ident, $is_valid:expr
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, returning `None` if the value breaks the key rules.
            pub fn new(value: impl Into<String>) -> Option<Self> {
                let v = value.into();
                let is_valid: fn(&str) -> bool = $is_valid;
                if is_valid(&v) { Some(Self(v)) } else { None }
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = String;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value.clone())
                    .ok_or_else(|| format!("invalid {}: {:?}", stringify!($name), value))
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Identifiers: UUID-backed (internally generated)
// ---------------------------------------------------------------------------

/// Identifies a single transfer run (one invocation of the job).
///
/// Generated fresh for every CLI invocation; recorded on the root span and in the
/// final report so all activity from a single run can be correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobRunId(Uuid);

impl JobRunId {
    /// Generates a new random run identifier.
    pub fn new_random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for JobRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Identifiers: String-backed
// ---------------------------------------------------------------------------

string_id! {
    /// The primary key of one record; the last segment of its document path.
    RecordKey, is_valid_key_segment
}

string_id! {
    /// Target collection path, e.g. `"issues"` or `"index_align/issues"`.
    ///
    /// One or more `/`-separated segments, each obeying the key rules.
    CollectionPath, |path: &str| path.split('/').all(is_valid_key_segment)
}

impl CollectionPath {
    /// Returns the path segments in order.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Returns the document path `"<collection>/<key>"` for `key`.
    pub fn document_path(&self, key: &RecordKey) -> String {
        format!("{}/{}", self.0, key)
    }
}
