//! Error types for the OCI distribution client.

use thiserror::Error;

/// A specialized `Result` type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy surfaced by this crate.
///
/// Every fallible operation in this crate returns one of these variants. A
/// variant is fatal to the call that produced it unless its documentation
/// says otherwise (only [`Error::AuthChallenge`] is ever recovered from
/// internally, and only once per request).
#[derive(Debug, Error)]
pub enum Error {
    /// A reference, digest, or JSON payload failed to parse.
    #[error("parse error: {0}")]
    ParseError(String),

    /// The operation requires state that is missing or unknowable (e.g. an
    /// unset digest, an unknown stream length during a streaming copy).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The registry or layout returned 404 for a blob, manifest, or tag.
    #[error("not found: {0}")]
    NotFound(String),

    /// A 401/403 challenge could not be satisfied (second occurrence after a
    /// token refresh, or a challenge header that cannot be parsed).
    #[error("authentication challenge failed: {0}")]
    AuthChallenge(String),

    /// A 4xx response other than 401/403, carrying the server's error body
    /// when the registry returned a parseable OCI error document.
    #[error("registry rejected the request ({status}): {message}")]
    Conflict {
        /// The HTTP status code.
        status: u16,
        /// A human-readable message, taken from the server's error body when present.
        message: String,
    },

    /// A 5xx response, or a lower-level transport/IO failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// A computed digest did not match the digest it was checked against.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// The digest that was expected.
        expected: String,
        /// The digest that was actually computed.
        actual: String,
    },

    /// An archive entry's path escapes the extraction destination.
    #[error("path traversal rejected: {0}")]
    PathTraversal(String),

    /// Wraps an I/O failure from the standard library.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Wraps an HTTP transport failure from `reqwest`.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Wraps a `reqwest-middleware` failure (e.g. retry policy exhausted).
    #[error(transparent)]
    HttpMiddleware(#[from] reqwest_middleware::Error),

    /// Wraps a JSON (de)serialization failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Wraps an `oci-spec` model construction failure.
    #[error(transparent)]
    OciSpec(#[from] oci_spec::OciSpecError),

    /// A catch-all for caller-facing glue errors that do not belong to the
    /// taxonomy above.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Shorthand for constructing a [`Error::ParseError`].
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }

    /// Shorthand for constructing a [`Error::InvalidState`].
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Shorthand for constructing a [`Error::NotFound`].
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }
}
