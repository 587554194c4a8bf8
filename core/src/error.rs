//! Error types for the generic data service client.
//!
//! # Design
//! One enum covers every operation. Callers implementing retry-with-refetch
//! need `ConcurrencyConflict` and `Validation` as distinct variants, so write
//! rejections are classified from the status code and the response body
//! rather than surfaced as a single generic HTTP failure. Any other non-2xx
//! response lands in `Server` with the raw status and body.

use thiserror::Error;

pub type Result<T, E = GdsError> = std::result::Result<T, E>;

/// Errors returned by sessions, request builders, response parsers and
/// `DataService` operations.
#[derive(Debug, Error)]
pub enum GdsError {
    /// No base URL or API token could be resolved.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The API token exchange failed or returned a malformed response.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The request never produced an HTTP response.
    #[error("transport error: {0}")]
    Transport(String),

    /// The resource does not exist or is not visible to the caller.
    #[error("resource not found")]
    NotFound,

    /// The caller is not permitted to perform the operation.
    #[error("not authorized (HTTP {status}): {body}")]
    Authorization { status: u16, body: String },

    /// The server refused the request's content type.
    #[error("unsupported media type: {0}")]
    UnsupportedMediaType(String),

    /// The server rejected a write as malformed or incomplete.
    #[error("validation failed (HTTP {status}): {body}")]
    Validation { status: u16, body: String },

    /// The record changed since its `TimeStamp` was issued. Re-fetch before
    /// retrying; the same marker fails again.
    #[error("concurrency conflict (HTTP {status}): {body}")]
    ConcurrencyConflict { status: u16, body: String },

    /// The server returned a status the operation does not expect.
    #[error("HTTP {status}: {body}")]
    Server { status: u16, body: String },

    /// The response body could not be deserialized into the expected type.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl GdsError {
    /// Validation failure raised locally, before any request is sent.
    pub(crate) fn local_validation(msg: impl Into<String>) -> Self {
        GdsError::Validation {
            status: 0,
            body: msg.into(),
        }
    }

    /// Whether the error poisons the session that produced it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GdsError::Configuration(_) | GdsError::Authentication(_))
    }
}
