//! Error types for detection and validation.

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors a detector or validator can report.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A validator's HTTP request could not be completed at all (DNS,
    /// connect, TLS — not a non-2xx response, which maps to a verdict).
    #[error("validator transport error: {0}")]
    Transport(String),
}
