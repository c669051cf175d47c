//! Error types for disk-image extraction.

use std::path::PathBuf;

/// Alias for `Result<T, imagefs::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by disk-image decoding and filesystem materialization.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The image's on-disk structure is inconsistent with its format.
    #[error("{format}: {reason}")]
    Format {
        /// The image format that failed to parse (`"qcow2"`, `"vmdk"`, `"vdi"`, `"tar"`).
        format: &'static str,
        /// Human-readable description of the structural problem.
        reason: String,
    },

    /// The image is well-formed but uses a feature this core does not support.
    #[error("{format}: unsupported feature: {reason}")]
    UnsupportedFeature {
        /// The image format that requested the feature.
        format: &'static str,
        /// The unsupported feature.
        reason: String,
    },

    /// A password-protected image could not be decrypted.
    #[error("decryption failed: {0}")]
    Crypto(String),

    /// A tar entry's normalized path escapes the destination root.
    #[error("path traversal: entry {entry} escapes root {root}")]
    PathTraversal {
        /// The offending entry path as recorded in the archive.
        entry: String,
        /// The destination root it was extracted relative to.
        root: PathBuf,
    },

    /// No supported filesystem was recognized inside a partition.
    #[error("unrecognized filesystem at partition offset {0}")]
    UnknownFilesystem(u64),

    /// Underlying I/O failure (short read, write failure, temp-file creation, ...).
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Builds a [`Error::Format`] variant.
    pub fn format(format: &'static str, reason: impl Into<String>) -> Self {
        Self::Format {
            format,
            reason: reason.into(),
        }
    }

    /// Builds a [`Error::UnsupportedFeature`] variant.
    pub fn unsupported(format: &'static str, reason: impl Into<String>) -> Self {
        Self::UnsupportedFeature {
            format,
            reason: reason.into(),
        }
    }
}
