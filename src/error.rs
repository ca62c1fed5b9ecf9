//! Error taxonomy.
//!
//! Load errors are terminal for the load attempt, decode errors surface on the
//! first offending id, and handle errors only exist at the host boundary.

use std::path::PathBuf;

use thiserror::Error;

/// Failure to turn a model artifact into a [`Model`](crate::Model).
#[derive(Debug, Error)]
pub enum ModelLoadError {
    /// The artifact is truncated, inconsistent or otherwise malformed.
    #[error("corrupt model artifact: {reason}")]
    Corrupt { reason: String },
    /// No UNKNOWN piece while byte fallback is disabled.
    #[error("model has no UNKNOWN piece and byte fallback is disabled")]
    MissingUnknown,
    /// The artifact was written by a newer format revision.
    #[error("unsupported artifact version {found} (this build reads up to {supported})")]
    UnsupportedVersion { found: u16, supported: u16 },
    #[error("failed to read model artifact {path:?}")]
    IoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ModelLoadError {
    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        ModelLoadError::Corrupt {
            reason: reason.into(),
        }
    }
}

/// Failure to map token ids back to text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("token id {id} is outside the vocabulary (size {vocab_size})")]
    UnknownId { id: i64, vocab_size: usize },
}

/// A host handle that does not refer to a loaded model.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("invalid model handle {0}")]
pub struct InvalidHandle(pub i32);

/// Failure to serialize a model back into the artifact format.
#[derive(Debug, Error)]
pub enum ArtifactWriteError {
    #[error("failed to serialize model config")]
    Config(#[from] toml::ser::Error),
    #[error("piece {id} is {len} bytes, longer than the record format allows")]
    PieceTooLong { id: u32, len: usize },
    #[error("artifact section of {len} bytes exceeds the format limit")]
    SectionTooLarge { len: usize },
}

/// Any failure at the host-call boundary.
#[derive(Debug, Error)]
pub enum HostError {
    #[error(transparent)]
    Load(#[from] ModelLoadError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    InvalidHandle(#[from] InvalidHandle),
    #[error("no model handles left")]
    HandlesExhausted,
}
