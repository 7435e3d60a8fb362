//! Error taxonomy for the partitioning transformer.
//!
//! Every variant of [`TransformError`] names the raw file it was raised for. Whatever the
//! variant, the raw file is still at its original location when the error is returned.

use crate::io::cloud::CloudIOError;
use std::fmt;
use thiserror::Error;

/// Header-level rejection of a raw file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("partition field '{field}' not found in header (columns: [{}])", available.join(", "))]
    MissingField { field: String, available: Vec<String> },

    #[error("partition field '{field}' appears more than once in header")]
    DuplicateField { field: String },

    #[error("header could not be read: {message}")]
    Unreadable { message: String },
}

/// Remote call class, used in error reports and time budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOp {
    Read,
    Write,
    Copy,
    Verify,
    Delete,
}

impl fmt::Display for RemoteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Copy => "copy",
            Self::Verify => "verify",
            Self::Delete => "delete",
        })
    }
}

/// Coarse error class reported to the invoker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Validation,
    TransientIo,
    Publish,
    Archive,
}

impl FailureKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "ValidationError",
            Self::TransientIo => "TransientIOError",
            Self::Publish => "PublishError",
            Self::Archive => "ArchiveError",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why processing of one raw file stopped.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The header does not satisfy the configured schema. Not retryable.
    #[error("ValidationError for {file}: {source}")]
    Validation {
        file: String,
        #[source]
        source: SchemaError,
    },

    /// A remote call failed for service reasons after retries. Retry the whole file.
    #[error("TransientIOError for {file} during {operation}: {source}")]
    TransientIo {
        file: String,
        operation: RemoteOp,
        #[source]
        source: CloudIOError,
    },

    /// A group could not be encoded or written. Remaining batches were abandoned.
    #[error("PublishError for {file} (batch {batch}{}): {message}", partition.as_ref().map(|p| format!(", partition '{p}'")).unwrap_or_default())]
    Publish {
        file: String,
        batch: usize,
        partition: Option<String>,
        message: String,
    },

    /// The archive copy could not be confirmed, so the source was not deleted.
    #[error("ArchiveError for {file} -> {archive_key}: {message}")]
    Archive {
        file: String,
        archive_key: String,
        message: String,
    },
}

impl TransformError {
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::Validation { .. } => FailureKind::Validation,
            Self::TransientIo { .. } => FailureKind::TransientIo,
            Self::Publish { .. } => FailureKind::Publish,
            Self::Archive { .. } => FailureKind::Archive,
        }
    }

    /// Whether invoking again for the same file may succeed without intervention.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientIo { .. })
    }

    /// `bucket/key` of the raw file this error belongs to.
    #[must_use]
    pub fn file(&self) -> &str {
        match self {
            Self::Validation { file, .. }
            | Self::TransientIo { file, .. }
            | Self::Publish { file, .. }
            | Self::Archive { file, .. } => file,
        }
    }
}

pub type Result<T> = std::result::Result<T, TransformError>;
