//! Core traits for object storage operations.
//!
//! The transformer and stager only ever talk to storage through [`ObjectIO`], so the
//! backing service (S3, GCS, a local directory, an in-memory fake) is chosen by the caller
//! at construction time.

use std::error::Error;
use std::fmt;
use std::io::{Cursor, Read};

// ============================================================================
// Core Error Type
// ============================================================================

/// Error returned by every storage call.
///
/// Storage failures are kept apart from application errors: the transformer inspects
/// [`ErrorKind`] to decide whether a failure is transient before wrapping it.
#[derive(Debug, Clone)]
pub struct CloudIOError {
    pub message: String,
    pub kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authentication,
    Authorization,
    NotFound,
    AlreadyExists,
    InvalidInput,
    Network,
    Timeout,
    ServiceUnavailable,
    RateLimited,
    InternalError,
    Other,
}

impl ErrorKind {
    /// Whether a failure of this kind may succeed if the same call is issued again.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::ServiceUnavailable | Self::RateLimited
        )
    }
}

impl fmt::Display for CloudIOError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl Error for CloudIOError {}

impl CloudIOError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

impl From<std::io::Error> for CloudIOError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        let kind = match err.kind() {
            Io::NotFound => ErrorKind::NotFound,
            Io::PermissionDenied => ErrorKind::Authorization,
            Io::AlreadyExists => ErrorKind::AlreadyExists,
            Io::InvalidInput | Io::InvalidData => ErrorKind::InvalidInput,
            Io::TimedOut => ErrorKind::Timeout,
            Io::Interrupted | Io::WouldBlock => ErrorKind::ServiceUnavailable,
            Io::ConnectionReset | Io::ConnectionAborted | Io::BrokenPipe => ErrorKind::Network,
            _ => ErrorKind::Other,
        };
        Self::new(kind, err.to_string())
    }
}

pub type CloudResult<T> = Result<T, CloudIOError>;

// ============================================================================
// ObjectIO - Object Storage
// ============================================================================

/// Listing and verification view of a stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMetadata {
    pub key: String,
    pub size: u64,
}

/// Trait for object storage operations
pub trait ObjectIO: Send + Sync {
    /// Upload data to object storage.
    ///
    /// The object becomes visible only once the whole buffer has been stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket doesn't exist, permissions are not enough, or the upload fails
    fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> CloudResult<()>;

    /// Download data from object storage
    ///
    /// # Errors
    ///
    /// Returns an error if the object doesn't exist, permissions are not enough, or the download fails
    fn get_object(&self, bucket: &str, key: &str) -> CloudResult<Vec<u8>>;

    /// Open an object for sequential reading.
    ///
    /// Backends that can stream should override this; the default buffers the whole
    /// object through [`ObjectIO::get_object`].
    ///
    /// # Errors
    ///
    /// Returns an error if the object doesn't exist, permissions are not enough, or the open fails
    fn get_object_reader(&self, bucket: &str, key: &str) -> CloudResult<Box<dyn Read + Send>> {
        let data = self.get_object(bucket, key)?;
        Ok(Box::new(Cursor::new(data)))
    }

    /// Delete an object. Deleting a missing object is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if permissions are not enough or the deletion fails
    fn delete_object(&self, bucket: &str, key: &str) -> CloudResult<()>;

    /// List objects with a prefix
    ///
    /// # Errors
    ///
    /// Returns an error if the bucket doesn't exist, permissions are not enough, or the listing fails
    fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> CloudResult<Vec<ObjectMetadata>>;

    /// Check if an object exists
    ///
    /// # Errors
    ///
    /// Returns an error if permissions are not enough or the check fails
    fn object_exists(&self, bucket: &str, key: &str) -> CloudResult<bool>;

    /// Get object metadata without downloading content
    ///
    /// # Errors
    ///
    /// Returns an error if the object doesn't exist, permissions are not enough, or the operation fails
    fn get_metadata(&self, bucket: &str, key: &str) -> CloudResult<ObjectMetadata>;

    /// Copy an object within or between buckets
    ///
    /// # Errors
    ///
    /// Returns an error if the source doesn't exist, permissions are not enough, or the copy fails
    fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> CloudResult<()>;
}

impl<T: ObjectIO + ?Sized> ObjectIO for std::sync::Arc<T> {
    fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> CloudResult<()> {
        (**self).put_object(bucket, key, data)
    }

    fn get_object(&self, bucket: &str, key: &str) -> CloudResult<Vec<u8>> {
        (**self).get_object(bucket, key)
    }

    fn get_object_reader(&self, bucket: &str, key: &str) -> CloudResult<Box<dyn Read + Send>> {
        (**self).get_object_reader(bucket, key)
    }

    fn delete_object(&self, bucket: &str, key: &str) -> CloudResult<()> {
        (**self).delete_object(bucket, key)
    }

    fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> CloudResult<Vec<ObjectMetadata>> {
        (**self).list_objects(bucket, prefix)
    }

    fn object_exists(&self, bucket: &str, key: &str) -> CloudResult<bool> {
        (**self).object_exists(bucket, key)
    }

    fn get_metadata(&self, bucket: &str, key: &str) -> CloudResult<ObjectMetadata> {
        (**self).get_metadata(bucket, key)
    }

    fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> CloudResult<()> {
        (**self).copy_object(src_bucket, src_key, dst_bucket, dst_key)
    }
}
