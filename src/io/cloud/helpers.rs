//! Helpers shared by every caller of [`ObjectIO`](super::ObjectIO).
//!
//! - [`retry_with_backoff`] - Retry transient failures with exponential backoff
//! - [`with_timeout`] - Turn an over-budget call into an [`ErrorKind::Timeout`]
//! - [`CallTimeouts`] - Per call-class time budgets (read, write, copy, delete)
//! - [`parse_resource_uri`] - Split `s3://bucket/key` style URIs
//! - [`validate_key_path`] - Reject object keys that cannot be mapped onto a path

use crate::io::cloud::traits::{CloudIOError, CloudResult, ErrorKind};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::warn;

// ============================================================================
// Retry Helper
// ============================================================================

/// Configuration for retry behavior
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A single attempt, no retries.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            backoff_multiplier: 1.0,
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn next_delay(&self, delay_ms: u64) -> u64 {
        let scaled = (delay_ms as f64 * self.backoff_multiplier.max(1.0)).round();
        let scaled = if scaled.is_finite() && scaled < u64::MAX as f64 {
            scaled as u64
        } else {
            u64::MAX
        };
        scaled.min(self.max_delay_ms)
    }
}

/// Retry a storage call with exponential backoff.
///
/// Only failures whose [`ErrorKind::is_transient`] is true are retried; anything else is
/// returned immediately.
///
/// # Errors
///
/// Returns the last error once it is non-transient or `max_attempts` is reached.
pub fn retry_with_backoff<F, T>(config: &RetryConfig, mut operation: F) -> CloudResult<T>
where
    F: FnMut() -> CloudResult<T>,
{
    let mut attempt = 0;
    let mut delay_ms = config.initial_delay_ms;

    loop {
        attempt += 1;
        match operation() {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !err.is_transient() || attempt >= config.max_attempts.max(1) {
                    return Err(err);
                }

                warn!(attempt, delay_ms, error = %err, "transient storage failure, retrying");
                if delay_ms > 0 {
                    std::thread::sleep(Duration::from_millis(delay_ms));
                }
                delay_ms = config.next_delay(delay_ms);
            }
        }
    }
}

// ============================================================================
// Timeout Helper
// ============================================================================

/// Execute an operation against a time budget.
///
/// Blocking storage calls cannot be interrupted from here, so the budget is checked once
/// the call returns: a call that succeeded late is reported as [`ErrorKind::Timeout`],
/// which callers treat as transient.
///
/// # Errors
///
/// Returns an error if the operation itself fails or exceeds `timeout`.
pub fn with_timeout<F, T>(timeout: Duration, operation: F) -> CloudResult<T>
where
    F: FnOnce() -> CloudResult<T>,
{
    let start = Instant::now();
    let result = operation()?;

    if start.elapsed() > timeout {
        Err(CloudIOError::new(
            ErrorKind::Timeout,
            format!("Operation exceeded timeout of {timeout:?}"),
        ))
    } else {
        Ok(result)
    }
}

/// Time budget per remote call class, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallTimeouts {
    pub read_secs: u64,
    pub write_secs: u64,
    pub copy_secs: u64,
    pub delete_secs: u64,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            read_secs: 60,
            write_secs: 60,
            copy_secs: 120,
            delete_secs: 30,
        }
    }
}

impl CallTimeouts {
    #[must_use]
    pub const fn read(&self) -> Duration {
        Duration::from_secs(self.read_secs)
    }

    #[must_use]
    pub const fn write(&self) -> Duration {
        Duration::from_secs(self.write_secs)
    }

    #[must_use]
    pub const fn copy(&self) -> Duration {
        Duration::from_secs(self.copy_secs)
    }

    #[must_use]
    pub const fn delete(&self) -> Duration {
        Duration::from_secs(self.delete_secs)
    }
}

/// Run one remote call under both a time budget and the retry policy.
///
/// Each attempt gets the full budget.
///
/// # Errors
///
/// Returns the last error after retries are exhausted or a non-transient failure.
pub fn run_remote<F, T>(retry: &RetryConfig, timeout: Duration, mut operation: F) -> CloudResult<T>
where
    F: FnMut() -> CloudResult<T>,
{
    retry_with_backoff(retry, || with_timeout(timeout, &mut operation))
}

// ============================================================================
// Resource Utilities
// ============================================================================

/// Parse a resource URI into its scheme and path segments.
///
/// ```
/// use partbeam::io::cloud::helpers::parse_resource_uri;
///
/// let (provider, parts) = parse_resource_uri("s3://my-bucket/raw-data/input.csv").unwrap();
/// assert_eq!(provider, "s3");
/// assert_eq!(parts, vec!["my-bucket", "raw-data", "input.csv"]);
/// ```
///
/// # Errors
///
/// Returns an error if the URI has no `scheme://` part.
pub fn parse_resource_uri(uri: &str) -> CloudResult<(String, Vec<String>)> {
    let parts: Vec<&str> = uri.splitn(2, "://").collect();

    if parts.len() != 2 {
        return Err(CloudIOError::new(
            ErrorKind::InvalidInput,
            format!("Invalid resource URI format: {uri}"),
        ));
    }

    let provider = parts[0].to_string();
    let path_parts: Vec<String> = parts[1]
        .split('/')
        .map(std::string::ToString::to_string)
        .collect();

    Ok((provider, path_parts))
}

/// Validate an object key.
///
/// # Errors
///
/// Returns an error if:
/// - The key path is empty
/// - The key path starts with a forward slash
/// - Any segment is `.` or `..`
pub fn validate_key_path(path: &str) -> CloudResult<()> {
    if path.is_empty() {
        return Err(CloudIOError::new(
            ErrorKind::InvalidInput,
            "Key path cannot be empty",
        ));
    }

    if path.starts_with('/') || path.starts_with('\\') {
        return Err(CloudIOError::new(
            ErrorKind::InvalidInput,
            "Key path cannot start with '/'",
        ));
    }

    if path
        .split(['/', '\\'])
        .any(|segment| segment == "." || segment == "..")
    {
        return Err(CloudIOError::new(
            ErrorKind::InvalidInput,
            format!("Key path cannot contain relative segments: {path}"),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 1,
            max_delay_ms: 2,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_retry_with_backoff() {
        let mut attempts = 0;

        let result = retry_with_backoff(&quick(), || {
            attempts += 1;
            if attempts < 3 {
                Err(CloudIOError::new(ErrorKind::Network, "Temporary failure"))
            } else {
                Ok(42)
            }
        });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts, 3);
    }

    #[test]
    fn test_retry_stops_on_permanent_error() {
        let mut attempts = 0;
        let result: CloudResult<()> = retry_with_backoff(&quick(), || {
            attempts += 1;
            Err(CloudIOError::new(ErrorKind::Authorization, "denied"))
        });

        assert_eq!(result.unwrap_err().kind, ErrorKind::Authorization);
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_retry_gives_up_after_max_attempts() {
        let mut attempts = 0;
        let result: CloudResult<()> = retry_with_backoff(&quick(), || {
            attempts += 1;
            Err(CloudIOError::new(ErrorKind::ServiceUnavailable, "busy"))
        });

        assert!(result.is_err());
        assert_eq!(attempts, 3);
    }

    #[test]
    fn test_with_timeout_reports_overrun() {
        let result = with_timeout(Duration::from_millis(1), || {
            std::thread::sleep(Duration::from_millis(20));
            Ok(())
        });
        assert_eq!(result.unwrap_err().kind, ErrorKind::Timeout);
    }

    #[test]
    fn test_next_delay_is_capped() {
        let config = RetryConfig {
            max_delay_ms: 250,
            ..RetryConfig::default()
        };
        assert_eq!(config.next_delay(100), 200);
        assert_eq!(config.next_delay(200), 250);
    }

    #[test]
    fn test_parse_resource_uri() {
        let (provider, parts) = parse_resource_uri("s3://my-bucket/my-key").unwrap();
        assert_eq!(provider, "s3");
        assert_eq!(parts, vec!["my-bucket", "my-key"]);
        assert!(parse_resource_uri("my-bucket/my-key").is_err());
    }

    #[test]
    fn test_validate_key_path() {
        assert!(validate_key_path("raw-data/input.csv").is_ok());
        assert!(validate_key_path("").is_err());
        assert!(validate_key_path("/etc/passwd").is_err());
        assert!(validate_key_path("raw-data/../secret").is_err());
    }
}
