//! Object storage abstraction.
//!
//! Everything that touches a bucket goes through the [`ObjectIO`] trait. The transformer and
//! stager receive an implementation at construction time instead of reaching for a global
//! client, which keeps the storage lifecycle explicit and lets tests swap in a fake.
//!
//! ## Implementations
//!
//! - [`FakeObjectIO`] - In-memory buckets for unit tests
//! - [`FailingObjectIO`] - Wraps another backend and injects failures per operation and key
//!   prefix, recording every call
//! - [`LocalObjectIO`] - One directory per bucket, atomic rename on write; used by the CLI
//!
//! A provider SDK is plugged in by implementing [`ObjectIO`] for a client wrapper, using
//! [`helpers::run_remote`] for retries and time budgets.
//!
//! ```
//! use partbeam::io::cloud::*;
//!
//! # fn main() -> CloudResult<()> {
//! let storage = FakeObjectIO::new();
//! storage.put_object("bucket", "raw-data/input.csv", b"id,Country\n1,US\n")?;
//! storage.copy_object("bucket", "raw-data/input.csv", "bucket", "archive/input.csv")?;
//! assert!(storage.object_exists("bucket", "archive/input.csv")?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`CloudResult<T>`] where the error is [`CloudIOError`], categorized
//! by [`ErrorKind`]. `Network`, `Timeout`, `ServiceUnavailable` and `RateLimited` are
//! transient and retried by [`helpers::retry_with_backoff`]; everything else fails at once.

pub mod fake;
pub mod helpers;
pub mod local;
pub mod traits;

pub use fake::*;
pub use local::LocalObjectIO;
pub use traits::*;
