//! # partbeam
//!
//! Turns raw CSV drops into a **key-partitioned Parquet layout** in object storage.
//!
//! Two components cooperate through storage paths only:
//!
//! - The [`Stager`] downloads one remote archive and writes each member to `raw-data/{name}`.
//! - The [`PartitionTransformer`] is invoked once per new raw file. It streams the file in
//!   bounded row batches, groups each batch by a partition column, writes one Parquet
//!   artifact per group under `partitioned-data/{label}={value}/`, then archives the source
//!   to `archive/{YYYY-MM-DD}/{name}` and deletes it.
//!
//! ## Key Properties
//!
//! - **Bounded memory** - at most one batch of rows is held at a time
//! - **All or nothing per file** - the source is deleted only after every artifact is
//!   written and the archive copy is verified
//! - **Deterministic artifact names** - re-running a failed file overwrites its earlier
//!   artifacts instead of duplicating them
//! - **Injected storage** - everything goes through the [`ObjectIO`] trait
//!
//! ## Quick Start
//!
//! ```
//! use partbeam::*;
//! use partbeam::io::cloud::{FakeObjectIO, ObjectIO};
//! # use anyhow::Result;
//!
//! # fn main() -> Result<()> {
//! let storage = FakeObjectIO::new();
//! storage.put_object("lake", "raw-data/input.csv", b"id,Country,amount\n1,US,3\n2,FR,4\n")?;
//!
//! let transformer = PartitionTransformer::new(storage, TransformConfig::for_bucket("lake"))?;
//! let report = transformer.process_file(&RawFileRef::new("lake", "raw-data/input.csv"))?;
//!
//! assert_eq!(report.rows, 2);
//! assert_eq!(report.partitions(), vec!["FR", "US"]);
//! assert!(!transformer.storage().object_exists("lake", "raw-data/input.csv")?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! - [`transform`] - The partitioning transformer and its reports
//! - [`stager`] - Archive download and staging
//! - [`partition`] - Grouping, path canonicalization and artifact naming
//! - [`namespace`] - Storage prefixes shared by both components
//! - [`event`] - Invocation payloads and outcomes
//! - [`config`] - Configuration with environment overrides
//! - [`error`] - Transformer error taxonomy
//! - [`io`] - CSV batching, Parquet encoding, archive codecs and object storage
//! - [`telemetry`] - Tracing subscriber setup

pub mod config;
pub mod error;
pub mod event;
pub mod io;
pub mod namespace;
pub mod partition;
pub mod stager;
pub mod telemetry;
pub mod transform;

pub use config::{StagerConfig, TransformConfig};
pub use error::{FailureKind, SchemaError, TransformError};
pub use event::{InvocationOutcome, S3Event};
pub use io::cloud::{CloudIOError, ObjectIO};
pub use namespace::{Namespace, RawFileRef};
pub use stager::{ArchiveFetcher, StageError, StageReport, Stager};
pub use transform::{ArchiveRef, ArtifactRef, FileReport, PartitionTransformer};

#[cfg(feature = "http-fetch")]
pub use stager::HttpFetcher;
