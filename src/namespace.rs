//! Storage namespace contract shared by the stager and the transformer.
//!
//! The stager writes every archive member under [`Namespace::raw_prefix`]; the transformer is
//! only ever triggered for keys that [`Namespace::accepts`]. Outputs land under
//! [`Namespace::partitioned_prefix`] and archived sources under [`Namespace::archive_prefix`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const RAW_PREFIX: &str = "raw-data/";
pub const PARTITIONED_PREFIX: &str = "partitioned-data/";
pub const ARCHIVE_PREFIX: &str = "archive/";

/// Identity of one raw file in object storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawFileRef {
    pub bucket: String,
    pub key: String,
}

impl RawFileRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Final path segment of the key.
    #[must_use]
    pub fn basename(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

impl fmt::Display for RawFileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Namespace {
    pub raw_prefix: String,
    pub partitioned_prefix: String,
    pub archive_prefix: String,
}

impl Default for Namespace {
    fn default() -> Self {
        Self {
            raw_prefix: RAW_PREFIX.to_string(),
            partitioned_prefix: PARTITIONED_PREFIX.to_string(),
            archive_prefix: ARCHIVE_PREFIX.to_string(),
        }
    }
}

impl Namespace {
    /// Key under which the stager places an archive member.
    #[must_use]
    pub fn incoming_key(&self, member_name: &str) -> String {
        format!("{}{}", self.raw_prefix, member_name.trim_start_matches('/'))
    }

    /// Whether the transformer should pick up `key`: it must sit under the raw prefix and
    /// name an object rather than a folder marker.
    #[must_use]
    pub fn accepts(&self, key: &str) -> bool {
        key.strip_prefix(&self.raw_prefix)
            .is_some_and(|rest| !rest.is_empty() && !rest.ends_with('/'))
    }

    /// Directory of one partition: `{partitioned}{label}={value}/`.
    ///
    /// `canonical_value` must already be canonicalized.
    #[must_use]
    pub fn partition_dir(&self, label: &str, canonical_value: &str) -> String {
        format!("{}{label}={canonical_value}/", self.partitioned_prefix)
    }

    /// `{archive}{YYYY-MM-DD}/{basename}`.
    #[must_use]
    pub fn archive_key(&self, date: NaiveDate, file: &RawFileRef) -> String {
        format!(
            "{}{}/{}",
            self.archive_prefix,
            date.format("%Y-%m-%d"),
            file.basename()
        )
    }
}
