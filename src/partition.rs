//! Partition keys, path canonicalization and artifact naming.
//!
//! Canonicalization rule for a partition value used as a path segment: every byte outside
//! the RFC 3986 unreserved set (`A-Z a-z 0-9 - _ . ~`) is percent-encoded, and the values
//! `.` and `..` have their dots encoded as `%2E`. The rule is a bijection, so downstream
//! readers can recover the original value with a plain percent-decode.
//!
//! The one exception is the empty-key sentinel: an empty cell and a cell that literally
//! holds the sentinel text land in the same partition, and decoding that segment yields
//! the sentinel. Pick a sentinel that cannot occur in the data if the two must stay apart.

use crate::namespace::{Namespace, RawFileRef};
use csv::StringRecord;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Partition used for rows whose key cell is empty. Matches the Hive convention so query
/// engines treat it as the null partition.
pub const DEFAULT_EMPTY_KEY_SENTINEL: &str = "__HIVE_DEFAULT_PARTITION__";

/// Rows of one batch grouped by partition value, in ascending value order.
pub type Groups = BTreeMap<String, Vec<StringRecord>>;

/// The partition value for a raw key cell: the cell itself, or `sentinel` when it is
/// empty. Whitespace is data and is kept as-is.
#[must_use]
pub fn partition_value<'a>(raw: &'a str, sentinel: &'a str) -> &'a str {
    if raw.is_empty() { sentinel } else { raw }
}

/// Percent-encode a partition value for use as a single path segment.
#[must_use]
pub fn canonicalize_segment(value: &str) -> String {
    match value {
        "." => "%2E".to_string(),
        ".." => "%2E%2E".to_string(),
        _ => urlencoding::encode(value).into_owned(),
    }
}

/// Whether `value` survives canonicalization unchanged.
#[must_use]
pub fn is_path_safe(value: &str) -> bool {
    !value.is_empty() && canonicalize_segment(value) == value
}

/// Group rows by the value at `key_index`.
///
/// Pure and order-preserving: rows keep their relative order inside each group. Empty keys
/// collapse into `sentinel`. A row too short to have the key column is grouped under
/// `sentinel` as well; the encoder rejects it later.
pub fn group_by_key(
    rows: impl IntoIterator<Item = StringRecord>,
    key_index: usize,
    sentinel: &str,
) -> Groups {
    let mut groups = Groups::new();
    for row in rows {
        let value = partition_value(row.get(key_index).unwrap_or(""), sentinel).to_string();
        groups.entry(value).or_default().push(row);
    }
    groups
}

/// Deterministic artifact file name for (source file, batch, partition value).
///
/// `part-{batch:05}-{hash16}.parquet`, where `hash16` is the first 16 hex digits of a
/// SHA-256 over the length-prefixed bucket, key, batch index and value. Re-running the same
/// file produces the same names, so a retry overwrites instead of duplicating.
#[must_use]
pub fn artifact_name(file: &RawFileRef, batch: usize, value: &str) -> String {
    let mut hasher = Sha256::new();
    for part in [file.bucket.as_bytes(), file.key.as_bytes(), value.as_bytes()] {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hasher.update((batch as u64).to_le_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("part-{batch:05}-{}.parquet", &digest[..16])
}

/// Full object key for an artifact.
#[must_use]
pub fn artifact_key(
    namespace: &Namespace,
    label: &str,
    file: &RawFileRef,
    batch: usize,
    value: &str,
) -> String {
    format!(
        "{}{}",
        namespace.partition_dir(label, &canonicalize_segment(value)),
        artifact_name(file, batch, value)
    )
}

/// Recover the partition value from an artifact key produced by [`artifact_key`].
#[must_use]
pub fn value_from_key(namespace: &Namespace, label: &str, key: &str) -> Option<String> {
    let rest = key.strip_prefix(&namespace.partitioned_prefix)?;
    let (segment, _) = rest.split_once('/')?;
    let encoded = segment.strip_prefix(label)?.strip_prefix('=')?;
    urlencoding::decode(encoded).ok().map(|v| v.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(fields: &[&str]) -> StringRecord {
        StringRecord::from(fields.to_vec())
    }

    #[test]
    fn only_empty_keys_use_sentinel() {
        assert_eq!(partition_value("", DEFAULT_EMPTY_KEY_SENTINEL), DEFAULT_EMPTY_KEY_SENTINEL);
        assert_eq!(partition_value("  ", "EMPTY"), "  ");
        assert_eq!(partition_value("US", "EMPTY"), "US");
        assert_eq!(canonicalize_segment(" "), "%20");
    }

    #[test]
    fn literal_sentinel_shares_the_empty_partition() {
        let rows = vec![rec(&["1", ""]), rec(&["2", DEFAULT_EMPTY_KEY_SENTINEL])];
        let groups = group_by_key(rows, 1, DEFAULT_EMPTY_KEY_SENTINEL);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[DEFAULT_EMPTY_KEY_SENTINEL].len(), 2);
    }

    #[test]
    fn canonicalization_encodes_unsafe_bytes() {
        assert_eq!(canonicalize_segment("US"), "US");
        assert_eq!(canonicalize_segment("Bosnia & Herzegovina"), "Bosnia%20%26%20Herzegovina");
        assert_eq!(canonicalize_segment("a/b"), "a%2Fb");
        assert_eq!(canonicalize_segment("k=v"), "k%3Dv");
        assert_eq!(canonicalize_segment("Côte"), "C%C3%B4te");
        assert_eq!(canonicalize_segment(".."), "%2E%2E");
        assert!(is_path_safe(DEFAULT_EMPTY_KEY_SENTINEL));
        assert!(!is_path_safe("a b"));
    }

    #[test]
    fn group_by_key_preserves_row_order_within_group() {
        let rows = vec![
            rec(&["1", "US"]),
            rec(&["2", "FR"]),
            rec(&["3", "US"]),
            rec(&["4", ""]),
        ];
        let groups = group_by_key(rows, 1, "NONE");

        let keys: Vec<&str> = groups.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["FR", "NONE", "US"]);
        let us_ids: Vec<&str> = groups["US"].iter().map(|r| &r[0]).collect();
        assert_eq!(us_ids, vec!["1", "3"]);
    }

    #[test]
    fn artifact_names_are_deterministic_and_distinct() {
        let file = RawFileRef::new("lake", "raw-data/input.csv");
        let a = artifact_name(&file, 0, "US");
        assert_eq!(a, artifact_name(&file, 0, "US"));
        assert_ne!(a, artifact_name(&file, 1, "US"));
        assert_ne!(a, artifact_name(&file, 0, "FR"));
        assert_ne!(a, artifact_name(&RawFileRef::new("lake", "raw-data/other.csv"), 0, "US"));
        assert!(a.starts_with("part-00000-"));
        assert!(a.ends_with(".parquet"));
    }

    #[test]
    fn value_round_trips_through_key() {
        let ns = Namespace::default();
        let file = RawFileRef::new("lake", "raw-data/input.csv");
        let key = artifact_key(&ns, "country_partition", &file, 3, "Trinidad/Tobago");
        assert!(key.starts_with("partitioned-data/country_partition=Trinidad%2FTobago/"));
        assert_eq!(
            value_from_key(&ns, "country_partition", &key).as_deref(),
            Some("Trinidad/Tobago")
        );
    }
}
