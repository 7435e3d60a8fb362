//! Fake implementations for testing.
//!
//! [`FakeObjectIO`] keeps every bucket in memory. [`FailingObjectIO`] wraps any backend and
//! injects failures for chosen operations and key prefixes, recording every call it sees so
//! tests can assert on ordering (for example that a delete never precedes its archive copy).

use crate::io::cloud::traits::{CloudIOError, CloudResult, ErrorKind, ObjectIO, ObjectMetadata};
use std::collections::HashMap;
use std::io::Read;
use std::sync::{Arc, Mutex};

type BucketStorage = Arc<Mutex<HashMap<String, HashMap<String, Vec<u8>>>>>;

// ============================================================================
// FakeObjectIO
// ============================================================================

#[derive(Clone)]
pub struct FakeObjectIO {
    storage: BucketStorage,
}

impl FakeObjectIO {
    #[must_use]
    pub fn new() -> Self {
        Self {
            storage: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// All keys currently stored in `bucket`, sorted.
    #[must_use]
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        let storage = self.storage.lock().expect("storage mutex poisoned");
        let mut keys: Vec<String> = storage
            .get(bucket)
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default();
        drop(storage);
        keys.sort();
        keys
    }

    fn metadata_for(key: &str, data: &[u8]) -> ObjectMetadata {
        ObjectMetadata {
            key: key.to_string(),
            size: data.len() as u64,
        }
    }
}

impl Default for FakeObjectIO {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectIO for FakeObjectIO {
    fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> CloudResult<()> {
        self.storage
            .lock()
            .expect("storage mutex poisoned")
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn get_object(&self, bucket: &str, key: &str) -> CloudResult<Vec<u8>> {
        let storage = self.storage.lock().expect("storage mutex poisoned");
        storage
            .get(bucket)
            .and_then(|b| b.get(key))
            .cloned()
            .ok_or_else(|| {
                CloudIOError::new(
                    ErrorKind::NotFound,
                    format!("Object {bucket}/{key} not found"),
                )
            })
    }

    fn delete_object(&self, bucket: &str, key: &str) -> CloudResult<()> {
        if let Some(bucket_map) = self
            .storage
            .lock()
            .expect("storage mutex poisoned")
            .get_mut(bucket)
        {
            bucket_map.remove(key);
        }
        Ok(())
    }

    fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> CloudResult<Vec<ObjectMetadata>> {
        let storage = self.storage.lock().expect("storage mutex poisoned");
        let bucket_map = storage.get(bucket).ok_or_else(|| {
            CloudIOError::new(ErrorKind::NotFound, format!("Bucket {bucket} not found"))
        })?;

        let mut objects: Vec<ObjectMetadata> = bucket_map
            .iter()
            .filter(|(key, _)| prefix.is_none_or(|p| key.starts_with(p)))
            .map(|(key, data)| Self::metadata_for(key, data))
            .collect();

        drop(storage);
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    fn object_exists(&self, bucket: &str, key: &str) -> CloudResult<bool> {
        let storage = self.storage.lock().expect("storage mutex poisoned");
        Ok(storage.get(bucket).is_some_and(|b| b.contains_key(key)))
    }

    fn get_metadata(&self, bucket: &str, key: &str) -> CloudResult<ObjectMetadata> {
        let storage = self.storage.lock().expect("storage mutex poisoned");
        storage
            .get(bucket)
            .and_then(|b| b.get(key))
            .map(|data| Self::metadata_for(key, data))
            .ok_or_else(|| {
                CloudIOError::new(
                    ErrorKind::NotFound,
                    format!("Object {bucket}/{key} not found"),
                )
            })
    }

    fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> CloudResult<()> {
        let data = self.get_object(src_bucket, src_key)?;
        self.put_object(dst_bucket, dst_key, &data)
    }
}

// ============================================================================
// FailingObjectIO
// ============================================================================

/// Storage operation names used for failure injection and call recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageOp {
    Put,
    Get,
    Delete,
    List,
    Exists,
    Metadata,
    Copy,
}

/// One recorded storage call. For copies, `bucket`/`key` name the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageCall {
    pub op: StorageOp,
    pub bucket: String,
    pub key: String,
}

#[derive(Debug, Clone)]
struct FailureRule {
    op: StorageOp,
    key_prefix: String,
    kind: ErrorKind,
    // None fails forever
    remaining: Option<u32>,
}

/// Backend wrapper that injects failures at configurable operations and key prefixes.
#[derive(Clone)]
pub struct FailingObjectIO<S = FakeObjectIO> {
    inner: S,
    rules: Arc<Mutex<Vec<FailureRule>>>,
    calls: Arc<Mutex<Vec<StorageCall>>>,
}

impl FailingObjectIO<FakeObjectIO> {
    /// Wrap an empty [`FakeObjectIO`].
    #[must_use]
    pub fn new() -> Self {
        Self::wrap(FakeObjectIO::new())
    }
}

impl Default for FailingObjectIO<FakeObjectIO> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: ObjectIO> FailingObjectIO<S> {
    pub fn wrap(inner: S) -> Self {
        Self {
            inner,
            rules: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fail every `op` on keys starting with `key_prefix` with `kind`.
    pub fn fail_on(&self, op: StorageOp, key_prefix: impl Into<String>, kind: ErrorKind) {
        self.push_rule(op, key_prefix.into(), kind, None);
    }

    /// Fail the next `times` matching calls, then let them through.
    pub fn fail_times(
        &self,
        op: StorageOp,
        key_prefix: impl Into<String>,
        kind: ErrorKind,
        times: u32,
    ) {
        self.push_rule(op, key_prefix.into(), kind, Some(times));
    }

    pub fn clear_failures(&self) {
        self.rules.lock().expect("rules mutex poisoned").clear();
    }

    /// Every call seen so far, including the ones that were failed.
    #[must_use]
    pub fn calls(&self) -> Vec<StorageCall> {
        self.calls.lock().expect("calls mutex poisoned").clone()
    }

    #[must_use]
    pub fn calls_for(&self, op: StorageOp) -> Vec<StorageCall> {
        self.calls().into_iter().filter(|c| c.op == op).collect()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn push_rule(&self, op: StorageOp, key_prefix: String, kind: ErrorKind, remaining: Option<u32>) {
        self.rules
            .lock()
            .expect("rules mutex poisoned")
            .push(FailureRule {
                op,
                key_prefix,
                kind,
                remaining,
            });
    }

    fn check(&self, op: StorageOp, bucket: &str, key: &str) -> CloudResult<()> {
        self.calls
            .lock()
            .expect("calls mutex poisoned")
            .push(StorageCall {
                op,
                bucket: bucket.to_string(),
                key: key.to_string(),
            });

        let mut rules = self.rules.lock().expect("rules mutex poisoned");
        let hit = rules.iter_mut().find(|r| {
            r.op == op && key.starts_with(&r.key_prefix) && r.remaining.is_none_or(|n| n > 0)
        });
        let Some(rule) = hit else {
            return Ok(());
        };
        if let Some(n) = rule.remaining.as_mut() {
            *n -= 1;
        }
        Err(CloudIOError::new(
            rule.kind,
            format!("injected {op:?} failure for {bucket}/{key}"),
        ))
    }
}

impl<S: ObjectIO> ObjectIO for FailingObjectIO<S> {
    fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> CloudResult<()> {
        self.check(StorageOp::Put, bucket, key)?;
        self.inner.put_object(bucket, key, data)
    }

    fn get_object(&self, bucket: &str, key: &str) -> CloudResult<Vec<u8>> {
        self.check(StorageOp::Get, bucket, key)?;
        self.inner.get_object(bucket, key)
    }

    fn get_object_reader(&self, bucket: &str, key: &str) -> CloudResult<Box<dyn Read + Send>> {
        self.check(StorageOp::Get, bucket, key)?;
        self.inner.get_object_reader(bucket, key)
    }

    fn delete_object(&self, bucket: &str, key: &str) -> CloudResult<()> {
        self.check(StorageOp::Delete, bucket, key)?;
        self.inner.delete_object(bucket, key)
    }

    fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> CloudResult<Vec<ObjectMetadata>> {
        self.check(StorageOp::List, bucket, prefix.unwrap_or_default())?;
        self.inner.list_objects(bucket, prefix)
    }

    fn object_exists(&self, bucket: &str, key: &str) -> CloudResult<bool> {
        self.check(StorageOp::Exists, bucket, key)?;
        self.inner.object_exists(bucket, key)
    }

    fn get_metadata(&self, bucket: &str, key: &str) -> CloudResult<ObjectMetadata> {
        self.check(StorageOp::Metadata, bucket, key)?;
        self.inner.get_metadata(bucket, key)
    }

    fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> CloudResult<()> {
        self.check(StorageOp::Copy, dst_bucket, dst_key)?;
        self.inner
            .copy_object(src_bucket, src_key, dst_bucket, dst_key)
    }
}
