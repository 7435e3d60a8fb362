// Object storage backends and the remote-call helpers.
//
// The same behavioral checks run against the in-memory fake and the directory-backed store,
// so the CLI backend and the test backend cannot drift apart.

use anyhow::Result;
use partbeam::io::cloud::helpers::*;
use partbeam::io::cloud::*;
use std::io::Read;
use std::time::Duration;

fn exercise_backend(storage: &dyn ObjectIO) -> Result<()> {
    storage.put_object("bucket", "dir1/file1.txt", b"data1")?;
    storage.put_object("bucket", "dir1/file2.txt", b"data22")?;
    storage.put_object("bucket", "dir2/file3.txt", b"data333")?;

    assert_eq!(storage.get_object("bucket", "dir1/file1.txt")?, b"data1");

    let mut streamed = String::new();
    storage
        .get_object_reader("bucket", "dir2/file3.txt")?
        .read_to_string(&mut streamed)?;
    assert_eq!(streamed, "data333");

    let all = storage.list_objects("bucket", None)?;
    assert_eq!(all.len(), 3);
    let dir1 = storage.list_objects("bucket", Some("dir1/"))?;
    let keys: Vec<&str> = dir1.iter().map(|o| o.key.as_str()).collect();
    assert_eq!(keys, vec!["dir1/file1.txt", "dir1/file2.txt"]);

    assert_eq!(
        storage.get_metadata("bucket", "dir1/file2.txt")?,
        ObjectMetadata {
            key: "dir1/file2.txt".to_string(),
            size: 6,
        }
    );

    storage.copy_object("bucket", "dir1/file1.txt", "other", "archive/file1.txt")?;
    assert_eq!(storage.get_object("other", "archive/file1.txt")?, b"data1");
    assert!(storage.object_exists("bucket", "dir1/file1.txt")?);

    storage.put_object("bucket", "dir1/file1.txt", b"replaced")?;
    assert_eq!(storage.get_object("bucket", "dir1/file1.txt")?, b"replaced");

    storage.delete_object("bucket", "dir1/file1.txt")?;
    assert!(!storage.object_exists("bucket", "dir1/file1.txt")?);
    storage.delete_object("bucket", "dir1/file1.txt")?;

    let missing = storage.get_object("bucket", "nope.txt").unwrap_err();
    assert_eq!(missing.kind, ErrorKind::NotFound);
    assert!(!missing.is_transient());
    let missing = storage.get_metadata("bucket", "nope.txt").unwrap_err();
    assert_eq!(missing.kind, ErrorKind::NotFound);
    Ok(())
}

#[test]
fn fake_backend_behaves_like_object_storage() -> Result<()> {
    exercise_backend(&FakeObjectIO::new())
}

#[test]
fn local_backend_behaves_like_object_storage() -> Result<()> {
    let dir = tempfile::tempdir()?;
    exercise_backend(&LocalObjectIO::new(dir.path()))
}

#[test]
fn local_backend_rejects_escaping_keys() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let storage = LocalObjectIO::new(dir.path());
    for key in ["../escape.txt", "/abs.txt", "a/./b.txt", ""] {
        let err = storage.put_object("bucket", key, b"x").unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidInput, "{key:?}");
    }
    assert!(storage.put_object("..", "key.txt", b"x").is_err());
    Ok(())
}

#[test]
fn fake_clones_share_buckets() -> Result<()> {
    let a = FakeObjectIO::new();
    let b = a.clone();
    a.put_object("bucket", "k", b"v")?;
    assert_eq!(b.keys("bucket"), vec!["k"]);
    Ok(())
}

#[test]
fn failing_backend_records_every_call() -> Result<()> {
    let storage = FailingObjectIO::new();
    storage.fail_times(StorageOp::Get, "flaky/", ErrorKind::RateLimited, 1);
    storage.put_object("bucket", "flaky/a.txt", b"x")?;

    assert!(storage.get_object("bucket", "flaky/a.txt").is_err());
    assert_eq!(storage.get_object("bucket", "flaky/a.txt")?, b"x");

    let ops: Vec<StorageOp> = storage.calls().iter().map(|c| c.op).collect();
    assert_eq!(ops, vec![StorageOp::Put, StorageOp::Get, StorageOp::Get]);
    Ok(())
}

#[test]
fn run_remote_retries_transient_failures() -> Result<()> {
    let storage = FailingObjectIO::new();
    storage.put_object("bucket", "k", b"v")?;
    storage.fail_times(StorageOp::Metadata, "k", ErrorKind::ServiceUnavailable, 2);

    let config = RetryConfig {
        max_attempts: 3,
        initial_delay_ms: 1,
        max_delay_ms: 1,
        backoff_multiplier: 2.0,
    };
    let meta = run_remote(&config, Duration::from_secs(5), || {
        storage.get_metadata("bucket", "k")
    })?;
    assert_eq!(meta.size, 1);
    assert_eq!(storage.calls_for(StorageOp::Metadata).len(), 3);
    Ok(())
}

#[test]
fn run_remote_does_not_retry_permanent_failures() {
    let storage = FailingObjectIO::new();
    let config = RetryConfig::default();
    let err = run_remote(&config, Duration::from_secs(5), || {
        storage.get_object("bucket", "missing")
    })
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);
    assert_eq!(storage.calls_for(StorageOp::Get).len(), 1);
}

#[test]
fn over_budget_calls_become_timeouts() {
    let mut attempts = 0;
    let err = run_remote(&RetryConfig::no_retry(), Duration::from_millis(1), || {
        attempts += 1;
        std::thread::sleep(Duration::from_millis(20));
        Ok(())
    })
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
    assert!(err.is_transient());
    assert_eq!(attempts, 1);
}

#[test]
fn parse_resource_uri_splits_bucket_and_key() {
    let (provider, parts) = parse_resource_uri("s3://my-bucket/raw-data/input.csv").unwrap();
    assert_eq!(provider, "s3");
    assert_eq!(parts, vec!["my-bucket", "raw-data", "input.csv"]);
    assert!(parse_resource_uri("no-scheme").is_err());
}

#[test]
fn io_errors_map_to_storage_kinds() {
    use std::io::{Error, ErrorKind as Io};
    assert_eq!(CloudIOError::from(Error::from(Io::NotFound)).kind, ErrorKind::NotFound);
    assert_eq!(
        CloudIOError::from(Error::from(Io::PermissionDenied)).kind,
        ErrorKind::Authorization
    );
    assert!(CloudIOError::from(Error::from(Io::TimedOut)).is_transient());
    assert!(CloudIOError::from(Error::from(Io::ConnectionReset)).is_transient());
}
