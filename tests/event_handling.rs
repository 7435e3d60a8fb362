use anyhow::Result;
use chrono::NaiveDate;
use partbeam::io::cloud::*;
use partbeam::{InvocationOutcome, PartitionTransformer, S3Event, TransformConfig};

const BUCKET: &str = "lake";

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, 1).unwrap()
}

fn transformer(storage: &FakeObjectIO) -> Result<PartitionTransformer<FakeObjectIO>> {
    PartitionTransformer::new(storage.clone(), TransformConfig::for_bucket(BUCKET))
}

#[test]
fn keys_outside_raw_prefix_are_skipped() -> Result<()> {
    let storage = FakeObjectIO::new();
    storage.put_object(BUCKET, "raw-data/a.csv", b"id,Country\n1,US\n")?;
    storage.put_object(BUCKET, "uploads/b.csv", b"id,Country\n1,US\n")?;

    let event = S3Event::for_objects([(BUCKET, "uploads/b.csv"), (BUCKET, "raw-data/a.csv")]);
    let outcome = transformer(&storage)?.handle_event_on(&event, day());

    assert!(outcome.is_success(), "{outcome:?}");
    assert!(outcome.body.contains("Processed 1 file(s)"));
    assert!(outcome.body.contains("skipped 1"));
    assert!(storage.object_exists(BUCKET, "uploads/b.csv")?);
    assert!(!storage.object_exists(BUCKET, "raw-data/a.csv")?);
    Ok(())
}

#[test]
fn first_failing_file_stops_the_invocation() -> Result<()> {
    let storage = FakeObjectIO::new();
    storage.put_object(BUCKET, "raw-data/good1.csv", b"id,Country\n1,US\n")?;
    storage.put_object(BUCKET, "raw-data/bad.csv", b"id,Region\n1,EU\n")?;
    storage.put_object(BUCKET, "raw-data/good2.csv", b"id,Country\n2,FR\n")?;

    let event = S3Event::for_objects([
        (BUCKET, "raw-data/good1.csv"),
        (BUCKET, "raw-data/bad.csv"),
        (BUCKET, "raw-data/good2.csv"),
    ]);
    let outcome = transformer(&storage)?.handle_event_on(&event, day());

    assert_eq!(outcome.status_code, 500);
    assert!(outcome.body.contains("lake/raw-data/bad.csv"), "{}", outcome.body);
    assert!(outcome.body.contains("ValidationError"), "{}", outcome.body);

    assert!(storage.object_exists(BUCKET, "archive/2024-05-01/good1.csv")?);
    assert!(storage.object_exists(BUCKET, "raw-data/bad.csv")?);
    assert!(storage.object_exists(BUCKET, "raw-data/good2.csv")?);
    Ok(())
}

#[test]
fn encoded_keys_are_decoded_before_processing() -> Result<()> {
    let storage = FakeObjectIO::new();
    storage.put_object(BUCKET, "raw-data/sales 2024.csv", b"id,Country\n1,US\n")?;

    let payload = r#"{"Records":[{"s3":{"bucket":{"name":"lake"},"object":{"key":"raw-data/sales+2024.csv"}}}]}"#;
    let outcome = transformer(&storage)?.handle_event_json(payload);

    assert!(outcome.is_success(), "{outcome:?}");
    assert!(!storage.object_exists(BUCKET, "raw-data/sales 2024.csv")?);
    assert_eq!(
        storage
            .keys(BUCKET)
            .iter()
            .filter(|k| k.starts_with("archive/") && k.ends_with("/sales 2024.csv"))
            .count(),
        1
    );
    Ok(())
}

#[test]
fn payload_without_records_is_rejected() -> Result<()> {
    let storage = FakeObjectIO::new();
    let outcome = transformer(&storage)?.handle_event_json(r#"{"source":"aws.s3"}"#);
    assert_eq!(outcome.status_code, 500);
    assert!(outcome.body.starts_with("Invalid event payload"));

    let outcome = transformer(&storage)?.handle_event_json("not json");
    assert!(!outcome.is_success());
    Ok(())
}

#[test]
fn empty_record_list_succeeds() -> Result<()> {
    let storage = FakeObjectIO::new();
    let outcome = transformer(&storage)?.handle_event_json(r#"{"Records":[]}"#);
    assert_eq!(
        outcome,
        InvocationOutcome::ok("Processed 0 file(s) into 0 artifact(s); skipped 0")
    );
    Ok(())
}

#[test]
fn outcome_serializes_with_status_code() -> Result<()> {
    let storage = FakeObjectIO::new();
    let outcome = transformer(&storage)?.handle_event_json("{}");
    let json: serde_json::Value = serde_json::from_str(&outcome.to_json()?)?;
    assert_eq!(json["statusCode"], 500);
    assert!(json["body"].is_string());
    Ok(())
}

#[test]
fn transient_failure_is_reported_as_retryable_kind() -> Result<()> {
    let storage = FailingObjectIO::new();
    storage.put_object(BUCKET, "raw-data/a.csv", b"id,Country\n1,US\n")?;
    storage.fail_on(StorageOp::Get, "raw-data/", ErrorKind::Timeout);

    let mut config = TransformConfig::for_bucket(BUCKET);
    config.retry = partbeam::io::cloud::helpers::RetryConfig::no_retry();
    let transformer = PartitionTransformer::new(storage.clone(), config)?;
    let outcome = transformer.handle_event(&S3Event::for_objects([(BUCKET, "raw-data/a.csv")]));

    assert_eq!(outcome.status_code, 500);
    assert!(outcome.body.contains("TransientIOError"), "{}", outcome.body);
    assert!(storage.inner().object_exists(BUCKET, "raw-data/a.csv")?);
    Ok(())
}
