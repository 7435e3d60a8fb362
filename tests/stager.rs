use anyhow::Result;
use chrono::NaiveDate;
use partbeam::config::StagerConfig;
use partbeam::io::cloud::helpers::RetryConfig;
use partbeam::io::cloud::*;
use partbeam::stager::FileFetcher;
use partbeam::{PartitionTransformer, S3Event, StageError, Stager, TransformConfig};
use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;

const BUCKET: &str = "lake";
const URL: &str = "https://data.example.com/exports/drop.zip";

fn zip_bytes(members: &[(&str, &[u8])]) -> Result<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in members {
        writer.start_file(*name, SimpleFileOptions::default())?;
        writer.write_all(data)?;
    }
    Ok(writer.finish()?.into_inner())
}

fn stager_config() -> StagerConfig {
    StagerConfig {
        destination_bucket: BUCKET.to_string(),
        archive_url: URL.to_string(),
        retry: RetryConfig::no_retry(),
        ..StagerConfig::default()
    }
}

fn serve(archive: Vec<u8>) -> impl Fn(&str) -> Result<Vec<u8>, StageError> + Send + Sync {
    move |url: &str| {
        assert_eq!(url, URL);
        Ok(archive.clone())
    }
}

#[test]
fn members_land_under_raw_prefix() -> Result<()> {
    let archive = zip_bytes(&[
        ("sales.csv", b"id,Country\n1,US\n"),
        ("nested/returns.csv", b"id,Country\n2,FR\n"),
    ])?;
    let storage = FakeObjectIO::new();
    let stager = Stager::new(storage.clone(), serve(archive), stager_config());

    let report = stager.stage(URL)?;

    assert_eq!(report.bucket, BUCKET);
    let keys: Vec<&str> = report.members.iter().map(|m| m.key.as_str()).collect();
    assert_eq!(keys, vec!["raw-data/sales.csv", "raw-data/nested/returns.csv"]);
    assert_eq!(storage.get_object(BUCKET, "raw-data/sales.csv")?, b"id,Country\n1,US\n");
    assert_eq!(storage.keys(BUCKET).len(), 2);
    Ok(())
}

#[test]
fn unsafe_member_rejects_whole_archive() -> Result<()> {
    let archive = zip_bytes(&[("ok.csv", b"x"), ("../outside.csv", b"y")])?;
    let storage = FakeObjectIO::new();
    let stager = Stager::new(storage.clone(), serve(archive), stager_config());

    let err = stager.stage(URL).unwrap_err();
    assert!(matches!(err, StageError::UnsafeMember { ref name } if name == "../outside.csv"));
    assert!(storage.keys(BUCKET).is_empty());
    Ok(())
}

#[test]
fn download_failure_is_a_500() {
    let fetcher = |url: &str| -> Result<Vec<u8>, StageError> {
        Err(StageError::Download {
            url: url.to_string(),
            message: "unexpected status 403".to_string(),
        })
    };
    let stager = Stager::new(FakeObjectIO::new(), fetcher, stager_config());

    let outcome = stager.run();
    assert_eq!(outcome.status_code, 500);
    assert!(outcome.body.contains("403"));
}

#[test]
fn corrupt_archive_is_an_unpack_error() {
    let stager = Stager::new(
        FakeObjectIO::new(),
        serve(b"PK\x03\x04 definitely not a zip".to_vec()),
        stager_config(),
    );
    assert!(matches!(stager.stage(URL), Err(StageError::Unpack { .. })));
}

#[test]
fn storage_failure_names_the_key() -> Result<()> {
    let archive = zip_bytes(&[("sales.csv", b"id,Country\n1,US\n")])?;
    let storage = FailingObjectIO::new();
    storage.fail_on(StorageOp::Put, "raw-data/", ErrorKind::Authorization);
    let stager = Stager::new(storage, serve(archive), stager_config());

    match stager.stage(URL) {
        Err(StageError::Storage { key, source }) => {
            assert_eq!(key, "lake/raw-data/sales.csv");
            assert_eq!(source.kind, ErrorKind::Authorization);
        }
        other => panic!("expected storage error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn staged_files_feed_the_transformer() -> Result<()> {
    let archive = zip_bytes(&[
        ("q1.csv", b"id,Country,amount\n1,US,5\n2,DE,6\n"),
        ("q2.csv", b"id,Country,amount\n3,US,7\n"),
    ])?;
    let storage = FakeObjectIO::new();
    let report = Stager::new(storage.clone(), serve(archive), stager_config()).stage(URL)?;

    let event = S3Event::for_objects(report.members.iter().map(|m| (BUCKET, m.key.as_str())));
    let transformer = PartitionTransformer::new(storage.clone(), TransformConfig::for_bucket(BUCKET))?;
    let outcome = transformer.handle_event_on(&event, NaiveDate::from_ymd_opt(2024, 6, 30).unwrap());

    assert!(outcome.is_success(), "{outcome:?}");
    let keys = storage.keys(BUCKET);
    assert!(keys.iter().all(|k| !k.starts_with("raw-data/")));
    assert_eq!(
        keys.iter()
            .filter(|k| k.starts_with("partitioned-data/country_partition=US/"))
            .count(),
        2
    );
    assert!(keys.contains(&"archive/2024-06-30/q1.csv".to_string()));
    assert!(keys.contains(&"archive/2024-06-30/q2.csv".to_string()));
    Ok(())
}

#[test]
fn file_fetcher_reads_local_archives() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("drop.zip");
    std::fs::write(&path, zip_bytes(&[("a.csv", b"id,Country\n")])?)?;

    let url = format!("file://{}", path.display());
    let storage = FakeObjectIO::new();
    let report = Stager::new(storage.clone(), FileFetcher, stager_config()).stage(&url)?;

    assert_eq!(report.members.len(), 1);
    assert!(storage.object_exists(BUCKET, "raw-data/a.csv")?);
    Ok(())
}

#[cfg(feature = "compression-gzip")]
#[test]
fn gzip_download_stages_one_member() -> Result<()> {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(b"id,Country\n1,US\n")?;
    let gz = encoder.finish()?;

    let url = "https://data.example.com/exports/sales.csv.gz";
    let fetcher = move |_: &str| -> Result<Vec<u8>, StageError> { Ok(gz.clone()) };
    let storage = FakeObjectIO::new();
    let report = Stager::new(storage.clone(), fetcher, stager_config()).stage(url)?;

    assert_eq!(report.members[0].key, "raw-data/sales.csv");
    assert!(storage.object_exists(BUCKET, "raw-data/sales.csv")?);
    Ok(())
}
