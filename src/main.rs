use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use partbeam::config::{ProcessEnv, StagerConfig, TransformConfig};
use partbeam::event::{InvocationOutcome, S3Event};
use partbeam::io::cloud::LocalObjectIO;
use partbeam::io::cloud::helpers::parse_resource_uri;
use partbeam::stager::{ArchiveFetcher, FileFetcher, StageError, Stager};
use partbeam::telemetry::init_tracing;
use partbeam::transform::PartitionTransformer;
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

/// Stage raw CSV drops and rewrite them as key-partitioned Parquet
#[derive(Parser)]
#[command(name = "partbeam")]
#[command(version)]
#[command(about = "Stage raw CSV drops and rewrite them as key-partitioned Parquet", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory backing the object store (one subdirectory per bucket)
    #[arg(short, long, value_name = "DIR", default_value = ".", global = true)]
    root: PathBuf,

    /// Log level or EnvFilter directive (overrides PARTBEAM_LOG_LEVEL)
    #[arg(short = 'v', long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Partition the raw files named by an object-created event
    Transform {
        /// Event JSON file, or `-` for stdin
        #[arg(short, long, value_name = "PATH", conflicts_with = "object")]
        event: Option<String>,

        /// Object to process directly, as `s3://bucket/key` (repeatable)
        #[arg(short, long, value_name = "URI")]
        object: Vec<String>,

        /// JSON config file, applied before environment overrides
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Destination bucket (overrides BUCKET_NAME)
        #[arg(short, long)]
        bucket: Option<String>,

        /// Rows per batch
        #[arg(long, value_name = "ROWS")]
        batch_rows: Option<usize>,

        /// Archive date as YYYY-MM-DD (defaults to today, UTC)
        #[arg(long, value_name = "DATE")]
        date: Option<NaiveDate>,
    },
    /// Download an archive and place its members under the raw prefix
    Stage {
        /// Archive URL or local path (overrides URL)
        #[arg(short, long)]
        url: Option<String>,

        /// Destination bucket (overrides BUCKET_NAME)
        #[arg(short, long)]
        bucket: Option<String>,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let storage = LocalObjectIO::new(&cli.root);

    let outcome = match cli.command {
        Commands::Transform {
            event,
            object,
            config,
            bucket,
            batch_rows,
            date,
        } => {
            let mut config = match config {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read config {}", path.display()))?;
                    TransformConfig::from_json(&text)?
                }
                None => TransformConfig::default(),
            };
            config.apply_env_overrides(&ProcessEnv)?;
            if let Some(level) = cli.log_level {
                config.log.level = level;
            }
            if let Some(bucket) = bucket {
                config.destination_bucket = bucket;
            }
            if let Some(rows) = batch_rows {
                config.batch_row_limit = rows;
            }
            init_tracing(&config.log);

            let event = load_event(event.as_deref(), &object)?;
            let transformer = PartitionTransformer::new(storage, config)?;
            match date {
                Some(date) => transformer.handle_event_on(&event, date),
                None => transformer.handle_event(&event),
            }
        }
        Commands::Stage { url, bucket } => {
            let mut config = StagerConfig::default();
            config.apply_env_overrides(&ProcessEnv)?;
            if let Some(level) = cli.log_level {
                config.log.level = level;
            }
            if let Some(url) = url {
                config.archive_url = url;
            }
            if let Some(bucket) = bucket {
                config.destination_bucket = bucket;
            }
            config.validate()?;
            init_tracing(&config.log);

            Stager::new(storage, AnyFetcher, config).run()
        }
    };

    report(&outcome)
}

fn load_event(event: Option<&str>, objects: &[String]) -> Result<S3Event> {
    if !objects.is_empty() {
        let pairs = objects
            .iter()
            .map(|uri| -> Result<(String, String)> {
                let (_, parts) = parse_resource_uri(uri)?;
                match parts.split_first() {
                    Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => {
                        Ok((bucket.clone(), key.join("/")))
                    }
                    _ => bail!("object URI '{uri}' must look like s3://bucket/key"),
                }
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(S3Event::for_objects(pairs));
    }

    let payload = match event {
        Some("-") | None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read event from stdin")?;
            buf
        }
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read event file {path}"))?,
    };
    S3Event::from_json(&payload).context("Invalid event payload")
}

/// HTTP(S) URLs go through `ureq`, everything else is read from disk.
struct AnyFetcher;

impl ArchiveFetcher for AnyFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, StageError> {
        if url.starts_with("http://") || url.starts_with("https://") {
            fetch_http(url)
        } else {
            FileFetcher.fetch(url)
        }
    }
}

#[cfg(feature = "http-fetch")]
fn fetch_http(url: &str) -> Result<Vec<u8>, StageError> {
    partbeam::stager::HttpFetcher::default().fetch(url)
}

#[cfg(not(feature = "http-fetch"))]
fn fetch_http(url: &str) -> Result<Vec<u8>, StageError> {
    Err(StageError::Download {
        url: url.to_string(),
        message: "built without the http-fetch feature".to_string(),
    })
}

fn report(outcome: &InvocationOutcome) -> Result<ExitCode> {
    println!("{}", outcome.to_json()?);
    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
