//! Runtime configuration for the transformer and the stager.
//!
//! Values are resolved from, in increasing priority:
//! 1. Built-in defaults ([`TransformConfig::default`])
//! 2. A JSON document, if the caller has one ([`TransformConfig::from_json`])
//! 3. Environment variables prefixed with [`ENV_PREFIX`]
//!
//! `BUCKET_NAME` and `URL` are also read without the prefix, since deployments commonly set
//! them that way. Call [`TransformConfig::validate`] once all layers are applied.

use crate::io::cloud::helpers::{CallTimeouts, RetryConfig};
use crate::namespace::Namespace;
use crate::partition::{DEFAULT_EMPTY_KEY_SENTINEL, is_path_safe};
use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub const ENV_PREFIX: &str = "PARTBEAM_";

pub const DEFAULT_PARTITION_FIELD: &str = "Country";
pub const DEFAULT_PARTITION_LABEL: &str = "country_partition";
pub const DEFAULT_BATCH_ROW_LIMIT: usize = 50_000;

// ============================================================================
// Environment sources
// ============================================================================

/// Abstraction over environment lookups so tests can supply their own variables.
pub trait EnvSource {
    /// Look up `{ENV_PREFIX}{key}`.
    fn get(&self, key: &str) -> Option<String>;

    /// Look up `key` as-is, without the prefix.
    fn get_raw(&self, key: &str) -> Option<String>;
}

/// The process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(format!("{ENV_PREFIX}{key}")).ok()
    }

    fn get_raw(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// An explicit variable map. Keys are stored exactly as they would appear in the process
/// environment, prefix included.
#[derive(Debug, Clone, Default)]
pub struct MapEnv(pub HashMap<String, String>);

impl MapEnv {
    pub fn new<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl EnvSource for MapEnv {
    fn get(&self, key: &str) -> Option<String> {
        self.0.get(&format!("{ENV_PREFIX}{key}")).cloned()
    }

    fn get_raw(&self, key: &str) -> Option<String> {
        self.0.get(key).cloned()
    }
}

// ============================================================================
// Logging
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(anyhow!("unknown log format '{other}' (expected text or json)")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Json => "json",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `partbeam=debug`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl LogConfig {
    /// Apply `LOG_LEVEL` / `LOG_FORMAT` overrides.
    ///
    /// # Errors
    /// Returns an error if `LOG_FORMAT` is not recognized.
    pub fn apply_env<E: EnvSource>(&mut self, env: &E) -> Result<()> {
        if let Some(level) = env.get("LOG_LEVEL") {
            self.level = level;
        }
        if let Some(format) = env.get("LOG_FORMAT") {
            self.format = format
                .parse()
                .with_context(|| format!("Invalid {ENV_PREFIX}LOG_FORMAT value"))?;
        }
        Ok(())
    }
}

// ============================================================================
// Transformer
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Bucket that receives artifacts and archive copies.
    pub destination_bucket: String,
    /// Header column whose value selects the partition.
    pub partition_field: String,
    /// Name used on the left of `=` in partition directories.
    pub partition_label: String,
    pub batch_row_limit: usize,
    pub empty_key_sentinel: String,
    /// Publish the groups of one batch concurrently.
    pub parallel_publish: bool,
    pub namespace: Namespace,
    pub retry: RetryConfig,
    pub timeouts: CallTimeouts,
    pub log: LogConfig,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            destination_bucket: String::new(),
            partition_field: DEFAULT_PARTITION_FIELD.to_string(),
            partition_label: DEFAULT_PARTITION_LABEL.to_string(),
            batch_row_limit: DEFAULT_BATCH_ROW_LIMIT,
            empty_key_sentinel: DEFAULT_EMPTY_KEY_SENTINEL.to_string(),
            parallel_publish: false,
            namespace: Namespace::default(),
            retry: RetryConfig::default(),
            timeouts: CallTimeouts::default(),
            log: LogConfig::default(),
        }
    }
}

impl TransformConfig {
    /// Defaults for `bucket`, ready to use once validated.
    pub fn for_bucket(bucket: impl Into<String>) -> Self {
        Self {
            destination_bucket: bucket.into(),
            ..Self::default()
        }
    }

    /// Parse a JSON document; missing fields keep their defaults.
    ///
    /// # Errors
    /// Returns an error if the document is not valid JSON for this structure.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse transform config JSON")
    }

    /// Defaults overlaid with the process environment, validated.
    ///
    /// # Errors
    /// Returns an error if a variable cannot be parsed or the result is invalid.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides(&ProcessEnv)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment-variable overrides (highest priority).
    ///
    /// # Errors
    /// Returns an error if a numeric or boolean variable cannot be parsed.
    pub fn apply_env_overrides<E: EnvSource>(&mut self, env: &E) -> Result<()> {
        if let Some(bucket) = env.get("BUCKET_NAME").or_else(|| env.get_raw("BUCKET_NAME")) {
            self.destination_bucket = bucket;
        }
        if let Some(field) = env.get("PARTITION_FIELD") {
            self.partition_field = field;
        }
        if let Some(label) = env.get("PARTITION_LABEL") {
            self.partition_label = label;
        }
        if let Some(limit) = get_env_parsed::<usize, _>(env, "BATCH_ROW_LIMIT")? {
            self.batch_row_limit = limit;
        }
        if let Some(sentinel) = env.get("EMPTY_KEY_SENTINEL") {
            self.empty_key_sentinel = sentinel;
        }
        if let Some(parallel) = get_env_parsed::<bool, _>(env, "PARALLEL_PUBLISH")? {
            self.parallel_publish = parallel;
        }

        if let Some(attempts) = get_env_parsed::<u32, _>(env, "MAX_RETRIES")? {
            // MAX_RETRIES counts retries, not attempts.
            self.retry.max_attempts = attempts.saturating_add(1);
        }
        if let Some(secs) = get_env_parsed::<u64, _>(env, "READ_TIMEOUT_SECS")? {
            self.timeouts.read_secs = secs;
        }
        if let Some(secs) = get_env_parsed::<u64, _>(env, "WRITE_TIMEOUT_SECS")? {
            self.timeouts.write_secs = secs;
        }
        if let Some(secs) = get_env_parsed::<u64, _>(env, "COPY_TIMEOUT_SECS")? {
            self.timeouts.copy_secs = secs;
        }
        if let Some(secs) = get_env_parsed::<u64, _>(env, "DELETE_TIMEOUT_SECS")? {
            self.timeouts.delete_secs = secs;
        }

        self.log.apply_env(env)
    }

    /// Reject configurations the transformer cannot run with.
    ///
    /// # Errors
    /// Returns the first violated rule.
    pub fn validate(&self) -> Result<()> {
        if self.destination_bucket.trim().is_empty() {
            bail!("destination bucket is not set ({ENV_PREFIX}BUCKET_NAME or BUCKET_NAME)");
        }
        if self.partition_field.is_empty() {
            bail!("partition field must not be empty");
        }
        if self.partition_label.is_empty() {
            bail!("partition label must not be empty");
        }
        if !is_path_safe(&self.partition_label) {
            bail!(
                "partition label '{}' must only use A-Z a-z 0-9 - _ . ~",
                self.partition_label
            );
        }
        if self.batch_row_limit == 0 {
            bail!("batch row limit must be at least 1");
        }
        if !is_path_safe(&self.empty_key_sentinel) {
            bail!(
                "empty key sentinel '{}' must only use A-Z a-z 0-9 - _ . ~",
                self.empty_key_sentinel
            );
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        for (name, secs) in [
            ("read", self.timeouts.read_secs),
            ("write", self.timeouts.write_secs),
            ("copy", self.timeouts.copy_secs),
            ("delete", self.timeouts.delete_secs),
        ] {
            if secs == 0 {
                bail!("{name} timeout must be at least 1 second");
            }
        }
        for (name, prefix) in [
            ("raw", &self.namespace.raw_prefix),
            ("partitioned", &self.namespace.partitioned_prefix),
            ("archive", &self.namespace.archive_prefix),
        ] {
            if prefix.is_empty() || !prefix.ends_with('/') {
                bail!("{name} prefix '{prefix}' must be non-empty and end with '/'");
            }
        }
        Ok(())
    }
}

// ============================================================================
// Stager
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagerConfig {
    pub destination_bucket: String,
    /// Remote archive to download.
    pub archive_url: String,
    pub namespace: Namespace,
    pub retry: RetryConfig,
    pub timeouts: CallTimeouts,
    pub log: LogConfig,
}

impl Default for StagerConfig {
    fn default() -> Self {
        Self {
            destination_bucket: String::new(),
            archive_url: String::new(),
            namespace: Namespace::default(),
            retry: RetryConfig::default(),
            timeouts: CallTimeouts::default(),
            log: LogConfig::default(),
        }
    }
}

impl StagerConfig {
    /// Defaults overlaid with the process environment, validated.
    ///
    /// # Errors
    /// Returns an error if a variable cannot be parsed or the result is invalid.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides(&ProcessEnv)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// Returns an error if a variable cannot be parsed.
    pub fn apply_env_overrides<E: EnvSource>(&mut self, env: &E) -> Result<()> {
        if let Some(bucket) = env.get("BUCKET_NAME").or_else(|| env.get_raw("BUCKET_NAME")) {
            self.destination_bucket = bucket;
        }
        if let Some(url) = env.get("URL").or_else(|| env.get_raw("URL")) {
            self.archive_url = url;
        }
        if let Some(attempts) = get_env_parsed::<u32, _>(env, "MAX_RETRIES")? {
            self.retry.max_attempts = attempts.saturating_add(1);
        }
        if let Some(secs) = get_env_parsed::<u64, _>(env, "WRITE_TIMEOUT_SECS")? {
            self.timeouts.write_secs = secs;
        }
        self.log.apply_env(env)
    }

    /// # Errors
    /// Returns an error if the bucket or URL is missing.
    pub fn validate(&self) -> Result<()> {
        if self.destination_bucket.trim().is_empty() {
            bail!("destination bucket is not set ({ENV_PREFIX}BUCKET_NAME or BUCKET_NAME)");
        }
        if self.archive_url.trim().is_empty() {
            bail!("archive URL is not set ({ENV_PREFIX}URL or URL)");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        Ok(())
    }
}

fn get_env_parsed<T, E>(env: &E, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
    E: EnvSource,
{
    match env.get(key) {
        Some(val) => val
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("Failed to parse {ENV_PREFIX}{key}: {e}")),
        None => Ok(None),
    }
}
