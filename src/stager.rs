//! The stager: download one remote archive and place its members under the raw prefix.
//!
//! It carries no business logic. Every non-directory member is written as-is to
//! `{bucket}/{raw prefix}{member name}`, which is exactly where the transformer expects new
//! files. Member names are checked before anything is written, so an archive that would
//! escape the prefix is rejected as a whole.

use crate::config::StagerConfig;
use crate::event::InvocationOutcome;
use crate::io::cloud::helpers::{run_remote, validate_key_path};
use crate::io::cloud::{CloudIOError, ObjectIO};
use crate::io::compression::unpack_archive;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, error, info};

/// Browser-like identity; some archive hosts refuse requests without one.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
pub const ACCEPT_ARCHIVES: &str = "application/zip, application/octet-stream, */*";

#[derive(Debug, Error)]
pub enum StageError {
    #[error("download of {url} failed: {message}")]
    Download { url: String, message: String },

    #[error("could not unpack {url}: {message}")]
    Unpack { url: String, message: String },

    #[error("archive member '{name}' would be written outside the raw prefix")]
    UnsafeMember { name: String },

    #[error("could not store {key}: {source}")]
    Storage {
        key: String,
        #[source]
        source: CloudIOError,
    },
}

/// Source of archive bytes.
pub trait ArchiveFetcher: Send + Sync {
    /// Download the whole archive at `url`.
    ///
    /// # Errors
    /// [`StageError::Download`] on any transport failure or non-success status.
    fn fetch(&self, url: &str) -> Result<Vec<u8>, StageError>;
}

impl<F> ArchiveFetcher for F
where
    F: Fn(&str) -> Result<Vec<u8>, StageError> + Send + Sync,
{
    fn fetch(&self, url: &str) -> Result<Vec<u8>, StageError> {
        self(url)
    }
}

/// Fetches over HTTP(S) with `ureq`.
#[cfg(feature = "http-fetch")]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    user_agent: String,
}

#[cfg(feature = "http-fetch")]
impl Default for HttpFetcher {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[cfg(feature = "http-fetch")]
impl HttpFetcher {
    #[must_use]
    pub fn with_user_agent(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }
}

#[cfg(feature = "http-fetch")]
impl ArchiveFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, StageError> {
        use std::io::Read;

        let download_error = |message: String| StageError::Download {
            url: url.to_string(),
            message,
        };

        info!(url, "downloading archive");
        let response = ureq::get(url)
            .header("User-Agent", &self.user_agent)
            .header("Accept", ACCEPT_ARCHIVES)
            .call()
            .map_err(|err| download_error(err.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            return Err(download_error(format!("unexpected status {status}")));
        }

        let mut data = Vec::new();
        response
            .into_body()
            .into_reader()
            .read_to_end(&mut data)
            .map_err(|err| download_error(format!("reading body: {err}")))?;
        debug!(url, bytes = data.len(), "archive downloaded");
        Ok(data)
    }
}

/// Reads archives from the local filesystem; accepts plain paths and `file://` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileFetcher;

impl ArchiveFetcher for FileFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, StageError> {
        let path = PathBuf::from(url.strip_prefix("file://").unwrap_or(url));
        std::fs::read(&path).map_err(|err| StageError::Download {
            url: url.to_string(),
            message: err.to_string(),
        })
    }
}

/// One member written to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedMember {
    pub name: String,
    pub key: String,
    pub bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageReport {
    pub url: String,
    pub bucket: String,
    pub members: Vec<StagedMember>,
}

pub struct Stager<S, F> {
    storage: S,
    fetcher: F,
    config: StagerConfig,
}

impl<S: ObjectIO, F: ArchiveFetcher> Stager<S, F> {
    pub const fn new(storage: S, fetcher: F, config: StagerConfig) -> Self {
        Self {
            storage,
            fetcher,
            config,
        }
    }

    #[must_use]
    pub const fn storage(&self) -> &S {
        &self.storage
    }

    /// Download `url`, unpack it and put every member under the raw prefix.
    ///
    /// # Errors
    /// The first [`StageError`] encountered. Members are validated before the first put,
    /// so an unsafe name leaves storage untouched.
    pub fn stage(&self, url: &str) -> Result<StageReport, StageError> {
        let data = self.fetcher.fetch(url)?;
        let hint = archive_name(url);
        let members = unpack_archive(&data, hint).map_err(|err| StageError::Unpack {
            url: url.to_string(),
            message: format!("{err:#}"),
        })?;

        for member in &members {
            check_member_name(&member.name)?;
        }

        let bucket = &self.config.destination_bucket;
        let mut staged = Vec::with_capacity(members.len());
        for member in members {
            let key = self.config.namespace.incoming_key(&member.name);
            run_remote(&self.config.retry, self.config.timeouts.write(), || {
                self.storage.put_object(bucket, &key, &member.data)
            })
            .map_err(|source| StageError::Storage {
                key: format!("{bucket}/{key}"),
                source,
            })?;
            info!(bucket = %bucket, key = %key, bytes = member.data.len(), "staged archive member");
            staged.push(StagedMember {
                name: member.name,
                key,
                bytes: member.data.len(),
            });
        }

        Ok(StageReport {
            url: url.to_string(),
            bucket: bucket.clone(),
            members: staged,
        })
    }

    /// Stage the configured archive URL and report it in invocation form.
    pub fn run(&self) -> InvocationOutcome {
        match self.stage(&self.config.archive_url) {
            Ok(report) => InvocationOutcome::ok(format!(
                "Staged {} file(s) from {} into {}/{}",
                report.members.len(),
                report.url,
                report.bucket,
                self.config.namespace.raw_prefix
            )),
            Err(err) => {
                error!(url = %self.config.archive_url, error = %err, "staging failed");
                InvocationOutcome::failed(format!("Error staging archive: {err}"))
            }
        }
    }
}

/// Last path segment of `url`, without query or fragment.
fn archive_name(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    url[..end].rsplit('/').next().unwrap_or_default()
}

fn check_member_name(name: &str) -> Result<(), StageError> {
    let drive_letter = name.as_bytes().get(1) == Some(&b':');
    if drive_letter || validate_key_path(name).is_err() {
        return Err(StageError::UnsafeMember {
            name: name.to_string(),
        });
    }
    Ok(())
}
