//! Archive unpacking for the stager.
//!
//! An [`ArchiveCodec`] turns a downloaded archive into its member files. Built-in codecs:
//! - **Zip** (`.zip`) - any number of members, via the `zip` crate
//! - **Gzip** (`.gz`) - a single member, via `flate2` (feature: `compression-gzip`)
//!
//! Detection follows the usual order: the name hint's extension first, then the magic
//! bytes at the start of the payload. Data that matches neither is rejected.

use anyhow::{Context, Result, anyhow};
use std::io::{Cursor, Read};
use std::sync::Arc;

/// One file extracted from an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveMember {
    /// Path of the member inside the archive, as recorded by the archive.
    pub name: String,
    pub data: Vec<u8>,
}

/// Pluggable archive format.
pub trait ArchiveCodec: Send + Sync {
    /// Human-readable codec name (e.g., "zip").
    fn name(&self) -> &str;

    /// Lowercase extensions with the leading dot.
    fn extensions(&self) -> &[&str];

    /// Signature at the start of the payload, if the format has one.
    fn magic_bytes(&self) -> Option<&[u8]>;

    /// Extract every regular file. `name_hint` is the archive's own name (for formats
    /// that do not record member names).
    ///
    /// # Errors
    /// Returns an error if the payload is corrupt.
    fn unpack(&self, data: &[u8], name_hint: &str) -> Result<Vec<ArchiveMember>>;
}

pub struct ZipCodec;

impl ArchiveCodec for ZipCodec {
    fn name(&self) -> &str {
        "zip"
    }

    fn extensions(&self) -> &[&str] {
        &[".zip"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(b"PK\x03\x04")
    }

    fn unpack(&self, data: &[u8], _name_hint: &str) -> Result<Vec<ArchiveMember>> {
        let mut archive = zip::ZipArchive::new(Cursor::new(data)).context("open zip archive")?;
        let mut members = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut file = archive
                .by_index(i)
                .with_context(|| format!("open zip member #{i}"))?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut buf = Vec::with_capacity(usize::try_from(file.size()).unwrap_or(0));
            file.read_to_end(&mut buf)
                .with_context(|| format!("inflate zip member {name}"))?;
            members.push(ArchiveMember { name, data: buf });
        }
        Ok(members)
    }
}

#[cfg(feature = "compression-gzip")]
pub struct GzipCodec;

#[cfg(feature = "compression-gzip")]
impl ArchiveCodec for GzipCodec {
    fn name(&self) -> &str {
        "gzip"
    }

    fn extensions(&self) -> &[&str] {
        &[".gz", ".gzip"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0x1f, 0x8b])
    }

    fn unpack(&self, data: &[u8], name_hint: &str) -> Result<Vec<ArchiveMember>> {
        let mut decoder = flate2::read::GzDecoder::new(data);
        let mut buf = Vec::new();
        decoder.read_to_end(&mut buf).context("inflate gzip stream")?;

        let recorded = decoder
            .header()
            .and_then(|h| h.filename())
            .map(|f| String::from_utf8_lossy(f).into_owned());
        let name = recorded.unwrap_or_else(|| strip_gzip_extension(name_hint));
        Ok(vec![ArchiveMember { name, data: buf }])
    }
}

#[cfg(feature = "compression-gzip")]
fn strip_gzip_extension(name: &str) -> String {
    let lower = name.to_lowercase();
    for ext in [".gzip", ".gz"] {
        if lower.ends_with(ext) {
            return name[..name.len() - ext.len()].to_string();
        }
    }
    name.to_string()
}

fn builtin_codecs() -> Vec<Arc<dyn ArchiveCodec>> {
    vec![
        Arc::new(ZipCodec),
        #[cfg(feature = "compression-gzip")]
        Arc::new(GzipCodec),
    ]
}

/// Pick the codec for a payload: extension of `name_hint` first, then magic bytes.
#[must_use]
pub fn detect_codec(data: &[u8], name_hint: &str) -> Option<Arc<dyn ArchiveCodec>> {
    let hint = name_hint.to_lowercase();
    let codecs = builtin_codecs();

    if let Some(codec) = codecs
        .iter()
        .find(|c| c.extensions().iter().any(|ext| hint.ends_with(ext)))
    {
        return Some(Arc::clone(codec));
    }

    codecs
        .into_iter()
        .find(|c| c.magic_bytes().is_some_and(|magic| data.starts_with(magic)))
}

/// Detect the archive format and extract all members.
///
/// # Errors
/// Returns an error if no codec recognizes the payload or unpacking fails.
pub fn unpack_archive(data: &[u8], name_hint: &str) -> Result<Vec<ArchiveMember>> {
    let codec = detect_codec(data, name_hint)
        .ok_or_else(|| anyhow!("unrecognized archive format for {name_hint}"))?;
    codec
        .unpack(data, name_hint)
        .with_context(|| format!("unpack {name_hint} as {}", codec.name()))
}
