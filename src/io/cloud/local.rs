//! Directory-backed [`ObjectIO`] for running the pipeline without a cloud account.
//!
//! Each bucket is a directory under the store root and each key is a relative path inside it.
//! Writes land in a temporary file next to the target and are renamed into place, so a
//! reader never observes a half-written object.

use crate::io::cloud::helpers::validate_key_path;
use crate::io::cloud::traits::{CloudIOError, CloudResult, ErrorKind, ObjectIO, ObjectMetadata};
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug, Clone)]
pub struct LocalObjectIO {
    root: PathBuf,
}

impl LocalObjectIO {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> CloudResult<PathBuf> {
        if bucket.is_empty() || bucket.contains(['/', '\\']) || bucket == "." || bucket == ".." {
            return Err(CloudIOError::new(
                ErrorKind::InvalidInput,
                format!("Invalid bucket name: {bucket:?}"),
            ));
        }
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> CloudResult<PathBuf> {
        validate_key_path(key)?;
        let mut path = self.bucket_dir(bucket)?;
        path.extend(key.split('/').filter(|s| !s.is_empty()));
        Ok(path)
    }

    fn with_context(err: std::io::Error, bucket: &str, key: &str) -> CloudIOError {
        let err = CloudIOError::from(err);
        let message = format!("{bucket}/{key}: {}", err.message);
        CloudIOError::new(err.kind, message)
    }

    fn metadata_for(key: &str, meta: &fs::Metadata) -> ObjectMetadata {
        ObjectMetadata {
            key: key.to_string(),
            size: meta.len(),
        }
    }

    fn walk(dir: &Path, prefix: &str, out: &mut Vec<(String, fs::Metadata)>) -> std::io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            // temp files from in-flight writes
            if name.starts_with(".tmp") {
                continue;
            }
            let key = if prefix.is_empty() {
                name
            } else {
                format!("{prefix}/{name}")
            };
            let meta = entry.metadata()?;
            if meta.is_dir() {
                Self::walk(&entry.path(), &key, out)?;
            } else {
                out.push((key, meta));
            }
        }
        Ok(())
    }
}

impl ObjectIO for LocalObjectIO {
    fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> CloudResult<()> {
        let path = self.object_path(bucket, key)?;
        let parent = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent).map_err(|e| Self::with_context(e, bucket, key))?;

        let mut tmp = NamedTempFile::new_in(parent).map_err(|e| Self::with_context(e, bucket, key))?;
        tmp.write_all(data)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| Self::with_context(e, bucket, key))?;
        tmp.persist(&path)
            .map_err(|e| Self::with_context(e.error, bucket, key))?;
        Ok(())
    }

    fn get_object(&self, bucket: &str, key: &str) -> CloudResult<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        fs::read(&path).map_err(|e| Self::with_context(e, bucket, key))
    }

    fn get_object_reader(&self, bucket: &str, key: &str) -> CloudResult<Box<dyn Read + Send>> {
        let path = self.object_path(bucket, key)?;
        let file = File::open(&path).map_err(|e| Self::with_context(e, bucket, key))?;
        Ok(Box::new(BufReader::new(file)))
    }

    fn delete_object(&self, bucket: &str, key: &str) -> CloudResult<()> {
        let path = self.object_path(bucket, key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::with_context(e, bucket, key)),
        }
    }

    fn list_objects(&self, bucket: &str, prefix: Option<&str>) -> CloudResult<Vec<ObjectMetadata>> {
        let dir = self.bucket_dir(bucket)?;
        if !dir.is_dir() {
            return Err(CloudIOError::new(
                ErrorKind::NotFound,
                format!("Bucket {bucket} not found"),
            ));
        }
        let mut found = Vec::new();
        Self::walk(&dir, "", &mut found).map_err(|e| Self::with_context(e, bucket, ""))?;

        let mut objects: Vec<ObjectMetadata> = found
            .iter()
            .filter(|(key, _)| prefix.is_none_or(|p| key.starts_with(p)))
            .map(|(key, meta)| Self::metadata_for(key, meta))
            .collect();
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    fn object_exists(&self, bucket: &str, key: &str) -> CloudResult<bool> {
        let path = self.object_path(bucket, key)?;
        Ok(path.is_file())
    }

    fn get_metadata(&self, bucket: &str, key: &str) -> CloudResult<ObjectMetadata> {
        let path = self.object_path(bucket, key)?;
        let meta = fs::metadata(&path).map_err(|e| Self::with_context(e, bucket, key))?;
        if !meta.is_file() {
            return Err(CloudIOError::new(
                ErrorKind::NotFound,
                format!("Object {bucket}/{key} not found"),
            ));
        }
        Ok(Self::metadata_for(key, &meta))
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
