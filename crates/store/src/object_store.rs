use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;
use walkdir::WalkDir;

/// Listing entry for one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectSummary {
    pub bucket: String,
    pub key: String,
    pub last_modified_millis: i64,
    pub size: u64,
}

impl ObjectSummary {
    /// Last path segment of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

/// Bucket/key object storage. Writes replace a key atomically.
pub trait ObjectStore: Send + Sync {
    /// Objects whose key starts with `prefix`, in key order.
    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectSummary>>;
    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>>;
    fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<()>;
    fn last_modified(&self, bucket: &str, key: &str) -> Result<Option<i64>>;
    /// Copies the object to `dest` unless `dest` is at least as new.
    /// Returns whether a copy happened.
    fn download_if_changed(&self, bucket: &str, key: &str, dest: &Path) -> Result<bool>;
}

/// Object store backed by a directory: `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf> {
        if bucket.is_empty() || !is_plain_relative(Path::new(bucket)) || bucket.contains('/') {
            return Err(StoreError::InvalidKey(format!("bucket {bucket:?}")));
        }
        Ok(self.root.join(bucket))
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let dir = self.bucket_dir(bucket)?;
        if key.is_empty() || key.ends_with('/') || !is_plain_relative(Path::new(key)) {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(dir.join(key))
    }
}

fn is_plain_relative(path: &Path) -> bool {
    path.components().all(|component| matches!(component, Component::Normal(_)))
}

fn modified_millis(metadata: &fs::Metadata) -> i64 {
    metadata
        .modified()
        .map(|time: SystemTime| DateTime::<Utc>::from(time).timestamp_millis())
        .unwrap_or(0)
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = temp_path_for(path);
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)
}

impl ObjectStore for LocalObjectStore {
    fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectSummary>> {
        let dir = self.bucket_dir(bucket)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut objects = Vec::new();
        for entry in WalkDir::new(&dir).follow_links(false) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&dir) else {
                continue;
            };
            let key = relative
                .components()
                .map(|component| component.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if !key.starts_with(prefix) {
                continue;
            }
            let metadata = entry.metadata()?;
            objects.push(ObjectSummary {
                bucket: bucket.to_string(),
                key,
                last_modified_millis: modified_millis(&metadata),
                size: metadata.len(),
            });
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.object_path(bucket, key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn put(&self, bucket: &str, key: &str, data: &[u8]) -> Result<()> {
        let path = self.object_path(bucket, key)?;
        write_atomic(&path, data)?;
        debug!(bucket, key, bytes = data.len(), "stored object");
        Ok(())
    }

    fn last_modified(&self, bucket: &str, key: &str) -> Result<Option<i64>> {
        let path = self.object_path(bucket, key)?;
        match fs::metadata(&path) {
            Ok(metadata) => Ok(Some(modified_millis(&metadata))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn download_if_changed(&self, bucket: &str, key: &str, dest: &Path) -> Result<bool> {
        let source = self.object_path(bucket, key)?;
        let remote = modified_millis(&fs::metadata(&source)?);
        let local = fs::metadata(dest).ok().map(|metadata| modified_millis(&metadata));
        if local.is_some_and(|local| local >= remote) {
            debug!(bucket, key, dest = %dest.display(), "local copy is current");
            return Ok(false);
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = temp_path_for(dest);
        fs::copy(&source, &tmp)?;
        fs::rename(&tmp, dest)?;
        debug!(bucket, key, dest = %dest.display(), "downloaded object");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_cannot_escape_the_bucket() {
        let store = LocalObjectStore::new("/tmp/never-used");
        assert!(store.object_path("work", "../secret").is_err());
        assert!(store.object_path("work", "/abs").is_err());
        assert!(store.object_path("", "key").is_err());
        assert!(store.object_path("work", "a/b/c").is_ok());
    }

    #[test]
    fn summary_file_name() {
        let summary = ObjectSummary {
            bucket: "b".to_string(),
            key: "dbr/123-aws-billing-2024-03.csv.zip".to_string(),
            last_modified_millis: 0,
            size: 0,
        };
        assert_eq!(summary.file_name(), "123-aws-billing-2024-03.csv.zip");
    }
}
