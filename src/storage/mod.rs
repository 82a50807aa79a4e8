use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StorageError;

pub mod gcs;
pub mod memory;
pub mod noop;

pub use gcs::GcsStorage;
pub use memory::MemoryStorage;
pub use noop::NoopStorage;

#[derive(Debug, Clone)]
pub struct ObjectStat {
    pub updated: DateTime<Utc>,
    pub size: Option<u64>,
    pub revision: i64,
}

/// Uniform surface over remote object stores, one adapter per URI scheme.
/// Revisions increase monotonically per object; `upload` with
/// `Some(revision)` is a compare-and-swap (0 means the object must not
/// exist yet).
#[async_trait]
pub trait RemoteStorage: Send + Sync {
    async fn check(&self, uri: &str) -> Result<bool, StorageError>;

    async fn stat(&self, uri: &str) -> Result<ObjectStat, StorageError>;

    async fn list(&self, uri: &str, pattern: Option<&str>) -> Result<Vec<String>, StorageError>;

    async fn download_to_file(&self, uri: &str, dst: &Path) -> Result<i64, StorageError>;

    async fn download_to_string(&self, uri: &str) -> Result<(String, i64), StorageError>;

    async fn upload(&self, src: &Path, uri: &str, revision: Option<i64>)
    -> Result<i64, StorageError>;
}

/// Simple substring filter for `list`; a leading `!` inverts the match.
pub fn matches_pattern(name: &str, pattern: Option<&str>) -> bool {
    match pattern {
        None => true,
        Some(p) => match p.strip_prefix('!') {
            Some(excluded) => !name.contains(excluded),
            None => name.contains(p),
        },
    }
}

pub fn scheme_supported(uri: &str) -> bool {
    uri.starts_with("gs://") || uri.starts_with("noop://")
}

pub fn storage_for(uri: &str) -> Result<Arc<dyn RemoteStorage>, StorageError> {
    if uri.starts_with("gs://") {
        Ok(Arc::new(GcsStorage::new()))
    } else if uri.starts_with("noop://") {
        Ok(Arc::new(NoopStorage::new()))
    } else {
        Err(StorageError::Helper(format!(
            "no storage adapter for uri '{uri}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_matches_substring() {
        assert!(matches_pattern("gs://b/data/index.txt", Some("index")));
        assert!(!matches_pattern("gs://b/data/index.txt", Some("csv")));
    }

    #[test]
    fn leading_bang_inverts() {
        assert!(!matches_pattern("gs://b/tmp/file", Some("!tmp")));
        assert!(matches_pattern("gs://b/data/file", Some("!tmp")));
    }

    #[test]
    fn no_pattern_matches_all() {
        assert!(matches_pattern("anything", None));
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        assert!(storage_for("s3://bucket/key").is_err());
        assert!(scheme_supported("gs://bucket/key"));
        assert!(!scheme_supported("s3://bucket/key"));
    }
}
