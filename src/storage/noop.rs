use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use crate::error::StorageError;

use super::{ObjectStat, RemoteStorage};

/// Accepts everything and stores nothing. Useful for wiring a recipe up to
/// the upload phase without a real bucket.
#[derive(Debug, Default)]
pub struct NoopStorage {
    revisions: AtomicI64,
}

impl NoopStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RemoteStorage for NoopStorage {
    async fn check(&self, uri: &str) -> Result<bool, StorageError> {
        debug!(uri, "noop check");
        Ok(true)
    }

    async fn stat(&self, uri: &str) -> Result<ObjectStat, StorageError> {
        debug!(uri, "noop stat");
        Ok(ObjectStat {
            updated: Utc::now(),
            size: None,
            revision: self.revisions.load(Ordering::SeqCst),
        })
    }

    async fn list(&self, uri: &str, _pattern: Option<&str>) -> Result<Vec<String>, StorageError> {
        debug!(uri, "noop list");
        Ok(Vec::new())
    }

    async fn download_to_file(&self, uri: &str, _dst: &Path) -> Result<i64, StorageError> {
        Err(StorageError::NotFound(uri.to_string()))
    }

    async fn download_to_string(&self, uri: &str) -> Result<(String, i64), StorageError> {
        Err(StorageError::NotFound(uri.to_string()))
    }

    async fn upload(
        &self,
        src: &Path,
        uri: &str,
        _revision: Option<i64>,
    ) -> Result<i64, StorageError> {
        debug!(src = %src.display(), uri, "noop upload");
        Ok(self.revisions.fetch_add(1, Ordering::SeqCst) + 1)
    }
}
