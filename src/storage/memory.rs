use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::fs;

use crate::error::StorageError;

use super::{ObjectStat, RemoteStorage, matches_pattern};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    revision: i64,
    updated: DateTime<Utc>,
}

/// In-process adapter with full revision semantics. Backs the integration
/// tests and any run that wants real CAS behavior without a network.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    objects: Mutex<BTreeMap<String, StoredObject>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, uri: &str, data: impl Into<Vec<u8>>) {
        let mut objects = self.objects.lock().expect("memory storage lock");
        let revision = objects.get(uri).map(|o| o.revision + 1).unwrap_or(1);
        objects.insert(
            uri.to_string(),
            StoredObject {
                data: data.into(),
                revision,
                updated: Utc::now(),
            },
        );
    }

    pub fn get(&self, uri: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .expect("memory storage lock")
            .get(uri)
            .map(|o| o.data.clone())
    }
}

#[async_trait]
impl RemoteStorage for MemoryStorage {
    async fn check(&self, uri: &str) -> Result<bool, StorageError> {
        let objects = self.objects.lock().expect("memory storage lock");
        Ok(objects.keys().any(|key| key.starts_with(uri)))
    }

    async fn stat(&self, uri: &str) -> Result<ObjectStat, StorageError> {
        let objects = self.objects.lock().expect("memory storage lock");
        let object = objects
            .get(uri)
            .ok_or_else(|| StorageError::NotFound(uri.to_string()))?;
        Ok(ObjectStat {
            updated: object.updated,
            size: Some(object.data.len() as u64),
            revision: object.revision,
        })
    }

    async fn list(&self, uri: &str, pattern: Option<&str>) -> Result<Vec<String>, StorageError> {
        let objects = self.objects.lock().expect("memory storage lock");
        Ok(objects
            .keys()
            .filter(|key| key.starts_with(uri) && matches_pattern(key, pattern))
            .cloned()
            .collect())
    }

    async fn download_to_file(&self, uri: &str, dst: &Path) -> Result<i64, StorageError> {
        let (data, revision) = {
            let objects = self.objects.lock().expect("memory storage lock");
            let object = objects
                .get(uri)
                .ok_or_else(|| StorageError::NotFound(uri.to_string()))?;
            (object.data.clone(), object.revision)
        };
        fs::write(dst, data)
            .await
            .map_err(|err| StorageError::Helper(err.to_string()))?;
        Ok(revision)
    }

    async fn download_to_string(&self, uri: &str) -> Result<(String, i64), StorageError> {
        let objects = self.objects.lock().expect("memory storage lock");
        let object = objects
            .get(uri)
            .ok_or_else(|| StorageError::NotFound(uri.to_string()))?;
        let body = String::from_utf8(object.data.clone())
            .map_err(|err| StorageError::Helper(err.to_string()))?;
        Ok((body, object.revision))
    }

    async fn upload(
        &self,
        src: &Path,
        uri: &str,
        revision: Option<i64>,
    ) -> Result<i64, StorageError> {
        let data = fs::read(src)
            .await
            .map_err(|err| StorageError::Helper(err.to_string()))?;
        let mut objects = self.objects.lock().expect("memory storage lock");
        let current = objects.get(uri).map(|o| o.revision).unwrap_or(0);
        if let Some(expected) = revision
            && expected != current
        {
            return Err(StorageError::PreconditionFailed {
                uri: uri.to_string(),
                expected,
            });
        }
        let next = current + 1;
        objects.insert(
            uri.to_string(),
            StoredObject {
                data,
                revision: next,
                updated: Utc::now(),
            },
        );
        Ok(next)
    }
}
