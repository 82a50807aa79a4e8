use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::fs;
use tracing::debug;

use crate::error::StorageError;

use super::{ObjectStat, RemoteStorage, matches_pattern};

const API_BASE: &str = "https://storage.googleapis.com/storage/v1";
const UPLOAD_BASE: &str = "https://storage.googleapis.com/upload/storage/v1";

/// Google Cloud Storage adapter over the JSON API. The object
/// metageneration doubles as the revision number for compare-and-swap
/// uploads. Authentication is a bearer token from `PIS_GCS_TOKEN`;
/// interactive credential flows are out of scope.
pub struct GcsStorage {
    client: Client,
    token: Option<String>,
}

impl Default for GcsStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl GcsStorage {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            token: std::env::var("PIS_GCS_TOKEN").ok(),
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn object_metadata(&self, uri: &str) -> Result<GcsObject, StorageError> {
        let (bucket, object) = split_uri(uri)?;
        let url = format!("{API_BASE}/b/{bucket}/o/{}", encode(object));
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|err| StorageError::Helper(err.to_string()))?;
        let response = check_status(response, uri, None).await?;
        response
            .json::<GcsObject>()
            .await
            .map_err(|err| StorageError::Helper(err.to_string()))
    }

    async fn object_media(&self, uri: &str) -> Result<Vec<u8>, StorageError> {
        let (bucket, object) = split_uri(uri)?;
        let url = format!("{API_BASE}/b/{bucket}/o/{}?alt=media", encode(object));
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|err| StorageError::Helper(err.to_string()))?;
        let response = check_status(response, uri, None).await?;
        let body = response
            .bytes()
            .await
            .map_err(|err| StorageError::Helper(err.to_string()))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl RemoteStorage for GcsStorage {
    async fn check(&self, uri: &str) -> Result<bool, StorageError> {
        let (bucket, prefix) = split_uri(uri)?;
        let url = format!("{API_BASE}/b/{bucket}/o?prefix={}&maxResults=1", encode(prefix));
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|err| StorageError::Helper(err.to_string()))?;
        Ok(response.status().is_success())
    }

    async fn stat(&self, uri: &str) -> Result<ObjectStat, StorageError> {
        let object = self.object_metadata(uri).await?;
        object.into_stat(uri)
    }

    async fn list(&self, uri: &str, pattern: Option<&str>) -> Result<Vec<String>, StorageError> {
        let (bucket, prefix) = split_uri(uri)?;
        let url = format!("{API_BASE}/b/{bucket}/o?prefix={}", encode(prefix));
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|err| StorageError::Helper(err.to_string()))?;
        let response = check_status(response, uri, None).await?;
        let listing: GcsListing = response
            .json()
            .await
            .map_err(|err| StorageError::Helper(err.to_string()))?;
        Ok(listing
            .items
            .into_iter()
            .map(|item| format!("gs://{bucket}/{}", item.name))
            .filter(|name| matches_pattern(name, pattern))
            .collect())
    }

    async fn download_to_file(&self, uri: &str, dst: &Path) -> Result<i64, StorageError> {
        let metadata = self.object_metadata(uri).await?;
        let body = self.object_media(uri).await?;
        fs::write(dst, body)
            .await
            .map_err(|err| StorageError::Helper(err.to_string()))?;
        debug!(uri, dst = %dst.display(), "downloaded object");
        metadata.revision(uri)
    }

    async fn download_to_string(&self, uri: &str) -> Result<(String, i64), StorageError> {
        let metadata = self.object_metadata(uri).await?;
        let body = self.object_media(uri).await?;
        let text =
            String::from_utf8(body).map_err(|err| StorageError::Helper(err.to_string()))?;
        Ok((text, metadata.revision(uri)?))
    }

    async fn upload(
        &self,
        src: &Path,
        uri: &str,
        revision: Option<i64>,
    ) -> Result<i64, StorageError> {
        let (bucket, object) = split_uri(uri)?;
        let body = fs::read(src)
            .await
            .map_err(|err| StorageError::Helper(err.to_string()))?;

        let mut url = format!(
            "{UPLOAD_BASE}/b/{bucket}/o?uploadType=media&name={}",
            encode(object)
        );
        match revision {
            Some(0) => url.push_str("&ifGenerationMatch=0"),
            Some(expected) => url.push_str(&format!("&ifMetagenerationMatch={expected}")),
            None => {}
        }

        let response = self
            .authorize(self.client.post(url))
            .body(body)
            .send()
            .await
            .map_err(|err| StorageError::Helper(err.to_string()))?;
        let response = check_status(response, uri, revision).await?;
        let uploaded: GcsObject = response
            .json()
            .await
            .map_err(|err| StorageError::Helper(err.to_string()))?;
        debug!(uri, src = %src.display(), "uploaded object");
        uploaded.revision(uri)
    }
}

#[derive(Debug, Deserialize)]
struct GcsObject {
    metageneration: String,
    #[serde(default)]
    updated: Option<DateTime<Utc>>,
    #[serde(default)]
    size: Option<String>,
}

impl GcsObject {
    fn revision(&self, uri: &str) -> Result<i64, StorageError> {
        self.metageneration.parse::<i64>().map_err(|_| {
            StorageError::Helper(format!(
                "unparseable metageneration '{}' for {uri}",
                self.metageneration
            ))
        })
    }

    fn into_stat(self, uri: &str) -> Result<ObjectStat, StorageError> {
        let revision = self.revision(uri)?;
        Ok(ObjectStat {
            updated: self.updated.unwrap_or_else(Utc::now),
            size: self.size.and_then(|s| s.parse().ok()),
            revision,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct GcsListing {
    #[serde(default)]
    items: Vec<GcsListedObject>,
}

#[derive(Debug, Deserialize)]
struct GcsListedObject {
    name: String,
}

fn split_uri(uri: &str) -> Result<(&str, &str), StorageError> {
    let rest = uri
        .strip_prefix("gs://")
        .ok_or_else(|| StorageError::Helper(format!("not a gs:// uri: {uri}")))?;
    match rest.split_once('/') {
        Some((bucket, object)) if !bucket.is_empty() => Ok((bucket, object)),
        _ => Err(StorageError::Helper(format!(
            "uri must look like gs://bucket/path: {uri}"
        ))),
    }
}

// Object names go into the URL path and query, so everything outside the
// unreserved set gets percent-encoded.
fn encode(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{other:02X}")),
        }
    }
    out
}

async fn check_status(
    response: Response,
    uri: &str,
    revision: Option<i64>,
) -> Result<Response, StorageError> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::NOT_FOUND => Err(StorageError::NotFound(uri.to_string())),
        StatusCode::PRECONDITION_FAILED => Err(StorageError::PreconditionFailed {
            uri: uri.to_string(),
            expected: revision.unwrap_or_default(),
        }),
        status => {
            let body = response.text().await.unwrap_or_default();
            Err(StorageError::Helper(format!(
                "unexpected status {status} for {uri}: {body}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_bucket_and_object() {
        let (bucket, object) = split_uri("gs://bucket/path/to/file.txt").unwrap();
        assert_eq!(bucket, "bucket");
        assert_eq!(object, "path/to/file.txt");
    }

    #[test]
    fn rejects_other_schemes() {
        assert!(split_uri("s3://bucket/file").is_err());
        assert!(split_uri("gs://").is_err());
    }

    #[test]
    fn encodes_path_separators() {
        assert_eq!(encode("a/b c.txt"), "a%2Fb%20c.txt");
    }
}
