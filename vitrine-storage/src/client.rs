use crate::{AssetStore, Bucket, StorageError, StoredObject};
use serde::Serialize;
use tracing::debug;

/// HTTP client for a hosted storage backend exposing the
/// `/storage/v1/object` API. Objects are written with a service key and
/// read anonymously through their public urls.
#[derive(Clone, Debug)]
pub struct StorageClient {
    base_url: String,
    service_key: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct RemovePayload<'a> {
    prefixes: &'a [String],
}

impl StorageClient {
    #[must_use]
    pub fn new(base_url: String, service_key: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            service_key,
            http: reqwest::Client::new(),
        }
    }

    fn object_endpoint(&self, bucket: Bucket, path: &str) -> String {
        format!("{}/storage/v1/object/{bucket}/{path}", self.base_url)
    }

    /// Maps a public location back to its bucket-relative object path.
    /// Cache-busting query suffixes are dropped, since they are part of the
    /// served url, not of the stored object's name.
    fn object_path<'a>(
        &self,
        bucket: Bucket,
        location: &'a str,
    ) -> Result<&'a str, StorageError> {
        let prefix = format!("{}/storage/v1/object/public/{bucket}/", self.base_url);
        let path = location
            .strip_prefix(&prefix)
            .ok_or_else(|| StorageError::ForeignLocation {
                bucket,
                location: location.to_owned(),
            })?;

        let path = path.split_once('?').map_or(path, |(path, _)| path);
        if path.is_empty() {
            return Err(StorageError::ForeignLocation {
                bucket,
                location: location.to_owned(),
            });
        }

        Ok(path)
    }

    async fn check(response: reqwest::Response) -> Result<(), StorageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = response.text().await.unwrap_or_default();
        Err(StorageError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

impl AssetStore for StorageClient {
    async fn upload(
        &self,
        bucket: Bucket,
        data: &[u8],
        path: &str,
    ) -> Result<StoredObject, StorageError> {
        debug!(%bucket, path, size = data.len(), "Uploading object");

        let response = self
            .http
            .post(self.object_endpoint(bucket, path))
            .bearer_auth(&self.service_key)
            .body(data.to_vec())
            .send()
            .await?;
        Self::check(response).await?;

        Ok(StoredObject {
            path: path.to_owned(),
        })
    }

    async fn update(
        &self,
        bucket: Bucket,
        data: &[u8],
        location: &str,
    ) -> Result<StoredObject, StorageError> {
        let path = self.object_path(bucket, location)?.to_owned();
        debug!(%bucket, path, size = data.len(), "Replacing object");

        let response = self
            .http
            .put(self.object_endpoint(bucket, &path))
            .bearer_auth(&self.service_key)
            .body(data.to_vec())
            .send()
            .await?;
        Self::check(response).await?;

        Ok(StoredObject { path })
    }

    async fn remove(&self, bucket: Bucket, locations: &[String]) -> Result<(), StorageError> {
        if locations.is_empty() {
            return Ok(());
        }

        let paths = locations
            .iter()
            .map(|location| Ok(self.object_path(bucket, location)?.to_owned()))
            .collect::<Result<Vec<_>, StorageError>>()?;
        debug!(%bucket, count = paths.len(), "Removing objects");

        let response = self
            .http
            .delete(format!("{}/storage/v1/object/{bucket}", self.base_url))
            .bearer_auth(&self.service_key)
            .json(&RemovePayload { prefixes: &paths })
            .send()
            .await?;
        Self::check(response).await
    }

    fn public_url(&self, bucket: Bucket, path: &str) -> String {
        format!("{}/storage/v1/object/public/{bucket}/{path}", self.base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> StorageClient {
        StorageClient::new("https://assets.test/".into(), "service-key".into())
    }

    #[test]
    fn public_url_shape() {
        assert_eq!(
            client().public_url(Bucket::Posts, "123-cover.png"),
            "https://assets.test/storage/v1/object/public/posts/123-cover.png",
        );
    }

    #[test]
    fn object_path_strips_prefix_and_query() {
        let client = client();

        assert_eq!(
            client
                .object_path(
                    Bucket::Products,
                    "https://assets.test/storage/v1/object/public/products/lamp.png",
                )
                .unwrap(),
            "lamp.png",
        );
        assert_eq!(
            client
                .object_path(
                    Bucket::Posts,
                    "https://assets.test/storage/v1/object/public/posts/cover.png?u=1704067200000",
                )
                .unwrap(),
            "cover.png",
        );
    }

    #[test]
    fn foreign_locations_are_rejected() {
        let client = client();

        assert!(
            client
                .object_path(Bucket::Posts, "https://elsewhere.test/object/posts/a.png")
                .is_err()
        );
        // A products url is not a valid posts location.
        assert!(
            client
                .object_path(
                    Bucket::Posts,
                    "https://assets.test/storage/v1/object/public/products/a.png",
                )
                .is_err()
        );
    }

    #[tokio::test]
    async fn removing_nothing_issues_no_call() {
        // No server is listening on assets.test; an empty removal must
        // still succeed because it never leaves the process.
        assert!(client().remove(Bucket::Products, &[]).await.is_ok());
    }
}
