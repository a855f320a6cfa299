//! Asset store collaborator: binary objects addressed by bucket + path,
//! reachable for readers through public urls.

pub mod client;

use std::{fmt::Display, future::Future};
use thiserror::Error;
use time::UtcDateTime;
use vitrine_common::util::epoch_millis;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum Bucket {
    Posts,
    Products,
    Profiles,
}

impl Bucket {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Bucket::Posts => "posts",
            Bucket::Products => "products",
            Bucket::Profiles => "profiles",
        }
    }
}

impl Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Asset store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Asset store rejected the request with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("Location does not belong to bucket {bucket}: {location}")]
    ForeignLocation { bucket: Bucket, location: String },
}

/// The stored location of a persisted object, relative to its bucket.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct StoredObject {
    pub path: String,
}

/// External binary object storage. Mutations address disjoint paths and
/// carry no transactional relationship to any database write.
pub trait AssetStore: Send + Sync {
    /// Stores a new object under `path` inside `bucket`.
    fn upload(
        &self,
        bucket: Bucket,
        data: &[u8],
        path: &str,
    ) -> impl Future<Output = Result<StoredObject, StorageError>> + Send;

    /// Replaces the object behind an existing public `location` in place.
    fn update(
        &self,
        bucket: Bucket,
        data: &[u8],
        location: &str,
    ) -> impl Future<Output = Result<StoredObject, StorageError>> + Send;

    /// Removes every object in `locations`. An empty list is a no-op, not
    /// an error.
    fn remove(
        &self,
        bucket: Bucket,
        locations: &[String],
    ) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// The public url readers use to fetch the object at `path`.
    fn public_url(&self, bucket: Bucket, path: &str) -> String;
}

/// Object name for a fresh upload: time-qualified to avoid collisions
/// between files sharing a name.
#[must_use]
pub fn timestamped_object_name(at: UtcDateTime, file_name: &str) -> String {
    format!("{}-{file_name}", epoch_millis(at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::utc_datetime;

    #[test]
    fn object_names_are_time_qualified() {
        let name = timestamped_object_name(utc_datetime!(2024-01-01 00:00), "lamp.png");
        assert_eq!(name, "1704067200000-lamp.png");
    }
}
