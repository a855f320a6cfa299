use crate::model::{
    Id, RowId,
    edit::{EditValidationError, ImageUpload, NewProduct},
    user::UserMarker,
};
use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};
use thiserror::Error;
use time::UtcDateTime;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct ImageMarker;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct ProductMarker;

/// Moderation state of a post. Every post starts out `Pending`; an admin
/// moves it to `Published` or `Rejected` exactly once.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostStatus {
    #[default]
    Pending,
    Published,
    Rejected,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("Unknown post status: {0}")]
pub struct InvalidPostStatusError(String);

impl PostStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PostStatus::Pending => "PENDING",
            PostStatus::Published => "PUBLISHED",
            PostStatus::Rejected => "REJECTED",
        }
    }
}

impl Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = InvalidPostStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PostStatus::Pending),
            "PUBLISHED" => Ok(PostStatus::Published),
            "REJECTED" => Ok(PostStatus::Rejected),
            other => Err(InvalidPostStatusError(other.to_owned())),
        }
    }
}

/// A post's cover image row. Exactly one exists per post; edits replace the
/// url in place rather than versioning it.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub struct Image {
    pub id: RowId<ImageMarker>,
    pub url: String,
    pub post_id: Id<PostMarker>,
    pub created_at: UtcDateTime,
    pub updated_at: Option<UtcDateTime>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub struct Product {
    pub id: RowId<ProductMarker>,
    pub title: Option<String>,
    pub link: String,
    pub image: Option<String>,
    pub post_id: Id<PostMarker>,
    pub created_at: UtcDateTime,
    pub updated_at: Option<UtcDateTime>,
}

/// A post together with its cover image and linked products, as returned
/// to callers.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub struct Post {
    pub id: Id<PostMarker>,
    pub title: Option<String>,
    pub caption: Option<String>,
    pub status: PostStatus,
    pub user_id: Id<UserMarker>,
    pub image: Image,
    pub products: Vec<Product>,
    pub created_at: UtcDateTime,
    pub updated_at: Option<UtcDateTime>,
}

/// Row values for a product insert, with any pending asset already
/// resolved to its stored location.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Serialize, Deserialize)]
pub struct NewProductRow {
    pub title: String,
    pub link: String,
    pub image: String,
}

/// A post as submitted for creation, cover and product assets still
/// pending upload.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub struct PostDraft {
    pub title: String,
    pub caption: String,
    pub cover: ImageUpload,
    pub products: Vec<NewProduct>,
}

impl PostDraft {
    /// Every product must carry a link before any upload is attempted.
    pub fn validate(&self) -> Result<(), EditValidationError> {
        if self.products.iter().any(|product| product.link.is_empty()) {
            return Err(EditValidationError::MissingLink);
        }

        Ok(())
    }
}

/// A fully resolved post creation: the cover and all product assets are
/// already stored, so only row inserts remain.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct CreatePost {
    pub title: String,
    pub caption: String,
    pub user_id: Id<UserMarker>,
    pub cover_url: String,
    pub products: Vec<NewProductRow>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub from: UtcDateTime,
    pub to: UtcDateTime,
}

/// Moderation-portal search filter. Absent members do not constrain the
/// result set.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Serialize, Deserialize)]
pub struct PostSearchFilter {
    pub username: Option<String>,
    pub status: Option<PostStatus>,
    pub date_range: Option<DateRange>,
}
