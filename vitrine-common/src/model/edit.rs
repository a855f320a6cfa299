//! Post-edit reconciliation.
//!
//! An edit session hands us three buckets: products that existed before the
//! edit (with snapshots of their original fields), products added during the
//! session, and products removed during it. [`reconcile`] folds the settled
//! asset results back onto those buckets and computes the minimal batch of
//! row mutations that converges storage to the edited state.

use crate::{
    model::{
        Id, RowId,
        post::{NewProductRow, PostMarker, ProductMarker},
    },
    util::{base64_bytes, epoch_millis},
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt::Debug};
use thiserror::Error;
use time::UtcDateTime;

/// A binary asset travelling inline with a request, pending upload.
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ImageUpload {
    pub file_name: String,
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

impl Debug for ImageUpload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageUpload")
            .field("file_name", &self.file_name)
            .field("bytes", &format_args!("{} bytes", self.bytes.len()))
            .finish()
    }
}

/// A product that existed before the edit session began. `title` and `link`
/// are the edited values; the `default_*` fields are snapshots of the state
/// at session start, used for change detection. `image` carries a pending
/// binary replacement, absent when the asset is untouched.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub struct DefaultProduct {
    pub id: RowId<ProductMarker>,
    pub title: String,
    pub link: String,
    pub default_title: String,
    pub default_link: String,
    pub default_image: Option<String>,
    pub image: Option<ImageUpload>,
}

/// A product added during the edit session; it has no row yet.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub struct NewProduct {
    pub title: String,
    pub link: String,
    pub image: Option<ImageUpload>,
}

/// A product removed during the edit session. The original asset location
/// rides along so the orphaned object can be cleaned up.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub struct DeletedProduct {
    pub id: RowId<ProductMarker>,
    pub image: Option<String>,
}

/// The complete edited state of a post, constructed once per request and
/// never mutated afterwards. Absent `title`/`caption` means "unchanged".
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub struct EditRequest {
    pub post_id: Id<PostMarker>,
    pub title: Option<String>,
    pub caption: Option<String>,
    /// Pending replacement of the cover asset.
    pub cover: Option<ImageUpload>,
    /// Location of the existing cover asset, if any.
    pub current_cover: Option<String>,
    pub default_products: Vec<DefaultProduct>,
    pub new_products: Vec<NewProduct>,
    pub deleted_products: Vec<DeletedProduct>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum EditValidationError {
    #[error("A product is missing its link")]
    MissingLink,
    #[error("Neither a new nor an existing cover image is present")]
    MissingCover,
    #[error("Product {0} appears in more than one bucket")]
    ConflictingProduct(RowId<ProductMarker>),
}

impl EditRequest {
    /// Checks the invariants an edit must satisfy before any network call
    /// is made: every surviving product carries a link, a cover image
    /// exists (new or pre-existing), and no product id appears in both the
    /// surviving and the deleted bucket.
    pub fn validate(&self) -> Result<(), EditValidationError> {
        if self.cover.is_none() && self.current_cover.is_none() {
            return Err(EditValidationError::MissingCover);
        }

        let surviving_missing_link = self
            .default_products
            .iter()
            .map(|product| product.link.as_str())
            .chain(self.new_products.iter().map(|product| product.link.as_str()))
            .any(str::is_empty);
        if surviving_missing_link {
            return Err(EditValidationError::MissingLink);
        }

        let mut seen = BTreeSet::new();
        let ids = self
            .default_products
            .iter()
            .map(|product| product.id)
            .chain(self.deleted_products.iter().map(|product| product.id));
        for id in ids {
            if !seen.insert(id) {
                return Err(EditValidationError::ConflictingProduct(id));
            }
        }

        Ok(())
    }
}

/// Outcome of the asset phase: the stored public location for every entity
/// whose pending binary was persisted, `None` where nothing was uploaded.
/// The product vectors correspond to [`EditRequest::default_products`] and
/// [`EditRequest::new_products`] by index.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct EditAssets {
    pub cover: Option<String>,
    pub default_products: Vec<Option<String>>,
    pub new_products: Vec<Option<String>>,
}

/// Per-row values of the compound update covering all changed default
/// products.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize, Deserialize)]
pub struct ProductChange {
    pub id: RowId<ProductMarker>,
    pub title: String,
    pub link: String,
    pub image: Option<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash)]
pub struct PostFieldsUpdate {
    pub title: Option<String>,
    pub caption: Option<String>,
}

/// The minimal set of row mutations an edit needs, ready to be issued as
/// one batch. Empty members mean the corresponding statement is skipped.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct EditBatch {
    pub post_id: Id<PostMarker>,
    pub fields: Option<PostFieldsUpdate>,
    /// New cover url including the cache-busting suffix.
    pub cover_url: Option<String>,
    pub added: Vec<NewProductRow>,
    pub changed: Vec<ProductChange>,
    pub deleted: Vec<RowId<ProductMarker>>,
}

/// Classifies every default product, maps added products onto their
/// uploaded assets, and assembles the outgoing batch.
///
/// A default product is changed iff its title or link differs from the
/// session-start snapshot, or the asset phase produced a replacement for
/// it. Unchanged products are dropped from the batch entirely. A changed
/// product keeps its original asset location unless a replacement was
/// stored. `at` stamps the cache-busting suffix of a replaced cover.
#[must_use]
pub fn reconcile(request: &EditRequest, assets: &EditAssets, at: UtcDateTime) -> EditBatch {
    let fields = (request.title.is_some() || request.caption.is_some()).then(|| PostFieldsUpdate {
        title: request.title.clone(),
        caption: request.caption.clone(),
    });

    let cover_url = assets
        .cover
        .as_ref()
        .map(|url| format!("{url}?u={}", epoch_millis(at)));

    let changed = request
        .default_products
        .iter()
        .zip(assets.default_products.iter().chain(std::iter::repeat(&None)))
        .filter_map(|(product, uploaded)| {
            let textual_change = product.title != product.default_title
                || product.link != product.default_link;
            if uploaded.is_none() && !textual_change {
                return None;
            }

            Some(ProductChange {
                id: product.id,
                title: product.title.clone(),
                link: product.link.clone(),
                image: uploaded.clone().or_else(|| product.default_image.clone()),
            })
        })
        .collect();

    let added = request
        .new_products
        .iter()
        .zip(assets.new_products.iter().chain(std::iter::repeat(&None)))
        .map(|(product, uploaded)| NewProductRow {
            title: product.title.clone(),
            link: product.link.clone(),
            image: uploaded.clone().unwrap_or_default(),
        })
        .collect();

    let deleted = request
        .deleted_products
        .iter()
        .map(|product| product.id)
        .collect();

    EditBatch {
        post_id: request.post_id,
        fields,
        cover_url,
        added,
        changed,
        deleted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::utc_datetime;

    fn base_request() -> EditRequest {
        EditRequest {
            post_id: Id::random(),
            title: None,
            caption: None,
            cover: None,
            current_cover: Some("https://assets.test/storage/v1/object/public/posts/cover".into()),
            default_products: Vec::new(),
            new_products: Vec::new(),
            deleted_products: Vec::new(),
        }
    }

    fn default_product(id: i64, title: &str, link: &str) -> DefaultProduct {
        DefaultProduct {
            id: id.into(),
            title: title.into(),
            link: link.into(),
            default_title: title.into(),
            default_link: link.into(),
            default_image: Some(format!("url{id}")),
            image: None,
        }
    }

    const AT: UtcDateTime = utc_datetime!(2024-01-01 00:00);

    #[test]
    fn image_uploads_carry_base64_bytes() {
        let upload: ImageUpload = serde_json::from_value(serde_json::json!({
            "file_name": "lamp.png",
            "bytes": "q80=",
        }))
        .unwrap();

        assert_eq!(upload.bytes, vec![0xAB, 0xCD]);
        assert_eq!(serde_json::to_value(&upload).unwrap()["bytes"], "q80=");
    }

    #[test]
    fn missing_cover_is_rejected() {
        let mut request = base_request();
        request.current_cover = None;

        assert_eq!(request.validate(), Err(EditValidationError::MissingCover));

        request.cover = Some(ImageUpload {
            file_name: "cover.png".into(),
            bytes: vec![1, 2, 3],
        });
        assert_eq!(request.validate(), Ok(()));
    }

    #[test]
    fn surviving_product_without_link_is_rejected() {
        let mut request = base_request();
        request.new_products.push(NewProduct {
            title: "lamp".into(),
            link: String::new(),
            image: None,
        });

        assert_eq!(request.validate(), Err(EditValidationError::MissingLink));

        let mut request = base_request();
        request.default_products.push(default_product(1, "A", ""));
        assert_eq!(request.validate(), Err(EditValidationError::MissingLink));
    }

    #[test]
    fn product_in_two_buckets_is_rejected() {
        let mut request = base_request();
        request.default_products.push(default_product(7, "A", "x"));
        request.deleted_products.push(DeletedProduct {
            id: 7.into(),
            image: None,
        });

        assert_eq!(
            request.validate(),
            Err(EditValidationError::ConflictingProduct(7.into()))
        );
    }

    #[test]
    fn untouched_default_products_emit_nothing() {
        let mut request = base_request();
        request.default_products.push(default_product(1, "A", "x"));
        request.default_products.push(default_product(2, "B", "y"));

        let batch = reconcile(&request, &EditAssets::default(), AT);

        assert!(batch.fields.is_none());
        assert!(batch.cover_url.is_none());
        assert!(batch.added.is_empty());
        assert!(batch.changed.is_empty());
        assert!(batch.deleted.is_empty());
    }

    #[test]
    fn caption_only_edit_updates_post_fields_alone() {
        let mut request = base_request();
        request.caption = Some("hello".into());

        let batch = reconcile(&request, &EditAssets::default(), AT);

        assert_eq!(
            batch.fields,
            Some(PostFieldsUpdate {
                title: None,
                caption: Some("hello".into()),
            })
        );
        assert!(batch.cover_url.is_none());
        assert!(batch.added.is_empty());
        assert!(batch.changed.is_empty());
        assert!(batch.deleted.is_empty());
    }

    #[test]
    fn link_change_marks_product_changed() {
        let mut request = base_request();
        request.default_products.push(DefaultProduct {
            id: 1.into(),
            title: "A".into(),
            link: "x".into(),
            default_title: "A".into(),
            default_link: "y".into(),
            default_image: None,
            image: None,
        });

        let batch = reconcile(&request, &EditAssets::default(), AT);

        assert_eq!(
            batch.changed,
            vec![ProductChange {
                id: 1.into(),
                title: "A".into(),
                link: "x".into(),
                image: None,
            }]
        );
    }

    #[test]
    fn asset_change_alone_marks_product_changed() {
        let mut request = base_request();
        request.default_products.push(default_product(3, "A", "x"));

        let assets = EditAssets {
            cover: None,
            default_products: vec![Some("fresh-url".into())],
            new_products: Vec::new(),
        };
        let batch = reconcile(&request, &assets, AT);

        assert_eq!(batch.changed.len(), 1);
        assert_eq!(batch.changed[0].image.as_deref(), Some("fresh-url"));
    }

    #[test]
    fn changed_product_without_fresh_asset_keeps_original_image() {
        let mut request = base_request();
        let mut product = default_product(4, "A", "x");
        product.title = "B".into();
        request.default_products.push(product);

        let batch = reconcile(&request, &EditAssets::default(), AT);

        assert_eq!(batch.changed[0].image.as_deref(), Some("url4"));
    }

    #[test]
    fn added_products_take_their_own_uploaded_asset() {
        let mut request = base_request();
        for title in ["first", "second"] {
            request.new_products.push(NewProduct {
                title: title.into(),
                link: "https://shop.example".into(),
                image: None,
            });
        }

        let assets = EditAssets {
            cover: None,
            default_products: Vec::new(),
            new_products: vec![Some("first-url".into()), None],
        };
        let batch = reconcile(&request, &assets, AT);

        assert_eq!(batch.added.len(), 2);
        assert_eq!(batch.added[0].image, "first-url");
        assert_eq!(batch.added[1].image, "");
    }

    #[test]
    fn deleted_products_target_all_ids() {
        let mut request = base_request();
        request.deleted_products.push(DeletedProduct {
            id: 5.into(),
            image: Some("url5".into()),
        });
        request.deleted_products.push(DeletedProduct {
            id: 6.into(),
            image: None,
        });

        let batch = reconcile(&request, &EditAssets::default(), AT);

        assert_eq!(batch.deleted, vec![5.into(), 6.into()]);
    }

    #[test]
    fn replaced_cover_gets_cache_busting_suffix() {
        let request = base_request();
        let assets = EditAssets {
            cover: Some("https://assets.test/storage/v1/object/public/posts/cover".into()),
            default_products: Vec::new(),
            new_products: Vec::new(),
        };

        let batch = reconcile(&request, &assets, AT);

        assert_eq!(
            batch.cover_url.as_deref(),
            Some("https://assets.test/storage/v1/object/public/posts/cover?u=1704067200000"),
        );
    }
}
