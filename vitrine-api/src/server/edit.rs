//! Asset fan-out around post mutations.
//!
//! Every pending binary in a request is pushed to the asset store
//! concurrently; the request suspends until all calls settle. Already
//! succeeded asset mutations are never rolled back when a sibling fails,
//! so a failing batch can leave stray objects behind (cleaned up manually,
//! never blocking the row mutations).

use futures::{future::join_all, join};
use time::UtcDateTime;
use tracing::warn;
use vitrine_common::model::{
    Id,
    edit::{EditAssets, EditBatch, EditRequest, reconcile},
    post::{CreatePost, NewProductRow, Post, PostDraft},
    user::UserMarker,
};
use vitrine_storage::{AssetStore, Bucket, StorageError, timestamped_object_name};

/// Runs the asset phase of an edit and folds the settled results into the
/// batch of row mutations. `at` qualifies fresh object names and the
/// cache-busting suffix of a replaced cover.
pub(crate) async fn plan_edit<S: AssetStore>(
    assets: &S,
    request: &EditRequest,
    at: UtcDateTime,
) -> Result<EditBatch, StorageError> {
    let cover = async {
        match (&request.cover, &request.current_cover) {
            (Some(file), Some(location)) => assets
                .update(Bucket::Posts, &file.bytes, location)
                .await
                .map(Some),
            (Some(file), None) => assets
                .upload(
                    Bucket::Posts,
                    &file.bytes,
                    &timestamped_object_name(at, &file.file_name),
                )
                .await
                .map(Some),
            (None, _) => Ok(None),
        }
    };

    let default_products = join_all(request.default_products.iter().map(|product| async move {
        match (&product.image, &product.default_image) {
            (Some(file), Some(location)) => assets
                .update(Bucket::Products, &file.bytes, location)
                .await
                .map(Some),
            _ => Ok(None),
        }
    }));

    let new_products = join_all(request.new_products.iter().map(|product| async move {
        match &product.image {
            Some(file) => assets
                .upload(
                    Bucket::Products,
                    &file.bytes,
                    &timestamped_object_name(at, &file.file_name),
                )
                .await
                .map(Some),
            None => Ok(None),
        }
    }));

    let removals: Vec<String> = request
        .deleted_products
        .iter()
        .filter_map(|product| product.image.clone())
        .collect();
    let removed = async {
        if removals.is_empty() {
            return Ok(());
        }
        assets.remove(Bucket::Products, &removals).await
    };

    let (cover, default_products, new_products, removed) =
        join!(cover, default_products, new_products, removed);

    let cover = cover?;
    removed?;
    let default_products = default_products
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;
    let new_products = new_products.into_iter().collect::<Result<Vec<_>, _>>()?;

    let resolved = EditAssets {
        cover: cover.map(|object| assets.public_url(Bucket::Posts, &object.path)),
        default_products: default_products
            .into_iter()
            .map(|object| object.map(|object| assets.public_url(Bucket::Products, &object.path)))
            .collect(),
        new_products: new_products
            .into_iter()
            .map(|object| object.map(|object| assets.public_url(Bucket::Products, &object.path)))
            .collect(),
    };

    Ok(reconcile(request, &resolved, at))
}

/// Uploads the cover and product assets of a draft concurrently and
/// resolves it into the row inserts of a new post.
pub(crate) async fn stage_new_post<S: AssetStore>(
    assets: &S,
    draft: &PostDraft,
    author: Id<UserMarker>,
    at: UtcDateTime,
) -> Result<CreatePost, StorageError> {
    let cover_name = timestamped_object_name(at, &draft.cover.file_name);
    let cover = assets.upload(Bucket::Posts, &draft.cover.bytes, &cover_name);

    let products = join_all(draft.products.iter().map(|product| async move {
        match &product.image {
            Some(file) => assets
                .upload(
                    Bucket::Products,
                    &file.bytes,
                    &timestamped_object_name(at, &file.file_name),
                )
                .await
                .map(Some),
            None => Ok(None),
        }
    }));

    let (cover, products) = join!(cover, products);
    let cover = cover?;
    let products = products.into_iter().collect::<Result<Vec<_>, _>>()?;

    Ok(CreatePost {
        title: draft.title.clone(),
        caption: draft.caption.clone(),
        user_id: author,
        cover_url: assets.public_url(Bucket::Posts, &cover.path),
        products: draft
            .products
            .iter()
            .zip(products)
            .map(|(product, object)| NewProductRow {
                title: product.title.clone(),
                link: product.link.clone(),
                image: object
                    .map(|object| assets.public_url(Bucket::Products, &object.path))
                    .unwrap_or_default(),
            })
            .collect(),
    })
}

/// Best-effort removal of a post's cover and product assets ahead of row
/// deletion. Failures are logged and never block the deletion.
pub(crate) async fn scrub_post_assets<S: AssetStore>(assets: &S, post: &Post) {
    let cover = assets.remove(Bucket::Posts, std::slice::from_ref(&post.image.url));

    let product_locations: Vec<String> = post
        .products
        .iter()
        .filter_map(|product| product.image.clone())
        .collect();
    let products = async {
        if product_locations.is_empty() {
            return Ok(());
        }
        assets.remove(Bucket::Products, &product_locations).await
    };

    let (cover, products) = join!(cover, products);
    if let Err(err) = cover {
        warn!(error = %err, post = %post.id, "Failed to remove cover asset");
    }
    if let Err(err) = products {
        warn!(error = %err, post = %post.id, "Failed to remove product assets");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use time::macros::utc_datetime;
    use vitrine_common::model::edit::{DefaultProduct, DeletedProduct, ImageUpload, NewProduct};
    use vitrine_storage::StoredObject;

    const AT: UtcDateTime = utc_datetime!(2024-01-01 00:00);

    #[derive(Clone, Eq, PartialEq, Debug)]
    enum Call {
        Upload { bucket: Bucket, path: String },
        Update { bucket: Bucket, location: String },
        Remove { bucket: Bucket, locations: Vec<String> },
    }

    #[derive(Debug, Default)]
    struct RecordingStore {
        calls: Mutex<Vec<Call>>,
        fail_updates: bool,
    }

    impl RecordingStore {
        fn failing_updates() -> Self {
            Self {
                fail_updates: true,
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        /// The object path behind a public location: its last segment,
        /// cache-busting suffix dropped.
        fn tail(location: &str) -> String {
            let location = location.split_once('?').map_or(location, |(path, _)| path);
            location.rsplit('/').next().unwrap_or(location).to_owned()
        }
    }

    impl AssetStore for RecordingStore {
        async fn upload(
            &self,
            bucket: Bucket,
            _data: &[u8],
            path: &str,
        ) -> Result<StoredObject, StorageError> {
            self.calls.lock().unwrap().push(Call::Upload {
                bucket,
                path: path.to_owned(),
            });

            Ok(StoredObject {
                path: path.to_owned(),
            })
        }

        async fn update(
            &self,
            bucket: Bucket,
            _data: &[u8],
            location: &str,
        ) -> Result<StoredObject, StorageError> {
            self.calls.lock().unwrap().push(Call::Update {
                bucket,
                location: location.to_owned(),
            });

            if self.fail_updates {
                return Err(StorageError::Rejected {
                    status: 500,
                    message: "update failed".into(),
                });
            }

            Ok(StoredObject {
                path: Self::tail(location),
            })
        }

        async fn remove(
            &self,
            bucket: Bucket,
            locations: &[String],
        ) -> Result<(), StorageError> {
            self.calls.lock().unwrap().push(Call::Remove {
                bucket,
                locations: locations.to_vec(),
            });

            Ok(())
        }

        fn public_url(&self, bucket: Bucket, path: &str) -> String {
            format!("https://assets.test/storage/v1/object/public/{bucket}/{path}")
        }
    }

    fn upload(name: &str) -> ImageUpload {
        ImageUpload {
            file_name: name.into(),
            bytes: vec![0xAB, 0xCD],
        }
    }

    fn base_request() -> EditRequest {
        EditRequest {
            post_id: Id::random(),
            title: None,
            caption: None,
            cover: None,
            current_cover: Some(
                "https://assets.test/storage/v1/object/public/posts/cover.png".into(),
            ),
            default_products: Vec::new(),
            new_products: Vec::new(),
            deleted_products: Vec::new(),
        }
    }

    #[tokio::test]
    async fn caption_only_edit_touches_no_assets() {
        let store = RecordingStore::default();
        let mut request = base_request();
        request.caption = Some("hello".into());

        let batch = plan_edit(&store, &request, AT).await.unwrap();

        assert!(store.calls().is_empty());
        assert!(batch.fields.is_some());
        assert!(batch.cover_url.is_none());
        assert!(batch.added.is_empty() && batch.changed.is_empty() && batch.deleted.is_empty());
    }

    #[tokio::test]
    async fn replaced_cover_is_updated_in_place() {
        let store = RecordingStore::default();
        let mut request = base_request();
        request.cover = Some(upload("new-cover.png"));

        let batch = plan_edit(&store, &request, AT).await.unwrap();

        assert_eq!(
            store.calls(),
            vec![Call::Update {
                bucket: Bucket::Posts,
                location: request.current_cover.clone().unwrap(),
            }],
        );
        assert_eq!(
            batch.cover_url.as_deref(),
            Some(
                "https://assets.test/storage/v1/object/public/posts/cover.png?u=1704067200000"
            ),
        );
    }

    #[tokio::test]
    async fn default_product_asset_updates_need_an_existing_location() {
        let store = RecordingStore::default();
        let mut request = base_request();
        request.default_products.push(DefaultProduct {
            id: 1.into(),
            title: "A".into(),
            link: "x".into(),
            default_title: "A".into(),
            default_link: "x".into(),
            default_image: Some(
                "https://assets.test/storage/v1/object/public/products/one.png".into(),
            ),
            image: Some(upload("replacement.png")),
        });
        request.default_products.push(DefaultProduct {
            id: 2.into(),
            title: "B".into(),
            link: "y".into(),
            default_title: "B".into(),
            default_link: "y".into(),
            default_image: None,
            image: Some(upload("ignored.png")),
        });

        let batch = plan_edit(&store, &request, AT).await.unwrap();

        assert_eq!(
            store.calls(),
            vec![Call::Update {
                bucket: Bucket::Products,
                location: "https://assets.test/storage/v1/object/public/products/one.png".into(),
            }],
        );
        // Only the first product received a fresh asset and is counted as
        // changed on that basis.
        assert_eq!(batch.changed.len(), 1);
        assert_eq!(batch.changed[0].id, 1.into());
        assert_eq!(
            batch.changed[0].image.as_deref(),
            Some("https://assets.test/storage/v1/object/public/products/one.png"),
        );
    }

    #[tokio::test]
    async fn added_products_upload_under_time_qualified_names() {
        let store = RecordingStore::default();
        let mut request = base_request();
        request.new_products.push(NewProduct {
            title: "lamp".into(),
            link: "https://shop.example/lamp".into(),
            image: Some(upload("lamp.png")),
        });
        request.new_products.push(NewProduct {
            title: "chair".into(),
            link: "https://shop.example/chair".into(),
            image: None,
        });

        let batch = plan_edit(&store, &request, AT).await.unwrap();

        assert_eq!(
            store.calls(),
            vec![Call::Upload {
                bucket: Bucket::Products,
                path: "1704067200000-lamp.png".into(),
            }],
        );
        assert_eq!(
            batch.added[0].image,
            "https://assets.test/storage/v1/object/public/products/1704067200000-lamp.png",
        );
        assert_eq!(batch.added[1].image, "");
    }

    #[tokio::test]
    async fn deleted_product_assets_are_removed_in_one_filtered_call() {
        let store = RecordingStore::default();
        let mut request = base_request();
        request.deleted_products.push(DeletedProduct {
            id: 5.into(),
            image: Some("url5".into()),
        });
        request.deleted_products.push(DeletedProduct {
            id: 6.into(),
            image: None,
        });

        let batch = plan_edit(&store, &request, AT).await.unwrap();

        assert_eq!(
            store.calls(),
            vec![Call::Remove {
                bucket: Bucket::Products,
                locations: vec!["url5".into()],
            }],
        );
        assert_eq!(batch.deleted, vec![5.into(), 6.into()]);
    }

    #[tokio::test]
    async fn empty_deletion_list_issues_no_removal_call() {
        let store = RecordingStore::default();
        let request = base_request();

        plan_edit(&store, &request, AT).await.unwrap();

        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn failing_asset_call_does_not_cancel_its_siblings() {
        let store = RecordingStore::failing_updates();
        let mut request = base_request();
        request.cover = Some(upload("new-cover.png"));
        request.new_products.push(NewProduct {
            title: "lamp".into(),
            link: "https://shop.example/lamp".into(),
            image: Some(upload("lamp.png")),
        });
        request.deleted_products.push(DeletedProduct {
            id: 5.into(),
            image: Some("url5".into()),
        });

        let result = plan_edit(&store, &request, AT).await;

        assert!(result.is_err());
        let calls = store.calls();
        assert!(calls.iter().any(|call| matches!(call, Call::Upload { .. })));
        assert!(calls.iter().any(|call| matches!(call, Call::Remove { .. })));
    }

    #[tokio::test]
    async fn drafts_resolve_products_onto_their_own_uploads() {
        let store = RecordingStore::default();
        let draft = PostDraft {
            title: "lamps".into(),
            caption: "nice lamps".into(),
            cover: upload("cover.png"),
            products: vec![
                NewProduct {
                    title: "first".into(),
                    link: "https://shop.example/1".into(),
                    image: None,
                },
                NewProduct {
                    title: "second".into(),
                    link: "https://shop.example/2".into(),
                    image: Some(upload("second.png")),
                },
            ],
        };

        let create = stage_new_post(&store, &draft, Id::random(), AT).await.unwrap();

        assert_eq!(
            create.cover_url,
            "https://assets.test/storage/v1/object/public/posts/1704067200000-cover.png",
        );
        assert_eq!(create.products[0].image, "");
        assert_eq!(
            create.products[1].image,
            "https://assets.test/storage/v1/object/public/products/1704067200000-second.png",
        );
    }
}
