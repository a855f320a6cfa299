use crate::server::{
    Result, ServerError, ServerRouter,
    auth::{AdminUser, AuthenticatedUser},
    edit::{plan_edit, scrub_post_assets, stage_new_post},
    json::Json,
    routes::MessageResponse,
};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use serde::Deserialize;
use std::sync::Arc;
use time::UtcDateTime;
use vitrine_common::model::{
    Id,
    edit::EditRequest,
    post::{Post, PostDraft, PostMarker, PostSearchFilter, PostStatus},
};
use vitrine_db::client::{DbClient, ModerationOutcome};
use vitrine_storage::client::StorageClient;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(load_posts)
        .typed_post(create_post)
        .typed_post(update_post)
        .typed_post(search_posts)
        .typed_patch(update_status)
        .typed_delete(delete_post)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts", rejection(ServerError))]
struct LoadPostsPath();

async fn load_posts(
    LoadPostsPath(): LoadPostsPath,
    State(db): State<Arc<DbClient>>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<Post>>> {
    let posts = db.load_posts(user.actor()).await?;

    Ok(Json(posts))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/create", rejection(ServerError))]
struct CreatePostPath();

async fn create_post(
    CreatePostPath(): CreatePostPath,
    State(db): State<Arc<DbClient>>,
    State(assets): State<Arc<StorageClient>>,
    user: AuthenticatedUser,
    Json(draft): Json<PostDraft>,
) -> Result<Json<MessageResponse>> {
    draft.validate()?;

    let create = stage_new_post(assets.as_ref(), &draft, user.user_id(), UtcDateTime::now()).await?;
    db.create_post(&create).await?;

    Ok(Json(MessageResponse {
        message: "Post has been created successfully",
    }))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/update", rejection(ServerError))]
struct UpdatePostPath();

async fn update_post(
    UpdatePostPath(): UpdatePostPath,
    State(db): State<Arc<DbClient>>,
    State(assets): State<Arc<StorageClient>>,
    user: AuthenticatedUser,
    Json(edit): Json<EditRequest>,
) -> Result<Json<MessageResponse>> {
    edit.validate()?;

    let post = db
        .fetch_post(edit.post_id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(edit.post_id))?;
    if post.user_id != user.user_id() && !user.actor().is_admin {
        return Err(ServerError::Forbidden);
    }

    let now = UtcDateTime::now();
    let batch = plan_edit(assets.as_ref(), &edit, now).await?;
    db.apply_post_edit(&batch, now).await?;

    Ok(Json(MessageResponse {
        message: "Post has been updated successfully",
    }))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/search", rejection(ServerError))]
struct SearchPostsPath();

async fn search_posts(
    SearchPostsPath(): SearchPostsPath,
    State(db): State<Arc<DbClient>>,
    _admin: AdminUser,
    Json(filter): Json<PostSearchFilter>,
) -> Result<Json<Vec<Post>>> {
    let posts = db.search_posts(&filter).await?;

    Ok(Json(posts))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}/status", rejection(ServerError))]
struct UpdateStatusPath {
    id: Id<PostMarker>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct UpdateStatusRequest {
    status: PostStatus,
}

async fn update_status(
    UpdateStatusPath { id }: UpdateStatusPath,
    State(db): State<Arc<DbClient>>,
    _admin: AdminUser,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<MessageResponse>> {
    match db.update_status(id, request.status, UtcDateTime::now()).await? {
        ModerationOutcome::Updated => Ok(Json(MessageResponse {
            message: "Post status has been updated",
        })),
        ModerationOutcome::AlreadyModerated => Err(ServerError::AlreadyModerated(id)),
        ModerationOutcome::NotFound => Err(ServerError::PostByIdNotFound(id)),
    }
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/posts/{id}", rejection(ServerError))]
struct DeletePostPath {
    id: Id<PostMarker>,
}

async fn delete_post(
    DeletePostPath { id }: DeletePostPath,
    State(db): State<Arc<DbClient>>,
    State(assets): State<Arc<StorageClient>>,
    user: AuthenticatedUser,
) -> Result<Json<MessageResponse>> {
    let post = db
        .fetch_post(id)
        .await?
        .ok_or(ServerError::PostByIdNotFound(id))?;
    if post.user_id != user.user_id() && !user.actor().is_admin {
        return Err(ServerError::Forbidden);
    }

    // Asset cleanup is best-effort and intentionally not transactional
    // with the row deletion; the cascade removes the dependent rows.
    scrub_post_assets(assets.as_ref(), &post).await;
    if !db.delete_post(id).await? {
        return Err(ServerError::PostByIdNotFound(id));
    }

    Ok(Json(MessageResponse {
        message: "Post has been deleted permanently",
    }))
}
