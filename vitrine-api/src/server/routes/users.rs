use crate::server::{
    Result, ServerError, ServerRouter,
    auth::AdminUser,
    json::Json,
    routes::MessageResponse,
};
use axum::extract::{Query, State};
use axum_extra::routing::{RouterExt, TypedPath};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::{Duration, UtcDateTime};
use vitrine_common::{
    model::{
        Id,
        auth::{AuthToken, Authentication, hash_password, verify_password},
        user::{CreateUser, Email, User, UserMarker},
    },
    util::PositiveDuration,
};
use vitrine_db::client::DbClient;

const SESSION_LIFETIME: Duration = Duration::days(30);

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_post(register)
        .typed_post(login)
        .typed_get(list_users)
        .typed_patch(verify_user)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users", rejection(ServerError))]
struct RegisterPath();

async fn register(
    RegisterPath(): RegisterPath,
    State(db): State<Arc<DbClient>>,
    Json(user): Json<CreateUser>,
) -> Result<Json<MessageResponse>> {
    let password_hash = hash_password(&user.password)?;
    db.create_user(&user, &password_hash).await?;

    Ok(Json(MessageResponse {
        message: "You are signed up successfully",
    }))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/sessions", rejection(ServerError))]
struct LoginPath();

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct LoginRequest {
    email: Email,
    password: String,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
struct TokenResponse {
    token: String,
}

async fn login(
    LoginPath(): LoginPath,
    State(db): State<Arc<DbClient>>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<TokenResponse>> {
    let credential = db
        .fetch_credential(&request.email)
        .await?
        .ok_or(ServerError::InvalidCredentials)?;

    let password_matches = credential
        .password_hash
        .as_deref()
        .is_some_and(|hash| verify_password(&request.password, hash));
    if !password_matches {
        return Err(ServerError::InvalidCredentials);
    }

    let token = AuthToken::generate_random(credential.user);
    let authentication = Authentication {
        user: credential.user,
        token_hash: token.hash()?,
        created_at: UtcDateTime::now(),
        expires_after: Some(PositiveDuration::new_unchecked(SESSION_LIFETIME)),
    };
    db.create_session(&authentication).await?;

    Ok(Json(TokenResponse {
        token: token.as_token_str(),
    }))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users", rejection(ServerError))]
struct ListUsersPath();

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
struct ListUsersQuery {
    username: Option<String>,
}

async fn list_users(
    ListUsersPath(): ListUsersPath,
    State(db): State<Arc<DbClient>>,
    _admin: AdminUser,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<Vec<User>>> {
    let users = db.list_users(query.username.as_deref()).await?;

    Ok(Json(users))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{id}/verify", rejection(ServerError))]
struct VerifyUserPath {
    id: Id<UserMarker>,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Deserialize)]
struct VerifyUserRequest {
    verified: bool,
}

async fn verify_user(
    VerifyUserPath { id }: VerifyUserPath,
    State(db): State<Arc<DbClient>>,
    _admin: AdminUser,
    Json(request): Json<VerifyUserRequest>,
) -> Result<Json<MessageResponse>> {
    if !db.set_user_verified(id, request.verified, UtcDateTime::now()).await? {
        return Err(ServerError::UserByIdNotFound(id));
    }

    Ok(Json(MessageResponse {
        message: "User has been updated",
    }))
}
