use crate::server::ServerError;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use std::sync::Arc;
use time::UtcDateTime;
use vitrine_common::model::{
    Id,
    auth::AuthToken,
    user::{Actor, UserMarker},
};
use vitrine_db::client::DbClient;

type AuthorizationHeader = TypedHeader<Authorization<Bearer>>;

/// The signed-in user behind a request, resolved from the bearer token.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct AuthenticatedUser {
    actor: Actor,
}

impl AuthenticatedUser {
    #[must_use]
    pub fn actor(self) -> Actor {
        self.actor
    }

    #[must_use]
    pub fn user_id(self) -> Id<UserMarker> {
        self.actor.id
    }
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<DbClient>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let request_token: AuthToken = AuthorizationHeader::from_request_parts(parts, state)
            .await
            .map_err(ServerError::InvalidAuthorizationHeader)?
            .token()
            .parse()?;

        let token_hash = request_token.hash()?;

        let (authentication, actor) = Arc::<DbClient>::from_ref(state)
            .fetch_auth(&token_hash)
            .await?
            .ok_or(ServerError::InvalidToken)?;

        if authentication.user != request_token.user_id {
            return Err(ServerError::InvalidToken);
        }

        if let Some(expires_after) = authentication.expires_after
            && authentication.created_at + expires_after.get() < UtcDateTime::now()
        {
            return Err(ServerError::InvalidToken);
        }

        Ok(Self { actor })
    }
}

/// An [`AuthenticatedUser`] that additionally holds the admin flag;
/// everyone else is turned away.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct AdminUser {
    actor: Actor,
}

impl AdminUser {
    #[must_use]
    pub fn actor(self) -> Actor {
        self.actor
    }
}

impl<S> FromRequestParts<S> for AdminUser
where
    Arc<DbClient>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;

        if !user.actor.is_admin {
            return Err(ServerError::Forbidden);
        }

        Ok(Self { actor: user.actor })
    }
}
