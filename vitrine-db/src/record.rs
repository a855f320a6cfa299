use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;
use vitrine_common::model::{
    ModelValidationError,
    auth::Authentication,
    post::{Image, Product},
    user::{Actor, Email, User, Username},
};

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct UserRecord {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub is_admin: bool,
    pub email_verified: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct CredentialRecord {
    pub id: Uuid,
    pub password: Option<String>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct PostRecord {
    pub id: Uuid,
    pub title: Option<String>,
    pub caption: Option<String>,
    pub status: String,
    pub user_id: Uuid,
    pub created_at: OffsetDateTime,
    pub updated_at: Option<OffsetDateTime>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct ImageRecord {
    pub id: i64,
    pub url: String,
    pub post_id: Uuid,
    pub created_at: OffsetDateTime,
    pub updated_at: Option<OffsetDateTime>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct ProductRecord {
    pub id: i64,
    pub title: Option<String>,
    pub link: String,
    pub image: Option<String>,
    pub post_id: Uuid,
    pub created_at: OffsetDateTime,
    pub updated_at: Option<OffsetDateTime>,
}

#[derive(Clone, Eq, PartialEq, Debug, Hash, FromRow)]
pub(crate) struct AuthenticationRecord {
    pub user_id: Uuid,
    pub token_hash: Vec<u8>,
    pub created_at: OffsetDateTime,
    pub expires_after_seconds: Option<i64>,
    pub is_admin: bool,
}

impl TryFrom<UserRecord> for User {
    type Error = ModelValidationError;

    fn try_from(value: UserRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.id.into(),
            username: Username::new(value.username)?,
            email: Email::new(value.email)?,
            is_admin: value.is_admin,
            email_verified: value.email_verified.map(Into::into),
            created_at: value.created_at.into(),
        })
    }
}

impl From<ImageRecord> for Image {
    fn from(value: ImageRecord) -> Self {
        Self {
            id: value.id.into(),
            url: value.url,
            post_id: value.post_id.into(),
            created_at: value.created_at.into(),
            updated_at: value.updated_at.map(Into::into),
        }
    }
}

impl From<ProductRecord> for Product {
    fn from(value: ProductRecord) -> Self {
        Self {
            id: value.id.into(),
            title: value.title,
            link: value.link,
            image: value.image,
            post_id: value.post_id.into(),
            created_at: value.created_at.into(),
            updated_at: value.updated_at.map(Into::into),
        }
    }
}

impl TryFrom<AuthenticationRecord> for (Authentication, Actor) {
    type Error = ModelValidationError;

    fn try_from(value: AuthenticationRecord) -> Result<Self, Self::Error> {
        let actor = Actor {
            id: value.user_id.into(),
            is_admin: value.is_admin,
        };
        let authentication = Authentication {
            user: value.user_id.into(),
            token_hash: value.token_hash.into_boxed_slice().try_into()?,
            created_at: value.created_at.into(),
            expires_after: value
                .expires_after_seconds
                .map(|seconds| time::Duration::seconds(seconds).try_into())
                .transpose()?,
        };

        Ok((authentication, actor))
    }
}
