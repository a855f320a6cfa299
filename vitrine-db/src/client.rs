use crate::{
    batch::changed_products_update,
    record::{
        AuthenticationRecord, CredentialRecord, ImageRecord, PostRecord, ProductRecord, UserRecord,
    },
};
use futures::join;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use time::{OffsetDateTime, UtcDateTime};
use uuid::Uuid;
use vitrine_common::model::{
    Id, ModelValidationError,
    auth::{AuthTokenHash, Authentication},
    edit::EditBatch,
    post::{
        CreatePost, Image, NewProductRow, Post, PostMarker, PostSearchFilter, PostStatus, Product,
    },
    user::{Actor, CreateUser, Email, User, UserMarker},
};

pub type Result<T, E = DbError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("An object in the database was invalid: {0}")]
    Data(#[from] ModelValidationError),
    #[error("Post {0} has no cover image row")]
    MissingImage(Id<PostMarker>),
    #[error("Unique constraint violated: {constraint}")]
    Conflict { constraint: String },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// Stored sign-in material of one user.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub struct Credential {
    pub user: Id<UserMarker>,
    pub password_hash: Option<String>,
}

/// Result of a moderation attempt. Moderation is one-shot: only pending
/// posts can move.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub enum ModerationOutcome {
    Updated,
    AlreadyModerated,
    NotFound,
}

#[derive(Debug)]
pub struct DbClient {
    pool: PgPool,
}

impl DbClient {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn classify(err: sqlx::Error) -> DbError {
        if let sqlx::Error::Database(db_err) = &err
            && db_err.is_unique_violation()
        {
            return DbError::Conflict {
                constraint: db_err.constraint().unwrap_or("unknown").to_owned(),
            };
        }

        DbError::Sqlx(err)
    }

    pub async fn create_user(
        &self,
        user: &CreateUser,
        password_hash: &str,
    ) -> Result<Id<UserMarker>> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "
            INSERT INTO users (username, email, password)
            VALUES ($1, $2, $3)
            RETURNING id
            ",
        )
        .bind(user.username.get())
        .bind(user.email.get())
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(Self::classify)?;

        Ok(id.into())
    }

    pub async fn fetch_user(&self, user_id: Id<UserMarker>) -> Result<Option<User>> {
        let record = sqlx::query_as::<_, UserRecord>(
            "
            SELECT id, username, email, is_admin, email_verified, created_at
            FROM users
            WHERE id = $1
            ",
        )
        .bind(user_id.uuid())
        .fetch_optional(&self.pool)
        .await?;

        let user = record.map(User::try_from).transpose()?;
        Ok(user)
    }

    pub async fn fetch_credential(&self, email: &Email) -> Result<Option<Credential>> {
        let record = sqlx::query_as::<_, CredentialRecord>(
            "
            SELECT id, password
            FROM users
            WHERE email = $1
            ",
        )
        .bind(email.get())
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(|record| Credential {
            user: record.id.into(),
            password_hash: record.password,
        }))
    }

    /// Lists accounts newest-first, optionally narrowed to usernames
    /// containing `username`.
    pub async fn list_users(&self, username: Option<&str>) -> Result<Vec<User>> {
        let records = sqlx::query_as::<_, UserRecord>(
            "
            SELECT id, username, email, is_admin, email_verified, created_at
            FROM users
            WHERE $1::text IS NULL OR username ILIKE '%' || $1 || '%'
            ORDER BY created_at DESC
            ",
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await?;

        let users = records
            .into_iter()
            .map(User::try_from)
            .collect::<Result<_, _>>()?;
        Ok(users)
    }

    /// Sets or clears the verification stamp of an account. Returns false
    /// when no such user exists.
    pub async fn set_user_verified(
        &self,
        user_id: Id<UserMarker>,
        verified: bool,
        at: UtcDateTime,
    ) -> Result<bool> {
        let result = sqlx::query(
            "
            UPDATE users
            SET email_verified = CASE WHEN $2 THEN $3::timestamptz ELSE NULL END,
                updated_at = $3
            WHERE id = $1
            ",
        )
        .bind(user_id.uuid())
        .bind(verified)
        .bind(OffsetDateTime::from(at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn create_session(&self, authentication: &Authentication) -> Result<()> {
        sqlx::query(
            "
            INSERT INTO sessions (token_hash, user_id, created_at, expires_after_seconds)
            VALUES ($1, $2, $3, $4)
            ",
        )
        .bind(&authentication.token_hash.0[..])
        .bind(authentication.user.uuid())
        .bind(OffsetDateTime::from(authentication.created_at))
        .bind(
            authentication
                .expires_after
                .map(|duration| duration.get().whole_seconds()),
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn fetch_auth(
        &self,
        token_hash: &AuthTokenHash,
    ) -> Result<Option<(Authentication, Actor)>> {
        let record = sqlx::query_as::<_, AuthenticationRecord>(
            "
            SELECT
                sessions.user_id,
                sessions.token_hash,
                sessions.created_at,
                sessions.expires_after_seconds,
                users.is_admin
            FROM sessions
            JOIN users ON users.id = sessions.user_id
            WHERE sessions.token_hash = $1
            ",
        )
        .bind(&token_hash.0[..])
        .fetch_optional(&self.pool)
        .await?;

        let authentication = record
            .map(<(Authentication, Actor)>::try_from)
            .transpose()?;
        Ok(authentication)
    }

    /// Creates a post, its cover image row and its product rows. The post
    /// row is written first to obtain the id; the dependent rows are then
    /// written concurrently.
    pub async fn create_post(&self, post: &CreatePost) -> Result<Id<PostMarker>> {
        let post_id = sqlx::query_scalar::<_, Uuid>(
            "
            INSERT INTO posts (title, caption, user_id)
            VALUES ($1, $2, $3)
            RETURNING id
            ",
        )
        .bind(&post.title)
        .bind(&post.caption)
        .bind(post.user_id.uuid())
        .fetch_one(&self.pool)
        .await?;

        let image = async {
            sqlx::query("INSERT INTO images (url, post_id) VALUES ($1, $2)")
                .bind(&post.cover_url)
                .bind(post_id)
                .execute(&self.pool)
                .await
                .map(drop)
        };
        let products = self.insert_products(post_id, &post.products);

        let (image, products) = join!(image, products);
        image?;
        products?;

        Ok(post_id.into())
    }

    pub async fn fetch_post(&self, post_id: Id<PostMarker>) -> Result<Option<Post>> {
        let record = sqlx::query_as::<_, PostRecord>(
            "
            SELECT id, title, caption, status, user_id, created_at, updated_at
            FROM posts
            WHERE id = $1
            ",
        )
        .bind(post_id.uuid())
        .fetch_optional(&self.pool)
        .await?;

        let Some(record) = record else {
            return Ok(None);
        };

        let mut posts = self.assemble(vec![record]).await?;
        Ok(posts.pop())
    }

    /// Loads posts newest-first with their cover and products. Everyone
    /// sees published posts and their own; admins see everything.
    pub async fn load_posts(&self, viewer: Actor) -> Result<Vec<Post>> {
        let records = sqlx::query_as::<_, PostRecord>(
            "
            SELECT id, title, caption, status, user_id, created_at, updated_at
            FROM posts
            WHERE $1 OR status = 'PUBLISHED' OR user_id = $2
            ORDER BY created_at DESC
            ",
        )
        .bind(viewer.is_admin)
        .bind(viewer.id.uuid())
        .fetch_all(&self.pool)
        .await?;

        self.assemble(records).await
    }

    pub async fn search_posts(&self, filter: &PostSearchFilter) -> Result<Vec<Post>> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "
            SELECT posts.id, posts.title, posts.caption, posts.status,
                   posts.user_id, posts.created_at, posts.updated_at
            FROM posts
            JOIN users ON users.id = posts.user_id
            WHERE TRUE
            ",
        );

        if let Some(username) = &filter.username {
            builder
                .push(" AND users.username ILIKE ")
                .push_bind(format!("%{username}%"));
        }
        if let Some(status) = filter.status {
            builder.push(" AND posts.status = ").push_bind(status.as_str());
        }
        if let Some(range) = &filter.date_range {
            builder
                .push(" AND posts.created_at BETWEEN ")
                .push_bind(OffsetDateTime::from(range.from))
                .push(" AND ")
                .push_bind(OffsetDateTime::from(range.to));
        }
        builder.push(" ORDER BY posts.created_at DESC");

        let records = builder
            .build_query_as::<PostRecord>()
            .fetch_all(&self.pool)
            .await?;

        self.assemble(records).await
    }

    /// Applies a one-shot moderation decision. Posts that already left the
    /// pending state are not moved again.
    pub async fn update_status(
        &self,
        post_id: Id<PostMarker>,
        status: PostStatus,
        at: UtcDateTime,
    ) -> Result<ModerationOutcome> {
        let result = sqlx::query(
            "
            UPDATE posts
            SET status = $2, updated_at = $3
            WHERE id = $1 AND status = 'PENDING'
            ",
        )
        .bind(post_id.uuid())
        .bind(status.as_str())
        .bind(OffsetDateTime::from(at))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(ModerationOutcome::Updated);
        }

        let exists = sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM posts WHERE id = $1)")
            .bind(post_id.uuid())
            .fetch_one(&self.pool)
            .await?;

        Ok(if exists {
            ModerationOutcome::AlreadyModerated
        } else {
            ModerationOutcome::NotFound
        })
    }

    /// Issues the edit batch: up to five independent statements, fanned
    /// out concurrently. No two touch the same row. The batch either
    /// settles completely or surfaces its first error; partially applied
    /// writes are not rolled back.
    pub async fn apply_post_edit(&self, batch: &EditBatch, at: UtcDateTime) -> Result<()> {
        let post_id = batch.post_id.uuid();
        let updated_at = OffsetDateTime::from(at);

        let fields = async {
            let Some(fields) = &batch.fields else {
                return Ok(());
            };
            sqlx::query(
                "
                UPDATE posts
                SET title = COALESCE($2, title),
                    caption = COALESCE($3, caption),
                    updated_at = $4
                WHERE id = $1
                ",
            )
            .bind(post_id)
            .bind(fields.title.as_deref())
            .bind(fields.caption.as_deref())
            .bind(updated_at)
            .execute(&self.pool)
            .await
            .map(drop)
        };

        let cover = async {
            let Some(url) = &batch.cover_url else {
                return Ok(());
            };
            sqlx::query("UPDATE images SET url = $2, updated_at = $3 WHERE post_id = $1")
                .bind(post_id)
                .bind(url)
                .bind(updated_at)
                .execute(&self.pool)
                .await
                .map(drop)
        };

        let added = self.insert_products(post_id, &batch.added);

        let changed = async {
            if batch.changed.is_empty() {
                return Ok(());
            }
            changed_products_update(&batch.changed, updated_at)
                .build()
                .execute(&self.pool)
                .await
                .map(drop)
        };

        let deleted = async {
            if batch.deleted.is_empty() {
                return Ok(());
            }
            let ids: Vec<i64> = batch.deleted.iter().map(|id| id.get()).collect();
            sqlx::query("DELETE FROM products WHERE post_id = $1 AND id = ANY($2)")
                .bind(post_id)
                .bind(ids)
                .execute(&self.pool)
                .await
                .map(drop)
        };

        let (fields, cover, added, changed, deleted) =
            join!(fields, cover, added, changed, deleted);
        fields?;
        cover?;
        added?;
        changed?;
        deleted?;

        Ok(())
    }

    /// Deletes a post row; the referential cascade removes its image and
    /// product rows. Returns false when no such post exists.
    pub async fn delete_post(&self, post_id: Id<PostMarker>) -> Result<bool> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(post_id.uuid())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_products(
        &self,
        post_id: Uuid,
        products: &[NewProductRow],
    ) -> std::result::Result<(), sqlx::Error> {
        if products.is_empty() {
            return Ok(());
        }

        let mut builder =
            QueryBuilder::<Postgres>::new("INSERT INTO products (title, link, image, post_id) ");
        builder.push_values(products, |mut row, product| {
            row.push_bind(product.title.clone())
                .push_bind(product.link.clone())
                .push_bind(product.image.clone())
                .push_bind(post_id);
        });

        builder.build().execute(&self.pool).await.map(drop)
    }

    /// Attaches cover images and products to a page of post records.
    async fn assemble(&self, records: Vec<PostRecord>) -> Result<Vec<Post>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let post_ids: Vec<Uuid> = records.iter().map(|record| record.id).collect();

        let images = sqlx::query_as::<_, ImageRecord>(
            "
            SELECT id, url, post_id, created_at, updated_at
            FROM images
            WHERE post_id = ANY($1)
            ",
        )
        .bind(&post_ids)
        .fetch_all(&self.pool);
        let products = sqlx::query_as::<_, ProductRecord>(
            "
            SELECT id, title, link, image, post_id, created_at, updated_at
            FROM products
            WHERE post_id = ANY($1)
            ORDER BY id
            ",
        )
        .bind(&post_ids)
        .fetch_all(&self.pool);

        let (images, products) = join!(images, products);

        let mut images: HashMap<Uuid, Image> = images?
            .into_iter()
            .map(|record| (record.post_id, record.into()))
            .collect();
        let mut products_by_post: HashMap<Uuid, Vec<Product>> = HashMap::new();
        for record in products? {
            products_by_post
                .entry(record.post_id)
                .or_default()
                .push(record.into());
        }

        records
            .into_iter()
            .map(|record| {
                let image = images
                    .remove(&record.id)
                    .ok_or(DbError::MissingImage(record.id.into()))?;
                let status = record
                    .status
                    .parse::<PostStatus>()
                    .map_err(ModelValidationError::from)?;

                Ok(Post {
                    id: record.id.into(),
                    title: record.title,
                    caption: record.caption,
                    status,
                    user_id: record.user_id.into(),
                    image,
                    products: products_by_post.remove(&record.id).unwrap_or_default(),
                    created_at: record.created_at.into(),
                    updated_at: record.updated_at.map(Into::into),
                })
            })
            .collect()
    }
}
