use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use rearch::CapsuleHandle;
use sea_orm::{
    ActiveModelTrait,
    ActiveValue::{NotSet, Set},
    ColumnTrait, DbConn, DbErr, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder, SqlErr,
    sea_query::{Expr, ExprTrait},
};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::instrument;

use crate::{config::db_conn_capsule, orm::url_record, short_code::ShortCode};

pub fn url_repository_capsule(
    CapsuleHandle { mut get, .. }: CapsuleHandle,
) -> Arc<dyn UrlRepository> {
    let db = get.as_ref(db_conn_capsule).clone();
    Arc::new(UrlRepositoryImpl { db })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlRecord {
    pub id: i32,
    pub original_url: String,
    pub short_code: ShortCode,
    pub expiry_date: OffsetDateTime,
    pub clicks: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewUrl {
    pub original_url: String,
    pub short_code: ShortCode,
    pub expiry_date: OffsetDateTime,
}

/// Fields left as [`None`] keep their stored value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UrlUpdate {
    pub original_url: Option<String>,
    pub short_code: Option<ShortCode>,
    pub expiry_date: Option<OffsetDateTime>,
}

#[derive(Debug, Error)]
pub enum SaveUrlError {
    #[error("short code is already taken")]
    ShortCodeTaken,
    #[error("URL record does not exist")]
    NotFound,
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error),
}

#[async_trait]
pub trait UrlRepository: Send + Sync {
    async fn retrieve_by_id(&self, id: i32) -> anyhow::Result<Option<UrlRecord>>;

    async fn retrieve_by_code(&self, code: &ShortCode) -> anyhow::Result<Option<UrlRecord>>;

    /// Returns the oldest record pointing at `original_url`, if any.
    async fn retrieve_by_original_url(
        &self,
        original_url: &str,
    ) -> anyhow::Result<Option<UrlRecord>>;

    /// Inserts a new record with a zeroed click counter.
    /// A short code that is already stored yields [`SaveUrlError::ShortCodeTaken`].
    async fn create_url(&self, url: NewUrl) -> Result<UrlRecord, SaveUrlError>;

    async fn update_url(&self, id: i32, update: UrlUpdate) -> Result<UrlRecord, SaveUrlError>;

    /// Atomically adds one to the click counter of `code`.
    async fn increment_clicks(&self, code: &ShortCode) -> anyhow::Result<()>;

    /// Deletes every record whose expiry date is before `now`, returning how many were removed.
    async fn delete_expired_urls(&self, now: OffsetDateTime) -> anyhow::Result<u64>;
}

struct UrlRepositoryImpl {
    db: DbConn,
}

fn into_save_error(err: DbErr) -> SaveUrlError {
    if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
        SaveUrlError::ShortCodeTaken
    } else {
        SaveUrlError::Internal(err.into())
    }
}

#[async_trait]
impl UrlRepository for UrlRepositoryImpl {
    #[instrument(skip(self))]
    async fn retrieve_by_id(&self, id: i32) -> anyhow::Result<Option<UrlRecord>> {
        Ok(url_record::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .context("Failed to look up URL by id")?
            .map(UrlRecord::from))
    }

    #[instrument(skip(self))]
    async fn retrieve_by_code(&self, code: &ShortCode) -> anyhow::Result<Option<UrlRecord>> {
        Ok(url_record::Entity::find()
            .filter(url_record::Column::ShortCode.eq(code.as_str()))
            .one(&self.db)
            .await
            .context("Failed to look up URL by short code")?
            .map(UrlRecord::from))
    }

    #[instrument(skip(self))]
    async fn retrieve_by_original_url(
        &self,
        original_url: &str,
    ) -> anyhow::Result<Option<UrlRecord>> {
        Ok(url_record::Entity::find()
            .filter(url_record::Column::OriginalUrl.eq(original_url))
            .order_by_asc(url_record::Column::Id)
            .one(&self.db)
            .await
            .context("Failed to look up URL by original URL")?
            .map(UrlRecord::from))
    }

    #[instrument(skip(self))]
    async fn create_url(&self, url: NewUrl) -> Result<UrlRecord, SaveUrlError> {
        let to_insert = url_record::ActiveModel {
            id: NotSet,
            original_url: Set(url.original_url),
            short_code: Set(url.short_code.into_inner()),
            expiry_date: Set(url.expiry_date),
            clicks: Set(0),
        };
        to_insert
            .insert(&self.db)
            .await
            .map(UrlRecord::from)
            .map_err(into_save_error)
    }

    #[instrument(skip(self))]
    async fn update_url(&self, id: i32, update: UrlUpdate) -> Result<UrlRecord, SaveUrlError> {
        let existing = url_record::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(|err| SaveUrlError::Internal(err.into()))?
            .ok_or(SaveUrlError::NotFound)?;

        let mut to_update = existing.clone().into_active_model();
        if let Some(original_url) = update.original_url {
            to_update.original_url = Set(original_url);
        }
        if let Some(short_code) = update.short_code {
            to_update.short_code = Set(short_code.into_inner());
        }
        if let Some(expiry_date) = update.expiry_date {
            to_update.expiry_date = Set(expiry_date);
        }

        if !to_update.is_changed() {
            return Ok(existing.into());
        }

        to_update
            .update(&self.db)
            .await
            .map(UrlRecord::from)
            .map_err(into_save_error)
    }

    #[instrument(skip(self))]
    async fn increment_clicks(&self, code: &ShortCode) -> anyhow::Result<()> {
        url_record::Entity::update_many()
            .col_expr(
                url_record::Column::Clicks,
                Expr::col(url_record::Column::Clicks).add(1),
            )
            .filter(url_record::Column::ShortCode.eq(code.as_str()))
            .exec(&self.db)
            .await
            .context("Failed to increment click counter")?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_expired_urls(&self, now: OffsetDateTime) -> anyhow::Result<u64> {
        let result = url_record::Entity::delete_many()
            .filter(url_record::Column::ExpiryDate.lt(now))
            .exec(&self.db)
            .await
            .context("Failed to delete expired URLs")?;
        Ok(result.rows_affected)
    }
}

impl From<url_record::Model> for UrlRecord {
    fn from(
        url_record::Model {
            id,
            original_url,
            short_code,
            expiry_date,
            clicks,
        }: url_record::Model,
    ) -> Self {
        Self {
            id,
            original_url,
            short_code: ShortCode::from_stored(short_code),
            expiry_date,
            clicks,
        }
    }
}
