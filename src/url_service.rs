use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use rearch::CapsuleHandle;
use thiserror::Error;
use time::{Duration, OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::{info, instrument, warn};
use url::Url;

use crate::{
    short_code::{CodeGenerator, RandomHexCodes, ShortCode, ShortCodeValidationError},
    url_repo::{
        NewUrl, SaveUrlError, UrlRecord, UrlRepository, UrlUpdate, url_repository_capsule,
    },
};

/// How long a newly created short URL stays valid.
pub const EXPIRY_WINDOW: Duration = Duration::days(3);

const GENERATE_ATTEMPTS: usize = 5;

pub fn url_service_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> Arc<dyn UrlService> {
    let url_repo = Arc::clone(get.as_ref(url_repository_capsule));
    Arc::new(UrlServiceImpl {
        url_repo,
        code_generator: Arc::new(RandomHexCodes),
    })
}

#[async_trait]
pub trait UrlService: Send + Sync {
    /// Returns the short code for `original_url`, creating a record if none exists.
    /// An existing record takes over `custom_code` when one is given and it is free.
    async fn shorten(
        &self,
        original_url: &str,
        custom_code: Option<&str>,
    ) -> Result<(ShortenedUrl, UrlCreationStatus), UrlServiceError>;

    /// Looks up `short_code` and counts a click when it is still live.
    async fn resolve(&self, short_code: &str) -> Result<RedirectOutcome, UrlServiceError>;

    async fn get_by_id(&self, id: i32) -> Result<UrlRecord, UrlServiceError>;

    async fn update(&self, id: i32, changes: UrlChanges) -> Result<UrlRecord, UrlServiceError>;

    /// Deletes records that expired before `now`; returns how many went away.
    async fn sweep(&self, now: OffsetDateTime) -> Result<u64, UrlServiceError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShortenedUrl {
    pub id: i32,
    pub short_code: ShortCode,
}

#[derive(Debug, PartialEq, Eq)]
pub enum UrlCreationStatus {
    NewlyCreated,
    AlreadyExists,
}

#[derive(Debug, PartialEq, Eq)]
pub enum RedirectOutcome {
    Found(String),
    NotFound,
    Expired,
}

/// Unvalidated partial update as received from a client.
#[derive(Debug, Default)]
pub struct UrlChanges {
    pub original_url: Option<String>,
    pub short_code: Option<String>,
    /// RFC 3339 timestamp
    pub expiry_date: Option<String>,
}

#[derive(Debug, Error)]
pub enum UrlServiceError {
    #[error("URL is required")]
    MissingUrl,
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("URL scheme must be http or https, got {0}")]
    UnsupportedScheme(String),
    #[error("invalid short code: {0}")]
    InvalidShortCode(#[from] ShortCodeValidationError),
    #[error("failed to parse expiry date: {0}")]
    TimestampParse(#[from] time::error::Parse),
    #[error("short code is already in use")]
    ShortCodeTaken,
    #[error("URL not found")]
    NotFound,
    #[error("internal/database error: {0}")]
    Internal(anyhow::Error), // NOTE: no #[from] so we have to be explicit
}

/// Coarse classification that callers map onto their own error surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Internal,
}

impl UrlServiceError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingUrl
            | Self::InvalidUrl(_)
            | Self::UnsupportedScheme(_)
            | Self::InvalidShortCode(_)
            | Self::TimestampParse(_) => ErrorKind::Validation,
            Self::ShortCodeTaken => ErrorKind::Conflict,
            Self::NotFound => ErrorKind::NotFound,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<SaveUrlError> for UrlServiceError {
    fn from(err: SaveUrlError) -> Self {
        match err {
            SaveUrlError::ShortCodeTaken => Self::ShortCodeTaken,
            SaveUrlError::NotFound => Self::NotFound,
            SaveUrlError::Internal(err) => Self::Internal(err),
        }
    }
}

pub(crate) struct UrlServiceImpl {
    pub(crate) url_repo: Arc<dyn UrlRepository>,
    pub(crate) code_generator: Arc<dyn CodeGenerator>,
}

/// Returns the serialized form of `original_url`. The serialization is plain
/// ASCII without control characters, so it is always a valid `Location` value.
fn validate_original_url(original_url: &str) -> Result<String, UrlServiceError> {
    let original_url = original_url.trim();
    if original_url.is_empty() {
        return Err(UrlServiceError::MissingUrl);
    }
    let parsed = Url::parse(original_url)?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed.into()),
        other => Err(UrlServiceError::UnsupportedScheme(other.to_owned())),
    }
}

/// A link stays live up to and including its expiry instant.
fn is_expired(expiry_date: OffsetDateTime, now: OffsetDateTime) -> bool {
    now > expiry_date
}

/// An empty alias counts as no alias at all.
fn parse_custom_code(code: Option<&str>) -> Result<Option<ShortCode>, UrlServiceError> {
    Ok(code
        .filter(|code| !code.is_empty())
        .map(|code| ShortCode::new(code.to_owned()))
        .transpose()?)
}

impl UrlServiceImpl {
    /// Fails unless `code` is unused or already belongs to `owner`.
    async fn ensure_code_available(
        &self,
        code: &ShortCode,
        owner: Option<i32>,
    ) -> Result<(), UrlServiceError> {
        match self
            .url_repo
            .retrieve_by_code(code)
            .await
            .map_err(UrlServiceError::Internal)?
        {
            Some(holder) if Some(holder.id) != owner => {
                info!(%code, holder_id = holder.id, "Short code belongs to a different URL");
                Err(UrlServiceError::ShortCodeTaken)
            }
            _ => Ok(()),
        }
    }

    async fn create_with_generated_code(
        &self,
        original_url: String,
        expiry_date: OffsetDateTime,
    ) -> Result<UrlRecord, UrlServiceError> {
        for attempt in 1..=GENERATE_ATTEMPTS {
            let short_code = self.code_generator.generate();

            let taken = self
                .url_repo
                .retrieve_by_code(&short_code)
                .await
                .map_err(UrlServiceError::Internal)?
                .is_some();
            if taken {
                warn!(%short_code, attempt, "Generated short code that was already taken");
                continue;
            }

            let to_create = NewUrl {
                original_url: original_url.clone(),
                short_code,
                expiry_date,
            };
            match self.url_repo.create_url(to_create).await {
                Ok(created) => return Ok(created),
                // NOTE: someone else inserted the same code between our check and insert
                Err(SaveUrlError::ShortCodeTaken) => {
                    warn!(attempt, "Generated short code was taken concurrently");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(UrlServiceError::Internal(anyhow!(
            "Exhausted {GENERATE_ATTEMPTS} short code generation attempts"
        )))
    }
}

#[async_trait]
impl UrlService for UrlServiceImpl {
    #[instrument(skip(self))]
    async fn shorten(
        &self,
        original_url: &str,
        custom_code: Option<&str>,
    ) -> Result<(ShortenedUrl, UrlCreationStatus), UrlServiceError> {
        let original_url = validate_original_url(original_url)?;
        let custom_code = parse_custom_code(custom_code)?;

        let existing = self
            .url_repo
            .retrieve_by_original_url(&original_url)
            .await
            .map_err(UrlServiceError::Internal)?;

        if let Some(existing) = existing {
            let Some(replacement) = custom_code
                .as_ref()
                .filter(|code| **code != existing.short_code)
                .cloned()
            else {
                return Ok((existing.into(), UrlCreationStatus::AlreadyExists));
            };

            self.ensure_code_available(&replacement, Some(existing.id))
                .await?;
            let update = UrlUpdate {
                short_code: Some(replacement),
                ..UrlUpdate::default()
            };
            match self.url_repo.update_url(existing.id, update).await {
                Ok(updated) => {
                    info!(
                        id = updated.id,
                        short_code = %updated.short_code,
                        "Replaced short code"
                    );
                    return Ok((updated.into(), UrlCreationStatus::AlreadyExists));
                }
                // swept or deleted since the lookup; fall through and create a fresh record
                Err(SaveUrlError::NotFound) => {
                    warn!(
                        id = existing.id,
                        "URL record vanished before its short code was replaced"
                    );
                }
                Err(err) => return Err(err.into()),
            }
        }

        let expiry_date = OffsetDateTime::now_utc() + EXPIRY_WINDOW;
        let created = match custom_code {
            Some(short_code) => {
                self.ensure_code_available(&short_code, None).await?;
                self.url_repo
                    .create_url(NewUrl {
                        original_url,
                        short_code,
                        expiry_date,
                    })
                    .await?
            }
            None => {
                self.create_with_generated_code(original_url, expiry_date)
                    .await?
            }
        };

        info!(id = created.id, short_code = %created.short_code, "Created short URL");
        Ok((created.into(), UrlCreationStatus::NewlyCreated))
    }

    #[instrument(skip(self))]
    async fn resolve(&self, short_code: &str) -> Result<RedirectOutcome, UrlServiceError> {
        // NOTE: nothing that fails validation could have been stored
        let Ok(short_code) = ShortCode::new(short_code.to_owned()) else {
            return Ok(RedirectOutcome::NotFound);
        };

        let Some(record) = self
            .url_repo
            .retrieve_by_code(&short_code)
            .await
            .map_err(UrlServiceError::Internal)?
        else {
            return Ok(RedirectOutcome::NotFound);
        };

        if is_expired(record.expiry_date, OffsetDateTime::now_utc()) {
            return Ok(RedirectOutcome::Expired);
        }

        if let Err(err) = self.url_repo.increment_clicks(&short_code).await {
            warn!(?err, %short_code, "Failed to count click; redirecting anyway");
        }

        Ok(RedirectOutcome::Found(record.original_url))
    }

    #[instrument(skip(self))]
    async fn get_by_id(&self, id: i32) -> Result<UrlRecord, UrlServiceError> {
        self.url_repo
            .retrieve_by_id(id)
            .await
            .map_err(UrlServiceError::Internal)?
            .ok_or(UrlServiceError::NotFound)
    }

    #[instrument(skip(self))]
    async fn update(&self, id: i32, changes: UrlChanges) -> Result<UrlRecord, UrlServiceError> {
        let original_url = changes
            .original_url
            .as_deref()
            .map(validate_original_url)
            .transpose()?;
        let short_code = parse_custom_code(changes.short_code.as_deref())?;
        let expiry_date = changes
            .expiry_date
            .as_deref()
            .map(|timestamp| OffsetDateTime::parse(timestamp, &Rfc3339))
            .transpose()?;

        // an unknown id is NotFound even when the requested code is taken
        self.get_by_id(id).await?;
        if let Some(short_code) = &short_code {
            self.ensure_code_available(short_code, Some(id)).await?;
        }

        let update = UrlUpdate {
            original_url,
            short_code,
            expiry_date,
        };
        Ok(self.url_repo.update_url(id, update).await?)
    }

    #[instrument(skip(self))]
    async fn sweep(&self, now: OffsetDateTime) -> Result<u64, UrlServiceError> {
        let deleted = self
            .url_repo
            .delete_expired_urls(now)
            .await
            .map_err(UrlServiceError::Internal)?;
        info!(deleted, "Swept expired URLs");
        Ok(deleted)
    }
}

impl From<UrlRecord> for ShortenedUrl {
    fn from(UrlRecord { id, short_code, .. }: UrlRecord) -> Self {
        Self { id, short_code }
    }
}
