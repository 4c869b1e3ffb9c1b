use anyhow::Context;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;

use crate::{url_repo::UrlRecord, url_service::ShortenedUrl};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortenPayload {
    pub url: Option<String>,
    pub custom_short_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShortenResponse {
    pub id: i32,
    pub short_code: String,
}

#[derive(Debug, Deserialize)]
pub struct GetUrlQuery {
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUrlPayload {
    pub id: Option<i32>,
    pub original_url: Option<String>,
    pub short_code: Option<String>,
    /// Timestamp in RFC 3339 format
    pub expiry_date: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlRecordResponse {
    pub id: i32,
    pub original_url: String,
    pub short_code: String,
    /// Timestamp in RFC 3339 format
    pub expiry_date: String,
    pub clicks: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub message: String,
    pub deleted_count: u64,
    /// Timestamp in RFC 3339 format
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Error {
    pub error: String,
    pub error_id: String,
}

impl From<ShortenedUrl> for ShortenResponse {
    fn from(ShortenedUrl { id, short_code }: ShortenedUrl) -> Self {
        Self {
            id,
            short_code: short_code.into_inner(),
        }
    }
}

impl TryFrom<UrlRecord> for UrlRecordResponse {
    type Error = anyhow::Error;

    fn try_from(
        UrlRecord {
            id,
            original_url,
            short_code,
            expiry_date,
            clicks,
        }: UrlRecord,
    ) -> Result<Self, Self::Error> {
        Ok(Self {
            id,
            original_url,
            short_code: short_code.into_inner(),
            expiry_date: expiry_date
                .format(&Rfc3339)
                .context("Failed to format expiry date")?,
            clicks,
        })
    }
}
