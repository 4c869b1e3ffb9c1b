use std::sync::Arc;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing,
};
use rearch::CapsuleHandle;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    api::{
        CleanupResponse, Error, GetUrlQuery, ShortenPayload, ShortenResponse, UpdateUrlPayload,
        UrlRecordResponse,
    },
    config::error_page_url_capsule,
    url_service::{
        ErrorKind, RedirectOutcome, UrlChanges, UrlCreationStatus, UrlService, UrlServiceError,
        url_service_capsule,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub url_service: Arc<dyn UrlService>,
    pub error_page_url: String,
}

pub fn app_state_capsule(CapsuleHandle { mut get, .. }: CapsuleHandle) -> AppState {
    AppState {
        url_service: Arc::clone(get.as_ref(url_service_capsule)),
        error_page_url: get.as_ref(error_page_url_capsule).clone(),
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/shorten", routing::post(shorten))
        .route("/url", routing::get(get_url).put(update_url))
        .route("/cleanup", routing::delete(cleanup))
        .route("/errorPage", routing::get(error_page))
        .route("/{short_code}", routing::get(redirect))
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Service(UrlServiceError),
}

impl From<UrlServiceError> for ApiError {
    fn from(err: UrlServiceError) -> Self {
        Self::Service(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err_uuid = Uuid::new_v4();
        let (status, message) = match self {
            Self::BadRequest(message) => {
                info!(?err_uuid, message, "User submitted a bad request");
                (StatusCode::BAD_REQUEST, message)
            }
            Self::Service(error) => match error.kind() {
                ErrorKind::Validation => {
                    info!(?err_uuid, ?error, "User submitted a bad request");
                    (StatusCode::BAD_REQUEST, error.to_string())
                }
                ErrorKind::Conflict => {
                    info!(?err_uuid, ?error, "Short code exists under a different entry");
                    (StatusCode::BAD_REQUEST, error.to_string())
                }
                ErrorKind::NotFound => (StatusCode::NOT_FOUND, error.to_string()),
                ErrorKind::Internal => {
                    error!(?err_uuid, ?error, "Encountered an error during a request");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal server error".to_owned(),
                    )
                }
            },
        };

        (
            status,
            Json(Error {
                error: message,
                error_id: err_uuid.to_string(),
            }),
        )
            .into_response()
    }
}

fn found(location: &str) -> Result<Response, header::InvalidHeaderValue> {
    Ok((
        StatusCode::FOUND,
        [(header::LOCATION, HeaderValue::from_str(location)?)],
    )
        .into_response())
}

#[instrument(skip(state))]
async fn redirect(State(state): State<AppState>, Path(short_code): Path<String>) -> Response {
    let destination = match state.url_service.resolve(&short_code).await {
        Ok(RedirectOutcome::Found(original_url)) => original_url,
        Ok(RedirectOutcome::NotFound) => {
            info!("Short code not found");
            state.error_page_url.clone()
        }
        Ok(RedirectOutcome::Expired) => {
            info!("Short code expired");
            state.error_page_url.clone()
        }
        Err(error) => {
            error!(?error, "Encountered an error while resolving a short code");
            state.error_page_url.clone()
        }
    };

    found(&destination).unwrap_or_else(|err| {
        warn!(?err, destination, "Destination is not a valid Location header");
        found(&state.error_page_url).unwrap_or_else(|_| StatusCode::NOT_FOUND.into_response())
    })
}

#[instrument(skip(state))]
async fn shorten(
    State(state): State<AppState>,
    payload: Result<Json<ShortenPayload>, JsonRejection>,
) -> Result<(StatusCode, Json<ShortenResponse>), ApiError> {
    let Json(ShortenPayload {
        url,
        custom_short_url,
    }) = payload?;

    let (shortened_url, creation_status) = state
        .url_service
        .shorten(url.as_deref().unwrap_or_default(), custom_short_url.as_deref())
        .await?;

    let status = match creation_status {
        UrlCreationStatus::NewlyCreated => StatusCode::CREATED,
        UrlCreationStatus::AlreadyExists => StatusCode::OK,
    };
    Ok((status, Json(shortened_url.into())))
}

#[instrument(skip(state))]
async fn get_url(
    State(state): State<AppState>,
    Query(GetUrlQuery { id }): Query<GetUrlQuery>,
) -> Result<Json<UrlRecordResponse>, ApiError> {
    let id = id
        .and_then(|id| id.trim().parse::<i32>().ok())
        .ok_or_else(|| ApiError::BadRequest("A valid numeric ID is required".to_owned()))?;

    let url_record = state.url_service.get_by_id(id).await?;
    Ok(Json(
        UrlRecordResponse::try_from(url_record).map_err(UrlServiceError::Internal)?,
    ))
}

#[instrument(skip(state))]
async fn update_url(
    State(state): State<AppState>,
    payload: Result<Json<UpdateUrlPayload>, JsonRejection>,
) -> Result<Json<UrlRecordResponse>, ApiError> {
    let Json(UpdateUrlPayload {
        id,
        original_url,
        short_code,
        expiry_date,
    }) = payload?;
    let id =
        id.ok_or_else(|| ApiError::BadRequest("The ID is required to update the URL".to_owned()))?;

    let changes = UrlChanges {
        original_url,
        short_code,
        expiry_date,
    };
    let url_record = state.url_service.update(id, changes).await?;
    Ok(Json(
        UrlRecordResponse::try_from(url_record).map_err(UrlServiceError::Internal)?,
    ))
}

#[instrument(skip(state))]
async fn cleanup(State(state): State<AppState>) -> Result<Json<CleanupResponse>, ApiError> {
    let now = OffsetDateTime::now_utc();
    let deleted_count = state.url_service.sweep(now).await?;
    let timestamp = now
        .format(&Rfc3339)
        .context("Failed to format cleanup timestamp")
        .map_err(UrlServiceError::Internal)?;

    Ok(Json(CleanupResponse {
        message: format!("{deleted_count} expired URLs deleted"),
        deleted_count,
        timestamp,
    }))
}

async fn error_page() -> (StatusCode, &'static str) {
    (
        StatusCode::NOT_FOUND,
        "This short link does not exist or has expired.",
    )
}
