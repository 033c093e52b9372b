use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthenticatedUser,
    data::{
        free_times::{self, FreeTimePatch, FriendFreeTime},
        users::UserSummary,
        Filters, Meta, ModelError, PageParams, RangeParams, TimeRange,
    },
    error::{ensure_valid, AppError, AppResult},
    extract::{ApiJson, ApiPath, ApiQuery},
    models::{FreeTime, NewFreeTime, VISIBILITY_PUBLIC},
    routes::MessageResponse,
    state::AppState,
    validator::Validator,
};

#[derive(Debug, Serialize)]
pub struct FreeTimeResponse {
    pub id: i64,
    pub user_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub tags: Vec<String>,
    pub visibility: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewers: Option<Vec<i64>>,
}

impl From<FreeTime> for FreeTimeResponse {
    fn from(window: FreeTime) -> Self {
        Self {
            id: window.id,
            user_id: window.user_id,
            start_time: window.start_time,
            end_time: window.end_time,
            tags: window.tags,
            visibility: window.visibility,
            created_at: window.created_at,
            updated_at: window.updated_at,
            version: window.version,
            viewers: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FriendFreeTimeResponse {
    #[serde(flatten)]
    pub free_time: FreeTimeResponse,
    pub owner: UserSummary,
}

impl From<FriendFreeTime> for FriendFreeTimeResponse {
    fn from(value: FriendFreeTime) -> Self {
        Self {
            free_time: value.free_time.into(),
            owner: value.owner,
        }
    }
}

#[derive(Serialize)]
pub struct FreeTimeEnvelope {
    pub free_time: FreeTimeResponse,
}

#[derive(Serialize)]
pub struct FreeTimesPage<T> {
    pub free_times: Vec<T>,
    pub meta: Meta,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateFreeTimeRequest {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub visibility: Option<String>,
    #[serde(default)]
    pub viewers: Vec<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(flatten)]
    pub page: PageParams,
    #[serde(flatten)]
    pub range: RangeParams,
}

pub async fn list_own(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiQuery(params): ApiQuery<ListParams>,
) -> AppResult<Json<FreeTimesPage<FreeTimeResponse>>> {
    let (filters, range) = parse_listing(&params)?;
    let (windows, meta) = state
        .with_conn(move |conn| free_times::list_own(conn, user.id, &filters, &range))
        .await?;

    Ok(Json(FreeTimesPage {
        free_times: windows.into_iter().map(Into::into).collect(),
        meta,
    }))
}

pub async fn create(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiJson(payload): ApiJson<CreateFreeTimeRequest>,
) -> AppResult<(StatusCode, Json<FreeTimeEnvelope>)> {
    let mut v = Validator::new();
    v.check(payload.start_time.is_some(), "start_time", "must be provided");
    v.check(payload.end_time.is_some(), "end_time", "must be provided");
    let (Some(start_time), Some(end_time)) = (payload.start_time, payload.end_time) else {
        return Err(AppError::validation(v.into_errors()));
    };

    let window = NewFreeTime {
        user_id: user.id,
        start_time,
        end_time,
        tags: payload.tags.iter().map(|tag| tag.trim().to_string()).collect(),
        visibility: payload
            .visibility
            .unwrap_or_else(|| VISIBILITY_PUBLIC.to_string()),
    };
    free_times::validate_free_time(&mut v, &window, &payload.viewers, Utc::now());
    ensure_valid(v)?;

    let viewers = payload.viewers;
    let created = state
        .with_conn(move |conn| {
            let created = free_times::create(conn, &window, &viewers)?;
            Ok((created, viewers))
        })
        .await
        .map_err(|err| match err {
            ModelError::ConstraintViolation { name } if name == free_times::VIEWERS_USER_FKEY => {
                AppError::field("viewers", "must reference existing users")
            }
            other => other.into(),
        })?;

    let (created, viewers) = created;
    tracing::info!(free_time_id = created.id, user_id = created.user_id, "free time created");

    let mut free_time = FreeTimeResponse::from(created);
    free_time.viewers = Some(viewers);
    Ok((StatusCode::CREATED, Json(FreeTimeEnvelope { free_time })))
}

pub async fn get(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiPath(id): ApiPath<i64>,
) -> AppResult<Json<FreeTimeEnvelope>> {
    let (window, viewers) = state
        .with_conn(move |conn| {
            let window = free_times::get_owned(conn, id, user.id)?;
            let viewers = free_times::viewers(conn, window.id)?;
            Ok((window, viewers))
        })
        .await?;

    let mut free_time = FreeTimeResponse::from(window);
    free_time.viewers = Some(viewers);
    Ok(Json(FreeTimeEnvelope { free_time }))
}

pub async fn update(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(patch): ApiJson<FreeTimePatch>,
) -> AppResult<Json<FreeTimeEnvelope>> {
    let mut window = state
        .with_conn(move |conn| free_times::get_owned(conn, id, user.id))
        .await?;

    patch.apply(&mut window)?;
    window.tags = window.tags.iter().map(|tag| tag.trim().to_string()).collect();

    let mut v = Validator::new();
    free_times::validate_free_time(&mut v, &NewFreeTime::from(&window), &[], Utc::now());
    ensure_valid(v)?;

    let updated = state
        .with_conn(move |conn| free_times::update(conn, &window))
        .await?;

    Ok(Json(FreeTimeEnvelope {
        free_time: updated.into(),
    }))
}

pub async fn delete(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiPath(id): ApiPath<i64>,
) -> AppResult<Json<MessageResponse>> {
    state
        .with_conn(move |conn| {
            let window = free_times::get_owned(conn, id, user.id)?;
            free_times::delete(conn, &window)
        })
        .await?;

    Ok(Json(MessageResponse::new("free time removed")))
}

pub async fn list_for_friends(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiQuery(params): ApiQuery<ListParams>,
) -> AppResult<Json<FreeTimesPage<FriendFreeTimeResponse>>> {
    let (filters, range) = parse_listing(&params)?;
    let (windows, meta) = state
        .with_conn(move |conn| free_times::list_for_friends(conn, user.id, &filters, &range))
        .await?;

    Ok(Json(FreeTimesPage {
        free_times: windows.into_iter().map(Into::into).collect(),
        meta,
    }))
}

pub async fn list_for_friend(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiPath(friend_id): ApiPath<i64>,
    ApiQuery(params): ApiQuery<ListParams>,
) -> AppResult<Json<FreeTimesPage<FriendFreeTimeResponse>>> {
    let (filters, range) = parse_listing(&params)?;
    let (windows, meta) = state
        .with_conn(move |conn| {
            free_times::list_for_friend(conn, user.id, friend_id, &filters, &range)
        })
        .await?;

    Ok(Json(FreeTimesPage {
        free_times: windows.into_iter().map(Into::into).collect(),
        meta,
    }))
}

fn parse_listing(params: &ListParams) -> AppResult<(Filters, TimeRange)> {
    let mut v = Validator::new();
    let filters = Filters::parse(&params.page, "start_time", free_times::SORT_SAFELIST, &mut v);
    let range = TimeRange::parse(&params.range, &mut v);
    ensure_valid(v)?;
    Ok((filters, range))
}
