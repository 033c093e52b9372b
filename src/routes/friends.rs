use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthenticatedUser,
    data::{friends, friends::FriendEntry, Filters, Meta, PageParams},
    error::{ensure_valid, AppResult},
    extract::{ApiJson, ApiPath, ApiQuery},
    models::FriendPair,
    routes::MessageResponse,
    state::AppState,
    validator::Validator,
};

#[derive(Debug, Serialize)]
pub struct FriendRequestResponse {
    pub id: i64,
    pub source_user_id: i64,
    pub destination_user_id: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

impl From<FriendPair> for FriendRequestResponse {
    fn from(pair: FriendPair) -> Self {
        Self {
            id: pair.id,
            source_user_id: pair.source_user_id,
            destination_user_id: pair.destination_user_id,
            status: pair.status,
            created_at: pair.created_at,
            updated_at: pair.updated_at,
            version: pair.version,
        }
    }
}

#[derive(Serialize)]
pub struct FriendRequestEnvelope {
    pub friend_request: FriendRequestResponse,
}

#[derive(Serialize)]
pub struct FriendsPage {
    pub friends: Vec<FriendEntry>,
    pub meta: Meta,
}

#[derive(Serialize)]
pub struct RequestsPage {
    pub requests: Vec<FriendEntry>,
    pub meta: Meta,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SendRequest {
    pub destination_id: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    #[serde(flatten)]
    pub page: PageParams,
}

pub async fn list_friends(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiQuery(params): ApiQuery<PageParams>,
) -> AppResult<Json<FriendsPage>> {
    let filters = parse_filters(&params, "name")?;
    let (friends, meta) = state
        .with_conn(move |conn| friends::list_friends(conn, user.id, &filters))
        .await?;
    Ok(Json(FriendsPage { friends, meta }))
}

pub async fn search_friends(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiQuery(params): ApiQuery<SearchParams>,
) -> AppResult<Json<FriendsPage>> {
    let mut v = Validator::new();
    let query = params.q.unwrap_or_default().trim().to_string();
    v.check(!query.is_empty(), "q", "must be provided");
    let filters = Filters::parse(&params.page, "name", friends::SORT_SAFELIST, &mut v);
    ensure_valid(v)?;

    let (friends, meta) = state
        .with_conn(move |conn| friends::search_friends(conn, user.id, &query, &filters))
        .await?;
    Ok(Json(FriendsPage { friends, meta }))
}

pub async fn send_request(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiJson(payload): ApiJson<SendRequest>,
) -> AppResult<(StatusCode, Json<FriendRequestEnvelope>)> {
    let request = friends::new_request(user.id, payload.destination_id);
    let mut v = Validator::new();
    friends::validate_friend_pair(&mut v, &request);
    ensure_valid(v)?;

    let pair = state
        .with_conn(move |conn| friends::send_request(conn, &request))
        .await?;

    tracing::info!(
        request_id = pair.id,
        source_user_id = pair.source_user_id,
        destination_user_id = pair.destination_user_id,
        "friend request sent"
    );

    Ok((
        StatusCode::CREATED,
        Json(FriendRequestEnvelope {
            friend_request: pair.into(),
        }),
    ))
}

pub async fn accept_request(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiPath(request_id): ApiPath<i64>,
) -> AppResult<Json<FriendRequestEnvelope>> {
    let pair = state
        .with_conn(move |conn| friends::accept(conn, request_id, user.id))
        .await?;

    Ok(Json(FriendRequestEnvelope {
        friend_request: pair.into(),
    }))
}

pub async fn remove_request(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiPath(request_id): ApiPath<i64>,
) -> AppResult<Json<MessageResponse>> {
    let pair = state
        .with_conn(move |conn| friends::remove(conn, request_id, user.id))
        .await?;

    let message = if pair.is_pending() {
        "friend request removed"
    } else {
        "friend removed"
    };
    Ok(Json(MessageResponse::new(message)))
}

pub async fn list_sent(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiQuery(params): ApiQuery<PageParams>,
) -> AppResult<Json<RequestsPage>> {
    let filters = parse_filters(&params, "-created_at")?;
    let (requests, meta) = state
        .with_conn(move |conn| friends::list_sent(conn, user.id, &filters))
        .await?;
    Ok(Json(RequestsPage { requests, meta }))
}

pub async fn list_received(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiQuery(params): ApiQuery<PageParams>,
) -> AppResult<Json<RequestsPage>> {
    let filters = parse_filters(&params, "-created_at")?;
    let (requests, meta) = state
        .with_conn(move |conn| friends::list_received(conn, user.id, &filters))
        .await?;
    Ok(Json(RequestsPage { requests, meta }))
}

pub async fn unfriend(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
    ApiPath(friend_id): ApiPath<i64>,
) -> AppResult<Json<MessageResponse>> {
    state
        .with_conn(move |conn| friends::unfriend_user(conn, user.id, friend_id))
        .await?;
    Ok(Json(MessageResponse::new("friend removed")))
}

fn parse_filters(params: &PageParams, default_sort: &str) -> AppResult<Filters> {
    let mut v = Validator::new();
    let filters = Filters::parse(params, default_sort, friends::SORT_SAFELIST, &mut v);
    ensure_valid(v)?;
    Ok(filters)
}
