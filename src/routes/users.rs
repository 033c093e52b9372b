use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{AuthenticatedUser, Identity},
    data::{users, users::UserSummary, Filters, Meta, PageParams},
    error::{ensure_valid, AppError, AppResult},
    extract::{ApiJson, ApiPath, ApiQuery},
    models::User,
    routes::auth::hash_in_background,
    state::AppState,
    validator::Validator,
};

/// Full account record, only ever shown to its owner.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub uuid: Uuid,
    pub name: String,
    pub email: String,
    pub avatar_url: String,
    pub provider: String,
    pub activated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            uuid: user.uuid,
            name: user.name,
            email: user.email,
            avatar_url: user.avatar_url,
            provider: user.provider,
            activated: user.activated,
            created_at: user.created_at,
            updated_at: user.updated_at,
            version: user.version,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum UserView {
    Full(UserResponse),
    Public(UserSummary),
}

#[derive(Serialize)]
pub struct UserEnvelope<T> {
    pub user: T,
}

#[derive(Serialize)]
pub struct UsersPage {
    pub users: Vec<UserSummary>,
    pub meta: Meta,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(alias = "avatar")]
    pub avatar_url: Option<String>,
    pub password: Option<String>,
    pub version: Option<i32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
    #[serde(flatten)]
    pub page: PageParams,
}

pub async fn me(AuthenticatedUser(user): AuthenticatedUser) -> Json<UserEnvelope<UserResponse>> {
    Json(UserEnvelope { user: user.into() })
}

pub async fn update_me(
    State(state): State<AppState>,
    AuthenticatedUser(mut user): AuthenticatedUser,
    ApiJson(payload): ApiJson<UpdateUserRequest>,
) -> AppResult<Json<UserEnvelope<UserResponse>>> {
    if payload.version.is_some_and(|version| version != user.version) {
        return Err(AppError::edit_conflict());
    }

    if let Some(name) = payload.name {
        user.name = name.trim().to_string();
    }
    if let Some(email) = payload.email {
        user.email = users::normalize_email(&email);
    }
    if let Some(avatar_url) = payload.avatar_url {
        user.avatar_url = avatar_url;
    }

    let mut v = Validator::new();
    users::validate_user(&mut v, &user.name, &user.email, payload.password.as_deref());
    ensure_valid(v)?;

    if let Some(password) = payload.password {
        user.password_hash = Some(hash_in_background(password).await?);
    }

    let updated = state
        .with_conn(move |conn| users::update(conn, &user))
        .await?;

    Ok(Json(UserEnvelope {
        user: updated.into(),
    }))
}

pub async fn delete_me(
    State(state): State<AppState>,
    AuthenticatedUser(user): AuthenticatedUser,
) -> AppResult<StatusCode> {
    let user_id = user.id;
    state
        .with_conn(move |conn| users::delete(conn, user_id))
        .await?;

    tracing::info!(user_id, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn search(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    ApiQuery(params): ApiQuery<SearchParams>,
) -> AppResult<Json<UsersPage>> {
    let mut v = Validator::new();
    let query = params.q.unwrap_or_default().trim().to_string();
    v.check(!query.is_empty(), "q", "must be provided");
    let filters = Filters::parse(&params.page, "name", users::SORT_SAFELIST, &mut v);
    ensure_valid(v)?;

    let (users, meta) = state
        .with_conn(move |conn| users::search(conn, &query, &filters))
        .await?;

    Ok(Json(UsersPage { users, meta }))
}

/// Public profile of any user; the caller's own id yields the full record.
pub async fn get_user(
    State(state): State<AppState>,
    identity: Identity,
    ApiPath(id): ApiPath<i64>,
) -> AppResult<Json<UserEnvelope<UserView>>> {
    if let Some(current) = identity.user().filter(|current| current.id == id) {
        return Ok(Json(UserEnvelope {
            user: UserView::Full(current.clone().into()),
        }));
    }

    if id < 1 {
        return Err(AppError::not_found());
    }

    let user = state
        .with_conn(move |conn| users::get_by_id(conn, id))
        .await?;

    Ok(Json(UserEnvelope {
        user: UserView::Public(UserSummary::from(&user)),
    }))
}
