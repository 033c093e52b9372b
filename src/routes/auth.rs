use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::{
    auth::{jwt::TokenPair, password},
    data::{users, ModelError},
    error::{ensure_valid, AppError, AppResult},
    extract::{ApiJson, ApiQuery},
    models::User,
    oauth::{OAuthError, Provider},
    state::AppState,
    validator::Validator,
};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SignupRequest {
    pub email: String,
    pub name: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub provider: Option<String>,
    pub code: Option<String>,
    pub state: Option<String>,
}

#[derive(Serialize)]
pub struct TokensResponse {
    pub tokens: TokenPair,
}

pub async fn signup(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<SignupRequest>,
) -> AppResult<(StatusCode, Json<TokensResponse>)> {
    let mut v = Validator::new();
    users::validate_user(&mut v, &payload.name, &payload.email, Some(&payload.password));
    ensure_valid(v)?;

    let password_hash = hash_in_background(payload.password).await?;
    let new_user = users::new_email_user(&payload.name, &payload.email, password_hash);
    let user = state
        .with_conn(move |conn| users::insert(conn, &new_user))
        .await?;

    tracing::info!(user_id = user.id, "user registered");
    let tokens = issue_tokens(&state, &user)?;
    Ok((StatusCode::CREATED, Json(TokensResponse { tokens })))
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> AppResult<Json<TokensResponse>> {
    let mut v = Validator::new();
    users::validate_email(&mut v, &payload.email);
    users::validate_password_plaintext(&mut v, &payload.password);
    ensure_valid(v)?;

    let email = payload.email.clone();
    let found = state
        .with_conn(move |conn| users::get_by_email(conn, &email))
        .await;

    let user = match found {
        Ok(user) => Some(user),
        Err(ModelError::NotFound) => None,
        Err(err) => return Err(err.into()),
    };

    // Unknown and OAuth-only accounts go through the same hash check.
    let password_hash = user.as_ref().and_then(|user| user.password_hash.clone());
    let password = payload.password;
    let valid = tokio::task::spawn_blocking(move || {
        password::verify_login(&password, password_hash.as_deref())
    })
    .await
    .map_err(AppError::internal)??;

    let Some(user) = user.filter(|_| valid) else {
        return Err(AppError::invalid_credentials());
    };

    let tokens = issue_tokens(&state, &user)?;
    Ok(Json(TokensResponse { tokens }))
}

pub async fn refresh(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RefreshRequest>,
) -> AppResult<Json<TokensResponse>> {
    let claims = state
        .jwt
        .verify_refresh_token(&payload.refresh_token)
        .map_err(|_| AppError::invalid_token())?;

    let user = state
        .with_conn(move |conn| users::get_by_id(conn, claims.sub))
        .await
        .map_err(|err| match err {
            ModelError::NotFound => AppError::invalid_token(),
            other => other.into(),
        })?;

    let tokens = issue_tokens(&state, &user)?;
    Ok(Json(TokensResponse { tokens }))
}

pub async fn oauth_callback(
    State(state): State<AppState>,
    ApiQuery(params): ApiQuery<CallbackParams>,
) -> AppResult<Json<TokensResponse>> {
    if params.state.as_deref() != Some(state.config.oauth_callback_state.as_str()) {
        return Err(AppError::bad_request("invalid state"));
    }

    let provider: Provider = params
        .provider
        .as_deref()
        .unwrap_or("github")
        .parse()
        .map_err(|err: OAuthError| AppError::bad_request(err.to_string()))?;

    let code = params
        .code
        .filter(|code| !code.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("missing authorization code"))?;

    let profile = state
        .identity
        .exchange_code(provider, &code)
        .await
        .map_err(|err| match err {
            OAuthError::Http(err) => AppError::internal(err),
            other => AppError::bad_request(other.to_string()),
        })?;

    let mut v = Validator::new();
    users::validate_email(&mut v, &profile.email);
    ensure_valid(v)?;

    let (user, created) = state
        .with_conn(move |conn| users::find_or_create_oauth(conn, &profile))
        .await?;

    if created {
        tracing::info!(user_id = user.id, provider = %provider, "user registered via oauth");
    }

    let tokens = issue_tokens(&state, &user)?;
    Ok(Json(TokensResponse { tokens }))
}

pub(crate) async fn hash_in_background(password: String) -> AppResult<String> {
    let hash = tokio::task::spawn_blocking(move || password::hash_password(&password))
        .await
        .map_err(AppError::internal)??;
    Ok(hash)
}

fn issue_tokens(state: &AppState, user: &User) -> AppResult<TokenPair> {
    Ok(state.jwt.issue_pair(user.id, &user.email)?)
}
