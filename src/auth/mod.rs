pub mod jwt;
pub mod password;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;

use crate::{
    data::{users, ModelError},
    error::AppError,
    models::User,
    state::AppState,
};

/// Who is making the request.
///
/// Requests without an `Authorization` header are `Anonymous`. A header that
/// is present but unusable is rejected with `invalid_token` rather than being
/// downgraded to anonymous.
#[derive(Debug, Clone)]
pub enum Identity {
    Anonymous,
    Authenticated(User),
}

impl Identity {
    pub fn user(&self) -> Option<&User> {
        match self {
            Identity::Anonymous => None,
            Identity::Authenticated(user) => Some(user),
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Identity {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(identity) = parts.extensions.get::<Identity>() {
            return Ok(identity.clone());
        }

        if !parts.headers.contains_key(AUTHORIZATION) {
            return Ok(Identity::Anonymous);
        }

        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::invalid_token())?;

        let claims = state
            .jwt
            .verify_token(bearer.token())
            .map_err(|_| AppError::invalid_token())?;

        let user = state
            .with_conn(move |conn| users::get_by_id(conn, claims.sub))
            .await
            .map_err(|err| match err {
                ModelError::NotFound => AppError::invalid_token(),
                other => AppError::from(other),
            })?;

        let identity = Identity::Authenticated(user);
        parts.extensions.insert(identity.clone());
        Ok(identity)
    }
}

/// Extractor for routes that require a signed-in user.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match Identity::from_request_parts(parts, state).await? {
            Identity::Authenticated(user) => Ok(AuthenticatedUser(user)),
            Identity::Anonymous => Err(AppError::unauthorized()),
        }
    }
}
