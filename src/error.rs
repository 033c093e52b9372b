use std::collections::BTreeMap;
use std::fmt::Display;

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::data::ModelError;
use crate::validator::Validator;

pub type AppResult<T> = Result<T, AppError>;

const INTERNAL_MESSAGE: &str =
    "the server encountered a problem and could not process your request";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ErrorBody {
    Message(String),
    Fields(BTreeMap<String, String>),
}

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    body: ErrorBody,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            body: ErrorBody::Message(message.into()),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn body(&self) -> &ErrorBody {
        &self.body
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "you must be authenticated to access this resource",
        )
    }

    pub fn invalid_token() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "invalid_token",
            "invalid or missing authentication token",
        )
    }

    pub fn invalid_credentials() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "invalid_credentials",
            "invalid authentication credentials",
        )
    }

    pub fn forbidden() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            "forbidden",
            "you do not have permission to access this resource",
        )
    }

    pub fn not_found() -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "not_found",
            "the requested resource could not be found",
        )
    }

    pub fn edit_conflict() -> Self {
        Self::new(
            StatusCode::CONFLICT,
            "edit_conflict",
            "unable to update the record due to an edit conflict, please try again",
        )
    }

    pub fn duplicate_email() -> Self {
        Self::failed_fields(
            StatusCode::CONFLICT,
            "duplicate_email",
            "email",
            "a user with this email address already exists",
        )
    }

    pub fn duplicate_request() -> Self {
        Self::new(
            StatusCode::CONFLICT,
            "duplicate_request",
            "a friend request between these users already exists",
        )
    }

    pub fn rate_limited() -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            "rate limit exceeded",
        )
    }

    pub fn validation(errors: BTreeMap<String, String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            code: "validation_failed",
            body: ErrorBody::Fields(errors),
        }
    }

    pub fn field(field: &str, message: &str) -> Self {
        Self::failed_fields(
            StatusCode::UNPROCESSABLE_ENTITY,
            "validation_failed",
            field,
            message,
        )
    }

    /// Logs the underlying error and hides it behind a generic message.
    pub fn internal<E: Display>(error: E) -> Self {
        tracing::error!(error = %error, "internal server error");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            INTERNAL_MESSAGE,
        )
    }

    fn failed_fields(status: StatusCode, code: &'static str, field: &str, message: &str) -> Self {
        let mut errors = BTreeMap::new();
        errors.insert(field.to_string(), message.to_string());
        Self {
            status,
            code,
            body: ErrorBody::Fields(errors),
        }
    }
}

/// Turns a populated validator into a 422; `Ok` when nothing was recorded.
pub fn ensure_valid(v: Validator) -> AppResult<()> {
    if v.valid() {
        Ok(())
    } else {
        Err(AppError::validation(v.into_errors()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.body,
            code: self.code,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
    code: &'static str,
}

impl From<ModelError> for AppError {
    fn from(value: ModelError) -> Self {
        match value {
            ModelError::NotFound => AppError::not_found(),
            ModelError::EditConflict => AppError::edit_conflict(),
            ModelError::DuplicateEmail => AppError::duplicate_email(),
            ModelError::DuplicateFriendRequest => AppError::duplicate_request(),
            other => AppError::internal(other),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<JsonRejection> for AppError {
    fn from(value: JsonRejection) -> Self {
        AppError::bad_request(value.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(value: QueryRejection) -> Self {
        AppError::bad_request(value.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(value: PathRejection) -> Self {
        AppError::bad_request(value.body_text())
    }
}
