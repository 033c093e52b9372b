//! SQL-backed model layer.
//!
//! Every function here takes a `&mut PgConnection` and returns a
//! [`ModelResult`]; callers run them through [`crate::state::AppState::with_conn`]
//! so each call is bounded by [`QUERY_TIMEOUT`].

use std::time::Duration;

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;

pub mod filters;
pub mod free_times;
pub mod friends;
pub mod users;

pub use filters::{calculate_meta, Filters, Meta, PageParams, RangeParams, SortKey, TimeRange};

pub const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("record not found")]
    NotFound,
    #[error("edit conflict")]
    EditConflict,
    #[error("email already exists")]
    DuplicateEmail,
    #[error("friend request already pending or accepted")]
    DuplicateFriendRequest,
    #[error("constraint {name} violated")]
    ConstraintViolation { name: String },
    #[error("database operation timed out")]
    Timeout,
    #[error("database pool error: {0}")]
    Pool(String),
    #[error("database error: {0}")]
    Database(DieselError),
}

pub type ModelResult<T> = Result<T, ModelError>;

impl From<DieselError> for ModelError {
    fn from(value: DieselError) -> Self {
        match value {
            DieselError::NotFound => ModelError::NotFound,
            DieselError::DatabaseError(
                kind @ (DatabaseErrorKind::UniqueViolation
                | DatabaseErrorKind::ForeignKeyViolation
                | DatabaseErrorKind::CheckViolation),
                info,
            ) => {
                let constraint = info.constraint_name().map(str::to_owned);
                match constraint {
                    Some(name) => ModelError::ConstraintViolation { name },
                    None => ModelError::Database(DieselError::DatabaseError(kind, info)),
                }
            }
            other => ModelError::Database(other),
        }
    }
}

impl ModelError {
    /// Returns the violated constraint's name, if this is a constraint error.
    pub fn constraint(&self) -> Option<&str> {
        match self {
            ModelError::ConstraintViolation { name } => Some(name),
            _ => None,
        }
    }
}
