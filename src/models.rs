use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

pub const PROVIDER_EMAIL: &str = "email";
pub const PROVIDER_GOOGLE: &str = "google";
pub const PROVIDER_GITHUB: &str = "github";

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_ACCEPTED: &str = "accepted";

pub const VISIBILITY_PUBLIC: &str = "public";
pub const VISIBILITY_PRIVATE: &str = "private";

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: i64,
    pub uuid: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub avatar_url: String,
    pub provider: String,
    pub activated: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub avatar_url: String,
    pub provider: String,
    pub activated: bool,
}

/// A row of the `friends` table: an outstanding request (`pending`) or an
/// active friendship (`accepted`) between two users.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = friends)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct FriendPair {
    pub id: i64,
    pub source_user_id: i64,
    pub destination_user_id: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
}

impl FriendPair {
    pub fn involves(&self, user_id: i64) -> bool {
        self.source_user_id == user_id || self.destination_user_id == user_id
    }

    pub fn is_pending(&self) -> bool {
        self.status == STATUS_PENDING
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = friends)]
pub struct NewFriendPair {
    pub source_user_id: i64,
    pub destination_user_id: i64,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Identifiable, Associations)]
#[diesel(table_name = free_times)]
#[diesel(belongs_to(User))]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct FreeTime {
    pub id: i64,
    pub user_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tags: Vec<String>,
    pub visibility: String,
    pub version: i32,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = free_times)]
pub struct NewFreeTime {
    pub user_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub tags: Vec<String>,
    pub visibility: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = free_time_viewers)]
pub struct NewFreeTimeViewer {
    pub free_time_id: i64,
    pub user_id: i64,
}
