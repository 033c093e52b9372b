use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text, Uuid as SqlUuid};
use serde::Serialize;
use uuid::Uuid;

use crate::data::{calculate_meta, Filters, Meta, ModelError, ModelResult, SortKey};
use crate::models::{NewUser, User, PROVIDER_EMAIL};
use crate::schema::users;
use crate::validator::{self, Validator};

pub const USERS_EMAIL_KEY: &str = "users_email_key";

pub static SORT_SAFELIST: &[SortKey] = &[
    SortKey {
        key: "id",
        column: "users.id",
    },
    SortKey {
        key: "name",
        column: "users.name",
    },
    SortKey {
        key: "email",
        column: "users.email",
    },
    SortKey {
        key: "created_at",
        column: "users.created_at",
    },
];

/// Profile fields other users are allowed to see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub id: i64,
    pub uuid: Uuid,
    pub name: String,
    pub email: String,
    pub avatar_url: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            uuid: user.uuid,
            name: user.name.clone(),
            email: user.email.clone(),
            avatar_url: user.avatar_url.clone(),
        }
    }
}

/// Identity data returned by an OAuth provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthProfile {
    pub email: String,
    pub name: String,
    pub avatar_url: String,
    pub provider: String,
}

#[derive(QueryableByName)]
struct UserSearchRow {
    #[diesel(sql_type = BigInt)]
    total_records: i64,
    #[diesel(sql_type = BigInt)]
    id: i64,
    #[diesel(sql_type = SqlUuid)]
    uuid: Uuid,
    #[diesel(sql_type = Text)]
    name: String,
    #[diesel(sql_type = Text)]
    email: String,
    #[diesel(sql_type = Text)]
    avatar_url: String,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub const MAX_NAME_BYTES: usize = 500;
pub const MAX_EMAIL_BYTES: usize = 320;

pub fn validate_email(v: &mut Validator, email: &str) {
    v.check(!email.is_empty(), "email", "must be provided");
    v.check(
        email.len() <= MAX_EMAIL_BYTES,
        "email",
        "must not be more than 320 bytes long",
    );
    v.check(
        validator::is_email(email),
        "email",
        "must be a valid email address",
    );
}

pub fn validate_password_plaintext(v: &mut Validator, password: &str) {
    v.check(!password.is_empty(), "password", "must be provided");
    v.check(password.len() >= 8, "password", "must be at least 8 bytes long");
    v.check(
        password.len() <= 72,
        "password",
        "must not be more than 72 bytes long",
    );
}

pub fn validate_user(v: &mut Validator, name: &str, email: &str, password: Option<&str>) {
    v.check(!name.trim().is_empty(), "name", "must be provided");
    v.check(
        name.len() <= MAX_NAME_BYTES,
        "name",
        "must not be more than 500 bytes long",
    );

    validate_email(v, email);

    if let Some(password) = password {
        validate_password_plaintext(v, password);
    }
}

/// Builds the record for a password signup: provider `email`, not yet
/// activated.
pub fn new_email_user(name: &str, email: &str, password_hash: String) -> NewUser {
    NewUser {
        name: name.trim().to_string(),
        email: normalize_email(email),
        password_hash: Some(password_hash),
        avatar_url: String::new(),
        provider: PROVIDER_EMAIL.to_string(),
        activated: false,
    }
}

pub fn insert(conn: &mut PgConnection, new_user: &NewUser) -> ModelResult<User> {
    diesel::insert_into(users::table)
        .values(new_user)
        .returning(User::as_returning())
        .get_result(conn)
        .map_err(|err| map_email_conflict(err.into()))
}

pub fn get_by_id(conn: &mut PgConnection, id: i64) -> ModelResult<User> {
    Ok(users::table
        .find(id)
        .select(User::as_select())
        .first(conn)?)
}

pub fn get_by_email(conn: &mut PgConnection, email: &str) -> ModelResult<User> {
    Ok(users::table
        .filter(users::email.eq(normalize_email(email)))
        .select(User::as_select())
        .first(conn)?)
}

/// Writes the mutable profile fields of `user`, guarded by the version it
/// was read at.
pub fn update(conn: &mut PgConnection, user: &User) -> ModelResult<User> {
    let now: DateTime<Utc> = Utc::now();
    let result = diesel::update(
        users::table
            .filter(users::id.eq(user.id))
            .filter(users::version.eq(user.version)),
    )
    .set((
        users::name.eq(&user.name),
        users::email.eq(normalize_email(&user.email)),
        users::avatar_url.eq(&user.avatar_url),
        users::password_hash.eq(user.password_hash.as_deref()),
        users::activated.eq(user.activated),
        users::provider.eq(&user.provider),
        users::version.eq(users::version + 1),
        users::updated_at.eq(now),
    ))
    .returning(User::as_returning())
    .get_result(conn);

    match result {
        Ok(updated) => Ok(updated),
        Err(diesel::result::Error::NotFound) => Err(ModelError::EditConflict),
        Err(err) => Err(map_email_conflict(err.into())),
    }
}

pub fn delete(conn: &mut PgConnection, id: i64) -> ModelResult<()> {
    let deleted = diesel::delete(users::table.find(id)).execute(conn)?;
    if deleted == 0 {
        return Err(ModelError::NotFound);
    }
    Ok(())
}

/// Full-text search over name and e-mail, most relevant first.
pub fn search(
    conn: &mut PgConnection,
    query: &str,
    filters: &Filters,
) -> ModelResult<(Vec<UserSummary>, Meta)> {
    let sql = format!(
        "SELECT count(*) OVER() AS total_records, id, uuid, name, email, avatar_url \
         FROM users \
         WHERE search @@ plainto_tsquery('simple', $1) \
         ORDER BY ts_rank(search, plainto_tsquery('simple', $1)) DESC, {}, users.id ASC \
         LIMIT $2 OFFSET $3",
        filters.order_clause()
    );

    let rows: Vec<UserSearchRow> = diesel::sql_query(sql)
        .bind::<Text, _>(query)
        .bind::<BigInt, _>(filters.limit())
        .bind::<BigInt, _>(filters.offset())
        .load(conn)?;

    let total = rows.first().map_or(0, |row| row.total_records);
    let users = rows
        .into_iter()
        .map(|row| UserSummary {
            id: row.id,
            uuid: row.uuid,
            name: row.name,
            email: row.email,
            avatar_url: row.avatar_url,
        })
        .collect();

    Ok((users, calculate_meta(total, filters.page, filters.page_size)))
}

/// Returns the account registered under the profile's e-mail, creating an
/// activated account for the provider when none exists. The flag reports
/// whether a new account was created.
pub fn find_or_create_oauth(
    conn: &mut PgConnection,
    profile: &OAuthProfile,
) -> ModelResult<(User, bool)> {
    match get_by_email(conn, &profile.email) {
        Ok(user) => return Ok((user, false)),
        Err(ModelError::NotFound) => {}
        Err(err) => return Err(err),
    }

    let new_user = NewUser {
        name: clamp_name(&profile.name),
        email: normalize_email(&profile.email),
        password_hash: None,
        avatar_url: profile.avatar_url.clone(),
        provider: profile.provider.clone(),
        activated: true,
    };

    match insert(conn, &new_user) {
        Ok(user) => Ok((user, true)),
        // Lost a race with a concurrent first login for the same address.
        Err(ModelError::DuplicateEmail) => Ok((get_by_email(conn, &profile.email)?, false)),
        Err(err) => Err(err),
    }
}

/// Trims a provider-supplied display name and cuts it to the column limit on
/// a character boundary.
fn clamp_name(name: &str) -> String {
    let name = name.trim();
    let mut end = name.len().min(MAX_NAME_BYTES);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].trim_end().to_string()
}

fn map_email_conflict(err: ModelError) -> ModelError {
    match err.constraint() {
        Some(USERS_EMAIL_KEY) => ModelError::DuplicateEmail,
        _ => err,
    }
}
