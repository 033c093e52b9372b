use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Integer, Text, Timestamptz, Uuid as SqlUuid};
use serde::Serialize;
use uuid::Uuid;

use crate::data::users::UserSummary;
use crate::data::{calculate_meta, Filters, Meta, ModelError, ModelResult, SortKey};
use crate::models::{FriendPair, NewFriendPair, STATUS_ACCEPTED, STATUS_PENDING};
use crate::schema::friends;
use crate::validator::Validator;

pub const UNIQUE_FRIENDSHIP_PAIR: &str = "unique_friendship_pair";
const MISSING_USER_CONSTRAINTS: &[&str] = &[
    "friends_source_user_id_fkey",
    "friends_destination_user_id_fkey",
];

pub static SORT_SAFELIST: &[SortKey] = &[
    SortKey {
        key: "id",
        column: "friends.id",
    },
    SortKey {
        key: "created_at",
        column: "friends.created_at",
    },
    SortKey {
        key: "updated_at",
        column: "friends.updated_at",
    },
    SortKey {
        key: "name",
        column: "users.name",
    },
];

const ENTRY_COLUMNS: &str = "count(*) OVER() AS total_records, \
    friends.id AS pair_id, friends.status, friends.created_at, friends.updated_at, \
    friends.version, \
    users.id AS user_id, users.uuid AS user_uuid, users.name AS user_name, \
    users.email AS user_email, users.avatar_url AS user_avatar_url";

/// The other side of the caller's pair, plus the pair's own state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FriendEntry {
    pub request_id: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i32,
    pub user: UserSummary,
}

#[derive(QueryableByName)]
struct FriendEntryRow {
    #[diesel(sql_type = BigInt)]
    total_records: i64,
    #[diesel(sql_type = BigInt)]
    pair_id: i64,
    #[diesel(sql_type = Text)]
    status: String,
    #[diesel(sql_type = Timestamptz)]
    created_at: DateTime<Utc>,
    #[diesel(sql_type = Timestamptz)]
    updated_at: DateTime<Utc>,
    #[diesel(sql_type = Integer)]
    version: i32,
    #[diesel(sql_type = BigInt)]
    user_id: i64,
    #[diesel(sql_type = SqlUuid)]
    user_uuid: Uuid,
    #[diesel(sql_type = Text)]
    user_name: String,
    #[diesel(sql_type = Text)]
    user_email: String,
    #[diesel(sql_type = Text)]
    user_avatar_url: String,
}

impl From<FriendEntryRow> for FriendEntry {
    fn from(row: FriendEntryRow) -> Self {
        Self {
            request_id: row.pair_id,
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
            user: UserSummary {
                id: row.user_id,
                uuid: row.user_uuid,
                name: row.user_name,
                email: row.user_email,
                avatar_url: row.user_avatar_url,
            },
        }
    }
}

pub fn validate_friend_pair(v: &mut Validator, pair: &NewFriendPair) {
    v.check(pair.source_user_id > 0, "source_user_id", "must be valid");
    v.check(
        pair.destination_user_id > 0,
        "destination_user_id",
        "must be valid",
    );
    v.check(
        pair.source_user_id != pair.destination_user_id,
        "destination_user_id",
        "cannot send friend request to self",
    );
    v.check(pair.status == STATUS_PENDING, "status", "must be pending");
}

pub fn new_request(source_user_id: i64, destination_user_id: i64) -> NewFriendPair {
    NewFriendPair {
        source_user_id,
        destination_user_id,
        status: STATUS_PENDING.to_string(),
    }
}

/// Inserts a pending request. A row for the same unordered pair, in either
/// direction and in any state, makes this fail with `DuplicateFriendRequest`.
pub fn send_request(conn: &mut PgConnection, request: &NewFriendPair) -> ModelResult<FriendPair> {
    diesel::insert_into(friends::table)
        .values(request)
        .returning(FriendPair::as_returning())
        .get_result(conn)
        .map_err(|err| match ModelError::from(err) {
            err if err.constraint() == Some(UNIQUE_FRIENDSHIP_PAIR) => {
                ModelError::DuplicateFriendRequest
            }
            err if err
                .constraint()
                .is_some_and(|name| MISSING_USER_CONSTRAINTS.contains(&name)) =>
            {
                ModelError::NotFound
            }
            err => err,
        })
}

pub fn get_request(conn: &mut PgConnection, id: i64) -> ModelResult<FriendPair> {
    Ok(friends::table
        .find(id)
        .select(FriendPair::as_select())
        .first(conn)?)
}

/// Accepts a pending request on behalf of its recipient.
///
/// Anyone other than the destination user gets `NotFound`, the same as for a
/// request that does not exist.
pub fn accept(
    conn: &mut PgConnection,
    request_id: i64,
    acting_user_id: i64,
) -> ModelResult<FriendPair> {
    let pair = get_request(conn, request_id)?;
    if !pair.is_pending() || pair.destination_user_id != acting_user_id {
        return Err(ModelError::NotFound);
    }
    accept_pair(conn, &pair)
}

/// Flips `pair` to accepted if it is still pending at the version it was
/// read at.
pub fn accept_pair(conn: &mut PgConnection, pair: &FriendPair) -> ModelResult<FriendPair> {
    let now = Utc::now();
    let result = diesel::update(
        friends::table
            .filter(friends::id.eq(pair.id))
            .filter(friends::version.eq(pair.version))
            .filter(friends::status.eq(STATUS_PENDING)),
    )
    .set((
        friends::status.eq(STATUS_ACCEPTED),
        friends::updated_at.eq(now),
        friends::version.eq(friends::version + 1),
    ))
    .returning(FriendPair::as_returning())
    .get_result(conn);

    match result {
        Ok(updated) => Ok(updated),
        Err(diesel::result::Error::NotFound) => Err(ModelError::EditConflict),
        Err(err) => Err(err.into()),
    }
}

/// Rejects, cancels or unfriends: deletes the pair if the acting user is one
/// of its two participants.
pub fn remove(
    conn: &mut PgConnection,
    request_id: i64,
    acting_user_id: i64,
) -> ModelResult<FriendPair> {
    let pair = get_request(conn, request_id)?;
    if !pair.involves(acting_user_id) {
        return Err(ModelError::NotFound);
    }
    delete_pair(conn, &pair)?;
    Ok(pair)
}

pub fn delete_pair(conn: &mut PgConnection, pair: &FriendPair) -> ModelResult<()> {
    let deleted = diesel::delete(
        friends::table
            .filter(friends::id.eq(pair.id))
            .filter(friends::version.eq(pair.version)),
    )
    .execute(conn)?;

    if deleted == 0 {
        return Err(ModelError::EditConflict);
    }
    Ok(())
}

/// Looks up the accepted friendship between two users, in either direction.
pub fn get_friendship(
    conn: &mut PgConnection,
    user_id: i64,
    friend_id: i64,
) -> ModelResult<FriendPair> {
    Ok(friends::table
        .filter(
            friends::source_user_id
                .eq(user_id)
                .and(friends::destination_user_id.eq(friend_id))
                .or(friends::source_user_id
                    .eq(friend_id)
                    .and(friends::destination_user_id.eq(user_id))),
        )
        .filter(friends::status.eq(STATUS_ACCEPTED))
        .select(FriendPair::as_select())
        .first(conn)?)
}

pub fn unfriend_user(
    conn: &mut PgConnection,
    user_id: i64,
    friend_id: i64,
) -> ModelResult<FriendPair> {
    let pair = get_friendship(conn, user_id, friend_id)?;
    delete_pair(conn, &pair)?;
    Ok(pair)
}

pub fn list_friends(
    conn: &mut PgConnection,
    user_id: i64,
    filters: &Filters,
) -> ModelResult<(Vec<FriendEntry>, Meta)> {
    list_entries(
        conn,
        user_id,
        "CASE WHEN friends.source_user_id = $1 \
         THEN friends.destination_user_id ELSE friends.source_user_id END",
        "(friends.source_user_id = $1 OR friends.destination_user_id = $1) \
         AND friends.status = 'accepted'",
        filters,
    )
}

pub fn list_sent(
    conn: &mut PgConnection,
    user_id: i64,
    filters: &Filters,
) -> ModelResult<(Vec<FriendEntry>, Meta)> {
    list_entries(
        conn,
        user_id,
        "friends.destination_user_id",
        "friends.source_user_id = $1 AND friends.status = 'pending'",
        filters,
    )
}

pub fn list_received(
    conn: &mut PgConnection,
    user_id: i64,
    filters: &Filters,
) -> ModelResult<(Vec<FriendEntry>, Meta)> {
    list_entries(
        conn,
        user_id,
        "friends.source_user_id",
        "friends.destination_user_id = $1 AND friends.status = 'pending'",
        filters,
    )
}

/// Accepted friends whose name or e-mail matches `query`, most relevant
/// first and then by the requested sort key.
pub fn search_friends(
    conn: &mut PgConnection,
    user_id: i64,
    query: &str,
    filters: &Filters,
) -> ModelResult<(Vec<FriendEntry>, Meta)> {
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} \
         FROM friends \
         INNER JOIN users ON users.id = CASE WHEN friends.source_user_id = $1 \
            THEN friends.destination_user_id ELSE friends.source_user_id END \
         WHERE (friends.source_user_id = $1 OR friends.destination_user_id = $1) \
            AND friends.status = 'accepted' \
            AND users.search @@ plainto_tsquery('simple', $2) \
         ORDER BY ts_rank(users.search, plainto_tsquery('simple', $2)) DESC, {}, users.id ASC \
         LIMIT $3 OFFSET $4",
        filters.order_clause()
    );

    let rows: Vec<FriendEntryRow> = diesel::sql_query(sql)
        .bind::<BigInt, _>(user_id)
        .bind::<Text, _>(query)
        .bind::<BigInt, _>(filters.limit())
        .bind::<BigInt, _>(filters.offset())
        .load(conn)?;

    Ok(into_page(rows, filters))
}

fn list_entries(
    conn: &mut PgConnection,
    user_id: i64,
    counterpart: &str,
    condition: &str,
    filters: &Filters,
) -> ModelResult<(Vec<FriendEntry>, Meta)> {
    let sql = format!(
        "SELECT {ENTRY_COLUMNS} \
         FROM friends \
         INNER JOIN users ON users.id = {counterpart} \
         WHERE {condition} \
         ORDER BY {}, users.id ASC \
         LIMIT $2 OFFSET $3",
        filters.order_clause()
    );

    let rows: Vec<FriendEntryRow> = diesel::sql_query(sql)
        .bind::<BigInt, _>(user_id)
        .bind::<BigInt, _>(filters.limit())
        .bind::<BigInt, _>(filters.offset())
        .load(conn)?;

    Ok(into_page(rows, filters))
}

fn into_page(rows: Vec<FriendEntryRow>, filters: &Filters) -> (Vec<FriendEntry>, Meta) {
    let total = rows.first().map_or(0, |row| row.total_records);
    let entries = rows.into_iter().map(FriendEntry::from).collect();
    (entries, calculate_meta(total, filters.page, filters.page_size))
}
