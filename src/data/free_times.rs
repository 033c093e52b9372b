use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::sql_types::{Array, BigInt, Integer, Nullable, Text, Timestamptz, Uuid as SqlUuid};
use serde::Deserialize;
use uuid::Uuid;

use crate::data::friends;
use crate::data::users::UserSummary;
use crate::data::{calculate_meta, Filters, Meta, ModelError, ModelResult, SortKey, TimeRange};
use crate::models::{
    FreeTime, NewFreeTime, NewFreeTimeViewer, VISIBILITY_PRIVATE, VISIBILITY_PUBLIC,
};
use crate::schema::{free_time_viewers, free_times};
use crate::validator::{self, Validator};

pub const VIEWERS_USER_FKEY: &str = "free_time_viewers_user_id_fkey";
pub const MAX_TAGS: usize = 20;

pub static SORT_SAFELIST: &[SortKey] = &[
    SortKey {
        key: "start_time",
        column: "free_times.start_time",
    },
    SortKey {
        key: "end_time",
        column: "free_times.end_time",
    },
    SortKey {
        key: "id",
        column: "free_times.id",
    },
    SortKey {
        key: "created_at",
        column: "free_times.created_at",
    },
];

const WINDOW_COLUMNS: &str = "count(*) OVER() AS total_records, \
    free_times.id, free_times.user_id, free_times.start_time, free_times.end_time, \
    free_times.created_at, free_times.updated_at, free_times.tags, free_times.visibility, \
    free_times.version";

/// A window as seen by one of the owner's friends.
#[derive(Debug, Clone, PartialEq)]
pub struct FriendFreeTime {
    pub free_time: FreeTime,
    pub owner: UserSummary,
}

/// Partial update of a window. Absent fields keep their stored value.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct FreeTimePatch {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub tags: Option<Vec<String>>,
    pub visibility: Option<String>,
    pub version: Option<i32>,
}

impl FreeTimePatch {
    /// Merges the patch into `window`. A client-supplied version that no
    /// longer matches the stored one is an edit conflict.
    pub fn apply(self, window: &mut FreeTime) -> ModelResult<()> {
        if self.version.is_some_and(|version| version != window.version) {
            return Err(ModelError::EditConflict);
        }
        if let Some(start_time) = self.start_time {
            window.start_time = start_time;
        }
        if let Some(end_time) = self.end_time {
            window.end_time = end_time;
        }
        if let Some(tags) = self.tags {
            window.tags = tags;
        }
        if let Some(visibility) = self.visibility {
            window.visibility = visibility;
        }
        Ok(())
    }
}

impl From<&FreeTime> for NewFreeTime {
    fn from(window: &FreeTime) -> Self {
        Self {
            user_id: window.user_id,
            start_time: window.start_time,
            end_time: window.end_time,
            tags: window.tags.clone(),
            visibility: window.visibility.clone(),
        }
    }
}

#[derive(QueryableByName)]
struct FreeTimeRow {
    #[diesel(sql_type = BigInt)]
    total_records: i64,
    #[diesel(sql_type = BigInt)]
    id: i64,
    #[diesel(sql_type = BigInt)]
    user_id: i64,
    #[diesel(sql_type = Timestamptz)]
    start_time: DateTime<Utc>,
    #[diesel(sql_type = Timestamptz)]
    end_time: DateTime<Utc>,
    #[diesel(sql_type = Timestamptz)]
    created_at: DateTime<Utc>,
    #[diesel(sql_type = Timestamptz)]
    updated_at: DateTime<Utc>,
    #[diesel(sql_type = Array<Text>)]
    tags: Vec<String>,
    #[diesel(sql_type = Text)]
    visibility: String,
    #[diesel(sql_type = Integer)]
    version: i32,
}

impl From<FreeTimeRow> for FreeTime {
    fn from(row: FreeTimeRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            start_time: row.start_time,
            end_time: row.end_time,
            created_at: row.created_at,
            updated_at: row.updated_at,
            tags: row.tags,
            visibility: row.visibility,
            version: row.version,
        }
    }
}

#[derive(QueryableByName)]
struct FriendFreeTimeRow {
    #[diesel(embed)]
    window: FreeTimeRow,
    #[diesel(sql_type = SqlUuid)]
    owner_uuid: Uuid,
    #[diesel(sql_type = Text)]
    owner_name: String,
    #[diesel(sql_type = Text)]
    owner_email: String,
    #[diesel(sql_type = Text)]
    owner_avatar_url: String,
}

impl From<FriendFreeTimeRow> for FriendFreeTime {
    fn from(row: FriendFreeTimeRow) -> Self {
        let owner = UserSummary {
            id: row.window.user_id,
            uuid: row.owner_uuid,
            name: row.owner_name,
            email: row.owner_email,
            avatar_url: row.owner_avatar_url,
        };
        Self {
            free_time: row.window.into(),
            owner,
        }
    }
}

/// Validates a window about to be written. `viewers` are the explicit grants
/// requested alongside it; pass an empty slice when grants are unchanged.
pub fn validate_free_time(
    v: &mut Validator,
    window: &NewFreeTime,
    viewers: &[i64],
    now: DateTime<Utc>,
) {
    v.check(window.user_id > 0, "user_id", "must be valid");
    v.check(window.start_time > now, "start_time", "must be in the future");
    v.check(
        window.start_time < window.end_time,
        "end_time",
        "must be after start time",
    );
    v.check(
        validator::permitted_value(
            &window.visibility.as_str(),
            &[VISIBILITY_PUBLIC, VISIBILITY_PRIVATE],
        ),
        "visibility",
        "must be either public or private",
    );

    v.check(
        window.tags.iter().all(|tag| !tag.trim().is_empty()),
        "tags",
        "must not contain empty values",
    );
    v.check(
        validator::unique(&window.tags),
        "tags",
        "must not contain duplicate values",
    );
    v.check(
        window.tags.len() <= MAX_TAGS,
        "tags",
        "must not contain more than 20 entries",
    );

    if !viewers.is_empty() {
        v.check(
            window.visibility == VISIBILITY_PRIVATE,
            "viewers",
            "are only allowed on private free time",
        );
        v.check(
            !viewers.contains(&window.user_id),
            "viewers",
            "must not include the owner",
        );
        v.check(viewers.iter().all(|id| *id > 0), "viewers", "must be valid");
        v.check(
            validator::unique(viewers),
            "viewers",
            "must not contain duplicate values",
        );
    }
}

/// Inserts a window and its viewer grants in one transaction.
pub fn create(
    conn: &mut PgConnection,
    window: &NewFreeTime,
    viewers: &[i64],
) -> ModelResult<FreeTime> {
    conn.transaction(|conn| {
        let created = diesel::insert_into(free_times::table)
            .values(window)
            .returning(FreeTime::as_returning())
            .get_result(conn)?;

        if !viewers.is_empty() {
            let grants: Vec<NewFreeTimeViewer> = viewers
                .iter()
                .map(|user_id| NewFreeTimeViewer {
                    free_time_id: created.id,
                    user_id: *user_id,
                })
                .collect();
            diesel::insert_into(free_time_viewers::table)
                .values(&grants)
                .execute(conn)?;
        }

        Ok(created)
    })
}

pub fn get(conn: &mut PgConnection, id: i64) -> ModelResult<FreeTime> {
    Ok(free_times::table
        .find(id)
        .select(FreeTime::as_select())
        .first(conn)?)
}

/// Loads a window only if `owner_id` owns it; anything else is `NotFound`.
pub fn get_owned(conn: &mut PgConnection, id: i64, owner_id: i64) -> ModelResult<FreeTime> {
    let window = get(conn, id)?;
    if window.user_id != owner_id {
        return Err(ModelError::NotFound);
    }
    Ok(window)
}

pub fn viewers(conn: &mut PgConnection, free_time_id: i64) -> ModelResult<Vec<i64>> {
    Ok(free_time_viewers::table
        .filter(free_time_viewers::free_time_id.eq(free_time_id))
        .select(free_time_viewers::user_id)
        .order(free_time_viewers::user_id.asc())
        .load(conn)?)
}

/// Writes the mutable fields of `window`, guarded by the version it was read
/// at. A window that ends up public loses its viewer grants in the same
/// transaction.
pub fn update(conn: &mut PgConnection, window: &FreeTime) -> ModelResult<FreeTime> {
    conn.transaction(|conn| {
        let result = diesel::update(
            free_times::table
                .filter(free_times::id.eq(window.id))
                .filter(free_times::version.eq(window.version)),
        )
        .set((
            free_times::start_time.eq(window.start_time),
            free_times::end_time.eq(window.end_time),
            free_times::tags.eq(&window.tags),
            free_times::visibility.eq(&window.visibility),
            free_times::updated_at.eq(Utc::now()),
            free_times::version.eq(free_times::version + 1),
        ))
        .returning(FreeTime::as_returning())
        .get_result(conn);

        let updated = match result {
            Ok(updated) => updated,
            Err(diesel::result::Error::NotFound) => return Err(ModelError::EditConflict),
            Err(err) => return Err(err.into()),
        };

        if updated.visibility == VISIBILITY_PUBLIC {
            diesel::delete(
                free_time_viewers::table
                    .filter(free_time_viewers::free_time_id.eq(updated.id)),
            )
            .execute(conn)?;
        }

        Ok(updated)
    })
}

pub fn delete(conn: &mut PgConnection, window: &FreeTime) -> ModelResult<()> {
    let deleted = diesel::delete(
        free_times::table
            .filter(free_times::id.eq(window.id))
            .filter(free_times::version.eq(window.version)),
    )
    .execute(conn)?;

    if deleted == 0 {
        return Err(ModelError::EditConflict);
    }
    Ok(())
}

/// The owner's own windows, optionally bounded to `start_time` in
/// `[from, to)`.
pub fn list_own(
    conn: &mut PgConnection,
    owner_id: i64,
    filters: &Filters,
    range: &TimeRange,
) -> ModelResult<(Vec<FreeTime>, Meta)> {
    let sql = format!(
        "SELECT {WINDOW_COLUMNS} \
         FROM free_times \
         WHERE free_times.user_id = $1 \
            AND ($2::timestamptz IS NULL OR free_times.start_time >= $2) \
            AND ($3::timestamptz IS NULL OR free_times.start_time < $3) \
         ORDER BY {}, free_times.id ASC \
         LIMIT $4 OFFSET $5",
        filters.order_clause()
    );

    let rows: Vec<FreeTimeRow> = diesel::sql_query(sql)
        .bind::<BigInt, _>(owner_id)
        .bind::<Nullable<Timestamptz>, _>(range.from)
        .bind::<Nullable<Timestamptz>, _>(range.to)
        .bind::<BigInt, _>(filters.limit())
        .bind::<BigInt, _>(filters.offset())
        .load(conn)?;

    let total = rows.first().map_or(0, |row| row.total_records);
    let windows = rows.into_iter().map(FreeTime::from).collect();
    Ok((windows, calculate_meta(total, filters.page, filters.page_size)))
}

/// Windows of every accepted friend of `viewer_id` that the viewer may see:
/// public ones plus private ones carrying an explicit grant.
pub fn list_for_friends(
    conn: &mut PgConnection,
    viewer_id: i64,
    filters: &Filters,
    range: &TimeRange,
) -> ModelResult<(Vec<FriendFreeTime>, Meta)> {
    load_visible(conn, viewer_id, None, filters, range)
}

/// Same as [`list_for_friends`] restricted to one friend. `NotFound` unless
/// the two users are accepted friends.
pub fn list_for_friend(
    conn: &mut PgConnection,
    viewer_id: i64,
    friend_id: i64,
    filters: &Filters,
    range: &TimeRange,
) -> ModelResult<(Vec<FriendFreeTime>, Meta)> {
    friends::get_friendship(conn, viewer_id, friend_id)?;
    load_visible(conn, viewer_id, Some(friend_id), filters, range)
}

fn load_visible(
    conn: &mut PgConnection,
    viewer_id: i64,
    owner_id: Option<i64>,
    filters: &Filters,
    range: &TimeRange,
) -> ModelResult<(Vec<FriendFreeTime>, Meta)> {
    let sql = format!(
        "SELECT {WINDOW_COLUMNS}, \
            users.uuid AS owner_uuid, users.name AS owner_name, \
            users.email AS owner_email, users.avatar_url AS owner_avatar_url \
         FROM free_times \
         INNER JOIN users ON users.id = free_times.user_id \
         INNER JOIN friends ON friends.status = 'accepted' AND ( \
            (friends.source_user_id = $1 AND friends.destination_user_id = free_times.user_id) \
            OR (friends.destination_user_id = $1 AND friends.source_user_id = free_times.user_id)) \
         WHERE (free_times.visibility = 'public' OR EXISTS ( \
                SELECT 1 FROM free_time_viewers \
                WHERE free_time_viewers.free_time_id = free_times.id \
                    AND free_time_viewers.user_id = $1)) \
            AND ($2::bigint IS NULL OR free_times.user_id = $2) \
            AND ($3::timestamptz IS NULL OR free_times.start_time >= $3) \
            AND ($4::timestamptz IS NULL OR free_times.start_time < $4) \
         ORDER BY {}, free_times.id ASC \
         LIMIT $5 OFFSET $6",
        filters.order_clause()
    );

    let rows: Vec<FriendFreeTimeRow> = diesel::sql_query(sql)
        .bind::<BigInt, _>(viewer_id)
        .bind::<Nullable<BigInt>, _>(owner_id)
        .bind::<Nullable<Timestamptz>, _>(range.from)
        .bind::<Nullable<Timestamptz>, _>(range.to)
        .bind::<BigInt, _>(filters.limit())
        .bind::<BigInt, _>(filters.offset())
        .load(conn)?;

    let total = rows.first().map_or(0, |row| row.window.total_records);
    let windows = rows.into_iter().map(FriendFreeTime::from).collect();
    Ok((windows, calculate_meta(total, filters.page, filters.page_size)))
}
