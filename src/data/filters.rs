use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::validator::Validator;

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;
pub const MAX_PAGE: i64 = 10_000_000;

/// A client-facing sort key and the SQL expression it orders by.
#[derive(Debug, Clone, Copy)]
pub struct SortKey {
    pub key: &'static str,
    pub column: &'static str,
}

/// Raw pagination parameters as they arrive in the query string.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct PageParams {
    pub page: Option<String>,
    pub page_size: Option<String>,
    pub sort: Option<String>,
}

/// Raw `[from, to)` bounds as they arrive in the query string.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RangeParams {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Filters {
    pub page: i64,
    pub page_size: i64,
    sort_column: &'static str,
    descending: bool,
}

impl Filters {
    /// Parses and validates pagination input against a sort safelist.
    ///
    /// Failures are recorded on `v`; the returned value falls back to the
    /// defaults for any field that failed, so callers must check `v.valid()`
    /// before using it.
    pub fn parse(
        params: &PageParams,
        default_sort: &str,
        safelist: &'static [SortKey],
        v: &mut Validator,
    ) -> Self {
        let page = read_int(params.page.as_deref(), "page", 1, v);
        let page_size = read_int(
            params.page_size.as_deref(),
            "page_size",
            DEFAULT_PAGE_SIZE,
            v,
        );
        let sort = params
            .sort
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(default_sort);

        v.check(page > 0, "page", "must be greater than zero");
        v.check(page <= MAX_PAGE, "page", "must be a maximum of 10 million");
        v.check(page_size > 0, "page_size", "must be greater than zero");
        v.check(page_size <= MAX_PAGE_SIZE, "page_size", "must be a maximum of 100");

        let (key, descending) = match sort.strip_prefix('-') {
            Some(key) => (key, true),
            None => (sort, false),
        };
        let column = safelist.iter().find(|entry| entry.key == key);
        v.check(column.is_some(), "sort", "invalid sort value");

        Self {
            page: page.clamp(1, MAX_PAGE),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
            sort_column: column.or(safelist.first()).map_or("id", |entry| entry.column),
            descending,
        }
    }

    pub fn sort_column(&self) -> &'static str {
        self.sort_column
    }

    pub fn sort_direction(&self) -> &'static str {
        if self.descending {
            "DESC"
        } else {
            "ASC"
        }
    }

    pub fn order_clause(&self) -> String {
        format!("{} {}", self.sort_column, self.sort_direction())
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn parse(params: &RangeParams, v: &mut Validator) -> Self {
        let from = read_timestamp(params.from.as_deref(), "from", v);
        let to = read_timestamp(params.to.as_deref(), "to", v);
        if let (Some(from), Some(to)) = (from, to) {
            v.check(from < to, "to", "must be after from");
        }
        Self { from, to }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub current_page: i64,
    pub page_size: i64,
    pub first_page: i64,
    pub last_page: i64,
    pub total_records: i64,
}

pub fn calculate_meta(total_records: i64, page: i64, page_size: i64) -> Meta {
    if total_records == 0 {
        return Meta::default();
    }

    Meta {
        current_page: page,
        page_size,
        first_page: 1,
        last_page: (total_records + page_size - 1) / page_size,
        total_records,
    }
}

fn read_int(raw: Option<&str>, field: &str, default: i64, v: &mut Validator) -> i64 {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        None => default,
        Some(value) => value.parse().unwrap_or_else(|_| {
            v.add_error(field, "must be an integer value");
            default
        }),
    }
}

fn read_timestamp(raw: Option<&str>, field: &str, v: &mut Validator) -> Option<DateTime<Utc>> {
    let value = raw.map(str::trim).filter(|value| !value.is_empty())?;
    match DateTime::parse_from_rfc3339(value) {
        Ok(parsed) => Some(parsed.with_timezone(&Utc)),
        Err(_) => {
            v.add_error(field, "must be an RFC 3339 timestamp");
            None
        }
    }
}
