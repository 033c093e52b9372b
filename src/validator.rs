use std::collections::{BTreeMap, HashSet};
use std::hash::Hash;

use once_cell::sync::Lazy;
use regex::Regex;

/// Collects field-level validation failures for a single request.
///
/// Only the first message recorded for a field is kept; later failures for
/// the same field are dropped.
#[derive(Debug, Default, Clone)]
pub struct Validator {
    errors: BTreeMap<String, String>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors
            .entry(field.into())
            .or_insert_with(|| message.into());
    }

    pub fn check(&mut self, ok: bool, field: &str, message: &str) {
        if !ok {
            self.add_error(field, message);
        }
    }

    pub fn errors(&self) -> &BTreeMap<String, String> {
        &self.errors
    }

    pub fn into_errors(self) -> BTreeMap<String, String> {
        self.errors
    }
}

pub fn permitted_value<T: PartialEq>(value: &T, permitted: &[T]) -> bool {
    permitted.contains(value)
}

pub fn unique<T: Eq + Hash>(values: &[T]) -> bool {
    let mut seen = HashSet::with_capacity(values.len());
    values.iter().all(|value| seen.insert(value))
}

pub fn matches(value: &str, rx: &Regex) -> bool {
    rx.is_match(value)
}

/// Local part of printable ASCII, `@`, then at least two dot-separated
/// hostname labels.
static EMAIL_RX: Lazy<Regex> = Lazy::new(|| {
    let label = "[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?";
    let pattern = format!(r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{{|}}~-]+@{label}(?:\.{label})+$");
    Regex::new(&pattern).expect("valid regex")
});

pub fn is_email(value: &str) -> bool {
    matches(value, &EMAIL_RX)
}
