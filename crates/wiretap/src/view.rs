//! Read-only, filterable, redactable view over captured records.
//!
//! Filters form a closed set of variants; the variant is chosen once when the
//! view is constructed and one evaluator runs per variant. Redaction is used
//! both to sanitize fixtures before export and to neutralize volatile fields
//! before assertions.

use crate::context::Context;
use crate::snapshot::Record;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::warn;

/// Maps the existing value at a redacted path to its replacement.
pub type Redactor = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

const REDACTED_PLACEHOLDER: &str = "[redacted]";

/// Closed set of record filters.
#[derive(Clone)]
pub enum RecordFilter {
    All,
    /// Exact-string matcher, interpreted as a URL prefix. Matches against the
    /// full URL and against path-plus-query, so `/users` works as written.
    UrlPrefix(String),
    /// Regular expression applied to the request URL.
    Regex(Regex),
    /// Subset of request/response fields that must equal the record's.
    Partial(Value),
    /// Arbitrary predicate over a record.
    Predicate(Arc<dyn Fn(&Record) -> bool + Send + Sync>),
}

impl RecordFilter {
    pub fn predicate<F>(predicate: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(predicate))
    }

    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Self::All => true,
            Self::UrlPrefix(prefix) => {
                record.request.url().starts_with(prefix)
                    || record.request.path_and_query().starts_with(prefix)
            }
            Self::Regex(pattern) => pattern.is_match(&record.request.url()),
            Self::Partial(expected) => serde_json::to_value(record)
                .map(|actual| partial_match(expected, &actual))
                .unwrap_or(false),
            Self::Predicate(predicate) => predicate(record),
        }
    }
}

impl fmt::Debug for RecordFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "All"),
            Self::UrlPrefix(prefix) => f.debug_tuple("UrlPrefix").field(prefix).finish(),
            Self::Regex(pattern) => f.debug_tuple("Regex").field(&pattern.as_str()).finish(),
            Self::Partial(expected) => f.debug_tuple("Partial").field(expected).finish(),
            Self::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

impl From<&str> for RecordFilter {
    fn from(prefix: &str) -> Self {
        Self::UrlPrefix(prefix.to_string())
    }
}

impl From<String> for RecordFilter {
    fn from(prefix: String) -> Self {
        Self::UrlPrefix(prefix)
    }
}

impl From<Regex> for RecordFilter {
    fn from(pattern: Regex) -> Self {
        Self::Regex(pattern)
    }
}

impl From<Value> for RecordFilter {
    fn from(expected: Value) -> Self {
        Self::Partial(expected)
    }
}

/// Every key in `expected` must be present and equal in `actual`; objects
/// recurse, everything else compares directly.
fn partial_match(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Object(expected), Value::Object(actual)) => {
            expected.iter().all(|(key, expected_value)| {
                actual
                    .get(key)
                    .map(|actual_value| partial_match(expected_value, actual_value))
                    .unwrap_or(false)
            })
        }
        (expected, actual) => expected == actual,
    }
}

/// Filtered window over a context's completed records and loaded mocks.
pub struct FilteredView {
    context: Arc<Context>,
    filter: RecordFilter,
}

impl FilteredView {
    pub(crate) fn new(context: Arc<Context>, filter: RecordFilter) -> Self {
        Self { context, filter }
    }

    /// Completed records passing the filter, in identity order.
    pub fn intercepted(&self) -> Vec<Record> {
        self.context
            .completed_records()
            .into_iter()
            .map(|(_, record)| record)
            .filter(|record| self.filter.matches(record))
            .collect()
    }

    /// Loaded fixture records passing the filter, in position order.
    pub fn mocks(&self) -> Vec<Record> {
        self.context
            .loaded_mocks()
            .into_iter()
            .filter(|record| self.filter.matches(record))
            .collect()
    }

    /// Replace the value at `path` in every record the view currently matches.
    ///
    /// The path is dot-addressed and applied to both the request and the
    /// response side of each record; `body` segments address the payload
    /// content directly. Without a redactor the value becomes a fixed
    /// placeholder. Affected records are rebuilt and swapped into the context,
    /// so snapshots handed out earlier stay untouched and a later export is
    /// sanitized. Records added after this call are unaffected. Idempotent.
    pub fn redact(&self, path: &str, redactor: Option<Redactor>) {
        let redactor = redactor
            .unwrap_or_else(|| Arc::new(|_: &Value| Value::String(REDACTED_PLACEHOLDER.into())));
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return;
        }

        for (identity, record) in self.context.completed_records() {
            if !self.filter.matches(&record) {
                continue;
            }
            if let Some(redacted) = redact_record(&record, &segments, &redactor) {
                self.context.replace_completed(identity, redacted);
            }
        }
        for (position, record) in self.context.loaded_mocks().into_iter().enumerate() {
            if !self.filter.matches(&record) {
                continue;
            }
            if let Some(redacted) = redact_record(&record, &segments, &redactor) {
                self.context.replace_mock(position, redacted);
            }
        }
    }
}

fn redact_record(record: &Record, segments: &[&str], redactor: &Redactor) -> Option<Record> {
    let mut value = serde_json::to_value(record).ok()?;
    let mut changed = false;
    for side in ["request", "response"] {
        if let Some(target) = value.get_mut(side) {
            changed |= redact_at(target, segments, redactor);
        }
    }
    if !changed {
        return None;
    }
    match serde_json::from_value(value) {
        Ok(redacted) => Some(redacted),
        Err(error) => {
            warn!(%error, "redacted value no longer fits the record schema; skipping");
            None
        }
    }
}

fn redact_at(value: &mut Value, segments: &[&str], redactor: &Redactor) -> bool {
    let Some((segment, rest)) = segments.split_first() else {
        return false;
    };
    let Some(next) = value.get_mut(*segment) else {
        return false;
    };
    // Bodies are stored as a tagged {mode, data} object; address the payload
    // content, not the tag.
    let next = if *segment == "body" {
        match next.get_mut("data") {
            Some(data) => data,
            None => return false,
        }
    } else {
        next
    };

    if rest.is_empty() {
        let replacement = redactor(next);
        *next = replacement;
        true
    } else {
        redact_at(next, rest, redactor)
    }
}
