//! Search query parsing
//!
//! A query string is free text mixed with `key:value` operators:
//!
//! | operator | example                          | effect                          |
//! |----------|----------------------------------|---------------------------------|
//! | `ext:`   | `ext:pdf`, `ext:jpg,png`         | restrict extensions             |
//! | `size:`  | `size:>100MB`, `size:<1GB`, `size:500KB` | lower / upper bound, or ±10% band |
//! | `date:`  | `date:today`, `date:week`        | modification time window        |
//! | `type:`  | `type:image`, `type:folder`      | restrict categories             |
//!
//! Operator keys are case-insensitive and may repeat. Recognized operators are
//! stripped from the text; anything else (including operators with values that
//! do not parse) stays in the clean text.

use chrono::{DateTime, Duration, Local, NaiveTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

use crate::models::{normalize_extension, Category, SearchFilters};

const KB: f64 = 1024.0;

/// A bare `size:` value matches within ±1/10 of itself
const SIZE_TOLERANCE_DIVISOR: u64 = 10;

static SIZE_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn size_pattern() -> Option<&'static Regex> {
    SIZE_PATTERN
        .get_or_init(|| Regex::new(r"(?i)^(>=|<=|>|<)?(\d+(?:\.\d+)?)([kmgt]?b?)$").ok())
        .as_ref()
}

/// Constraints extracted from query operators
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOperators {
    pub extensions: Vec<String>,
    pub categories: Vec<Category>,
    pub size_min: Option<u64>,
    pub size_max: Option<u64>,
    pub modified_from: Option<DateTime<Utc>>,
    pub modified_to: Option<DateTime<Utc>>,
}

impl QueryOperators {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge into caller filters; both sides must hold
    ///
    /// Lists intersect when both are set, bounds take the tighter value.
    /// Returns `None` when the lists are disjoint and nothing can match.
    pub fn apply_to(&self, filters: SearchFilters) -> Option<SearchFilters> {
        let mut filters = filters.normalized();

        filters.extensions = intersect(filters.extensions, &self.extensions)?;
        filters.categories = intersect(filters.categories, &self.categories)?;

        filters.size_min = tighter(filters.size_min, self.size_min, u64::max);
        filters.size_max = tighter(filters.size_max, self.size_max, u64::min);
        filters.modified_from = tighter(filters.modified_from, self.modified_from, DateTime::max);
        filters.modified_to = tighter(filters.modified_to, self.modified_to, DateTime::min);

        Some(filters)
    }
}

/// An empty list means "no restriction", so a disjoint pair yields `None`
fn intersect<T: PartialEq + Clone>(caller: Vec<T>, from_query: &[T]) -> Option<Vec<T>> {
    if from_query.is_empty() {
        return Some(caller);
    }
    if caller.is_empty() {
        return Some(from_query.to_vec());
    }

    let both: Vec<T> = caller.into_iter().filter(|v| from_query.contains(v)).collect();
    (!both.is_empty()).then_some(both)
}

fn tighter<T: Copy>(a: Option<T>, b: Option<T>, pick: fn(T, T) -> T) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(pick(a, b)),
        (a, None) => a,
        (None, b) => b,
    }
}

/// Result of parsing a query string
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedQuery {
    /// Text left after removing operators, whitespace collapsed
    pub clean_text: String,
    pub operators: QueryOperators,
}

/// Parse a query relative to the current time
pub fn parse(query: &str) -> ParsedQuery {
    parse_at(query, Utc::now())
}

/// Parse a query with an explicit "now" for date operators
pub fn parse_at(query: &str, now: DateTime<Utc>) -> ParsedQuery {
    let mut operators = QueryOperators::default();
    let mut kept: Vec<&str> = Vec::new();

    for token in query.split_whitespace() {
        if !apply_operator(token, now, &mut operators) {
            kept.push(token);
        }
    }

    operators.extensions.sort();
    operators.extensions.dedup();
    operators.categories.sort();
    operators.categories.dedup();

    ParsedQuery {
        clean_text: kept.join(" "),
        operators,
    }
}

/// Returns true when the token was a recognized operator
fn apply_operator(token: &str, now: DateTime<Utc>, ops: &mut QueryOperators) -> bool {
    let Some((key, value)) = token.split_once(':') else {
        return false;
    };
    if value.is_empty() {
        return false;
    }

    match key.to_ascii_lowercase().as_str() {
        "ext" => {
            let extensions: Vec<String> = value
                .split(',')
                .map(normalize_extension)
                .filter(|e| !e.is_empty())
                .collect();
            if extensions.is_empty() {
                return false;
            }
            ops.extensions.extend(extensions);
            true
        }
        "type" => {
            let categories: Option<Vec<Category>> = value.split(',').map(Category::from_alias).collect();
            match categories {
                Some(categories) if !categories.is_empty() => {
                    ops.categories.extend(categories);
                    true
                }
                _ => false,
            }
        }
        "size" => match parse_size(value) {
            Some(SizeBound::Min(min)) => {
                ops.size_min = tighter(ops.size_min, Some(min), u64::max);
                true
            }
            Some(SizeBound::Max(max)) => {
                ops.size_max = tighter(ops.size_max, Some(max), u64::min);
                true
            }
            Some(SizeBound::Around(value)) => {
                let band = value / SIZE_TOLERANCE_DIVISOR;
                let (min, max) = (value - band, value.saturating_add(band));
                ops.size_min = tighter(ops.size_min, Some(min), u64::max);
                ops.size_max = tighter(ops.size_max, Some(max), u64::min);
                true
            }
            None => false,
        },
        "date" => match date_window(value, now) {
            Some((from, to)) => {
                ops.modified_from = tighter(ops.modified_from, Some(from), DateTime::max);
                ops.modified_to = tighter(ops.modified_to, to, DateTime::min);
                true
            }
            None => false,
        },
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SizeBound {
    Min(u64),
    Max(u64),
    Around(u64),
}

/// Parse a human size such as `500KB`, `1.5g` or `2048` into bytes
pub fn parse_byte_size(value: &str) -> Option<u64> {
    match parse_size(value)? {
        SizeBound::Around(bytes) => Some(bytes),
        _ => None,
    }
}

fn parse_size(value: &str) -> Option<SizeBound> {
    let caps = size_pattern()?.captures(value.trim())?;
    let number: f64 = caps.get(2)?.as_str().parse().ok()?;
    let unit = caps.get(3).map(|m| m.as_str().to_ascii_lowercase()).unwrap_or_default();

    let multiplier = match unit.trim_end_matches('b') {
        "" => 1.0,
        "k" => KB,
        "m" => KB * KB,
        "g" => KB * KB * KB,
        "t" => KB * KB * KB * KB,
        _ => return None,
    };
    let bytes = (number * multiplier).round() as u64;

    Some(match caps.get(1).map(|m| m.as_str()) {
        Some(">") | Some(">=") => SizeBound::Min(bytes),
        Some("<") | Some("<=") => SizeBound::Max(bytes),
        _ => SizeBound::Around(bytes),
    })
}

/// `(from, to)` for a named window; `to = None` means "up to now"
fn date_window(value: &str, now: DateTime<Utc>) -> Option<(DateTime<Utc>, Option<DateTime<Utc>>)> {
    let today_start = local_midnight(now).unwrap_or(now - Duration::days(1));

    match value.to_ascii_lowercase().as_str() {
        "today" => Some((today_start, None)),
        "yesterday" => {
            let start = today_start - Duration::days(1);
            Some((start, Some(today_start - Duration::milliseconds(1))))
        }
        "week" => Some((now - Duration::days(7), None)),
        "month" => Some((now - Duration::days(30), None)),
        "year" => Some((now - Duration::days(365), None)),
        _ => None,
    }
}

/// Start of the local calendar day containing `now`
fn local_midnight(now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let local = now.with_timezone(&Local);
    local
        .date_naive()
        .and_time(NaiveTime::MIN)
        .and_local_timezone(Local)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}
