//! Search execution: strategy selection, post-filtering, ranking, pagination
//!
//! Every search goes through the same pipeline:
//!
//! 1. Parse operators out of the query and merge them into the caller filters
//! 2. Pick a retrieval strategy from the remaining text
//! 3. Re-apply every filter to the candidates
//! 4. Sort (newest first without text, composite relevance with text)
//! 5. Slice the requested page (in the store when no text needs scoring)
//!
//! Failures never reach the caller: they are logged and turned into an
//! empty response.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use crate::config::SearchConfig;
use crate::fuzzy::FuzzyIndex;
use crate::models::{FileRecord, SearchFilters, SearchResponse};
use crate::query;
use crate::store::{Store, StoreOrder, StoreQuery};

const EXACT_NAME_SCORE: u32 = 100;
const PREFIX_NAME_SCORE: u32 = 80;
const CONTAINS_NAME_SCORE: u32 = 60;
const PATH_BONUS: u32 = 20;
const RECENT_WEEK_BONUS: u32 = 10;
const RECENT_MONTH_BONUS: u32 = 5;
const SMALL_FILE_BONUS: u32 = 5;
const SMALL_FILE_BYTES: u64 = 1024 * 1024;

/// Characters allowed in a structured (non-fuzzy) query besides alphanumerics
const PLAIN_PUNCTUATION: &[char] = &[' ', '.', '_', '-', '/', '\\'];

/// How candidates are retrieved for a query
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Strategy {
    /// No text: filters only, newest first
    FiltersOnly,
    /// Wildcards or unusual characters: typo-tolerant in-memory index
    Fuzzy,
    /// Plain text: substring match through the store
    Structured,
}

impl Strategy {
    pub fn select(clean_text: &str) -> Self {
        if clean_text.trim().is_empty() {
            Strategy::FiltersOnly
        } else if clean_text
            .chars()
            .any(|c| !(c.is_alphanumeric() || PLAIN_PUNCTUATION.contains(&c)))
        {
            Strategy::Fuzzy
        } else {
            Strategy::Structured
        }
    }
}

/// A candidate with the keys used for ordering
struct Ranked {
    record: FileRecord,
    relevance: u32,
    fuzzy: f64,
}

pub struct SearchExecutor {
    store: Arc<Store>,
    fuzzy: FuzzyIndex,
    config: SearchConfig,
}

impl SearchExecutor {
    pub fn new(store: Arc<Store>, config: SearchConfig) -> Self {
        Self {
            fuzzy: FuzzyIndex::new(&config),
            store,
            config,
        }
    }

    pub fn default_limit(&self) -> usize {
        self.config.default_limit
    }

    pub fn fuzzy_index(&self) -> &FuzzyIndex {
        &self.fuzzy
    }

    /// Run a search; never fails
    pub fn search(&self, query: &str, filters: SearchFilters, limit: usize, offset: usize) -> SearchResponse {
        let start = Instant::now();

        match self.run(query, filters, limit, offset, start) {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Search for {:?} failed: {:#}", query, e);
                SearchResponse::empty(query, elapsed_ms(start))
            }
        }
    }

    fn run(
        &self,
        query: &str,
        filters: SearchFilters,
        limit: usize,
        offset: usize,
        start: Instant,
    ) -> Result<SearchResponse> {
        let parsed = query::parse(query);
        let Some(filters) = parsed.operators.apply_to(filters) else {
            log::debug!("Query operators contradict the filters; nothing can match");
            return Ok(SearchResponse::empty(query, elapsed_ms(start)));
        };

        let text = parsed.clean_text;
        let strategy = Strategy::select(&text);
        log::debug!("Search {:?}: strategy={}, text={:?}", query, strategy, text);

        let now = Utc::now();
        let (items, total_count) = match strategy {
            Strategy::FiltersOnly => {
                // Newest-first needs no scoring, so the store sorts, counts and pages itself
                let store_query = StoreQuery {
                    text: None,
                    filters: filters.clone(),
                    order: StoreOrder::ModifiedDesc,
                };
                let total = self.store.count_matching(&store_query)?;
                let rows = self.store.query(&store_query, Some(limit), offset)?;
                let ranked = rank(rows.into_iter().map(|r| (r, 0.0)).collect(), &filters, &text, now);
                (ranked.into_iter().map(|r| r.record).collect(), total)
            }
            Strategy::Structured | Strategy::Fuzzy => {
                let candidates = self.retrieve(strategy, &text, &filters)?;
                let ranked = rank(candidates, &filters, &text, now);
                let total = ranked.len();
                let page: Vec<FileRecord> = ranked.into_iter().skip(offset).take(limit).map(|r| r.record).collect();
                (page, total)
            }
        };

        Ok(SearchResponse {
            items,
            total_count,
            query: query.to_string(),
            execution_time_ms: elapsed_ms(start),
        })
    }

    /// Every candidate for a text query; the composite score needs the whole set
    fn retrieve(&self, strategy: Strategy, text: &str, filters: &SearchFilters) -> Result<Vec<(FileRecord, f64)>> {
        if strategy == Strategy::Fuzzy {
            let matches = self.fuzzy.search(&self.store, text)?;
            return Ok(matches.into_iter().map(|m| (m.record, m.score)).collect());
        }

        let store_query = StoreQuery {
            text: Some(text.to_string()),
            filters: filters.clone(),
            order: StoreOrder::Relevance,
        };
        let rows = self.store.query(&store_query, None, 0)?;
        log::debug!("Structured search for {:?}: {} candidate(s)", text, rows.len());
        Ok(rows.into_iter().map(|r| (r, 0.0)).collect())
    }
}

/// Post-filter and order candidates
fn rank(candidates: Vec<(FileRecord, f64)>, filters: &SearchFilters, text: &str, now: DateTime<Utc>) -> Vec<Ranked> {
    // Wildcards are not part of the name being looked for
    let needle: String = text.chars().filter(|c| *c != '*' && *c != '?').collect::<String>().trim().to_lowercase();

    let mut ranked: Vec<Ranked> = candidates
        .into_iter()
        .filter(|(record, _)| filters.matches(record))
        .map(|(record, fuzzy)| Ranked {
            relevance: if needle.is_empty() { 0 } else { relevance_score(&record, &needle, now) },
            record,
            fuzzy,
        })
        .collect();

    if text.trim().is_empty() {
        ranked.sort_by(|a, b| {
            b.record
                .modified_at
                .cmp(&a.record.modified_at)
                .then_with(|| default_order(&a.record, &b.record))
        });
    } else {
        ranked.sort_by(|a, b| {
            b.relevance
                .cmp(&a.relevance)
                .then_with(|| b.fuzzy.total_cmp(&a.fuzzy))
                .then_with(|| default_order(&a.record, &b.record))
        });
    }

    ranked
}

/// Composite relevance of a record for a lower-cased needle
///
/// An exact name hit is either the full name or the name without its extension.
pub fn relevance_score(record: &FileRecord, needle: &str, now: DateTime<Utc>) -> u32 {
    let name = record.name.to_lowercase();

    let mut score = if name == needle || record.stem_lower() == needle {
        EXACT_NAME_SCORE
    } else if name.starts_with(needle) {
        PREFIX_NAME_SCORE
    } else if name.contains(needle) {
        CONTAINS_NAME_SCORE
    } else {
        0
    };

    // The containing directory, so a name hit is not counted twice
    if record.relative_path.to_lowercase().contains(needle) {
        score += PATH_BONUS;
    }

    let age = now.signed_duration_since(record.modified_at);
    if age < Duration::days(7) {
        score += RECENT_WEEK_BONUS;
    } else if age < Duration::days(30) {
        score += RECENT_MONTH_BONUS;
    }

    if record.size_bytes < SMALL_FILE_BYTES {
        score += SMALL_FILE_BONUS;
    }

    score
}

/// Directories first, then case-insensitive name, then full path
pub fn default_order(a: &FileRecord, b: &FileRecord) -> Ordering {
    b.is_directory
        .cmp(&a.is_directory)
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.absolute_path.cmp(&b.absolute_path))
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
