//! In-memory fuzzy index over a snapshot of the store
//!
//! The snapshot is a disposable cache. It is rebuilt from the store only
//! when it is absent, older than its time-to-live, or when the store has
//! seen more than a fixed number of writes since it was taken. Rebuilding
//! reads the store through its own connection and swaps the new snapshot
//! in afterwards, so writers are never blocked by it.

use anyhow::Result;
use nucleo_matcher::pattern::{AtomKind, CaseMatching, Normalization, Pattern};
use nucleo_matcher::{Config, Matcher, Utf32Str};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::config::SearchConfig;
use crate::models::FileRecord;
use crate::store::Store;

/// Field weights for the combined score
const NAME_WEIGHT: f64 = 0.7;
const PATH_WEIGHT: f64 = 0.2;
const EXTENSION_WEIGHT: f64 = 0.1;

/// Characters treated as wildcards in fuzzy queries
const WILDCARDS: &[char] = &['*', '?'];

struct Snapshot {
    records: Arc<Vec<FileRecord>>,
    built_at: Instant,
    /// Store mutation count read before the rows were loaded
    mutation_mark: u64,
}

/// Why a snapshot must be rebuilt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    Fresh,
    Absent,
    Expired,
    TooManyWrites,
}

/// A fuzzy hit with its weighted score in `0.0..=1.0`
#[derive(Debug, Clone)]
pub struct FuzzyMatch {
    pub record: FileRecord,
    pub score: f64,
}

pub struct FuzzyIndex {
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    /// Serializes rebuilds so concurrent searches do not load the store twice
    rebuild: Mutex<()>,
    ttl: Duration,
    max_entries: usize,
    max_mutations: u64,
    min_score: f64,
}

impl FuzzyIndex {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            snapshot: RwLock::new(None),
            rebuild: Mutex::new(()),
            ttl: Duration::from_secs(config.fuzzy_ttl_secs),
            max_entries: config.fuzzy_max_entries,
            max_mutations: config.fuzzy_max_mutations,
            min_score: config.fuzzy_min_score,
        }
    }

    /// Current staleness against the given store
    pub fn staleness(&self, store: &Store) -> Staleness {
        match self.current() {
            Some(snapshot) => self.judge(&snapshot, store),
            None => Staleness::Absent,
        }
    }

    /// Drop the snapshot; the next search rebuilds it
    pub fn invalidate(&self) {
        *self.snapshot.write().unwrap_or_else(|p| p.into_inner()) = None;
        log::debug!("Fuzzy snapshot invalidated");
    }

    /// Number of records in the current snapshot (0 when absent)
    pub fn len(&self) -> usize {
        self.current().map(|s| s.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn current(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn judge(&self, snapshot: &Snapshot, store: &Store) -> Staleness {
        if snapshot.built_at.elapsed() > self.ttl {
            Staleness::Expired
        } else if store.mutation_count().saturating_sub(snapshot.mutation_mark) > self.max_mutations {
            Staleness::TooManyWrites
        } else {
            Staleness::Fresh
        }
    }

    /// Return a fresh snapshot, rebuilding it first if needed
    fn records(&self, store: &Store) -> Result<Arc<Vec<FileRecord>>> {
        if let Some(snapshot) = self.current() {
            if self.judge(&snapshot, store) == Staleness::Fresh {
                return Ok(Arc::clone(&snapshot.records));
            }
        }

        let _rebuilding = self.rebuild.lock().unwrap_or_else(|p| p.into_inner());

        // Another search may have rebuilt while we waited
        if let Some(snapshot) = self.current() {
            if self.judge(&snapshot, store) == Staleness::Fresh {
                return Ok(Arc::clone(&snapshot.records));
            }
        }

        let start = Instant::now();
        let mutation_mark = store.mutation_count();
        let records = Arc::new(store.all(self.max_entries)?);

        log::debug!(
            "Rebuilt fuzzy snapshot with {} records in {:?}",
            records.len(),
            start.elapsed()
        );

        let snapshot = Arc::new(Snapshot {
            records: Arc::clone(&records),
            built_at: Instant::now(),
            mutation_mark,
        });
        *self.snapshot.write().unwrap_or_else(|p| p.into_inner()) = Some(snapshot);

        Ok(records)
    }

    /// Score every snapshot record against `query`, best first
    ///
    /// Wildcards are dropped before matching; a query made only of
    /// wildcards matches every record with a score of 1.0.
    pub fn search(&self, store: &Store, query: &str) -> Result<Vec<FuzzyMatch>> {
        let records = self.records(store)?;
        let mut scorer = FuzzyScorer::new(query);

        let mut matches: Vec<FuzzyMatch> = records
            .iter()
            .filter_map(|record| {
                let score = scorer.score(record)?;
                (score >= self.min_score).then(|| FuzzyMatch {
                    record: record.clone(),
                    score,
                })
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(matches)
    }
}

/// Weighted field scorer for one query
pub struct FuzzyScorer {
    pattern: Option<Pattern>,
    matcher: Matcher,
    /// Score of the pattern against itself, used to normalize to 0..=1
    self_score: f64,
}

impl FuzzyScorer {
    pub fn new(query: &str) -> Self {
        let cleaned: String = query.chars().filter(|c| !WILDCARDS.contains(c)).collect();
        let cleaned = cleaned.trim();
        let mut matcher = Matcher::new(Config::DEFAULT.match_paths());

        if cleaned.is_empty() {
            return Self {
                pattern: None,
                matcher,
                self_score: 1.0,
            };
        }

        // Literal text: `!`, `^`, `'` and `$` are file name characters here, not query syntax
        let pattern = Pattern::new(cleaned, CaseMatching::Ignore, Normalization::Smart, AtomKind::Fuzzy);
        let self_score = score_str(&pattern, &mut matcher, &cleaned.to_lowercase())
            .map(f64::from)
            .filter(|s| *s > 0.0)
            .unwrap_or(1.0);

        Self {
            pattern: Some(pattern),
            matcher,
            self_score,
        }
    }

    /// Weighted score, or `None` when no field matches at all
    pub fn score(&mut self, record: &FileRecord) -> Option<f64> {
        let Some(pattern) = &self.pattern else {
            return Some(1.0);
        };
        let matcher = &mut self.matcher;
        let self_score = self.self_score;

        let name = normalized(pattern, matcher, &record.name, self_score);
        let path = normalized(pattern, matcher, &record.absolute_path, self_score);
        let ext = normalized(pattern, matcher, record.extension.trim_start_matches('.'), self_score);

        if name.is_none() && path.is_none() && ext.is_none() {
            return None;
        }

        Some(
            NAME_WEIGHT * name.unwrap_or(0.0)
                + PATH_WEIGHT * path.unwrap_or(0.0)
                + EXTENSION_WEIGHT * ext.unwrap_or(0.0),
        )
    }
}

fn normalized(pattern: &Pattern, matcher: &mut Matcher, haystack: &str, self_score: f64) -> Option<f64> {
    if haystack.is_empty() {
        return None;
    }
    let raw = score_str(pattern, matcher, haystack)?;
    Some((f64::from(raw) / self_score).min(1.0))
}

fn score_str(pattern: &Pattern, matcher: &mut Matcher, haystack: &str) -> Option<u32> {
    let mut buf = Vec::new();
    pattern.score(Utf32Str::new(haystack, &mut buf), matcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;
    use chrono::Utc;
    use tempfile::TempDir;

    fn record(dir: &str, name: &str) -> FileRecord {
        let extension = std::path::Path::new(name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        FileRecord {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            relative_path: ".".to_string(),
            absolute_path: format!("{}/{}", dir, name),
            category: Category::classify(&extension, false),
            extension,
            size_bytes: 10,
            modified_at: Utc::now(),
            created_at: Utc::now(),
            is_directory: false,
        }
    }

    fn store_with(temp: &TempDir, records: &[FileRecord]) -> Store {
        let store = Store::open(temp.path().join("index.db")).unwrap();
        store.upsert_batch(records).unwrap();
        store
    }

    #[test]
    fn test_scorer_prefers_name_hits() {
        let mut scorer = FuzzyScorer::new("report");
        let exact = scorer.score(&record("/docs", "report.txt")).unwrap();
        let path_only = scorer.score(&record("/report", "notes.txt")).unwrap();
        assert!(exact > path_only);
        assert!(exact <= 1.0);
        assert!(path_only <= PATH_WEIGHT + EXTENSION_WEIGHT);
    }

    #[test]
    fn test_scorer_subsequence_tolerance() {
        let mut scorer = FuzzyScorer::new("rprt");
        assert!(scorer.score(&record("/docs", "report.txt")).is_some());
        assert!(scorer.score(&record("/docs", "zzz.bin")).is_none());
    }

    #[test]
    fn test_scorer_wildcards_stripped() {
        let mut scorer = FuzzyScorer::new("rep*rt?");
        assert!(scorer.score(&record("/docs", "report.txt")).is_some());

        let mut all = FuzzyScorer::new("*");
        assert_eq!(all.score(&record("/x", "anything.bin")), Some(1.0));
    }

    #[test]
    fn test_scorer_treats_operators_literally() {
        let mut negated = FuzzyScorer::new("!important");
        assert!(negated.score(&record("/docs", "!important.txt")).is_some());
        assert!(negated.score(&record("/docs", "plain.txt")).is_none());

        let mut anchored = FuzzyScorer::new("^draft$");
        assert!(anchored.score(&record("/docs", "^draft$.md")).is_some());
        assert!(anchored.score(&record("/docs", "draft.md")).is_none());
    }

    #[test]
    fn test_search_applies_threshold_and_sorts() {
        let temp = TempDir::new().unwrap();
        let store = store_with(
            &temp,
            &[
                record("/docs", "report.txt"),
                record("/docs", "reports_2024.pdf"),
                record("/docs", "holiday.jpg"),
            ],
        );

        let index = FuzzyIndex::new(&SearchConfig::default());
        let hits = index.search(&store, "report*").unwrap();

        let names: Vec<&str> = hits.iter().map(|h| h.record.name.as_str()).collect();
        assert_eq!(names.first(), Some(&"report.txt"));
        assert!(!names.contains(&"holiday.jpg"));
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_snapshot_staleness_triggers() {
        let temp = TempDir::new().unwrap();
        let store = store_with(&temp, &[record("/docs", "a.txt")]);

        let config = SearchConfig {
            fuzzy_max_mutations: 2,
            ..Default::default()
        };
        let index = FuzzyIndex::new(&config);
        assert_eq!(index.staleness(&store), Staleness::Absent);

        index.search(&store, "a").unwrap();
        assert_eq!(index.staleness(&store), Staleness::Fresh);
        assert_eq!(index.len(), 1);

        store
            .upsert_batch(&[record("/docs", "b.txt"), record("/docs", "c.txt"), record("/docs", "d.txt")])
            .unwrap();
        assert_eq!(index.staleness(&store), Staleness::TooManyWrites);

        index.search(&store, "a").unwrap();
        assert_eq!(index.len(), 4);

        index.invalidate();
        assert_eq!(index.staleness(&store), Staleness::Absent);
    }

    #[test]
    fn test_snapshot_expires() {
        let temp = TempDir::new().unwrap();
        let store = store_with(&temp, &[record("/docs", "a.txt")]);

        let config = SearchConfig {
            fuzzy_ttl_secs: 0,
            ..Default::default()
        };
        let index = FuzzyIndex::new(&config);
        index.search(&store, "a").unwrap();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(index.staleness(&store), Staleness::Expired);
    }

    #[test]
    fn test_snapshot_bounded() {
        let temp = TempDir::new().unwrap();
        let records: Vec<FileRecord> = (0..20).map(|i| record("/d", &format!("f{}.txt", i))).collect();
        let store = store_with(&temp, &records);

        let config = SearchConfig {
            fuzzy_max_entries: 5,
            ..Default::default()
        };
        let index = FuzzyIndex::new(&config);
        index.search(&store, "f").unwrap();
        assert_eq!(index.len(), 5);
    }
}
