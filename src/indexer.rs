//! Directory scanner and indexing session
//!
//! A full index run clears the store, walks every root, and streams
//! fixed-size batches of records into the store as soon as they fill.
//! Within a directory, files are emitted before subdirectories are
//! descended into. A cancellation flag is checked before every entry and
//! before every batch write, so `stop_indexing` halts the walk promptly.

use anyhow::Result;
use std::cmp::Ordering as CmpOrdering;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use walkdir::{DirEntry, WalkDir};

use crate::config::IndexConfig;
use crate::error::FsErrorKind;
use crate::events::{EngineEvent, EventBus};
use crate::exclusion::{is_hidden_name, ExclusionFilter};
use crate::metadata;
use crate::models::{FileRecord, IndexingProgress, IndexingState};
use crate::store::Store;

/// Shared cancellation flag for one index run
pub type CancelFlag = Arc<AtomicBool>;

/// Percent reported until the run is finalized
const MAX_RUNNING_PERCENT: f64 = 95.0;

/// Entries at which a root is considered "half done" for progress estimation
const PROGRESS_HALF_POINT: f64 = 5_000.0;

/// The single, ephemeral indexing session owned by the engine
#[derive(Debug, Default)]
pub struct IndexingSession {
    pub state: IndexingState,
    pub files_processed: u64,
    pub percent: u8,
    pub current_path: Option<String>,
    cancel: Option<CancelFlag>,
}

impl IndexingSession {
    /// Start a fresh session bound to `cancel`
    pub fn running(cancel: CancelFlag) -> Self {
        Self {
            state: IndexingState::Running,
            cancel: Some(cancel),
            ..Default::default()
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, IndexingState::Running | IndexingState::Completing)
    }

    /// True when this session belongs to the run holding `cancel`
    pub fn owned_by(&self, cancel: &CancelFlag) -> bool {
        self.cancel.as_ref().is_some_and(|c| Arc::ptr_eq(c, cancel))
    }

    /// Request cancellation and reset to Idle
    pub fn cancel(&mut self) {
        if let Some(flag) = self.cancel.take() {
            flag.store(true, Ordering::SeqCst);
        }
        *self = Self::default();
    }

    pub fn progress(&self) -> IndexingProgress {
        IndexingProgress {
            is_indexing: self.is_active(),
            files_processed: self.files_processed,
            progress: self.percent,
            current_path: self.current_path.clone(),
        }
    }
}

/// Receives the scanner's output
pub trait ScanSink {
    /// Persist one full batch
    fn flush(&mut self, batch: Vec<FileRecord>);

    /// Called every `yield_every` entries with the running count for this root
    fn progress(&mut self, processed_in_root: u64, current: &Path);
}

/// Outcome of scanning one root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanSummary {
    pub processed: u64,
    pub cancelled: bool,
}

/// Recursive walker producing batches of records
pub struct Scanner<'a> {
    filter: &'a ExclusionFilter,
    cancel: &'a AtomicBool,
    batch_size: usize,
    yield_every: usize,
}

impl<'a> Scanner<'a> {
    pub fn new(filter: &'a ExclusionFilter, cancel: &'a AtomicBool, config: &IndexConfig) -> Self {
        Self {
            filter,
            cancel,
            batch_size: config.batch_size.max(1),
            yield_every: config.yield_every.max(1),
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Walk one root, handing full batches and progress ticks to `sink`
    pub fn scan(&self, root: &Path, sink: &mut dyn ScanSink) -> ScanSummary {
        log::info!("Scanning {:?}", root);
        self.scan_from(root, root, sink)
    }

    /// Walk the entries below `start`, a directory inside `root`
    ///
    /// Records keep paths relative to `root`, and exclusion is judged below it.
    pub fn scan_from(&self, root: &Path, start: &Path, sink: &mut dyn ScanSink) -> ScanSummary {
        let walker = WalkDir::new(start)
            .min_depth(1)
            .max_depth(self.filter.max_depth())
            .follow_links(false)
            .sort_by(files_first)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !self.should_skip(root, entry));

        let mut batch = Vec::with_capacity(self.batch_size);
        let mut processed = 0u64;

        for entry in walker {
            if self.cancelled() {
                log::debug!("Scan of {:?} cancelled after {} entries", root, processed);
                return ScanSummary {
                    processed,
                    cancelled: true,
                };
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    report_walk_error(&err);
                    continue;
                }
            };

            if entry.file_type().is_symlink() {
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    report_walk_error(&err);
                    continue;
                }
            };

            batch.push(metadata::extract(entry.path(), root, &metadata));
            processed += 1;

            if batch.len() >= self.batch_size {
                if self.cancelled() {
                    continue;
                }
                sink.flush(std::mem::replace(&mut batch, Vec::with_capacity(self.batch_size)));
            }

            if processed % self.yield_every as u64 == 0 {
                sink.progress(processed, entry.path());
                // Let watcher and query threads in between long runs of stats
                std::thread::yield_now();
            }
        }

        if self.cancelled() {
            return ScanSummary {
                processed,
                cancelled: true,
            };
        }

        if !batch.is_empty() {
            sink.flush(batch);
        }

        ScanSummary {
            processed,
            cancelled: false,
        }
    }

    fn should_skip(&self, root: &Path, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        if is_hidden_name(&name) {
            return true;
        }
        self.filter.is_excluded_within(root, entry.path())
    }
}

/// Files sort before directories; each group by name
fn files_first(a: &DirEntry, b: &DirEntry) -> CmpOrdering {
    a.file_type()
        .is_dir()
        .cmp(&b.file_type().is_dir())
        .then_with(|| a.file_name().cmp(b.file_name()))
}

fn report_walk_error(err: &walkdir::Error) {
    let path = err.path().map(|p| p.display().to_string()).unwrap_or_default();
    match err.io_error().map(FsErrorKind::classify) {
        Some(kind) if kind.is_silent() => {
            log::trace!("Skipping {} ({:?})", path, kind);
        }
        _ => {
            log::warn!("Skipping {}: {}", path, err);
        }
    }
}

/// Everything a background index run needs, moved onto its worker thread
pub struct IndexingRun {
    pub store: Arc<Store>,
    pub events: Arc<EventBus>,
    pub session: Arc<Mutex<IndexingSession>>,
    /// Held around "check cancel + write batch" and by `stop_indexing`
    pub write_gate: Arc<Mutex<()>>,
    pub cancel: CancelFlag,
    pub roots: Vec<PathBuf>,
    pub filter: ExclusionFilter,
    pub config: IndexConfig,
}

impl IndexingRun {
    /// Execute the run to completion, failure, or cancellation
    pub fn run(self) {
        let start = Instant::now();

        // Never leave the session stuck in Running if this thread panics
        let session = Arc::clone(&self.session);
        let cancel = Arc::clone(&self.cancel);
        let _guard = scopeguard::guard((), move |_| {
            let mut session = lock(&session);
            if session.owned_by(&cancel) && session.is_active() {
                log::warn!("Indexing worker exited unexpectedly");
                session.state = IndexingState::Failed;
                session.cancel = None;
            }
        });

        match self.run_internal(start) {
            Ok(true) => log::info!("Indexing finished in {:.2}s", start.elapsed().as_secs_f64()),
            Ok(false) => log::info!("Indexing cancelled after {:.2}s", start.elapsed().as_secs_f64()),
            Err(e) => {
                log::error!("Indexing failed: {:#}", e);
                self.events.emit(EngineEvent::Error {
                    message: format!("Indexing failed: {:#}", e),
                });
                let mut session = lock(&self.session);
                if session.owned_by(&self.cancel) {
                    session.state = IndexingState::Failed;
                    session.cancel = None;
                }
            }
        }
    }

    /// Returns Ok(false) when cancelled
    fn run_internal(&self, start: Instant) -> Result<bool> {
        {
            let _gate = lock(&self.write_gate);
            if self.cancel.load(Ordering::SeqCst) {
                return Ok(false);
            }
            self.store.clear()?;
        }

        let scanner = Scanner::new(&self.filter, &self.cancel, &self.config);
        let mut total = 0u64;

        for (index, root) in self.roots.iter().enumerate() {
            let mut sink = RunSink {
                run: self,
                root_index: index,
                processed_before: total,
            };

            let summary = scanner.scan(root, &mut sink);
            total += summary.processed;

            if summary.cancelled || self.cancel.load(Ordering::SeqCst) {
                return Ok(false);
            }
        }

        {
            let mut session = lock(&self.session);
            if !session.owned_by(&self.cancel) {
                return Ok(false);
            }
            session.state = IndexingState::Completing;
            session.files_processed = total;
        }

        if let Err(e) = self.store.set_last_indexed(chrono::Utc::now()) {
            log::warn!("Failed to record index time: {:#}", e);
        }

        self.events.emit(EngineEvent::Progress(IndexingProgress {
            is_indexing: false,
            files_processed: total,
            progress: 100,
            current_path: None,
        }));
        self.events.emit(EngineEvent::Complete {
            files_processed: total,
            duration_ms: start.elapsed().as_millis() as u64,
        });

        let mut session = lock(&self.session);
        if session.owned_by(&self.cancel) {
            *session = IndexingSession {
                files_processed: total,
                percent: 100,
                ..Default::default()
            };
        }

        Ok(true)
    }
}

/// Bridges scanner output to the store, the session and the event bus
struct RunSink<'r> {
    run: &'r IndexingRun,
    root_index: usize,
    processed_before: u64,
}

impl ScanSink for RunSink<'_> {
    fn flush(&mut self, batch: Vec<FileRecord>) {
        let _gate = lock(&self.run.write_gate);
        if self.run.cancel.load(Ordering::SeqCst) {
            return;
        }

        // A failed batch is rolled back; report it and keep scanning
        if let Err(e) = self.run.store.upsert_batch(&batch) {
            log::error!("Failed to write batch of {} records: {:#}", batch.len(), e);
            self.run.events.emit(EngineEvent::Error {
                message: format!("Failed to write {} records: {:#}", batch.len(), e),
            });
        }
    }

    fn progress(&mut self, processed_in_root: u64, current: &Path) {
        let percent = estimate_percent(self.root_index, self.run.roots.len(), processed_in_root);
        let progress = {
            let mut session = lock(&self.run.session);
            if !session.owned_by(&self.run.cancel) {
                return;
            }
            session.files_processed = self.processed_before + processed_in_root;
            session.percent = percent;
            session.current_path = Some(current.to_string_lossy().to_string());
            session.progress()
        };
        self.run.events.emit(EngineEvent::Progress(progress));
    }
}

/// Progress estimate without a known total
///
/// Each root owns an equal share; inside a root the share fills
/// asymptotically with the number of processed entries.
pub fn estimate_percent(root_index: usize, root_count: usize, processed_in_root: u64) -> u8 {
    let share = 100.0 / root_count.max(1) as f64;
    let done = root_index as f64 * share;
    let processed = processed_in_root as f64;
    let within = processed / (processed + PROGRESS_HALF_POINT) * share;
    (done + within).min(MAX_RUNNING_PERCENT).floor() as u8
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
