//! Live filesystem watching
//!
//! Each root gets its own native watch handle; all handles feed a single
//! worker thread that debounces events per path. A path is applied only
//! after it has been quiet for the debounce window, so in-progress writes
//! and event storms collapse into one store write.
//!
//! Applying a path means re-stating it: if it exists the record is upserted,
//! if it is gone the record (and any descendants) is deleted. The watcher
//! therefore converges on the filesystem state regardless of which raw
//! event kinds the backend reported.
//!
//! Example timeline with a 2s debounce:
//! ```text
//! t=0.0s: a.txt created   [a.txt pending]
//! t=0.5s: a.txt modified  [a.txt timer resets]
//! t=2.5s: a.txt quiet     [stat -> upsert -> fileAdded]
//! ```

use anyhow::{Context, Result};
use globset::GlobSet;
use notify::event::RemoveKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use walkdir::WalkDir;

use crate::config::{IndexConfig, WatchConfig};
use crate::error::FsErrorKind;
use crate::events::{EngineEvent, EventBus};
use crate::exclusion::{is_hidden_name, ExclusionFilter};
use crate::indexer::{ScanSink, Scanner};
use crate::metadata;
use crate::models::FileRecord;
use crate::store::Store;

type Handles = Arc<Mutex<HashMap<PathBuf, RecommendedWatcher>>>;

/// Messages consumed by the watch worker
enum WatchMessage {
    Fs {
        root: PathBuf,
        result: notify::Result<Event>,
    },
    Stop,
}

/// Ignore predicate applied to every event path
pub struct WatchFilter {
    filter: ExclusionFilter,
    globs: GlobSet,
    max_depth: usize,
}

impl WatchFilter {
    pub fn new(filter: ExclusionFilter, max_depth: usize) -> Result<Self> {
        let globs = filter.compile_globs()?;
        Ok(Self {
            filter,
            globs,
            max_depth,
        })
    }

    /// True when an event for `path` under `root` must be dropped
    pub fn is_ignored(&self, root: &Path, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(root) else {
            return true;
        };

        let mut depth = 0usize;
        for component in relative.components() {
            if let Component::Normal(segment) = component {
                depth += 1;
                if is_hidden_name(&segment.to_string_lossy()) {
                    return true;
                }
            }
        }

        // The root itself is never a record
        if depth == 0 || depth > self.max_depth {
            return true;
        }

        if self.globs.is_match(relative) {
            return true;
        }

        self.filter.matches_location(path)
    }
}

/// Bare drive or volume roots are not watched
pub fn is_bare_root(path: &Path) -> bool {
    path.parent().is_none()
}

#[derive(Debug, Clone)]
struct PendingChange {
    root: PathBuf,
    /// The backend reported a folder removal
    folder_removed: bool,
    last_event: Instant,
}

/// Applies debounced changes to the store and announces them
struct ChangeApplier {
    store: Arc<Store>,
    events: Arc<EventBus>,
    filter: ExclusionFilter,
    index: IndexConfig,
    /// Root handles; new directories get a watch on their root's handle
    handles: Handles,
    max_depth: usize,
}

impl ChangeApplier {
    /// Re-stat one settled path; returns the paths a directory scan wrote along the way
    fn apply(&self, path: &Path, change: &PendingChange) -> Vec<PathBuf> {
        match metadata::stat_record(path, &change.root) {
            Ok(Some(record)) => return self.upsert(record, &change.root),
            Ok(None) => log::trace!("Skipping symlink {:?}", path),
            Err(err) => match FsErrorKind::classify(&err) {
                FsErrorKind::NotFound => self.remove(path, change.folder_removed),
                FsErrorKind::Access => {
                    log::trace!("Skipping {:?} (access)", path);
                }
                FsErrorKind::Other => {
                    log::warn!("Failed to stat {:?}: {}", path, err);
                }
            },
        }
        Vec::new()
    }

    fn upsert(&self, record: FileRecord, root: &Path) -> Vec<PathBuf> {
        let path = PathBuf::from(&record.absolute_path);

        let existed = match self.store.get(&record.absolute_path) {
            Ok(existing) => existing.is_some(),
            Err(e) => {
                self.report_store_error(&path, e);
                return Vec::new();
            }
        };

        if let Err(e) = self.store.upsert_one(&record) {
            self.report_store_error(&path, e);
            return Vec::new();
        }

        log::debug!("Upserted {:?}", path);

        if record.is_directory {
            if existed {
                return Vec::new();
            }
            self.events.emit(EngineEvent::DirectoryAdded { record });
            // Watch first so entries created during the scan still raise events
            self.watch_directory(root, &path);
            return self.index_new_directory(root, &path);
        }

        if existed {
            self.events.emit(EngineEvent::FileChanged { record });
        } else {
            self.events.emit(EngineEvent::FileAdded { record });
        }
        Vec::new()
    }

    fn watch_directory(&self, root: &Path, dir: &Path) {
        if relative_depth(root, dir) >= self.max_depth {
            return;
        }

        let mut handles = lock(&self.handles);
        let Some(handle) = handles.get_mut(root) else {
            return;
        };

        if let Err(e) = handle.watch(dir, RecursiveMode::NonRecursive) {
            log::debug!("Failed to watch new directory {:?}: {}", dir, e);
            return;
        }
        watch_tree(handle, root, dir, &self.filter, self.max_depth);
    }

    /// Directories moved into a watched tree may arrive with their contents already in place
    fn index_new_directory(&self, root: &Path, dir: &Path) -> Vec<PathBuf> {
        let cancel = AtomicBool::new(false);
        let scanner = Scanner::new(&self.filter, &cancel, &self.index);
        let mut sink = StoreSink {
            store: &self.store,
            events: &self.events,
            written: Vec::new(),
        };
        scanner.scan_from(root, dir, &mut sink);
        sink.written
    }

    fn remove(&self, path: &Path, folder_removed: bool) {
        let key = path.to_string_lossy().to_string();

        let was_directory = match self.store.get(&key) {
            Ok(existing) => existing.map(|r| r.is_directory),
            Err(e) => {
                self.report_store_error(path, e);
                return;
            }
        };

        let removed = match self.store.delete(&key) {
            Ok(n) => n,
            Err(e) => {
                self.report_store_error(path, e);
                return;
            }
        };

        let is_directory = folder_removed || was_directory == Some(true);
        let descendants = if is_directory || removed == 0 {
            match self.store.delete_under(&key) {
                Ok(n) => n,
                Err(e) => {
                    self.report_store_error(path, e);
                    return;
                }
            }
        } else {
            0
        };

        if removed == 0 && descendants == 0 {
            // Created and deleted inside one debounce window, or never indexed
            return;
        }

        log::debug!("Removed {:?} ({} descendants)", path, descendants);

        if is_directory || descendants > 0 {
            self.events.emit(EngineEvent::DirectoryRemoved { path: key });
        } else {
            self.events.emit(EngineEvent::FileRemoved { path: key });
        }
    }

    fn report_store_error(&self, path: &Path, err: anyhow::Error) {
        log::error!("Failed to apply change for {:?}: {:#}", path, err);
        self.events.emit(EngineEvent::Error {
            message: format!("Failed to update {}: {:#}", path.display(), err),
        });
    }
}

/// Writes and announces the contents of a newly appeared directory
struct StoreSink<'a> {
    store: &'a Store,
    events: &'a EventBus,
    written: Vec<PathBuf>,
}

impl ScanSink for StoreSink<'_> {
    fn flush(&mut self, batch: Vec<FileRecord>) {
        if let Err(e) = self.store.upsert_batch(&batch) {
            log::error!("Failed to write {} records: {:#}", batch.len(), e);
            self.events.emit(EngineEvent::Error {
                message: format!("Failed to write {} records: {:#}", batch.len(), e),
            });
            return;
        }

        for record in batch {
            self.written.push(PathBuf::from(&record.absolute_path));
            if record.is_directory {
                self.events.emit(EngineEvent::DirectoryAdded { record });
            } else {
                self.events.emit(EngineEvent::FileAdded { record });
            }
        }
    }

    fn progress(&mut self, _processed_in_root: u64, _current: &Path) {}
}

/// Debounce loop running on the worker thread
struct WatchWorker {
    rx: Receiver<WatchMessage>,
    handles: Handles,
    filter: WatchFilter,
    applier: ChangeApplier,
    debounce: Duration,
    poll_interval: Duration,
    pending: HashMap<PathBuf, PendingChange>,
}

impl WatchWorker {
    fn run(mut self) {
        loop {
            match self.rx.recv_timeout(self.poll_interval) {
                Ok(WatchMessage::Fs { root, result: Ok(event) }) => {
                    self.record_event(&root, &event);
                }
                Ok(WatchMessage::Fs { root, result: Err(e) }) => {
                    // Only this root stops; the others keep running
                    log::warn!("Watch backend failed for {:?}, closing it: {}", root, e);
                    lock(&self.handles).remove(&root);
                    self.pending.retain(|_, change| change.root != root);
                }
                Ok(WatchMessage::Stop) | Err(RecvTimeoutError::Disconnected) => {
                    log::debug!("Watch worker stopping");
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
            }

            self.flush_settled();
        }
    }

    fn record_event(&mut self, root: &Path, event: &Event) {
        if !matches!(
            event.kind,
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
        ) {
            return;
        }

        let folder_removed = matches!(event.kind, EventKind::Remove(RemoveKind::Folder));

        for path in &event.paths {
            if self.filter.is_ignored(root, path) {
                log::trace!("Ignoring event for {:?}", path);
                continue;
            }

            log::trace!("Detected change: {:?} ({:?})", path, event.kind);
            let entry = self.pending.entry(path.clone()).or_insert_with(|| PendingChange {
                root: root.to_path_buf(),
                folder_removed: false,
                last_event: Instant::now(),
            });
            entry.folder_removed |= folder_removed;
            entry.last_event = Instant::now();
        }
    }

    fn flush_settled(&mut self) {
        if self.pending.is_empty() {
            return;
        }

        let debounce = self.debounce;
        let mut settled: Vec<(PathBuf, PendingChange)> = Vec::new();
        self.pending.retain(|path, change| {
            if change.last_event.elapsed() >= debounce {
                settled.push((path.clone(), change.clone()));
                false
            } else {
                true
            }
        });

        // Parents before children so a new directory is recorded before its entries
        settled.sort_by(|a, b| a.0.cmp(&b.0));

        let mut written: HashSet<PathBuf> = HashSet::new();
        for (path, change) in settled {
            // Already stored and announced by the scan of its new parent
            if written.contains(&path) {
                log::trace!("Skipping {:?}, written by directory scan", path);
                continue;
            }
            written.extend(self.applier.apply(&path, &change));
        }
    }
}

/// One live watching session over a set of roots
pub struct WatchSession {
    handles: Handles,
    tx: Sender<WatchMessage>,
    worker: Option<JoinHandle<()>>,
    roots: Vec<PathBuf>,
}

impl WatchSession {
    /// Start watching `roots`, emitting `WatcherReady` for every root that succeeds
    ///
    /// Roots that fail to register are logged and skipped.
    pub fn start(
        roots: &[PathBuf],
        filter: ExclusionFilter,
        store: Arc<Store>,
        events: Arc<EventBus>,
        watch: &WatchConfig,
        index: &IndexConfig,
    ) -> Result<Self> {
        let watch_filter = WatchFilter::new(filter.clone(), watch.max_depth)?;
        let (tx, rx) = channel();
        let handles: Handles = Arc::new(Mutex::new(HashMap::new()));
        let mut watched = Vec::new();

        for root in roots {
            if is_bare_root(root) {
                log::warn!("Not watching bare volume root {:?}; it is indexed but not live-updated", root);
                continue;
            }

            match create_handle(root, tx.clone(), &filter, watch.max_depth) {
                Ok(handle) => {
                    lock(&handles).insert(root.clone(), handle);
                    watched.push(root.clone());
                }
                Err(e) => {
                    log::warn!("Failed to watch {:?}: {:#}", root, e);
                }
            }
        }

        let worker = WatchWorker {
            rx,
            handles: Arc::clone(&handles),
            filter: watch_filter,
            applier: ChangeApplier {
                store,
                events: Arc::clone(&events),
                filter,
                index: index.clone(),
                handles: Arc::clone(&handles),
                max_depth: watch.max_depth,
            },
            debounce: watch.debounce(),
            poll_interval: watch.poll_interval(),
            pending: HashMap::new(),
        };

        let worker = std::thread::Builder::new()
            .name("findex-watcher".to_string())
            .spawn(move || worker.run())
            .context("Failed to spawn watcher thread")?;

        log::info!(
            "Watching {} root(s) with {}ms debounce",
            watched.len(),
            watch.debounce_ms
        );

        for root in &watched {
            events.emit(EngineEvent::WatcherReady {
                root: root.to_string_lossy().to_string(),
            });
        }

        Ok(Self {
            handles,
            tx,
            worker: Some(worker),
            roots: watched,
        })
    }

    /// Roots with a live handle
    pub fn active_roots(&self) -> Vec<PathBuf> {
        lock(&self.handles).keys().cloned().collect()
    }

    /// Roots that were registered at start
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Close every handle and stop the worker
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping a handle closes it; failures inside the backend are ignored
        lock(&self.handles).clear();
        let _ = self.tx.send(WatchMessage::Stop);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("Watch worker panicked");
            }
        }
    }
}

impl Drop for WatchSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// One native handle per root, with a non-recursive watch per directory inside the depth bound
fn create_handle(
    root: &Path,
    tx: Sender<WatchMessage>,
    filter: &ExclusionFilter,
    max_depth: usize,
) -> Result<RecommendedWatcher> {
    let key = root.to_path_buf();
    let mut handle = RecommendedWatcher::new(
        move |result: notify::Result<Event>| {
            let _ = tx.send(WatchMessage::Fs {
                root: key.clone(),
                result,
            });
        },
        Config::default(),
    )
    .context("Failed to create file watcher")?;

    handle
        .watch(root, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to start watching {}", root.display()))?;

    let watched = watch_tree(&mut handle, root, root, filter, max_depth);
    log::debug!("Watching {:?} with {} directory watches", root, watched + 1);

    Ok(handle)
}

/// Watch the directories below `start`, skipping hidden and excluded ones
///
/// Events deeper than `max_depth` segments below the root are dropped anyway,
/// so a directory at `max_depth` needs no watch of its own. Returns the number
/// of watches added.
fn watch_tree(
    handle: &mut RecommendedWatcher,
    root: &Path,
    start: &Path,
    filter: &ExclusionFilter,
    max_depth: usize,
) -> usize {
    let start_depth = relative_depth(root, start);
    if start_depth + 1 >= max_depth {
        return 0;
    }

    let walker = WalkDir::new(start)
        .min_depth(1)
        .max_depth(max_depth - 1 - start_depth)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.file_type().is_dir()
                && !is_hidden_name(&entry.file_name().to_string_lossy())
                && !filter.is_excluded_within(root, entry.path())
        });

    let mut watched = 0;
    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::trace!("Skipping unreadable directory: {}", e);
                continue;
            }
        };
        match handle.watch(entry.path(), RecursiveMode::NonRecursive) {
            Ok(()) => watched += 1,
            Err(e) => log::debug!("Failed to watch {:?}: {}", entry.path(), e),
        }
    }
    watched
}

fn relative_depth(root: &Path, path: &Path) -> usize {
    path.strip_prefix(root)
        .map(|rel| rel.components().count())
        .unwrap_or(0)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind};
    use std::fs;
    use tempfile::TempDir;

    fn watch_filter(tokens: &[&str]) -> WatchFilter {
        WatchFilter::new(ExclusionFilter::new(tokens), 32).unwrap()
    }

    fn applier(temp: &TempDir) -> (ChangeApplier, Receiver<EngineEvent>) {
        let store = Arc::new(Store::open(temp.path().join("db").join("index.db")).unwrap());
        let events = Arc::new(EventBus::new());
        let rx = events.subscribe();
        (
            ChangeApplier {
                store,
                events,
                filter: ExclusionFilter::default(),
                index: IndexConfig::default(),
                handles: Arc::new(Mutex::new(HashMap::new())),
                max_depth: 32,
            },
            rx,
        )
    }

    fn pending(root: &Path) -> PendingChange {
        PendingChange {
            root: root.to_path_buf(),
            folder_removed: false,
            last_event: Instant::now(),
        }
    }

    #[test]
    fn test_filter_ignores_hidden_and_excluded() {
        let filter = watch_filter(&["drafts"]);
        let root = Path::new("/home/u/docs");

        assert!(!filter.is_ignored(root, Path::new("/home/u/docs/a.txt")));
        assert!(filter.is_ignored(root, Path::new("/home/u/docs/.swp")));
        assert!(filter.is_ignored(root, Path::new("/home/u/docs/.git/index")));
        assert!(filter.is_ignored(root, Path::new("/home/u/docs/node_modules/x/y.js")));
        assert!(filter.is_ignored(root, Path::new("/home/u/docs/Drafts/plan.md")));
        assert!(filter.is_ignored(root, Path::new("/home/u/docs")));
        assert!(filter.is_ignored(root, Path::new("/elsewhere/a.txt")));
    }

    #[test]
    fn test_filter_root_segments_not_judged() {
        let filter = watch_filter(&[]);
        let root = Path::new("/tmp/.tmpXyZ/work");
        assert!(!filter.is_ignored(root, Path::new("/tmp/.tmpXyZ/work/a.txt")));

        // Caller tokens still see the root's own segments
        let filter = watch_filter(&["work"]);
        assert!(filter.is_ignored(root, Path::new("/tmp/.tmpXyZ/work/a.txt")));
    }

    #[test]
    fn test_filter_caller_token_substring() {
        let filter = watch_filter(&["secret"]);
        let root = Path::new("/home/u/docs");
        assert!(filter.is_ignored(root, Path::new("/home/u/docs/topsecret.txt")));
        assert!(filter.is_ignored(root, Path::new("/home/u/docs/Secrets/a.txt")));
        assert!(!filter.is_ignored(root, Path::new("/home/u/docs/public.txt")));
    }

    #[test]
    fn test_filter_depth_bound() {
        let filter = WatchFilter::new(ExclusionFilter::default(), 2).unwrap();
        let root = Path::new("/data");
        assert!(!filter.is_ignored(root, Path::new("/data/a/b")));
        assert!(filter.is_ignored(root, Path::new("/data/a/b/c")));
    }

    #[test]
    fn test_bare_root() {
        assert!(is_bare_root(Path::new("/")));
        assert!(!is_bare_root(Path::new("/home")));
    }

    #[test]
    fn test_apply_added_then_changed() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        fs::create_dir_all(&root).unwrap();
        let (applier, rx) = applier(&temp);

        let file = root.join("notes.txt");
        fs::write(&file, "one").unwrap();
        applier.apply(&file, &pending(&root));
        assert!(matches!(rx.try_recv().unwrap(), EngineEvent::FileAdded { .. }));

        fs::write(&file, "one two").unwrap();
        applier.apply(&file, &pending(&root));
        match rx.try_recv().unwrap() {
            EngineEvent::FileChanged { record } => assert_eq!(record.size_bytes, 7),
            other => panic!("unexpected event {:?}", other),
        }

        assert_eq!(applier.store.count().unwrap(), 1);
    }

    #[test]
    fn test_apply_removed_file() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        fs::create_dir_all(&root).unwrap();
        let (applier, rx) = applier(&temp);

        let file = root.join("gone.txt");
        fs::write(&file, "x").unwrap();
        applier.apply(&file, &pending(&root));
        let _ = rx.try_recv();

        fs::remove_file(&file).unwrap();
        applier.apply(&file, &pending(&root));
        assert!(matches!(rx.try_recv().unwrap(), EngineEvent::FileRemoved { .. }));
        assert_eq!(applier.store.count().unwrap(), 0);
    }

    #[test]
    fn test_apply_vanished_unknown_path_is_silent() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        fs::create_dir_all(&root).unwrap();
        let (applier, rx) = applier(&temp);

        applier.apply(&root.join("never.txt"), &pending(&root));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_apply_new_directory_indexes_contents() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        fs::create_dir_all(root.join("album/raw")).unwrap();
        fs::write(root.join("album/a.jpg"), "a").unwrap();
        fs::write(root.join("album/raw/b.png"), "b").unwrap();
        let (applier, rx) = applier(&temp);

        let written = applier.apply(&root.join("album"), &pending(&root));
        assert_eq!(written.len(), 3);
        assert!(written.contains(&root.join("album/raw/b.png")));

        // The directory first, then each entry its scan wrote, all as additions
        let events: Vec<EngineEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 4);
        match &events[0] {
            EngineEvent::DirectoryAdded { record } => assert_eq!(record.name, "album"),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(events.iter().all(|e| matches!(
            e,
            EngineEvent::FileAdded { .. } | EngineEvent::DirectoryAdded { .. }
        )));

        // album, a.jpg, raw, b.png
        assert_eq!(applier.store.count().unwrap(), 4);
        let b = applier
            .store
            .get(&root.join("album/raw/b.png").to_string_lossy())
            .unwrap()
            .unwrap();
        assert_eq!(Path::new(&b.relative_path), Path::new("album/raw"));
    }

    #[test]
    fn test_apply_removed_directory_deletes_descendants() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        fs::create_dir_all(root.join("album")).unwrap();
        fs::write(root.join("album/a.jpg"), "a").unwrap();
        let (applier, rx) = applier(&temp);

        applier.apply(&root.join("album"), &pending(&root));
        rx.try_iter().for_each(drop);
        assert_eq!(applier.store.count().unwrap(), 2);

        fs::remove_dir_all(root.join("album")).unwrap();
        applier.apply(&root.join("album"), &pending(&root));
        assert!(matches!(rx.try_recv().unwrap(), EngineEvent::DirectoryRemoved { .. }));
        assert_eq!(applier.store.count().unwrap(), 0);
    }

    #[test]
    fn test_worker_debounces_events() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        fs::create_dir_all(&root).unwrap();
        let (applier, rx_events) = applier(&temp);

        let file = root.join("burst.txt");
        fs::write(&file, "x").unwrap();

        let (_tx, rx) = channel();
        let mut worker = WatchWorker {
            rx,
            handles: Arc::new(Mutex::new(HashMap::new())),
            filter: watch_filter(&[]),
            applier,
            debounce: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
            pending: HashMap::new(),
        };

        let create = Event::new(EventKind::Create(CreateKind::File)).add_path(file.clone());
        let modify = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(file.clone());
        worker.record_event(&root, &create);
        worker.record_event(&root, &modify);
        worker.record_event(&root, &modify);
        assert_eq!(worker.pending.len(), 1);

        // Not settled yet
        worker.flush_settled();
        assert!(rx_events.try_recv().is_err());

        std::thread::sleep(Duration::from_millis(80));
        worker.flush_settled();
        assert!(matches!(rx_events.try_recv().unwrap(), EngineEvent::FileAdded { .. }));
        assert!(rx_events.try_recv().is_err());
        assert!(worker.pending.is_empty());
    }

    #[test]
    fn test_worker_skips_entries_written_by_directory_scan() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        fs::create_dir_all(root.join("album")).unwrap();
        fs::write(root.join("album/a.jpg"), "a").unwrap();
        let (applier, rx_events) = applier(&temp);

        let (_tx, rx) = channel();
        let mut worker = WatchWorker {
            rx,
            handles: Arc::new(Mutex::new(HashMap::new())),
            filter: watch_filter(&[]),
            applier,
            debounce: Duration::from_millis(20),
            poll_interval: Duration::from_millis(10),
            pending: HashMap::new(),
        };

        let folder = Event::new(EventKind::Create(CreateKind::Folder)).add_path(root.join("album"));
        let file = Event::new(EventKind::Create(CreateKind::File)).add_path(root.join("album/a.jpg"));
        worker.record_event(&root, &folder);
        worker.record_event(&root, &file);

        std::thread::sleep(Duration::from_millis(50));
        worker.flush_settled();

        let events: Vec<EngineEvent> = rx_events.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], EngineEvent::DirectoryAdded { .. }));
        match &events[1] {
            EngineEvent::FileAdded { record } => assert_eq!(record.name, "a.jpg"),
            other => panic!("unexpected event {:?}", other),
        }
        assert!(worker.pending.is_empty());
    }

    #[test]
    fn test_watch_tree_stops_at_depth_bound() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        fs::create_dir_all(root.join("a/b/c/d")).unwrap();
        fs::create_dir_all(root.join(".git/objects")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("a/file.txt"), "x").unwrap();

        let mut handle =
            RecommendedWatcher::new(|_result: notify::Result<Event>| {}, Config::default()).unwrap();
        let filter = ExclusionFilter::default();

        // Directories at the bound itself need no watch
        assert_eq!(watch_tree(&mut handle, &root, &root, &filter, 2), 1);
        assert_eq!(watch_tree(&mut handle, &root, &root, &filter, 4), 3);
        assert_eq!(watch_tree(&mut handle, &root, &root.join("a/b"), &filter, 4), 1);
        assert_eq!(watch_tree(&mut handle, &root, &root, &filter, 1), 0);
    }

    #[test]
    fn test_worker_ignores_access_events() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        fs::create_dir_all(&root).unwrap();
        let (applier, _rx) = applier(&temp);

        let (_tx, rx) = channel();
        let mut worker = WatchWorker {
            rx,
            handles: Arc::new(Mutex::new(HashMap::new())),
            filter: watch_filter(&[]),
            applier,
            debounce: Duration::from_millis(0),
            poll_interval: Duration::from_millis(10),
            pending: HashMap::new(),
        };

        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(root.join("a.txt"));
        worker.record_event(&root, &access);
        assert!(worker.pending.is_empty());
    }
}
