//! Engine context: the single entry point for callers
//!
//! An [`Engine`] is built once from an [`EngineConfig`] and owns the store,
//! the event bus, the indexing session, the watch session and the search
//! executor. Everything that used to be ambient state lives here and is
//! torn down when the engine is dropped.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::exclusion::ExclusionFilter;
use crate::indexer::{IndexingRun, IndexingSession};
use crate::models::{IndexingProgress, SearchFilters, SearchResponse, StoreStats};
use crate::search::SearchExecutor;
use crate::store::Store;
use crate::watcher::WatchSession;

pub struct Engine {
    config: EngineConfig,
    store: Arc<Store>,
    events: Arc<EventBus>,
    session: Arc<Mutex<IndexingSession>>,
    /// Taken by batch writers and by `stop_indexing`; lock order is gate, then session
    write_gate: Arc<Mutex<()>>,
    watch: Mutex<Option<WatchSession>>,
    search: SearchExecutor,
}

impl Engine {
    /// Open (or create) the store and build the engine
    ///
    /// This is the only failure that is not absorbed locally.
    pub fn open(config: EngineConfig) -> Result<Self, EngineError> {
        let db_path = config.db_path().map_err(EngineError::StoreOpen)?;
        let store = Store::open_with_timeout(&db_path, Duration::from_millis(config.store.busy_timeout_ms))
            .map_err(EngineError::StoreOpen)?;
        let store = Arc::new(store);

        log::debug!("Engine opened with store {:?}", db_path);

        Ok(Self {
            search: SearchExecutor::new(Arc::clone(&store), config.search.clone()),
            store,
            events: Arc::new(EventBus::new()),
            session: Arc::new(Mutex::new(IndexingSession::default())),
            write_gate: Arc::new(Mutex::new(())),
            watch: Mutex::new(None),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Receive every event emitted from now on
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Clear the store and index `roots` on a background thread
    pub fn start_indexing<P: AsRef<Path>, S: AsRef<str>>(
        &self,
        roots: &[P],
        exclude: &[S],
    ) -> Result<(), EngineError> {
        let mut session = lock(&self.session);
        if session.is_active() {
            return Err(EngineError::AlreadyIndexing);
        }

        let roots = valid_roots(roots);
        if roots.is_empty() {
            return Err(EngineError::NoValidPaths);
        }

        let cancel = Arc::new(AtomicBool::new(false));
        *session = IndexingSession::running(Arc::clone(&cancel));
        drop(session);

        let run = IndexingRun {
            store: Arc::clone(&self.store),
            events: Arc::clone(&self.events),
            session: Arc::clone(&self.session),
            write_gate: Arc::clone(&self.write_gate),
            cancel,
            filter: self.exclusion_filter(exclude),
            roots: roots.clone(),
            config: self.config.index.clone(),
        };

        log::info!("Starting index of {} root(s): {:?}", roots.len(), roots);

        let spawned = std::thread::Builder::new()
            .name("findex-indexer".to_string())
            .spawn(move || run.run());

        if let Err(e) = spawned {
            lock(&self.session).cancel();
            return Err(EngineError::Store(anyhow::Error::new(e).context("Failed to spawn indexing thread")));
        }

        Ok(())
    }

    /// Cancel the active run; no batch is written after this returns
    pub fn stop_indexing(&self) {
        let _gate = lock(&self.write_gate);
        let mut session = lock(&self.session);
        if session.is_active() {
            log::info!("Stopping indexing after {} entries", session.files_processed);
        }
        session.cancel();
    }

    pub fn indexing_progress(&self) -> IndexingProgress {
        lock(&self.session).progress()
    }

    /// Start live updates for `roots`; a no-op while already watching
    ///
    /// Returns the number of roots that are being watched.
    pub fn start_watching<P: AsRef<Path>, S: AsRef<str>>(&self, roots: &[P], exclude: &[S]) -> usize {
        let mut watch = lock(&self.watch);
        if let Some(existing) = watch.as_ref() {
            log::debug!("Already watching {} root(s)", existing.roots().len());
            return existing.roots().len();
        }

        let roots = valid_roots(roots);
        if roots.is_empty() {
            log::warn!("No valid roots to watch");
            return 0;
        }

        match WatchSession::start(
            &roots,
            self.exclusion_filter(exclude),
            Arc::clone(&self.store),
            Arc::clone(&self.events),
            &self.config.watch,
            &self.config.index,
        ) {
            Ok(session) => {
                let count = session.roots().len();
                *watch = Some(session);
                count
            }
            Err(e) => {
                log::error!("Failed to start watching: {:#}", e);
                self.events.emit(EngineEvent::Error {
                    message: format!("Failed to start watching: {:#}", e),
                });
                0
            }
        }
    }

    /// Close every watch handle; a no-op when not watching
    pub fn stop_watching(&self) {
        let session = lock(&self.watch).take();
        if let Some(session) = session {
            session.stop();
            log::info!("Stopped watching");
            self.events.emit(EngineEvent::WatchingStopped);
        }
    }

    pub fn is_watching(&self) -> bool {
        lock(&self.watch).is_some()
    }

    /// Roots whose watch handle is still alive; a backend error drops only that root
    pub fn watched_roots(&self) -> Vec<PathBuf> {
        lock(&self.watch)
            .as_ref()
            .map(WatchSession::active_roots)
            .unwrap_or_default()
    }

    /// Search the index; failures produce an empty response
    pub fn search(
        &self,
        query: &str,
        filters: SearchFilters,
        limit: Option<usize>,
        offset: usize,
    ) -> SearchResponse {
        let limit = limit.unwrap_or_else(|| self.search.default_limit());
        self.search.search(query, filters, limit, offset)
    }

    pub fn file_count(&self) -> Result<usize, EngineError> {
        self.store.count().map_err(EngineError::Store)
    }

    pub fn stats(&self) -> Result<StoreStats, EngineError> {
        self.store.stats().map_err(EngineError::Store)
    }

    /// Remove every record; refused while a run is active
    pub fn clear(&self) -> Result<(), EngineError> {
        if lock(&self.session).is_active() {
            return Err(EngineError::AlreadyIndexing);
        }
        let _gate = lock(&self.write_gate);
        self.store.clear().map_err(EngineError::Store)?;
        self.search.fuzzy_index().invalidate();
        Ok(())
    }

    fn exclusion_filter<S: AsRef<str>>(&self, exclude: &[S]) -> ExclusionFilter {
        let tokens: Vec<&str> = self
            .config
            .index
            .exclude
            .iter()
            .map(String::as_str)
            .chain(exclude.iter().map(AsRef::as_ref))
            .collect();
        ExclusionFilter::new(&tokens).with_max_depth(self.config.index.max_depth)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop_indexing();
        if let Some(session) = lock(&self.watch).take() {
            session.stop();
        }
    }
}

/// Existing directories, made absolute and de-duplicated in input order
fn valid_roots<P: AsRef<Path>>(roots: &[P]) -> Vec<PathBuf> {
    let mut valid: Vec<PathBuf> = Vec::new();

    for root in roots {
        let root = root.as_ref();
        if root.as_os_str().is_empty() {
            continue;
        }

        let absolute = if root.is_absolute() {
            root.to_path_buf()
        } else {
            match std::env::current_dir() {
                Ok(cwd) => cwd.join(root),
                Err(_) => continue,
            }
        };

        if !absolute.is_dir() {
            log::warn!("Skipping invalid root {:?}", root);
            continue;
        }

        if !valid.contains(&absolute) {
            valid.push(absolute);
        }
    }

    valid
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
