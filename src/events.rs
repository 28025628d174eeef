//! Typed event channel for indexing progress and store mutations
//!
//! Every subscriber gets its own `mpsc` receiver; events are cloned to each
//! live subscriber and dropped receivers are pruned on the next send.

use serde::{Deserialize, Serialize};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

use crate::models::{FileRecord, IndexingProgress};

/// Closed set of events emitted by the engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineEvent {
    Progress(IndexingProgress),
    #[serde(rename_all = "camelCase")]
    Complete { files_processed: u64, duration_ms: u64 },
    Error { message: String },
    FileAdded { record: FileRecord },
    FileChanged { record: FileRecord },
    FileRemoved { path: String },
    DirectoryAdded { record: FileRecord },
    DirectoryRemoved { path: String },
    WatcherReady { root: String },
    WatchingStopped,
}

/// Fan-out publisher shared by the indexer, the watcher and the engine
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<EngineEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber; it receives every event emitted from now on
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = channel();
        self.lock().push(tx);
        rx
    }

    /// Deliver an event to all subscribers (fire-and-forget)
    pub fn emit(&self, event: EngineEvent) {
        log::trace!("Event: {:?}", event);
        let mut subscribers = self.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Sender<EngineEvent>>> {
        // A panicking subscriber thread cannot leave the list inconsistent
        self.subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
