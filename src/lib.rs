//! Findex: local filesystem metadata index and search engine
//!
//! Findex walks user-chosen folders, stores one metadata record per file
//! and directory in an embedded SQLite database, keeps it current with a
//! filesystem watcher, and answers mixed text/operator queries with
//! filtering, relevance ranking and pagination.
//!
//! # Architecture
//!
//! - **Store**: SQLite table plus a trigram full-text mirror kept in lockstep by triggers
//! - **Indexer**: Background full re-index streaming fixed-size batches into the store
//! - **Watcher**: Debounced native watch handles applying single-record upserts/deletes
//! - **Search**: Query operators, strategy selection (filters / structured / fuzzy), ranking
//! - **Engine**: Context object owning all of the above, plus the event bus
//!
//! # Example Usage
//!
//! ```no_run
//! use findex::{Engine, EngineConfig, SearchFilters};
//!
//! let engine = Engine::open(EngineConfig::default()).unwrap();
//! engine.start_indexing(&["/home/me/Documents"], &["drafts"]).unwrap();
//!
//! let response = engine.search("report ext:pdf", SearchFilters::default(), Some(20), 0);
//! for record in response.items {
//!     println!("{}", record.absolute_path);
//! }
//! ```

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod exclusion;
pub mod fuzzy;
pub mod indexer;
pub mod metadata;
pub mod models;
pub mod output;
pub mod query;
pub mod search;
pub mod store;
pub mod watcher;

// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{EngineError, FsErrorKind};
pub use events::{EngineEvent, EventBus};
pub use exclusion::ExclusionFilter;
pub use models::{
    Category, FileRecord, IndexingProgress, IndexingState, SearchFilters, SearchResponse, StoreStats,
};
pub use store::Store;
