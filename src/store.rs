//! Persistent metadata store
//!
//! One SQLite database file (`index.db`) holds:
//! - `files`: the primary table, keyed by `id` with a unique `absolute_path`
//! - `files_fts`: an FTS5 external-content mirror (trigram tokenizer) over
//!   `name`, `relative_path` and `absolute_path`, kept in lockstep with
//!   `files` by triggers that run inside the writing transaction
//! - `meta`: key/value bookkeeping (schema hash, last index time)
//!
//! Every operation opens its own short-lived connection, so no caller ever
//! holds a store handle across a suspension point. WAL mode lets readers
//! proceed while a scan batch is being committed.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::models::{Category, FileRecord, SearchFilters, StoreStats};

/// Default database file name
pub const DB_FILE: &str = "index.db";

/// Hash of the schema-defining sources, computed by build.rs
const SCHEMA_HASH: &str = env!("FINDEX_SCHEMA_HASH");

/// Minimum query length the trigram mirror can serve
const FTS_MIN_CHARS: usize = 3;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS files (
        id TEXT PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        relative_path TEXT NOT NULL,
        absolute_path TEXT NOT NULL UNIQUE,
        extension TEXT NOT NULL,
        size_bytes INTEGER NOT NULL,
        modified_at INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        is_directory INTEGER NOT NULL,
        category TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_files_relative_path ON files(relative_path);
    CREATE INDEX IF NOT EXISTS idx_files_extension ON files(extension);
    CREATE INDEX IF NOT EXISTS idx_files_size ON files(size_bytes);
    CREATE INDEX IF NOT EXISTS idx_files_modified ON files(modified_at);
    CREATE INDEX IF NOT EXISTS idx_files_category ON files(category);
    CREATE INDEX IF NOT EXISTS idx_files_name ON files(is_directory, name COLLATE NOCASE);

    CREATE VIRTUAL TABLE IF NOT EXISTS files_fts USING fts5(
        name,
        relative_path,
        absolute_path,
        content = 'files',
        content_rowid = 'rowid',
        tokenize = 'trigram'
    );

    CREATE TRIGGER IF NOT EXISTS files_fts_insert AFTER INSERT ON files BEGIN
        INSERT INTO files_fts (rowid, name, relative_path, absolute_path)
        VALUES (new.rowid, new.name, new.relative_path, new.absolute_path);
    END;

    CREATE TRIGGER IF NOT EXISTS files_fts_delete AFTER DELETE ON files BEGIN
        INSERT INTO files_fts (files_fts, rowid, name, relative_path, absolute_path)
        VALUES ('delete', old.rowid, old.name, old.relative_path, old.absolute_path);
    END;

    CREATE TRIGGER IF NOT EXISTS files_fts_update AFTER UPDATE ON files BEGIN
        INSERT INTO files_fts (files_fts, rowid, name, relative_path, absolute_path)
        VALUES ('delete', old.rowid, old.name, old.relative_path, old.absolute_path);
        INSERT INTO files_fts (rowid, name, relative_path, absolute_path)
        VALUES (new.rowid, new.name, new.relative_path, new.absolute_path);
    END;

    CREATE TABLE IF NOT EXISTS meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );
";

const DROP_SCHEMA: &str = "
    DROP TRIGGER IF EXISTS files_fts_insert;
    DROP TRIGGER IF EXISTS files_fts_delete;
    DROP TRIGGER IF EXISTS files_fts_update;
    DROP TABLE IF EXISTS files_fts;
    DROP TABLE IF EXISTS files;
    DROP TABLE IF EXISTS meta;
";

const UPSERT_SQL: &str = "
    INSERT INTO files (id, name, relative_path, absolute_path, extension, size_bytes,
                       modified_at, created_at, is_directory, category)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
    ON CONFLICT(absolute_path) DO UPDATE SET
        name = excluded.name,
        relative_path = excluded.relative_path,
        extension = excluded.extension,
        size_bytes = excluded.size_bytes,
        modified_at = excluded.modified_at,
        created_at = excluded.created_at,
        is_directory = excluded.is_directory,
        category = excluded.category
";

const SELECT_COLUMNS: &str = "f.id AS id, f.name AS name, f.relative_path AS relative_path, \
     f.absolute_path AS absolute_path, f.extension AS extension, f.size_bytes AS size_bytes, \
     f.modified_at AS modified_at, f.created_at AS created_at, f.is_directory AS is_directory, \
     f.category AS category";

const DEFAULT_ORDER: &str = "f.is_directory DESC, f.name COLLATE NOCASE ASC, f.absolute_path ASC";

/// Result ordering for [`Store::query`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreOrder {
    /// Directories first, then case-insensitive name
    #[default]
    Default,
    /// Best text match first (falls back to `Default` without text)
    Relevance,
    /// Most recently modified first
    ModifiedDesc,
}

/// Typed filter specification for store reads
#[derive(Debug, Clone, Default)]
pub struct StoreQuery {
    /// Case-insensitive substring over name, relative path and absolute path
    pub text: Option<String>,
    pub filters: SearchFilters,
    pub order: StoreOrder,
}

impl StoreQuery {
    pub fn filtered(filters: SearchFilters) -> Self {
        Self {
            text: None,
            filters,
            order: StoreOrder::Default,
        }
    }

    fn text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    /// FROM + WHERE clause and its parameters, shared by row and count queries
    fn build_clause(&self) -> (String, Vec<Value>) {
        let mut clause = String::from(" FROM files f");
        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        if let Some(text) = self.text() {
            if text.chars().count() >= FTS_MIN_CHARS {
                clause.push_str(" JOIN files_fts ON files_fts.rowid = f.rowid");
                conditions.push("files_fts MATCH ?".to_string());
                params.push(Value::Text(fts_phrase(text)));
            } else {
                conditions.push(
                    "(f.name LIKE ? ESCAPE '\\' OR f.relative_path LIKE ? ESCAPE '\\' \
                     OR f.absolute_path LIKE ? ESCAPE '\\')"
                        .to_string(),
                );
                let pattern = format!("%{}%", escape_like(text));
                for _ in 0..3 {
                    params.push(Value::Text(pattern.clone()));
                }
            }
        }

        let filters = &self.filters;

        if !filters.include_directories {
            conditions.push("f.is_directory = 0".to_string());
        }
        if !filters.include_files {
            conditions.push("f.is_directory = 1".to_string());
        }
        if !filters.categories.is_empty() {
            conditions.push(format!("f.category IN ({})", placeholders(filters.categories.len())));
            params.extend(filters.categories.iter().map(|c| Value::Text(c.to_string())));
        }
        if !filters.extensions.is_empty() {
            conditions.push(format!("f.extension IN ({})", placeholders(filters.extensions.len())));
            params.extend(filters.extensions.iter().map(|e| Value::Text(e.clone())));
        }
        if let Some(min) = filters.size_min {
            conditions.push("f.size_bytes >= ?".to_string());
            params.push(Value::Integer(clamp_i64(min)));
        }
        if let Some(max) = filters.size_max {
            conditions.push("f.size_bytes <= ?".to_string());
            params.push(Value::Integer(clamp_i64(max)));
        }
        if let Some(from) = filters.modified_from {
            conditions.push("f.modified_at >= ?".to_string());
            params.push(Value::Integer(from.timestamp_millis()));
        }
        if let Some(to) = filters.modified_to {
            conditions.push("f.modified_at <= ?".to_string());
            params.push(Value::Integer(to.timestamp_millis()));
        }

        if !conditions.is_empty() {
            clause.push_str(" WHERE ");
            clause.push_str(&conditions.join(" AND "));
        }

        (clause, params)
    }

    fn order_clause(&self, params: &mut Vec<Value>) -> String {
        match (self.order, self.text()) {
            (StoreOrder::ModifiedDesc, _) => format!(" ORDER BY f.modified_at DESC, {}", DEFAULT_ORDER),
            (StoreOrder::Relevance, Some(text)) if text.chars().count() >= FTS_MIN_CHARS => {
                // Name hits weigh more than path hits
                format!(" ORDER BY bm25(files_fts, 10.0, 2.0, 1.0), {}", DEFAULT_ORDER)
            }
            (StoreOrder::Relevance, Some(text)) => {
                let lower = text.to_lowercase();
                params.push(Value::Text(lower.clone()));
                params.push(Value::Text(format!("{}%", escape_like(&lower))));
                format!(
                    " ORDER BY CASE WHEN lower(f.name) = ? THEN 0 \
                     WHEN lower(f.name) LIKE ? ESCAPE '\\' THEN 1 ELSE 2 END, {}",
                    DEFAULT_ORDER
                )
            }
            _ => format!(" ORDER BY {}", DEFAULT_ORDER),
        }
    }
}

/// Manages the index database
pub struct Store {
    db_path: PathBuf,
    busy_timeout: Duration,
    mutations: AtomicU64,
}

impl Store {
    /// Open (creating if needed) the database at `db_path`
    ///
    /// This is the one fatal failure of the engine: if the file cannot be
    /// created or its schema initialized, the error is returned to the caller.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_timeout(db_path, Duration::from_millis(5000))
    }

    pub fn open_with_timeout(db_path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        log::info!("Opening index store at {:?}", db_path);

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create store directory {}", parent.display()))?;
            }
        }

        let store = Self {
            db_path,
            busy_timeout,
            mutations: AtomicU64::new(0),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Path to the database file
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)
            .with_context(|| format!("Failed to open {}", self.db_path.display()))?;
        conn.busy_timeout(self.busy_timeout)
            .context("Failed to set busy timeout")?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;

        // journal_mode returns the resulting mode as a row, so it has to be queried
        let mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .context("Failed to enable WAL mode")?;
        log::debug!("Store journal mode: {}", mode);

        let has_meta: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'meta'",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n > 0)
            .context("Failed to inspect schema")?;

        if has_meta {
            let stored: Option<String> = conn
                .query_row("SELECT value FROM meta WHERE key = 'schema_hash'", [], |row| row.get(0))
                .optional()
                .context("Failed to read schema hash")?;

            if stored.as_deref() != Some(SCHEMA_HASH) {
                log::warn!(
                    "Index schema changed ({} -> {}), rebuilding empty tables",
                    stored.as_deref().unwrap_or("none"),
                    SCHEMA_HASH
                );
                conn.execute_batch(DROP_SCHEMA)
                    .context("Failed to drop outdated schema")?;
            }
        }

        conn.execute_batch(SCHEMA)
            .context("Failed to create index schema")?;
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('schema_hash', ?)",
            [SCHEMA_HASH],
        )
        .context("Failed to record schema hash")?;

        log::debug!("Index schema ready");
        Ok(())
    }

    /// Number of successful writes (rows) since this store was opened
    ///
    /// Used by the fuzzy index as an invalidation trigger.
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::Relaxed)
    }

    fn bump(&self, rows: usize) {
        self.mutations.fetch_add(rows as u64, Ordering::Relaxed);
    }

    /// Insert or update a single record keyed on its absolute path
    pub fn upsert_one(&self, record: &FileRecord) -> Result<()> {
        let conn = self.connect()?;
        write_record(&conn, record)
            .with_context(|| format!("Failed to upsert {}", record.absolute_path))?;
        self.bump(1);
        Ok(())
    }

    /// Insert or update a batch of records in one all-or-nothing transaction
    pub fn upsert_batch(&self, records: &[FileRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut conn = self.connect()?;
        let tx = conn.transaction().context("Failed to begin batch transaction")?;

        for record in records {
            // An error here drops `tx`, which rolls back the whole batch
            write_record(&tx, record)
                .with_context(|| format!("Failed to upsert {}", record.absolute_path))?;
        }

        tx.commit().context("Failed to commit batch")?;
        self.bump(records.len());

        log::debug!("Committed batch of {} records", records.len());
        Ok(())
    }

    /// Delete the record for one absolute path; returns the number of rows removed
    pub fn delete(&self, absolute_path: &str) -> Result<usize> {
        let conn = self.connect()?;
        let removed = conn
            .execute("DELETE FROM files WHERE absolute_path = ?", [absolute_path])
            .with_context(|| format!("Failed to delete {}", absolute_path))?;
        self.bump(removed);
        Ok(removed)
    }

    /// Delete every record located below a directory (not the directory itself)
    pub fn delete_under(&self, dir: &str) -> Result<usize> {
        let trimmed = dir.trim_end_matches(['/', '\\']);
        let conn = self.connect()?;

        let mut removed = 0;
        for sep in ['/', '\\'] {
            // substr keeps the comparison case-sensitive, unlike LIKE
            let prefix = format!("{}{}", trimmed, sep);
            removed += conn
                .execute(
                    "DELETE FROM files WHERE substr(absolute_path, 1, ?1) = ?2",
                    params![prefix.chars().count() as i64, prefix],
                )
                .with_context(|| format!("Failed to delete entries under {}", dir))?;
        }

        self.bump(removed);
        Ok(removed)
    }

    /// Remove every record (full re-index starts from an empty store)
    pub fn clear(&self) -> Result<()> {
        log::info!("Clearing index store");
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM files", []).context("Failed to clear files")?;
        tx.execute("DELETE FROM meta WHERE key = 'last_indexed_at'", [])?;
        tx.commit().context("Failed to commit clear")?;
        self.bump(removed.max(1));
        Ok(())
    }

    /// Look up a single record by absolute path
    pub fn get(&self, absolute_path: &str) -> Result<Option<FileRecord>> {
        let conn = self.connect()?;
        let sql = format!("SELECT {} FROM files f WHERE f.absolute_path = ?", SELECT_COLUMNS);
        let record = conn
            .query_row(&sql, [absolute_path], record_from_row)
            .optional()
            .with_context(|| format!("Failed to read {}", absolute_path))?;
        Ok(record)
    }

    /// Run a filtered read; `limit = None` returns every match after `offset`
    pub fn query(&self, query: &StoreQuery, limit: Option<usize>, offset: usize) -> Result<Vec<FileRecord>> {
        let conn = self.connect()?;

        let (clause, mut params) = query.build_clause();
        let order = query.order_clause(&mut params);
        let sql = format!("SELECT {}{}{} LIMIT ? OFFSET ?", SELECT_COLUMNS, clause, order);

        params.push(Value::Integer(limit.map(clamp_i64_usize).unwrap_or(-1)));
        params.push(Value::Integer(clamp_i64_usize(offset)));

        log::trace!("Store query: {}", sql);

        let mut stmt = conn.prepare(&sql).context("Failed to prepare store query")?;
        let records = stmt
            .query_map(params_from_iter(params.iter()), record_from_row)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read store rows")?;

        Ok(records)
    }

    /// Number of records a query would return without pagination
    pub fn count_matching(&self, query: &StoreQuery) -> Result<usize> {
        let conn = self.connect()?;
        let (clause, params) = query.build_clause();
        let sql = format!("SELECT COUNT(*){}", clause);
        let count: i64 = conn
            .query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))
            .context("Failed to count store rows")?;
        Ok(count as usize)
    }

    /// Total number of records
    pub fn count(&self) -> Result<usize> {
        let conn = self.connect()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))
            .context("Failed to count files")?;
        Ok(count as usize)
    }

    /// Up to `limit` records in default order (snapshot source for the fuzzy index)
    pub fn all(&self, limit: usize) -> Result<Vec<FileRecord>> {
        self.query(&StoreQuery::default(), Some(limit), 0)
    }

    /// Record the completion time of a full index run
    pub fn set_last_indexed(&self, at: DateTime<Utc>) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('last_indexed_at', ?)",
            [at.timestamp_millis().to_string()],
        )
        .context("Failed to record last index time")?;
        Ok(())
    }

    /// Aggregate statistics about the stored records
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.connect()?;

        let (total_entries, directories, total_bytes): (i64, i64, i64) = conn
            .query_row(
                "SELECT COUNT(*), COALESCE(SUM(is_directory), 0), COALESCE(SUM(size_bytes), 0) FROM files",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .context("Failed to read totals")?;

        let mut by_category = std::collections::BTreeMap::new();
        let mut stmt = conn.prepare("SELECT category, COUNT(*) FROM files GROUP BY category")?;
        let counts = stmt.query_map([], |row| {
            let category: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((category, count as usize))
        })?;
        for result in counts {
            let (category, count) = result?;
            by_category.insert(category, count);
        }

        let last_indexed_at = conn
            .query_row("SELECT value FROM meta WHERE key = 'last_indexed_at'", [], |row| {
                row.get::<_, String>(0)
            })
            .optional()?
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis);

        Ok(StoreStats {
            total_entries: total_entries as usize,
            files: (total_entries - directories) as usize,
            directories: directories as usize,
            total_bytes: total_bytes.max(0) as u64,
            by_category,
            last_indexed_at,
        })
    }

    /// Reclaim space after large deletions
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch("INSERT INTO files_fts (files_fts) VALUES ('optimize'); VACUUM;")
            .context("Failed to vacuum index store")?;
        Ok(())
    }
}

fn write_record(conn: &Connection, record: &FileRecord) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare_cached(UPSERT_SQL)?;
    stmt.execute(params![
        record.id,
        record.name,
        record.relative_path,
        record.absolute_path,
        record.extension,
        clamp_i64(record.size_bytes),
        record.modified_at.timestamp_millis(),
        record.created_at.timestamp_millis(),
        record.is_directory,
        record.category.to_string(),
    ])?;
    Ok(())
}

/// Exhaustive column-to-field mapping; fails on any unexpected shape
fn record_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let extension: String = row.get("extension")?;
    let is_directory: bool = row.get("is_directory")?;

    let stored_category: String = row.get("category")?;
    let category = Category::from_str(&stored_category).map_err(|e| conversion_error(9, Type::Text, e))?;
    let expected = Category::classify(&extension, is_directory);
    if category != expected {
        return Err(conversion_error(
            9,
            Type::Text,
            anyhow::anyhow!("stored category '{}' disagrees with computed '{}'", category, expected),
        ));
    }

    let size: i64 = row.get("size_bytes")?;
    let size_bytes = u64::try_from(size).map_err(|e| conversion_error(5, Type::Integer, e))?;

    Ok(FileRecord {
        id: row.get("id")?,
        name: row.get("name")?,
        relative_path: row.get("relative_path")?,
        absolute_path: row.get("absolute_path")?,
        extension,
        size_bytes,
        modified_at: millis_column(row, "modified_at", 6)?,
        created_at: millis_column(row, "created_at", 7)?,
        is_directory,
        category,
    })
}

fn millis_column(row: &Row<'_>, name: &str, index: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(name)?;
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        conversion_error(index, Type::Integer, anyhow::anyhow!("timestamp {} out of range", millis))
    })
}

fn conversion_error<E>(index: usize, ty: Type, err: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
{
    rusqlite::Error::FromSqlConversionFailure(index, ty, err.into())
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Quote text as a single FTS5 phrase so operators in user input stay literal
fn fts_phrase(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn clamp_i64_usize(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    fn open_store(temp: &TempDir) -> Store {
        Store::open(temp.path().join(DB_FILE)).unwrap()
    }

    fn record(path: &str, size: u64, is_dir: bool) -> FileRecord {
        let p = Path::new(path);
        let name = p.file_name().unwrap().to_string_lossy().to_string();
        let extension = if is_dir {
            String::new()
        } else {
            p.extension()
                .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
                .unwrap_or_default()
        };
        let now = DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap();
        FileRecord {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            relative_path: ".".to_string(),
            absolute_path: path.to_string(),
            category: Category::classify(&extension, is_dir),
            extension,
            size_bytes: if is_dir { 0 } else { size },
            modified_at: now,
            created_at: now,
            is_directory: is_dir,
        }
    }

    #[test]
    fn test_store_open_creates_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join(DB_FILE);
        let store = Store::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_store_open_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        store.upsert_one(&record("/r/a.txt", 10, false)).unwrap();
        drop(store);

        // Reopening with the same schema keeps data
        let store = open_store(&temp);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_schema_hash_mismatch_resets_tables() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        store.upsert_one(&record("/r/a.txt", 10, false)).unwrap();

        let conn = Connection::open(store.path()).unwrap();
        conn.execute("UPDATE meta SET value = 'stale' WHERE key = 'schema_hash'", [])
            .unwrap();
        drop(conn);
        drop(store);

        let store = open_store(&temp);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_upsert_one_and_get() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        let rec = record("/r/report.pdf", 4096, false);
        store.upsert_one(&rec).unwrap();

        let loaded = store.get("/r/report.pdf").unwrap().unwrap();
        assert_eq!(loaded, rec);
        assert!(store.get("/r/missing.pdf").unwrap().is_none());
    }

    #[test]
    fn test_upsert_keyed_on_absolute_path() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);

        let first = record("/r/a.txt", 10, false);
        store.upsert_one(&first).unwrap();

        // Same path, new id and size: row is updated, original id kept
        let second = record("/r/a.txt", 99, false);
        store.upsert_one(&second).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        let loaded = store.get("/r/a.txt").unwrap().unwrap();
        assert_eq!(loaded.size_bytes, 99);
        assert_eq!(loaded.id, first.id);
    }

    #[test]
    fn test_upsert_batch() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);

        let batch: Vec<FileRecord> = (0..50)
            .map(|i| record(&format!("/r/file{}.txt", i), i, false))
            .collect();
        store.upsert_batch(&batch).unwrap();

        assert_eq!(store.count().unwrap(), 50);
        assert!(store.mutation_count() >= 50);
    }

    #[test]
    fn test_upsert_batch_is_all_or_nothing() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);

        let a = record("/r/a.txt", 1, false);
        let mut b = record("/r/b.txt", 2, false);
        // Duplicate primary key on a different path violates the id constraint
        b.id = a.id.clone();

        assert!(store.upsert_batch(&[a, b]).is_err());
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_delete_and_delete_under() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        store
            .upsert_batch(&[
                record("/r/docs", 0, true),
                record("/r/docs/a.txt", 1, false),
                record("/r/docs/sub/b.txt", 1, false),
                record("/r/docs2/c.txt", 1, false),
            ])
            .unwrap();

        assert_eq!(store.delete_under("/r/docs").unwrap(), 2);
        assert_eq!(store.delete("/r/docs").unwrap(), 1);
        assert_eq!(store.delete("/r/docs").unwrap(), 0);

        // Sibling with a shared prefix survives
        assert!(store.get("/r/docs2/c.txt").unwrap().is_some());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_clear() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        store.upsert_one(&record("/r/a.txt", 1, false)).unwrap();
        store.clear().unwrap();
        assert_eq!(store.count().unwrap(), 0);

        // FTS mirror is emptied with the primary table
        let query = StoreQuery {
            text: Some("a.txt".to_string()),
            ..Default::default()
        };
        assert!(store.query(&query, None, 0).unwrap().is_empty());
    }

    #[test]
    fn test_default_order_directories_first_then_name() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        store
            .upsert_batch(&[
                record("/r/beta.txt", 1, false),
                record("/r/Alpha.txt", 1, false),
                record("/r/zeta", 0, true),
                record("/r/gamma", 0, true),
            ])
            .unwrap();

        let names: Vec<String> = store
            .query(&StoreQuery::default(), None, 0)
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["gamma", "zeta", "Alpha.txt", "beta.txt"]);
    }

    #[test]
    fn test_fulltext_substring_match() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        store
            .upsert_batch(&[
                record("/r/quarterly_report.txt", 1, false),
                record("/r/Report.txt", 1, false),
                record("/r/notes.txt", 1, false),
            ])
            .unwrap();

        let query = StoreQuery {
            text: Some("REPORT".to_string()),
            order: StoreOrder::Relevance,
            ..Default::default()
        };
        let results = store.query(&query, None, 0).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(store.count_matching(&query).unwrap(), 2);
    }

    #[test]
    fn test_short_text_uses_like() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        store
            .upsert_batch(&[record("/r/ab.txt", 1, false), record("/r/cd.txt", 1, false)])
            .unwrap();

        let query = StoreQuery {
            text: Some("ab".to_string()),
            order: StoreOrder::Relevance,
            ..Default::default()
        };
        let results = store.query(&query, None, 0).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "ab.txt");
    }

    #[test]
    fn test_like_wildcards_are_literal() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        store
            .upsert_batch(&[record("/r/a_b.txt", 1, false), record("/r/axb.txt", 1, false)])
            .unwrap();

        let query = StoreQuery {
            text: Some("_b".to_string()),
            ..Default::default()
        };
        let results = store.query(&query, None, 0).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "a_b.txt");
    }

    #[test]
    fn test_filters_in_sql() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);

        let mut old = record("/r/old.pdf", 20_000_000, false);
        old.modified_at = old.modified_at - ChronoDuration::days(90);
        store
            .upsert_batch(&[
                record("/r/big.pdf", 20_000_000, false),
                record("/r/small.pdf", 1_000, false),
                old,
                record("/r/big.mp4", 50_000_000, false),
                record("/r/folder", 0, true),
            ])
            .unwrap();

        let filters = SearchFilters {
            extensions: vec![".pdf".to_string()],
            size_min: Some(10_000_000),
            ..Default::default()
        };
        assert_eq!(store.query(&StoreQuery::filtered(filters), None, 0).unwrap().len(), 2);

        let recent = SearchFilters {
            extensions: vec![".pdf".to_string()],
            modified_from: Some(Utc::now() - ChronoDuration::days(7)),
            ..Default::default()
        };
        assert_eq!(store.query(&StoreQuery::filtered(recent), None, 0).unwrap().len(), 2);

        let dirs_only = SearchFilters {
            include_files: false,
            ..Default::default()
        };
        let dirs = store.query(&StoreQuery::filtered(dirs_only), None, 0).unwrap();
        assert_eq!(dirs.len(), 1);
        assert!(dirs[0].is_directory);

        let videos = SearchFilters {
            categories: vec![Category::Video],
            ..Default::default()
        };
        assert_eq!(store.count_matching(&StoreQuery::filtered(videos)).unwrap(), 1);
    }

    #[test]
    fn test_query_pagination() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        let batch: Vec<FileRecord> = (0..25)
            .map(|i| record(&format!("/r/f{:02}.txt", i), 1, false))
            .collect();
        store.upsert_batch(&batch).unwrap();

        let page = store.query(&StoreQuery::default(), Some(10), 20).unwrap();
        assert_eq!(page.len(), 5);
        assert_eq!(page[0].name, "f20.txt");
    }

    #[test]
    fn test_corrupt_category_fails_fast() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        store.upsert_one(&record("/r/a.pdf", 1, false)).unwrap();

        let conn = Connection::open(store.path()).unwrap();
        conn.execute("UPDATE files SET category = 'image'", []).unwrap();
        drop(conn);

        assert!(store.get("/r/a.pdf").is_err());
    }

    #[test]
    fn test_stats() {
        let temp = TempDir::new().unwrap();
        let store = open_store(&temp);
        store
            .upsert_batch(&[
                record("/r/a.pdf", 100, false),
                record("/r/b.png", 50, false),
                record("/r/dir", 0, true),
            ])
            .unwrap();
        store.set_last_indexed(Utc::now()).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.files, 2);
        assert_eq!(stats.directories, 1);
        assert_eq!(stats.total_bytes, 150);
        assert_eq!(stats.by_category.get("document"), Some(&1));
        assert!(stats.last_indexed_at.is_some());
    }

    #[test]
    fn test_concurrent_writers() {
        let temp = TempDir::new().unwrap();
        let store = std::sync::Arc::new(open_store(&temp));

        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        store.upsert_one(&record(&format!("/r/t{}_{}.txt", t, i), 1, false)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.count().unwrap(), 100);
    }
}
