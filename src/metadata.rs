//! Metadata extraction: filesystem entry + stat result -> FileRecord

use chrono::{DateTime, Utc};
use std::fs::Metadata;
use std::io;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::models::{Category, FileRecord};

/// Stat a path without following symlinks and build its record; symlinks yield `None`
pub fn stat_record(path: &Path, root: &Path) -> io::Result<Option<FileRecord>> {
    let metadata = std::fs::symlink_metadata(path)?;
    if metadata.file_type().is_symlink() {
        return Ok(None);
    }
    Ok(Some(extract(path, root, &metadata)))
}

/// Build a record from an already-obtained stat result
pub fn extract(path: &Path, root: &Path, metadata: &Metadata) -> FileRecord {
    let is_directory = metadata.is_dir();

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string());

    let extension = if is_directory {
        String::new()
    } else {
        path.extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default()
    };

    let modified_at = metadata
        .modified()
        .map(to_millis_precision)
        .unwrap_or_else(|_| to_millis_precision(UNIX_EPOCH));
    let created_at = metadata
        .created()
        .map(to_millis_precision)
        .unwrap_or(modified_at);

    FileRecord {
        id: uuid::Uuid::new_v4().to_string(),
        name,
        relative_path: relative_dir(path, root),
        absolute_path: path.to_string_lossy().to_string(),
        category: Category::classify(&extension, is_directory),
        extension,
        size_bytes: if is_directory { 0 } else { metadata.len() },
        modified_at,
        created_at,
        is_directory,
    }
}

/// Containing directory of `path` relative to `root`; `"."` for root-level entries
pub fn relative_dir(path: &Path, root: &Path) -> String {
    let Some(parent) = path.parent() else {
        return ".".to_string();
    };

    match parent.strip_prefix(root) {
        Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
        Ok(rel) => rel.to_string_lossy().to_string(),
        // Outside the root (should not happen for scanned entries); keep the full parent
        Err(_) => parent.to_string_lossy().to_string(),
    }
}

/// The store keeps millisecond timestamps; truncate here so fresh and stored records compare equal
fn to_millis_precision(time: SystemTime) -> DateTime<Utc> {
    let dt = DateTime::<Utc>::from(time);
    DateTime::from_timestamp_millis(dt.timestamp_millis()).unwrap_or(dt)
}
