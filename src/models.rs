//! Core data models for findex
//!
//! These structures are the typed records that flow between the scanner,
//! the watcher, the store and the search executor, and that cross the
//! boundary to whatever UI or IPC layer embeds the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Coarse classification of a filesystem entry
///
/// A pure function of `(extension, is_directory)`; see [`Category::classify`].
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, EnumString, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Category {
    Document,
    Image,
    Video,
    Audio,
    Archive,
    Code,
    Directory,
    Other,
}

const DOCUMENT_EXTENSIONS: &[&str] = &[
    ".pdf", ".doc", ".docx", ".txt", ".rtf", ".odt", ".ods", ".odp", ".md", ".xls", ".xlsx",
    ".ppt", ".pptx", ".csv", ".pages", ".numbers", ".key", ".epub", ".tex",
];

const IMAGE_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".bmp", ".svg", ".webp", ".tif", ".tiff", ".ico", ".heic",
    ".heif", ".raw", ".psd", ".avif",
];

const VIDEO_EXTENSIONS: &[&str] = &[
    ".mp4", ".avi", ".mkv", ".mov", ".wmv", ".flv", ".webm", ".m4v", ".mpg", ".mpeg", ".3gp",
];

const AUDIO_EXTENSIONS: &[&str] = &[
    ".mp3", ".wav", ".flac", ".aac", ".ogg", ".wma", ".m4a", ".opus", ".aiff", ".mid",
];

const ARCHIVE_EXTENSIONS: &[&str] = &[
    ".zip", ".rar", ".7z", ".tar", ".gz", ".bz2", ".xz", ".tgz", ".zst", ".iso", ".dmg", ".cab",
];

const CODE_EXTENSIONS: &[&str] = &[
    ".rs", ".js", ".mjs", ".cjs", ".jsx", ".ts", ".tsx", ".py", ".go", ".java", ".kt", ".c",
    ".h", ".cpp", ".cc", ".hpp", ".cs", ".rb", ".php", ".swift", ".zig", ".vue", ".svelte",
    ".html", ".css", ".scss", ".json", ".xml", ".yaml", ".yml", ".toml", ".sh", ".ps1", ".sql",
    ".lua",
];

impl Category {
    /// Classify an entry from its normalized extension (leading dot, lower-case)
    pub fn classify(extension: &str, is_directory: bool) -> Self {
        if is_directory {
            return Category::Directory;
        }

        let ext = extension.to_ascii_lowercase();
        let ext = ext.as_str();

        if DOCUMENT_EXTENSIONS.contains(&ext) {
            Category::Document
        } else if IMAGE_EXTENSIONS.contains(&ext) {
            Category::Image
        } else if VIDEO_EXTENSIONS.contains(&ext) {
            Category::Video
        } else if AUDIO_EXTENSIONS.contains(&ext) {
            Category::Audio
        } else if ARCHIVE_EXTENSIONS.contains(&ext) {
            Category::Archive
        } else if CODE_EXTENSIONS.contains(&ext) {
            Category::Code
        } else {
            Category::Other
        }
    }

    /// Resolve a user-facing type name (`type:` operator) to a category
    pub fn from_alias(alias: &str) -> Option<Self> {
        match alias.to_lowercase().as_str() {
            "document" | "documents" | "doc" | "docs" | "text" => Some(Category::Document),
            "image" | "images" | "img" | "photo" | "photos" | "picture" | "pictures" => {
                Some(Category::Image)
            }
            "video" | "videos" | "movie" | "movies" => Some(Category::Video),
            "audio" | "music" | "sound" | "sounds" => Some(Category::Audio),
            "archive" | "archives" | "zip" | "compressed" => Some(Category::Archive),
            "code" | "source" | "src" => Some(Category::Code),
            "folder" | "folders" | "dir" | "directory" | "directories" => Some(Category::Directory),
            "other" => Some(Category::Other),
            _ => None,
        }
    }
}

/// Normalize a user-supplied extension to the stored form: lower-case with a leading dot
pub fn normalize_extension(ext: &str) -> String {
    let trimmed = ext.trim().trim_start_matches('.').to_lowercase();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(".{}", trimmed)
    }
}

/// One indexed filesystem object
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Opaque identifier generated at index time
    pub id: String,
    /// Base name
    pub name: String,
    /// Containing directory relative to the indexed root (`"."` for root-level entries)
    pub relative_path: String,
    /// Full path; unique across the store
    pub absolute_path: String,
    /// Lower-cased extension with leading dot, empty for directories
    pub extension: String,
    /// Size in bytes, 0 for directories
    pub size_bytes: u64,
    pub modified_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub is_directory: bool,
    pub category: Category,
}

impl FileRecord {
    /// Lower-cased name without its extension
    pub fn stem_lower(&self) -> String {
        let lower = self.name.to_lowercase();
        match lower.strip_suffix(self.extension.as_str()) {
            Some(stem) if !self.extension.is_empty() && !stem.is_empty() => stem.to_string(),
            _ => lower,
        }
    }
}

/// Filters applied to every search strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchFilters {
    /// Restrict to these categories (empty = all)
    pub categories: Vec<Category>,
    /// Restrict to these extensions, normalized with a leading dot (empty = all)
    pub extensions: Vec<String>,
    /// Minimum size in bytes (inclusive)
    pub size_min: Option<u64>,
    /// Maximum size in bytes (inclusive)
    pub size_max: Option<u64>,
    /// Earliest modification time (inclusive)
    pub modified_from: Option<DateTime<Utc>>,
    /// Latest modification time (inclusive)
    pub modified_to: Option<DateTime<Utc>>,
    /// Include directory records
    pub include_directories: bool,
    /// Include non-directory records
    pub include_files: bool,
}

impl Default for SearchFilters {
    fn default() -> Self {
        Self {
            categories: Vec::new(),
            extensions: Vec::new(),
            size_min: None,
            size_max: None,
            modified_from: None,
            modified_to: None,
            include_directories: true,
            include_files: true,
        }
    }
}

impl SearchFilters {
    /// Normalize extensions in place so comparisons against stored values are exact
    pub fn normalized(mut self) -> Self {
        self.extensions = self
            .extensions
            .iter()
            .map(|e| normalize_extension(e))
            .filter(|e| !e.is_empty())
            .collect();
        self.extensions.sort();
        self.extensions.dedup();
        self
    }

    /// Check a single record against every active filter
    pub fn matches(&self, record: &FileRecord) -> bool {
        if record.is_directory && !self.include_directories {
            return false;
        }
        if !record.is_directory && !self.include_files {
            return false;
        }
        if !self.categories.is_empty() && !self.categories.contains(&record.category) {
            return false;
        }
        if !self.extensions.is_empty() && !self.extensions.iter().any(|e| *e == record.extension) {
            return false;
        }
        if let Some(min) = self.size_min {
            if record.size_bytes < min {
                return false;
            }
        }
        if let Some(max) = self.size_max {
            if record.size_bytes > max {
                return false;
            }
        }
        if let Some(from) = self.modified_from {
            if record.modified_at < from {
                return false;
            }
        }
        if let Some(to) = self.modified_to {
            if record.modified_at > to {
                return false;
            }
        }
        true
    }
}

/// Result page returned by a search
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub items: Vec<FileRecord>,
    /// Number of matches before pagination
    pub total_count: usize,
    /// The query string exactly as received
    pub query: String,
    pub execution_time_ms: u64,
}

impl SearchResponse {
    pub fn empty(query: &str, execution_time_ms: u64) -> Self {
        Self {
            items: Vec::new(),
            total_count: 0,
            query: query.to_string(),
            execution_time_ms,
        }
    }
}

/// Lifecycle state of the (single) indexing session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexingState {
    #[default]
    Idle,
    Running,
    Completing,
    Failed,
}

/// Snapshot of indexing progress as reported to callers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct IndexingProgress {
    pub is_indexing: bool,
    pub files_processed: u64,
    /// 0-100, capped at 95 until the run is finalized
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_path: Option<String>,
}

/// Aggregate statistics about the store
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total_entries: usize,
    pub files: usize,
    pub directories: usize,
    pub total_bytes: u64,
    pub by_category: std::collections::BTreeMap<String, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_indexed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, ext: &str, is_dir: bool) -> FileRecord {
        FileRecord {
            id: "id".to_string(),
            name: name.to_string(),
            relative_path: ".".to_string(),
            absolute_path: format!("/root/{}", name),
            extension: ext.to_string(),
            size_bytes: if is_dir { 0 } else { 1024 },
            modified_at: Utc::now(),
            created_at: Utc::now(),
            is_directory: is_dir,
            category: Category::classify(ext, is_dir),
        }
    }

    #[test]
    fn test_category_classify() {
        assert_eq!(Category::classify(".pdf", false), Category::Document);
        assert_eq!(Category::classify("", true), Category::Directory);
        assert_eq!(Category::classify(".PNG", false), Category::Image);
        assert_eq!(Category::classify(".rs", false), Category::Code);
        assert_eq!(Category::classify(".unknown", false), Category::Other);
        assert_eq!(Category::classify("", false), Category::Other);
    }

    #[test]
    fn test_category_directory_wins_over_extension() {
        assert_eq!(Category::classify(".pdf", true), Category::Directory);
    }

    #[test]
    fn test_category_string_roundtrip() {
        assert_eq!(Category::Archive.to_string(), "archive");
        assert_eq!("video".parse::<Category>().unwrap(), Category::Video);
        assert!("nonsense".parse::<Category>().is_err());
    }

    #[test]
    fn test_category_aliases() {
        assert_eq!(Category::from_alias("folder"), Some(Category::Directory));
        assert_eq!(Category::from_alias("Photos"), Some(Category::Image));
        assert_eq!(Category::from_alias("music"), Some(Category::Audio));
        assert_eq!(Category::from_alias("spreadsheet"), None);
    }

    #[test]
    fn test_normalize_extension() {
        assert_eq!(normalize_extension("PDF"), ".pdf");
        assert_eq!(normalize_extension(".Txt"), ".txt");
        assert_eq!(normalize_extension(""), "");
        assert_eq!(normalize_extension("."), "");
    }

    #[test]
    fn test_stem_lower() {
        assert_eq!(record("Report.PDF", ".pdf", false).stem_lower(), "report");
        assert_eq!(record("Makefile", "", false).stem_lower(), "makefile");
        assert_eq!(record("src", "", true).stem_lower(), "src");
    }

    #[test]
    fn test_filters_default_matches_everything() {
        let filters = SearchFilters::default();
        assert!(filters.matches(&record("a.txt", ".txt", false)));
        assert!(filters.matches(&record("dir", "", true)));
    }

    #[test]
    fn test_filters_directories_toggle() {
        let filters = SearchFilters {
            include_directories: false,
            ..Default::default()
        };
        assert!(!filters.matches(&record("dir", "", true)));
        assert!(filters.matches(&record("a.txt", ".txt", false)));
    }

    #[test]
    fn test_filters_extension_and_size() {
        let filters = SearchFilters {
            extensions: vec!["PDF".to_string()],
            size_min: Some(2048),
            ..Default::default()
        }
        .normalized();

        assert_eq!(filters.extensions, vec![".pdf".to_string()]);

        let mut small = record("a.pdf", ".pdf", false);
        small.size_bytes = 1000;
        let mut large = record("b.pdf", ".pdf", false);
        large.size_bytes = 4096;

        assert!(!filters.matches(&small));
        assert!(filters.matches(&large));
        assert!(!filters.matches(&record("c.txt", ".txt", false)));
    }

    #[test]
    fn test_filters_date_bounds() {
        let now = Utc::now();
        let filters = SearchFilters {
            modified_from: Some(now - chrono::Duration::days(1)),
            ..Default::default()
        };

        let mut old = record("old.txt", ".txt", false);
        old.modified_at = now - chrono::Duration::days(10);

        assert!(!filters.matches(&old));
        assert!(filters.matches(&record("new.txt", ".txt", false)));
    }
}
