//! Build-time schema hash computation for automatic index invalidation
//!
//! This build script hashes every source file that defines the on-disk layout
//! of `index.db`. If any of them change (new columns, new indexes, different
//! category encoding), the hash changes and the store drops and recreates its
//! tables the next time it is opened.
//!
//! ## How it works:
//! 1. At build time: Hash all schema-critical files and store as FINDEX_SCHEMA_HASH env var
//! 2. At runtime: Compare the hash stored in the `meta` table with FINDEX_SCHEMA_HASH
//! 3. On mismatch: Drop all tables and recreate them (the next index run repopulates)
//!
//! ## Schema-critical files:
//! - src/store.rs: SQLite schema, triggers, and row mapping
//! - src/models.rs: FileRecord and Category encoding

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Source files that affect database compatibility
const SCHEMA_CRITICAL_FILES: &[&str] = &["src/store.rs", "src/models.rs"];

fn main() {
    let schema_hash = compute_schema_hash();

    // Export as environment variable for runtime access
    println!("cargo:rustc-env=FINDEX_SCHEMA_HASH={}", schema_hash);

    for file in SCHEMA_CRITICAL_FILES {
        println!("cargo:rerun-if-changed={}", file);
    }
}

/// Compute a deterministic hash of all schema-critical source files
fn compute_schema_hash() -> String {
    let mut hasher = blake3::Hasher::new();

    // BTreeSet keeps the hashing order stable regardless of the const ordering
    let files: BTreeSet<&str> = SCHEMA_CRITICAL_FILES.iter().copied().collect();

    for file_path in &files {
        let path = Path::new(file_path);

        if !path.exists() {
            panic!("Schema-critical file not found: {}", file_path);
        }

        let content = fs::read(path)
            .unwrap_or_else(|e| panic!("Failed to read {}: {}", file_path, e));

        hasher.update(file_path.as_bytes());
        hasher.update(&content);
    }

    // First 8 bytes (64 bits) are plenty to detect a change
    let hash = hasher.finalize();
    hash.as_bytes()[..8]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<String>()
}
