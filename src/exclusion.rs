//! Path exclusion shared by the scanner and the watcher
//!
//! An entry is excluded when:
//! - a path segment below the root case-insensitively equals a default name
//!   (`node_modules`, `.git`, `target`, ...),
//! - the normalized absolute path contains a caller token as a substring
//!   (`secret` excludes `secrets/` and `topsecret.txt`; `Projects/old` works too),
//! - the path starts with a protected system prefix (`/proc/`, `c:/windows/`, ...),
//! - or the path is deeper than the hard depth cap.
//!
//! Default names are whole segments so that `obj` leaves `object.txt` alone.
//! Caller tokens see the whole absolute path, root included.
//!
//! Hidden entries (names starting with `.` or `$`) are rejected by the scanner
//! and watcher before this filter is consulted; see [`is_hidden_name`].

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Component, Path};

/// Default maximum number of path segments before an entry is skipped outright
pub const MAX_PATH_DEPTH: usize = 64;

/// Directory names that are never worth indexing
pub const DEFAULT_EXCLUDED_NAMES: &[&str] = &[
    // Version control
    ".git",
    ".svn",
    ".hg",
    ".bzr",
    // Package manager caches
    "node_modules",
    "bower_components",
    ".npm",
    ".yarn",
    ".pnpm-store",
    ".cargo",
    ".m2",
    ".gradle",
    "__pycache__",
    ".venv",
    "site-packages",
    // Temp / recycle
    "tmp",
    "temp",
    ".tmp",
    ".cache",
    "$recycle.bin",
    "recycler",
    ".trash",
    ".trashes",
    ".spotlight-v100",
    ".fseventsd",
    "system volume information",
    // Build output
    "target",
    "dist",
    "build",
    ".next",
    ".nuxt",
    "obj",
];

/// OS system trees, matched as prefixes of the normalized absolute path
pub const SYSTEM_PREFIXES: &[&str] = &[
    "/proc/",
    "/sys/",
    "/dev/",
    "/run/",
    "/snap/",
    "/private/var/",
    "/system/",
    "/library/caches/",
    "c:/windows/",
    "c:/program files/windowsapps/",
    "c:/programdata/microsoft/",
];

/// True for entries the scanner and watcher skip before any other check
pub fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('$')
}

/// Lower-cased, forward-slash form of a path used for all comparisons
pub fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/").to_lowercase()
}

/// Decides whether a path must be skipped
#[derive(Debug, Clone)]
pub struct ExclusionFilter {
    /// Default names, compared against individual segments below the root
    names: Vec<String>,
    /// Caller tokens, lower-cased with `/` separators, matched anywhere in the path
    tokens: Vec<String>,
    max_depth: usize,
}

impl ExclusionFilter {
    /// Build a filter from the default denylist plus caller tokens
    pub fn new<S: AsRef<str>>(extra_tokens: &[S]) -> Self {
        let names: Vec<String> = DEFAULT_EXCLUDED_NAMES.iter().map(|s| s.to_string()).collect();
        let mut tokens = Vec::new();

        for token in extra_tokens {
            let token = token.as_ref().trim();
            // A bare separator would exclude everything
            if token.trim_matches(|c| c == '/' || c == '\\').is_empty() {
                continue;
            }

            // Keep the separators the caller wrote; "/old/" must not match "/older"
            tokens.push(token.replace('\\', "/").to_lowercase());
        }

        tokens.sort();
        tokens.dedup();

        Self {
            names,
            tokens,
            max_depth: MAX_PATH_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Check whether a path is excluded, evaluating every segment
    #[cfg(test)]
    pub fn is_excluded(&self, path: &Path) -> bool {
        self.is_excluded_within(Path::new(""), path)
    }

    /// Check a path found below `root`
    ///
    /// Default names and depth only look at the part below the root: the
    /// caller chose the root, so `/tmp/work` is indexable even though `tmp`
    /// is a default name. Caller tokens and system prefixes see the full path.
    pub fn is_excluded_within(&self, root: &Path, path: &Path) -> bool {
        let relative = path.strip_prefix(root).unwrap_or(path);

        let mut depth = 0usize;
        for component in relative.components() {
            if let Component::Normal(segment) = component {
                depth += 1;
                if self.is_default_name(&segment.to_string_lossy()) {
                    return true;
                }
            }
        }

        if depth > self.max_depth {
            log::debug!("Excluding {} (depth {} > {})", path.display(), depth, self.max_depth);
            return true;
        }

        self.matches_location(path)
    }

    fn is_default_name(&self, segment: &str) -> bool {
        let segment = segment.to_lowercase();
        self.names.iter().any(|name| *name == segment)
    }

    /// System prefixes and caller tokens, checked against the full path
    pub fn matches_location(&self, path: &Path) -> bool {
        // Trailing slash lets "/proc/" and "a/b/" match the directory itself
        let mut normalized = normalize_path(path);
        normalized.push('/');

        if SYSTEM_PREFIXES.iter().any(|prefix| normalized.starts_with(prefix)) {
            return true;
        }

        self.tokens.iter().any(|token| normalized.contains(token.as_str()))
    }

    /// Translate the exclusion tokens into glob patterns (`**`, `*`, `?`)
    ///
    /// The patterns are meant for paths relative to a watched root; system
    /// prefixes are anchored and stay with [`ExclusionFilter::matches_location`].
    pub fn glob_patterns(&self) -> Vec<String> {
        let mut patterns = Vec::new();

        for name in &self.names {
            let escaped = globset::escape(name);
            patterns.push(format!("**/{}", escaped));
            patterns.push(format!("**/{}/**", escaped));
        }

        // `*` crosses separators here, so this is a plain substring match
        for token in &self.tokens {
            patterns.push(format!("*{}*", globset::escape(token)));
        }

        patterns
    }

    /// Compile the glob translation into a case-insensitive matcher
    pub fn compile_globs(&self) -> Result<GlobSet> {
        let mut builder = GlobSetBuilder::new();

        for pattern in self.glob_patterns() {
            let glob = GlobBuilder::new(&pattern)
                .case_insensitive(true)
                .build()
                .with_context(|| format!("Invalid exclusion pattern: {}", pattern))?;
            builder.add(glob);
        }

        builder.build().context("Failed to compile exclusion patterns")
    }
}

impl Default for ExclusionFilter {
    fn default() -> Self {
        Self::new::<&str>(&[])
    }
}
