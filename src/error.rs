//! Error taxonomy for the engine boundary and filesystem failure classification

use std::io;

use thiserror::Error;

/// Errors surfaced to callers of [`crate::engine::Engine`]
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("already indexing")]
    AlreadyIndexing,

    #[error("no valid paths")]
    NoValidPaths,

    /// The store file could not be opened or created; the engine is unusable
    #[error("failed to open index store: {0:#}")]
    StoreOpen(anyhow::Error),

    #[error("store operation failed: {0:#}")]
    Store(anyhow::Error),
}

/// How a filesystem failure should be treated by the scanner and watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsErrorKind {
    /// Permission denied, busy or locked: skipped silently
    Access,
    /// Entry vanished between listing and stat: skipped silently
    NotFound,
    /// Anything else: skipped with a warning
    Other,
}

// Raw OS codes that mean "busy/locked" rather than a genuine failure.
#[cfg(unix)]
const BUSY_CODES: &[i32] = &[16 /* EBUSY */, 26 /* ETXTBSY */];
#[cfg(windows)]
const BUSY_CODES: &[i32] = &[32 /* ERROR_SHARING_VIOLATION */, 33 /* ERROR_LOCK_VIOLATION */];
#[cfg(not(any(unix, windows)))]
const BUSY_CODES: &[i32] = &[];

impl FsErrorKind {
    pub fn classify(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => FsErrorKind::Access,
            io::ErrorKind::NotFound => FsErrorKind::NotFound,
            _ => match err.raw_os_error() {
                Some(code) if BUSY_CODES.contains(&code) => FsErrorKind::Access,
                _ => FsErrorKind::Other,
            },
        }
    }

    /// Access and NotFound failures are expected during scans and never warrant a warning
    pub fn is_silent(self) -> bool {
        matches!(self, FsErrorKind::Access | FsErrorKind::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_permission_denied() {
        let err = io::Error::from(io::ErrorKind::PermissionDenied);
        assert_eq!(FsErrorKind::classify(&err), FsErrorKind::Access);
        assert!(FsErrorKind::classify(&err).is_silent());
    }

    #[test]
    fn test_classify_not_found() {
        let err = io::Error::from(io::ErrorKind::NotFound);
        assert_eq!(FsErrorKind::classify(&err), FsErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[test]
    fn test_classify_busy() {
        let err = io::Error::from_raw_os_error(16);
        assert_eq!(FsErrorKind::classify(&err), FsErrorKind::Access);
    }

    #[test]
    fn test_classify_other() {
        let err = io::Error::other("disk on fire");
        assert_eq!(FsErrorKind::classify(&err), FsErrorKind::Other);
        assert!(!FsErrorKind::classify(&err).is_silent());
    }

    #[test]
    fn test_engine_error_messages() {
        assert_eq!(EngineError::AlreadyIndexing.to_string(), "already indexing");
        assert_eq!(EngineError::NoValidPaths.to_string(), "no valid paths");
    }
}
