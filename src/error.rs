//! Error types for environment discovery.
//!
//! "Not found" is not an error: resolution returns `Ok(None)` for an
//! identity no locator recognizes. Failures while reading a single entry
//! during a scan are logged and skipped rather than returned.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LocatorError {
    /// The locator or engine was used after `dispose()`.
    #[error("locator has been disposed")]
    Disposed,

    /// An I/O error while probing a specific entry.
    #[error("failed to probe {path:?}: {source}")]
    Probe {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A source's root directory does not exist.
    #[error("source unavailable: {0:?} does not exist")]
    SourceUnavailable(PathBuf),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("failed to watch {path:?}: {message}")]
    Watch { path: PathBuf, message: String },
}

impl LocatorError {
    pub(crate) fn probe(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LocatorError::Probe {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, LocatorError>;
