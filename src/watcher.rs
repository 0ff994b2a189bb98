//! File system watch service.
//!
//! Locators never watch the filesystem directly; they ask a [`FileWatcher`]
//! for a watch on a root directory filtered by a glob-style pattern and get
//! back a [`WatchHandle`]. Dropping or disposing the handle ends the watch.

use notify::{RecursiveMode, Watcher};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult};
use std::any::Any;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{LocatorError, Result};
use crate::pattern::glob_match;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsChangeKind {
    Created,
    Changed,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsChange {
    pub path: PathBuf,
    pub kind: FsChangeKind,
}

/// Callback invoked for every matching change.
pub type ChangeCallback = Arc<dyn Fn(FsChange) + Send + Sync + 'static>;

pub trait FileWatcher: Send + Sync {
    /// Starts watching `root` for changes to paths matching `pattern`
    /// (relative to `root`, `/`-separated). Patterns containing `/` watch
    /// recursively.
    ///
    /// # Errors
    ///
    /// [`LocatorError::SourceUnavailable`] if `root` is not a directory,
    /// [`LocatorError::Watch`] if the platform watcher cannot be set up.
    fn watch(&self, root: &Path, pattern: &str, on_change: ChangeCallback) -> Result<WatchHandle>;
}

/// A live watch. The watch stays active until [`dispose`](Self::dispose) is
/// called or the handle is dropped.
pub struct WatchHandle {
    root: PathBuf,
    guard: Mutex<Option<Box<dyn Any + Send>>>,
}

impl WatchHandle {
    pub fn new(root: impl Into<PathBuf>, guard: impl Any + Send) -> Self {
        Self {
            root: root.into(),
            guard: Mutex::new(Some(Box::new(guard))),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_active(&self) -> bool {
        self.guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Ends the watch. Calling it again is a no-op.
    pub fn dispose(&self) {
        let guard = self
            .guard
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if guard.is_some() {
            debug!("Stopped watching {:?}", self.root);
        }
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("root", &self.root)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Does `path` (under `root`) match `pattern`?
pub fn matches_pattern(root: &Path, pattern: &str, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    let relative: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if relative.is_empty() {
        return false;
    }
    glob_match(pattern, &relative.join("/"))
}

/// How long a path must stay quiet before its changes are reported.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// [`FileWatcher`] backed by the platform's native watcher via `notify`.
///
/// Events are debounced per path, so a burst of writes to one file is
/// reported once. The debounced events do not tell creation from
/// modification: a path that still exists is reported as
/// [`FsChangeKind::Changed`], a vanished one as [`FsChangeKind::Deleted`].
#[derive(Debug, Clone, Copy)]
pub struct NotifyWatcher {
    debounce: Duration,
}

impl NotifyWatcher {
    pub fn new(debounce: Duration) -> Self {
        Self { debounce }
    }
}

impl Default for NotifyWatcher {
    fn default() -> Self {
        Self::new(DEFAULT_DEBOUNCE)
    }
}

impl FileWatcher for NotifyWatcher {
    fn watch(&self, root: &Path, pattern: &str, on_change: ChangeCallback) -> Result<WatchHandle> {
        if !root.is_dir() {
            return Err(LocatorError::SourceUnavailable(root.to_path_buf()));
        }

        let watched_root = root.to_path_buf();
        let owned_pattern = pattern.to_string();
        let mut debouncer = new_debouncer(self.debounce, move |res: DebounceEventResult| {
            match res {
                Ok(events) => {
                    for event in events {
                        if !matches_pattern(&watched_root, &owned_pattern, &event.path) {
                            continue;
                        }
                        let kind = if event.path.exists() {
                            FsChangeKind::Changed
                        } else {
                            FsChangeKind::Deleted
                        };
                        on_change(FsChange {
                            path: event.path,
                            kind,
                        });
                    }
                }
                Err(err) => warn!("File watcher error: {}", err),
            }
        })
        .map_err(|e| LocatorError::Watch {
            path: root.to_path_buf(),
            message: format!("Failed to create file watcher: {}", e),
        })?;

        let mode = if pattern.contains('/') {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        debouncer
            .watcher()
            .watch(root, mode)
            .map_err(|e| LocatorError::Watch {
                path: root.to_path_buf(),
                message: format!("Failed to watch directory: {}", e),
            })?;

        info!("Started watching {:?} for {}", root, pattern);
        Ok(WatchHandle::new(root, debouncer))
    }
}

struct Registration {
    root: PathBuf,
    pattern: String,
    on_change: ChangeCallback,
    active: Arc<AtomicBool>,
}

struct ActiveFlag(Arc<AtomicBool>);

impl Drop for ActiveFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A [`FileWatcher`] driven by explicit [`fire`](Self::fire) calls instead
/// of the OS. Useful when changes are detected by other means, such as a
/// periodic re-probe.
#[derive(Default, Clone)]
pub struct ManualWatcher {
    registrations: Arc<Mutex<Vec<Registration>>>,
}

impl ManualWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports a change to every active watch whose root and pattern match.
    /// Returns the number of watches notified.
    pub fn fire(&self, path: impl AsRef<Path>, kind: FsChangeKind) -> usize {
        let path = path.as_ref();
        let callbacks: Vec<ChangeCallback> = {
            let mut registrations = self
                .registrations
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            registrations.retain(|r| r.active.load(Ordering::SeqCst));
            registrations
                .iter()
                .filter(|r| matches_pattern(&r.root, &r.pattern, path))
                .map(|r| Arc::clone(&r.on_change))
                .collect()
        };
        for callback in &callbacks {
            callback(FsChange {
                path: path.to_path_buf(),
                kind,
            });
        }
        callbacks.len()
    }

    pub fn active_watches(&self) -> usize {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.active.load(Ordering::SeqCst))
            .count()
    }
}

impl FileWatcher for ManualWatcher {
    fn watch(&self, root: &Path, pattern: &str, on_change: ChangeCallback) -> Result<WatchHandle> {
        if !root.is_dir() {
            return Err(LocatorError::SourceUnavailable(root.to_path_buf()));
        }
        let active = Arc::new(AtomicBool::new(true));
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Registration {
                root: root.to_path_buf(),
                pattern: pattern.to_string(),
                on_change,
                active: Arc::clone(&active),
            });
        Ok(WatchHandle::new(root, ActiveFlag(active)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, ChangeCallback) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_matches_pattern() {
        let root = Path::new("/home/u/.pyenv/versions");
        assert!(matches_pattern(root, "*", &root.join("3.9.0")));
        assert!(!matches_pattern(root, "*", root));
        assert!(!matches_pattern(root, "*", Path::new("/elsewhere/3.9.0")));

        let projects = Path::new("/work");
        assert!(matches_pattern(
            projects,
            "*/pyvenv.cfg",
            &projects.join("app").join(".venv").join("pyvenv.cfg")
        ));
        assert!(!matches_pattern(
            projects,
            "*/pyvenv.cfg",
            &projects.join("app").join("main.py")
        ));
    }

    #[test]
    fn test_manual_watcher_fires_and_disposes() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = ManualWatcher::new();
        let (count, callback) = counter();

        let handle = watcher.watch(dir.path(), "*", callback).unwrap();
        assert_eq!(watcher.active_watches(), 1);
        assert_eq!(watcher.fire(dir.path().join("3.9.0"), FsChangeKind::Created), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        handle.dispose();
        handle.dispose();
        assert!(!handle.is_active());
        assert_eq!(watcher.active_watches(), 0);
        assert_eq!(watcher.fire(dir.path().join("3.9.0"), FsChangeKind::Deleted), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_watch_missing_root_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let (_, callback) = counter();

        let err = ManualWatcher::new()
            .watch(&missing, "*", Arc::clone(&callback))
            .unwrap_err();
        assert!(matches!(err, LocatorError::SourceUnavailable(_)));

        let err = NotifyWatcher::default()
            .watch(&missing, "*", callback)
            .unwrap_err();
        assert!(matches!(err, LocatorError::SourceUnavailable(_)));
    }

    #[test]
    fn test_notify_watcher_handle_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let (_, callback) = counter();
        let handle = NotifyWatcher::default()
            .watch(dir.path(), "*", callback)
            .unwrap();
        assert!(handle.is_active());
        assert_eq!(handle.root(), dir.path());
        handle.dispose();
        assert!(!handle.is_active());
    }

    #[test]
    fn test_notify_watcher_coalesces_bursts() {
        let dir = tempfile::tempdir().unwrap();
        let (count, callback) = counter();
        let watcher = NotifyWatcher::new(Duration::from_millis(200));
        let handle = watcher.watch(dir.path(), "*.cfg", callback).unwrap();

        let cfg = dir.path().join("pyvenv.cfg");
        for i in 0..5 {
            std::fs::write(&cfg, format!("version = 3.{}.0\n", i)).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::thread::sleep(Duration::from_millis(1500));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        handle.dispose();
    }
}
