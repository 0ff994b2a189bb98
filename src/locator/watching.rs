use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::{ChangeEmitter, DisposeState, PythonEnvsChangedEvent};
use crate::error::{LocatorError, Result};
use crate::model::PythonEnvKind;
use crate::watcher::{FileWatcher, FsChange, WatchHandle};

/// Watch bookkeeping for locators that turn filesystem changes into
/// [`PythonEnvsChangedEvent`]s.
///
/// Every change matching a registered pattern fires one event carrying the
/// locator's kind and the watched root. Disposal stops all watches before
/// closing the channel, so no event is delivered afterwards.
#[derive(Debug, Default)]
pub struct FsWatchingState {
    emitter: ChangeEmitter,
    watches: Mutex<Vec<WatchHandle>>,
    state: DisposeState,
}

impl FsWatchingState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a watch on `root`. A root that does not exist yet is
    /// logged and skipped; the locator keeps working without change events
    /// for it.
    pub fn watch(
        &self,
        watcher: &dyn FileWatcher,
        root: &Path,
        pattern: &str,
        kind: PythonEnvKind,
    ) -> bool {
        if self.state.is_disposed() {
            return false;
        }
        let emitter = self.emitter.clone();
        let location = root.to_path_buf();
        let on_change = Arc::new(move |change: FsChange| {
            debug!("{:?} {:?}, notifying {} listeners", change.kind, change.path, kind);
            emitter.fire(PythonEnvsChangedEvent::for_kind(kind).with_search_location(&location));
        });

        match watcher.watch(root, pattern, on_change) {
            Ok(handle) => {
                self.watches
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(handle);
                true
            }
            Err(LocatorError::SourceUnavailable(path)) => {
                info!("Not watching {:?}: directory does not exist", path);
                false
            }
            Err(err) => {
                warn!("Failed to watch {:?}: {}", root, err);
                false
            }
        }
    }

    pub fn active_watches(&self) -> usize {
        self.watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|handle| handle.is_active())
            .count()
    }

    pub fn ensure_active(&self) -> Result<()> {
        self.state.ensure_active()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PythonEnvsChangedEvent> {
        self.emitter.subscribe()
    }

    /// Stops every watch and closes the channel. Idempotent.
    pub fn dispose(&self) {
        if !self.state.mark_disposed() {
            return;
        }
        for handle in self
            .watches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            handle.dispose();
        }
        self.emitter.close();
    }
}
