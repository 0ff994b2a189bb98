//! Python environment locators.
//!
//! This module provides the [`Locator`] trait and the strategies that
//! implement it. Every locator, whatever its scanning logic, offers the same
//! four operations: lazy iteration, resolution, change subscription and
//! disposal. [`Locators`] composes any number of them into one.
//!
//! # Available Locators
//!
//! | Locator | Kind | Watches |
//! |---------|------|---------|
//! | [`DirFilesLocator`] | any (given) | no |
//! | [`PathEnvVarLocator`] | `PathEnvVar` | no (`PATH` is read once) |
//! | [`PyenvLocator`] | `Pyenv` | `<root>/versions` |
//! | [`VirtualEnvLocator`] | `Venv` | each project root |
//!
//! # Example
//!
//! ```no_run
//! use envscan::locator::{Locator, PathEnvVarLocator, PythonLocatorQuery};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let locator = PathEnvVarLocator::from_env();
//!     let mut envs = locator.iter_envs(&PythonLocatorQuery::default())?;
//!     while let Some(env) = envs.next().await {
//!         println!("{}: {}", env.kind, env.executable.display());
//!     }
//!     locator.dispose();
//!     Ok(())
//! }
//! ```

mod aggregate;
mod events;
mod files;
mod path;
mod probe;
mod pyenv;
mod query;
mod venv;
mod watching;

pub use aggregate::{Locators, RankedEnv, DEFAULT_RESOLVE_TIMEOUT};
pub use events::{ChangeEmitter, PythonEnvsChangedEvent};
pub use files::DirFilesLocator;
pub use path::PathEnvVarLocator;
pub use probe::probe_version;
pub use pyenv::{parse_version_dir_name, PyenvLocator, VersionDirName};
pub use query::PythonLocatorQuery;
pub use venv::VirtualEnvLocator;
pub use watching::FsWatchingState;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

use crate::error::{LocatorError, Result};
use crate::model::{normalize_path, EnvRef, PythonEnvInfo};

/// Lazy sequence of records produced by one iteration. Dropping it abandons
/// the scan and releases whatever the scan held open.
pub type PythonEnvsIterator = BoxStream<'static, PythonEnvInfo>;

/// A single discovery strategy.
///
/// Implementations must keep `iter_envs` restartable (each call is an
/// independent scan) and tolerant of unreadable entries, which are skipped.
#[async_trait]
pub trait Locator: Send + Sync {
    /// Returns the human-readable name of this locator.
    fn name(&self) -> &'static str;

    /// Starts a new scan. The query is a best-effort filter: fields a
    /// locator cannot evaluate cheaply are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`LocatorError::Disposed`] after [`dispose`](Self::dispose).
    fn iter_envs(&self, query: &PythonLocatorQuery) -> Result<PythonEnvsIterator>;

    /// Resolves a path or partial record into a fully populated record.
    ///
    /// Returns `Ok(None)` when this locator does not recognize the identity.
    ///
    /// # Errors
    ///
    /// [`LocatorError::Probe`] for genuine I/O failures and
    /// [`LocatorError::Disposed`] after disposal.
    async fn resolve_env(&self, env: &EnvRef) -> Result<Option<PythonEnvInfo>>;

    /// Subscribes to "something may have changed" notifications.
    fn subscribe(&self) -> broadcast::Receiver<PythonEnvsChangedEvent>;

    /// Releases watches and closes the change channel. Idempotent.
    fn dispose(&self);
}

/// Collects every record of one iteration.
pub async fn get_envs(
    locator: &dyn Locator,
    query: &PythonLocatorQuery,
) -> Result<Vec<PythonEnvInfo>> {
    Ok(locator.iter_envs(query)?.collect().await)
}

pub(crate) fn empty_iterator() -> PythonEnvsIterator {
    stream::empty().boxed()
}

/// Absolute, lexically normalized executable path of a resolve input, or
/// `None` for an empty path.
pub(crate) fn absolute_executable(env: &EnvRef) -> Option<PathBuf> {
    let executable = env.executable();
    if executable.as_os_str().is_empty() {
        return None;
    }
    std::path::absolute(executable)
        .ok()
        .map(|path| normalize_path(&path))
}

/// Absolute, lexically normalized form of a configured directory. Falls
/// back to the normalized input when the working directory is unknown.
pub(crate) fn absolute_dir(dir: &Path) -> PathBuf {
    match std::path::absolute(dir) {
        Ok(absolute) => normalize_path(&absolute),
        Err(err) => {
            tracing::warn!("Cannot make {:?} absolute: {}", dir, err);
            normalize_path(dir)
        }
    }
}

/// Disposed flag shared by the locator implementations.
#[derive(Debug, Default)]
pub(crate) struct DisposeState {
    disposed: AtomicBool,
}

impl DisposeState {
    pub(crate) fn ensure_active(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(LocatorError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Marks disposal. Returns `true` only for the first caller.
    pub(crate) fn mark_disposed(&self) -> bool {
        !self.disposed.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fixtures shared by the locator tests.

    use super::*;
    use std::path::Path;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    /// Creates an empty file, executable on unix.
    pub fn touch_executable(path: &Path) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, "").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
    }

    /// A locator serving a fixed list of records, optionally after a delay.
    pub struct FakeLocator {
        pub envs: Vec<PythonEnvInfo>,
        pub delay: Option<Duration>,
        pub resolve_delay: Option<Duration>,
        pub iterations: Arc<AtomicUsize>,
        pub disposals: Arc<AtomicUsize>,
        pub emitter: ChangeEmitter,
        state: DisposeState,
    }

    impl FakeLocator {
        pub fn new(envs: Vec<PythonEnvInfo>) -> Self {
            Self {
                envs,
                delay: None,
                resolve_delay: None,
                iterations: Arc::new(AtomicUsize::new(0)),
                disposals: Arc::new(AtomicUsize::new(0)),
                emitter: ChangeEmitter::new(),
                state: DisposeState::default(),
            }
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn with_resolve_delay(mut self, delay: Duration) -> Self {
            self.resolve_delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl Locator for FakeLocator {
        fn name(&self) -> &'static str {
            "Fake"
        }

        fn iter_envs(&self, query: &PythonLocatorQuery) -> Result<PythonEnvsIterator> {
            self.state.ensure_active()?;
            self.iterations.fetch_add(1, Ordering::SeqCst);
            let delay = self.delay;
            let envs: Vec<PythonEnvInfo> = self
                .envs
                .iter()
                .filter(|e| query.allows_kind(e.kind))
                .cloned()
                .collect();
            Ok(stream::iter(envs)
                .then(move |env| async move {
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    env
                })
                .boxed())
        }

        async fn resolve_env(&self, env: &EnvRef) -> Result<Option<PythonEnvInfo>> {
            self.state.ensure_active()?;
            if let Some(delay) = self.resolve_delay {
                tokio::time::sleep(delay).await;
            }
            let key = env.key();
            Ok(self.envs.iter().find(|e| e.key() == key).cloned())
        }

        fn subscribe(&self) -> broadcast::Receiver<PythonEnvsChangedEvent> {
            self.emitter.subscribe()
        }

        fn dispose(&self) {
            self.disposals.fetch_add(1, Ordering::SeqCst);
            if self.state.mark_disposed() {
                self.emitter.close();
            }
        }
    }
}
