use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::ReadDir;
use tokio::sync::broadcast;
use tracing::debug;

use super::{
    absolute_dir, absolute_executable, empty_iterator, ChangeEmitter, DisposeState, Locator,
    PythonEnvsChangedEvent, PythonEnvsIterator, PythonLocatorQuery,
};
use crate::classify::looks_like_executable;
use crate::error::{LocatorError, Result};
use crate::model::{EnvKey, EnvRef, PythonEnvInfo, PythonEnvKind};

/// Lists the executables directly inside one directory.
///
/// No check is made that a file is actually a Python interpreter; locators
/// that wrap this one decide that, for iteration and resolution alike.
pub struct DirFilesLocator {
    dir: PathBuf,
    kind: PythonEnvKind,
    emitter: ChangeEmitter,
    state: DisposeState,
}

impl DirFilesLocator {
    /// `dir` is made absolute against the current working directory.
    pub fn new(dir: impl AsRef<Path>, kind: PythonEnvKind) -> Self {
        Self {
            dir: absolute_dir(dir.as_ref()),
            kind,
            emitter: ChangeEmitter::new(),
            state: DisposeState::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn kind(&self) -> PythonEnvKind {
        self.kind
    }
}

#[async_trait]
impl Locator for DirFilesLocator {
    fn name(&self) -> &'static str {
        "Directory Files"
    }

    fn iter_envs(&self, query: &PythonLocatorQuery) -> Result<PythonEnvsIterator> {
        self.state.ensure_active()?;
        if !query.allows_kind(self.kind) || !query.covers_location(&self.dir) {
            return Ok(empty_iterator());
        }
        Ok(scan_dir_executables(self.dir.clone(), self.kind))
    }

    async fn resolve_env(&self, env: &EnvRef) -> Result<Option<PythonEnvInfo>> {
        self.state.ensure_active()?;
        let Some(executable) = absolute_executable(env) else {
            return Ok(None);
        };
        let in_dir = executable
            .parent()
            .map(|parent| EnvKey::from_path(parent) == EnvKey::from_path(&self.dir))
            .unwrap_or(false);
        if !in_dir {
            return Ok(None);
        }

        match looks_like_executable(&executable).await {
            Ok(true) => Ok(Some(
                PythonEnvInfo::new(executable, self.kind).with_location(&self.dir),
            )),
            Ok(false) => Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(LocatorError::probe(executable, err)),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<PythonEnvsChangedEvent> {
        // directory listings are not watched
        self.emitter.subscribe()
    }

    fn dispose(&self) {
        if self.state.mark_disposed() {
            self.emitter.close();
        }
    }
}

enum ScanState {
    Start(PathBuf),
    Reading(ReadDir, PathBuf),
}

/// Lazily yields a record for every executable directly inside `dir`.
///
/// The directory handle lives inside the stream, so dropping the stream
/// closes it. A missing or unreadable directory yields nothing.
pub(crate) fn scan_dir_executables(dir: PathBuf, kind: PythonEnvKind) -> PythonEnvsIterator {
    stream::unfold(ScanState::Start(dir), move |state| async move {
        let (mut entries, dir) = match state {
            ScanState::Start(dir) => match tokio::fs::read_dir(&dir).await {
                Ok(entries) => (entries, dir),
                Err(err) => {
                    debug!("Skipping directory {:?}: {}", dir, err);
                    return None;
                }
            },
            ScanState::Reading(entries, dir) => (entries, dir),
        };

        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let path = entry.path();
                    match looks_like_executable(&path).await {
                        Ok(true) => {
                            let env = PythonEnvInfo::new(path, kind).with_location(&dir);
                            return Some((env, ScanState::Reading(entries, dir)));
                        }
                        Ok(false) => continue,
                        Err(err) => {
                            debug!("Skipping {:?}: {}", path, err);
                            continue;
                        }
                    }
                }
                Ok(None) => return None,
                Err(err) => {
                    debug!("Error reading entry in {:?}: {}", dir, err);
                    continue;
                }
            }
        }
    })
    .boxed()
}
