use async_trait::async_trait;
use futures::future;
use futures::stream::StreamExt;
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::debug;

use super::{
    absolute_dir, empty_iterator, DirFilesLocator, Locator, Locators, PythonEnvsChangedEvent,
    PythonEnvsIterator, PythonLocatorQuery,
};
use crate::classify::{is_standard_python_binary, version_from_binary_name};
use crate::error::Result;
use crate::model::{EnvKey, EnvRef, PythonEnvInfo, PythonEnvKind};
use crate::platform;

/// Finds interpreters in the directories of the `PATH` search path.
///
/// The directory list is captured once at construction; later changes to
/// the process environment are not seen. Only standard interpreter names
/// (`python`, `python3`, `python3.9`) are reported, and the same name check
/// gates resolution, so a file skipped by iteration never resolves either.
pub struct PathEnvVarLocator {
    dirs: Vec<PathBuf>,
    locators: Locators,
}

impl PathEnvVarLocator {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        let mut dirs: Vec<PathBuf> = dirs.iter().map(|dir| absolute_dir(dir)).collect();
        let mut seen = HashSet::new();
        dirs.retain(|dir| seen.insert(EnvKey::from_path(dir)));

        let children: Vec<Box<dyn Locator>> = dirs
            .iter()
            .map(|dir| {
                Box::new(DirFilesLocator::new(dir, PythonEnvKind::PathEnvVar))
                    as Box<dyn Locator>
            })
            .collect();
        debug!("Searching {} PATH directories", dirs.len());
        Self {
            dirs,
            locators: Locators::new(children),
        }
    }

    /// Reads `PATH` from the process environment.
    pub fn from_env() -> Self {
        Self::new(platform::search_path_entries())
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }
}

fn enrich(env: PythonEnvInfo) -> PythonEnvInfo {
    let version = version_from_binary_name(&env.executable);
    env.with_version(version)
}

#[async_trait]
impl Locator for PathEnvVarLocator {
    fn name(&self) -> &'static str {
        "PATH"
    }

    fn iter_envs(&self, query: &PythonLocatorQuery) -> Result<PythonEnvsIterator> {
        let envs = self.locators.iter_envs(query)?;
        if !query.allows_kind(PythonEnvKind::PathEnvVar) {
            return Ok(empty_iterator());
        }
        Ok(envs
            .filter(|env| future::ready(is_standard_python_binary(&env.executable)))
            .map(enrich)
            .boxed())
    }

    async fn resolve_env(&self, env: &EnvRef) -> Result<Option<PythonEnvInfo>> {
        self.locators.ensure_active()?;
        if !is_standard_python_binary(env.executable()) {
            return Ok(None);
        }
        Ok(self.locators.resolve_env(env).await?.map(enrich))
    }

    fn subscribe(&self) -> broadcast::Receiver<PythonEnvsChangedEvent> {
        self.locators.subscribe()
    }

    fn dispose(&self) {
        self.locators.dispose();
    }
}
