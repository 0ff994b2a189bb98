use async_trait::async_trait;
use futures::future;
use futures::stream::{self, StreamExt};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use walkdir::WalkDir;

use super::probe::pyvenv_cfg_version;
use super::query::is_within;
use super::{
    absolute_executable, empty_iterator, FsWatchingState, Locator, PythonEnvsChangedEvent,
    PythonEnvsIterator, PythonLocatorQuery,
};
use crate::classify::venv_interpreter;
use crate::error::{LocatorError, Result};
use crate::model::{normalize_path, EnvKey, EnvRef, PythonEnvInfo, PythonEnvKind};
use crate::watcher::FileWatcher;

/// How far below a project root an environment directory may sit:
/// `<root>/.venv` and `<root>/<project>/.venv`.
const MAX_DEPTH: usize = 2;

const PYVENV_CFG: &str = "pyvenv.cfg";

/// Finds `venv`-style virtual environments in project directories.
///
/// An environment is any directory up to two levels below a root that
/// contains `pyvenv.cfg`. Each root is watched for `pyvenv.cfg` files
/// appearing or disappearing.
pub struct VirtualEnvLocator {
    roots: Vec<PathBuf>,
    watching: FsWatchingState,
}

impl VirtualEnvLocator {
    pub fn new(roots: Vec<PathBuf>, watcher: Option<&dyn FileWatcher>) -> Self {
        let roots: Vec<PathBuf> = roots
            .into_iter()
            .filter_map(|root| match std::path::absolute(&root) {
                Ok(absolute) => Some(normalize_path(&absolute)),
                Err(err) => {
                    warn!("Ignoring project root {:?}: {}", root, err);
                    None
                }
            })
            .collect();

        let watching = FsWatchingState::new();
        if let Some(watcher) = watcher {
            for root in &roots {
                watching.watch(watcher, root, "*/pyvenv.cfg", PythonEnvKind::Venv);
            }
        }
        Self { roots, watching }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

/// Environment directories below `root`, found by a blocking walk.
fn find_env_dirs(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .min_depth(1)
        .max_depth(MAX_DEPTH)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                debug!("Skipping entry under {:?}: {}", root, err);
                None
            }
        })
        .filter(|entry| entry.file_type().is_dir())
        .map(|entry| entry.into_path())
        .filter(|dir| dir.join(PYVENV_CFG).is_file())
        .collect()
}

/// Whether a scan of `root` would reach `env_dir`.
fn within_scan_depth(env_dir: &Path, root: &Path) -> bool {
    match env_dir.strip_prefix(root) {
        Ok(relative) => (1..=MAX_DEPTH).contains(&relative.components().count()),
        Err(_) => false,
    }
}

async fn build_env_info(env_dir: &Path, executable: PathBuf) -> Result<Option<PythonEnvInfo>> {
    match tokio::fs::metadata(&executable).await {
        Ok(metadata) if metadata.is_file() => {}
        Ok(_) => return Ok(None),
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(LocatorError::probe(executable, err)),
    }

    let name = env_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let version = pyvenv_cfg_version(env_dir).await.unwrap_or_default();
    Ok(Some(
        PythonEnvInfo::new(executable, PythonEnvKind::Venv)
            .with_version(version)
            .with_location(env_dir)
            .with_display_name(format!("{} (venv)", name))
            .with_name(name),
    ))
}

fn scan_roots(roots: Vec<PathBuf>) -> PythonEnvsIterator {
    stream::iter(roots)
        .then(|root| async move {
            let walk_root = root.clone();
            match tokio::task::spawn_blocking(move || find_env_dirs(&walk_root)).await {
                Ok(dirs) => dirs,
                Err(err) => {
                    warn!("Scanning {:?} failed: {}", root, err);
                    Vec::new()
                }
            }
        })
        .flat_map(stream::iter)
        .filter_map(|env_dir| async move {
            let executable = venv_interpreter(&env_dir);
            match build_env_info(&env_dir, executable).await {
                Ok(env) => env,
                Err(err) => {
                    debug!("Skipping {:?}: {}", env_dir, err);
                    None
                }
            }
        })
        .boxed()
}

#[async_trait]
impl Locator for VirtualEnvLocator {
    fn name(&self) -> &'static str {
        "Virtual Environments"
    }

    fn iter_envs(&self, query: &PythonLocatorQuery) -> Result<PythonEnvsIterator> {
        self.watching.ensure_active()?;
        if !query.allows_kind(PythonEnvKind::Venv) {
            return Ok(empty_iterator());
        }
        let Some(locations) = query.search_locations.clone() else {
            return Ok(scan_roots(self.roots.clone()));
        };

        let roots: Vec<PathBuf> = self
            .roots
            .iter()
            .filter(|root| {
                locations
                    .iter()
                    .any(|loc| is_within(loc, root) || is_within(root, loc))
            })
            .cloned()
            .collect();
        if roots.is_empty() {
            return Ok(empty_iterator());
        }
        Ok(scan_roots(roots)
            .filter(move |env| {
                future::ready(locations.iter().any(|loc| is_within(&env.location, loc)))
            })
            .boxed())
    }

    async fn resolve_env(&self, env: &EnvRef) -> Result<Option<PythonEnvInfo>> {
        self.watching.ensure_active()?;
        let Some(executable) = absolute_executable(env) else {
            return Ok(None);
        };
        let Some(env_dir) = executable.parent().and_then(Path::parent) else {
            return Ok(None);
        };
        if EnvKey::from_path(&executable) != EnvKey::from_path(&venv_interpreter(env_dir)) {
            return Ok(None);
        }
        if !self.roots.iter().any(|root| within_scan_depth(env_dir, root)) {
            return Ok(None);
        }
        match tokio::fs::metadata(env_dir.join(PYVENV_CFG)).await {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => return Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(LocatorError::probe(env_dir.join(PYVENV_CFG), err)),
        }
        build_env_info(env_dir, executable.clone()).await
    }

    fn subscribe(&self) -> broadcast::Receiver<PythonEnvsChangedEvent> {
        self.watching.subscribe()
    }

    fn dispose(&self) {
        self.watching.dispose();
    }
}

impl Drop for VirtualEnvLocator {
    fn drop(&mut self) {
        self.watching.dispose();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::locator::get_envs;
    use crate::locator::testing::touch_executable;
    use crate::model::PythonVersion;
    use crate::watcher::{FsChangeKind, ManualWatcher};
    use std::fs;

    fn make_venv(dir: &Path, version: &str) {
        touch_executable(&dir.join("bin").join("python"));
        fs::write(
            dir.join(PYVENV_CFG),
            format!("home = /usr/bin\nversion = {}\n", version),
        )
        .unwrap();
    }

    /// `<root>/.venv`, `<root>/api/env` and a too-deep `<root>/a/b/.venv`.
    fn projects() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        make_venv(&root.path().join(".venv"), "3.11.4");
        make_venv(&root.path().join("api").join("env"), "3.9.7");
        make_venv(&root.path().join("a").join("b").join(".venv"), "3.8.0");
        fs::create_dir_all(root.path().join("web").join("node_modules")).unwrap();
        root
    }

    #[tokio::test]
    async fn test_iter_finds_envs_two_levels_deep() {
        let root = projects();
        let locator = VirtualEnvLocator::new(vec![root.path().to_path_buf()], None);

        let mut envs = get_envs(&locator, &PythonLocatorQuery::default()).await.unwrap();
        envs.sort_by(|a, b| a.name.cmp(&b.name));
        let names: Vec<_> = envs.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec![".venv", "env"]);

        assert!(envs.iter().all(|e| e.kind == PythonEnvKind::Venv));
        assert_eq!(envs[0].version, PythonVersion::new(Some(3), Some(11), Some(4)));
        assert_eq!(envs[0].display_name(), ".venv (venv)");
        assert_eq!(envs[1].location, root.path().join("api").join("env"));
    }

    #[tokio::test]
    async fn test_resolve() {
        let root = projects();
        let locator = VirtualEnvLocator::new(vec![root.path().to_path_buf()], None);

        let python = root.path().join("api").join("env").join("bin").join("python");
        let env = locator.resolve_env(&python.as_path().into()).await.unwrap().unwrap();
        assert_eq!(env.name, "env");
        assert_eq!(env.version, PythonVersion::new(Some(3), Some(9), Some(7)));

        let outside = tempfile::tempdir().unwrap();
        make_venv(outside.path(), "3.10.0");
        let foreign = outside.path().join("bin").join("python");
        assert!(locator.resolve_env(&foreign.into()).await.unwrap().is_none());

        let no_cfg = root.path().join("web").join("bin").join("python");
        touch_executable(&no_cfg);
        assert!(locator.resolve_env(&no_cfg.into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolve_matches_iteration() {
        let root = projects();
        let locator = VirtualEnvLocator::new(vec![root.path().to_path_buf()], None);

        let too_deep = root.path().join("a").join("b").join(".venv").join("bin").join("python");
        assert!(locator.resolve_env(&too_deep.into()).await.unwrap().is_none());

        let python3 = root.path().join(".venv").join("bin").join("python3");
        touch_executable(&python3);
        assert!(locator.resolve_env(&python3.into()).await.unwrap().is_none());

        for env in get_envs(&locator, &PythonLocatorQuery::default()).await.unwrap() {
            let resolved = locator
                .resolve_env(&env.executable.as_path().into())
                .await
                .unwrap();
            assert_eq!(resolved, Some(env));
        }
    }

    #[tokio::test]
    async fn test_broken_env_does_not_stop_scan() {
        let root = projects();
        let broken = root.path().join("broken");
        fs::create_dir_all(broken.join("bin")).unwrap();
        fs::write(broken.join(PYVENV_CFG), "version = 3.12.0\n").unwrap();
        std::os::unix::fs::symlink(root.path().join("nowhere"), broken.join("bin").join("python"))
            .unwrap();
        std::os::unix::fs::symlink(root.path().join("gone"), root.path().join("dangling")).unwrap();

        let locator = VirtualEnvLocator::new(vec![root.path().to_path_buf()], None);
        let mut names: Vec<String> = get_envs(&locator, &PythonLocatorQuery::default())
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        names.sort();
        assert_eq!(names, vec![".venv", "env"]);
    }

    #[tokio::test]
    async fn test_search_locations() {
        let root = projects();
        let locator = VirtualEnvLocator::new(vec![root.path().to_path_buf()], None);

        let api = PythonLocatorQuery::new().with_search_locations([root.path().join("api")]);
        let envs = get_envs(&locator, &api).await.unwrap();
        assert_eq!(envs.len(), 1);
        assert_eq!(envs[0].name, "env");

        let elsewhere = PythonLocatorQuery::new().with_search_locations([PathBuf::from("/opt")]);
        assert!(get_envs(&locator, &elsewhere).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_new_env_fires_event() {
        let root = projects();
        let watcher = ManualWatcher::new();
        let locator = VirtualEnvLocator::new(vec![root.path().to_path_buf()], Some(&watcher));
        let mut rx = locator.subscribe();

        let cfg = locator.roots()[0].join("new").join(PYVENV_CFG);
        assert_eq!(watcher.fire(&cfg, FsChangeKind::Created), 1);
        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, Some(PythonEnvKind::Venv));

        let unrelated = locator.roots()[0].join("README.md");
        assert_eq!(watcher.fire(&unrelated, FsChangeKind::Changed), 0);
    }
}
