use async_trait::async_trait;
use futures::future;
use futures::stream::{self, StreamExt};
use regex::Regex;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use tokio::fs::ReadDir;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::query::is_within;
use super::{
    absolute_executable, empty_iterator, probe_version, FsWatchingState, Locator,
    PythonEnvsChangedEvent, PythonEnvsIterator, PythonLocatorQuery,
};
use crate::error::{LocatorError, Result};
use crate::model::{
    normalize_path, Architecture, Distro, EnvKey, EnvRef, PythonEnvInfo, PythonEnvKind,
    PythonVersion,
};
use crate::platform;
use crate::watcher::FileWatcher;

static DISTRO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9_.]*)-(\d[A-Za-z0-9_.]*)$").expect("distro regex is valid")
});

/// What a pyenv version directory name says about the install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionDirName {
    /// Set when the name is a plain Python version such as `3.9.0`.
    pub version: Option<PythonVersion>,
    /// Set for `<org>-<version>` names such as `miniconda3-4.7.12`.
    pub distro: Option<Distro>,
    /// From a pyenv-win `-win32` / `-amd64` suffix.
    pub arch: Architecture,
}

/// Parses a pyenv version directory name.
///
/// ```
/// use envscan::locator::parse_version_dir_name;
///
/// let parsed = parse_version_dir_name("miniconda3-4.7.12");
/// assert_eq!(parsed.distro.unwrap().org, "miniconda3");
/// assert!(parsed.version.is_none());
/// ```
pub fn parse_version_dir_name(name: &str) -> VersionDirName {
    let (rest, arch) = if let Some(rest) = name.strip_suffix("-win32") {
        (rest, Architecture::X86)
    } else if let Some(rest) = name.strip_suffix("-amd64") {
        (rest, Architecture::X64)
    } else {
        (name, Architecture::Unknown)
    };

    if let Some(version) = PythonVersion::parse(rest) {
        return VersionDirName {
            version: Some(version),
            distro: None,
            arch,
        };
    }

    let distro = DISTRO_RE
        .captures(rest)
        .map(|caps| Distro::new(&caps[1]).with_version(&caps[2]));
    VersionDirName {
        version: None,
        distro,
        arch,
    }
}

/// Interpreter inside a pyenv version directory.
fn pyenv_interpreter(version_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        version_dir.join("python.exe")
    } else {
        version_dir.join("bin").join("python")
    }
}

/// Builds the record for `executable` inside `version_dir`.
///
/// Returns `Ok(None)` when the executable does not exist.
async fn build_env_info(version_dir: &Path, executable: PathBuf) -> Result<Option<PythonEnvInfo>> {
    match tokio::fs::metadata(&executable).await {
        Ok(metadata) if metadata.is_file() => {}
        Ok(_) => return Ok(None),
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(LocatorError::probe(executable, err)),
    }

    let name = version_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parsed = parse_version_dir_name(&name);
    let version = match parsed.version {
        Some(version) => version,
        None => probe_version(version_dir).await,
    };

    let mut env = PythonEnvInfo::new(executable, PythonEnvKind::Pyenv)
        .with_version(version)
        .with_location(version_dir)
        .with_arch(parsed.arch)
        .with_display_name(format!("{}:pyenv", name))
        .with_name(name);
    if let Some(distro) = parsed.distro {
        env = env.with_distro(distro);
    }
    Ok(Some(env))
}

/// Finds interpreters installed by pyenv under `<root>/versions`.
///
/// Each child of the versions directory is one install. The versions
/// directory is watched, so installing or removing a version fires a change
/// event.
pub struct PyenvLocator {
    versions_dir: PathBuf,
    watching: FsWatchingState,
}

impl PyenvLocator {
    pub fn new(root: impl AsRef<Path>, watcher: Option<&dyn FileWatcher>) -> Self {
        let root = root.as_ref();
        let root = std::path::absolute(root).unwrap_or_else(|_| root.to_path_buf());
        let versions_dir = normalize_path(&root).join("versions");
        if !versions_dir.is_dir() {
            info!("pyenv versions directory {:?} does not exist", versions_dir);
        }

        let watching = FsWatchingState::new();
        if let Some(watcher) = watcher {
            watching.watch(watcher, &versions_dir, "*", PythonEnvKind::Pyenv);
        }
        Self {
            versions_dir,
            watching,
        }
    }

    /// Uses `PYENV_ROOT` or the platform default root.
    pub fn from_env(watcher: Option<&dyn FileWatcher>) -> Option<Self> {
        platform::pyenv_root().map(|root| Self::new(root, watcher))
    }

    pub fn versions_dir(&self) -> &Path {
        &self.versions_dir
    }

    /// The version directory holding `executable`, if it is inside one.
    fn version_dir_of(&self, executable: &Path) -> Option<PathBuf> {
        let relative = executable.strip_prefix(&self.versions_dir).ok()?;
        match relative.components().next()? {
            Component::Normal(name) if relative.components().count() > 1 => {
                Some(self.versions_dir.join(name))
            }
            _ => None,
        }
    }
}

enum ScanState {
    Start(PathBuf),
    Reading(ReadDir),
}

fn scan_versions(versions_dir: PathBuf) -> PythonEnvsIterator {
    stream::unfold(ScanState::Start(versions_dir), |state| async move {
        let mut entries = match state {
            ScanState::Start(dir) => match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) => {
                    debug!("Skipping pyenv versions {:?}: {}", dir, err);
                    return None;
                }
            },
            ScanState::Reading(entries) => entries,
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => return None,
                Err(err) => {
                    debug!("Error reading pyenv versions entry: {}", err);
                    continue;
                }
            };
            let version_dir = entry.path();
            match entry.file_type().await {
                Ok(file_type) if file_type.is_dir() || file_type.is_symlink() => {}
                _ => continue,
            }
            let executable = pyenv_interpreter(&version_dir);
            match build_env_info(&version_dir, executable).await {
                Ok(Some(env)) => return Some((env, ScanState::Reading(entries))),
                Ok(None) => debug!("No interpreter in {:?}", version_dir),
                Err(err) => debug!("Skipping {:?}: {}", version_dir, err),
            }
        }
    })
    .boxed()
}

#[async_trait]
impl Locator for PyenvLocator {
    fn name(&self) -> &'static str {
        "Pyenv"
    }

    fn iter_envs(&self, query: &PythonLocatorQuery) -> Result<PythonEnvsIterator> {
        self.watching.ensure_active()?;
        if !query.allows_kind(PythonEnvKind::Pyenv) {
            return Ok(empty_iterator());
        }
        let envs = scan_versions(self.versions_dir.clone());
        match query.search_locations.clone() {
            None => Ok(envs),
            Some(locations) => {
                let versions_dir = &self.versions_dir;
                if !locations
                    .iter()
                    .any(|loc| is_within(loc, versions_dir) || is_within(versions_dir, loc))
                {
                    return Ok(empty_iterator());
                }
                Ok(envs
                    .filter(move |env| {
                        future::ready(locations.iter().any(|loc| is_within(&env.location, loc)))
                    })
                    .boxed())
            }
        }
    }

    async fn resolve_env(&self, env: &EnvRef) -> Result<Option<PythonEnvInfo>> {
        self.watching.ensure_active()?;
        let Some(executable) = absolute_executable(env) else {
            return Ok(None);
        };
        let Some(version_dir) = self.version_dir_of(&executable) else {
            return Ok(None);
        };
        let interpreter = pyenv_interpreter(&version_dir);
        if EnvKey::from_path(&executable) != EnvKey::from_path(&interpreter) {
            return Ok(None);
        }
        build_env_info(&version_dir, executable).await
    }

    fn subscribe(&self) -> broadcast::Receiver<PythonEnvsChangedEvent> {
        self.watching.subscribe()
    }

    fn dispose(&self) {
        self.watching.dispose();
    }
}

impl Drop for PyenvLocator {
    fn drop(&mut self) {
        self.watching.dispose();
    }
}
