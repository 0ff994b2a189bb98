//! Version probing from install directory contents.
//!
//! No interpreter is ever executed; the version is read from files a Python
//! install leaves behind. Unreadable files simply do not contribute.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

use crate::model::PythonVersion;

static PY_VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"#define\s+PY_VERSION\s+"([^"]+)""#).expect("patchlevel regex is valid")
});

static LEADING_VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)(?:\.(\d+))?(?:\.(\d+))?").expect("leading version regex is valid")
});

static CONDA_META_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^python-(\d+\.\d+\.\d+)-.*\.json$").expect("conda-meta regex is valid")
});

static LIB_DIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^python(\d+\.\d+)$").expect("lib dir regex is valid"));

/// Best-effort Python version of the install rooted at `env_dir`.
///
/// Sources are tried in order and the first one that yields a version wins:
/// `include/pythonX.Y/patchlevel.h`, `pyvenv.cfg`,
/// `conda-meta/python-X.Y.Z-*.json`, then the `lib/pythonX.Y` directory name
/// (which leaves the micro version unknown).
pub async fn probe_version(env_dir: &Path) -> PythonVersion {
    if let Some(version) = patchlevel_version(env_dir).await {
        return version;
    }
    if let Some(version) = pyvenv_cfg_version(env_dir).await {
        return version;
    }
    if let Some(version) = conda_meta_version(env_dir).await {
        return version;
    }
    if let Some(version) = lib_dir_version(env_dir).await {
        return version;
    }
    debug!("No version information found in {:?}", env_dir);
    PythonVersion::unknown()
}

async fn patchlevel_version(env_dir: &Path) -> Option<PythonVersion> {
    let include = env_dir.join("include");
    let mut candidates = vec![include.join("patchlevel.h")];
    candidates.extend(
        list_names(&include)
            .await
            .into_iter()
            .filter(|name| name.starts_with("python"))
            .map(|name| include.join(name).join("patchlevel.h")),
    );

    for header in candidates {
        let Ok(contents) = tokio::fs::read_to_string(&header).await else {
            continue;
        };
        let version = PY_VERSION_RE
            .captures(&contents)
            .and_then(|caps| PythonVersion::parse(&caps[1]));
        if version.is_some() {
            return version;
        }
    }
    None
}

/// Version recorded in `<env_dir>/pyvenv.cfg` under `version` or
/// `version_info`. Only the leading numeric components are used, so
/// `3.9.0.final.0` reads as 3.9.0.
pub(crate) async fn pyvenv_cfg_version(env_dir: &Path) -> Option<PythonVersion> {
    let contents = tokio::fs::read_to_string(env_dir.join("pyvenv.cfg"))
        .await
        .ok()?;
    contents.lines().find_map(|line| {
        let (key, value) = line.split_once('=')?;
        match key.trim().to_lowercase().as_str() {
            "version" | "version_info" => leading_version(value.trim()),
            _ => None,
        }
    })
}

fn leading_version(value: &str) -> Option<PythonVersion> {
    let caps = LEADING_VERSION_RE.captures(value)?;
    let number = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
    Some(PythonVersion::new(number(1), number(2), number(3)))
}

async fn conda_meta_version(env_dir: &Path) -> Option<PythonVersion> {
    list_names(&env_dir.join("conda-meta"))
        .await
        .iter()
        .find_map(|name| {
            CONDA_META_RE
                .captures(name)
                .and_then(|caps| PythonVersion::parse(&caps[1]))
        })
}

/// The highest `lib/pythonX.Y` directory, compared numerically.
async fn lib_dir_version(env_dir: &Path) -> Option<PythonVersion> {
    list_names(&env_dir.join("lib"))
        .await
        .iter()
        .filter_map(|name| {
            LIB_DIR_RE
                .captures(name)
                .and_then(|caps| PythonVersion::parse(&caps[1]))
        })
        .max_by_key(|version| (version.major, version.minor))
}

/// Entry names of `dir`; empty when it cannot be read.
async fn list_names(dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return names;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn test_patchlevel_header() {
        let dir = tempfile::tempdir().unwrap();
        let include = dir.path().join("include").join("python3.9");
        fs::create_dir_all(&include).unwrap();
        fs::write(
            include.join("patchlevel.h"),
            "#define PY_MINOR_VERSION 9\n#define PY_VERSION \"3.9.0\"\n",
        )
        .unwrap();
        // the header wins over the lib dir
        fs::create_dir_all(dir.path().join("lib").join("python3.9")).unwrap();

        let version = probe_version(dir.path()).await;
        assert_eq!(version, PythonVersion::new(Some(3), Some(9), Some(0)));
    }

    #[tokio::test]
    async fn test_pyvenv_cfg() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("pyvenv.cfg"),
            "home = /usr/bin\ninclude-system-site-packages = false\nversion_info = 3.9.0.final.0\n",
        )
        .unwrap();

        let version = probe_version(dir.path()).await;
        assert_eq!(version, PythonVersion::new(Some(3), Some(9), Some(0)));
        assert_eq!(pyvenv_cfg_version(dir.path()).await, Some(version));
    }

    #[tokio::test]
    async fn test_conda_meta() {
        let dir = tempfile::tempdir().unwrap();
        let meta = dir.path().join("conda-meta");
        fs::create_dir_all(&meta).unwrap();
        fs::write(meta.join("pip-20.2.4-py38_0.json"), "{}").unwrap();
        fs::write(meta.join("python-3.8.5-h7579374_1.json"), "{}").unwrap();

        let version = probe_version(dir.path()).await;
        assert_eq!(version, PythonVersion::new(Some(3), Some(8), Some(5)));
    }

    #[tokio::test]
    async fn test_lib_dir_leaves_micro_unknown() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("lib").join("python3.7")).unwrap();

        let version = probe_version(dir.path()).await;
        assert_eq!(version, PythonVersion::new(Some(3), Some(7), None));
    }

    #[tokio::test]
    async fn test_lib_dir_prefers_highest_minor() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["python3.9", "python3.10", "python2.7", "pythonX"] {
            fs::create_dir_all(dir.path().join("lib").join(name)).unwrap();
        }

        let version = probe_version(dir.path()).await;
        assert_eq!(version, PythonVersion::new(Some(3), Some(10), None));
    }

    #[tokio::test]
    async fn test_empty_dir_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        assert!(probe_version(dir.path()).await.is_unknown());
        assert!(probe_version(&dir.path().join("missing")).await.is_unknown());
    }
}
