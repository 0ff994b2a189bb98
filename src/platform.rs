//! Cross-platform path resolution.
//!
//! This module provides the environment-derived inputs locators are built
//! from: the `PATH` search entries and the pyenv root. Both are read once,
//! at locator construction.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::PathBuf;

use crate::model::{EnvKey, Platform};

/// Splits a `PATH`-style value into directories, dropping empty and
/// duplicate entries while keeping the original order.
pub fn split_search_path(value: &OsStr) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    std::env::split_paths(value)
        .filter(|entry| !entry.as_os_str().is_empty())
        .filter(|entry| seen.insert(EnvKey::from_path(entry)))
        .collect()
}

/// Returns the directories listed in the `PATH` environment variable.
pub fn search_path_entries() -> Vec<PathBuf> {
    std::env::var_os("PATH")
        .map(|value| split_search_path(&value))
        .unwrap_or_default()
}

/// Returns the pyenv root directory.
///
/// `PYENV_ROOT` wins when set; otherwise:
/// - Linux/macOS: `~/.pyenv/`
/// - Windows: `~/.pyenv/pyenv-win/`
pub fn pyenv_root() -> Option<PathBuf> {
    if let Some(root) = std::env::var_os("PYENV_ROOT").filter(|v| !v.is_empty()) {
        return Some(PathBuf::from(root));
    }
    let home = dirs::home_dir()?;
    let root = match Platform::current() {
        Platform::Windows => home.join(".pyenv").join("pyenv-win"),
        Platform::Linux | Platform::MacOS => home.join(".pyenv"),
    };
    Some(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn test_split_search_path() {
        let entries = split_search_path(OsStr::new("/usr/bin::/usr/local/bin:/usr/bin/"));
        assert_eq!(
            entries,
            vec![PathBuf::from("/usr/bin"), PathBuf::from("/usr/local/bin")]
        );
    }

    #[test]
    fn test_split_search_path_empty() {
        assert!(split_search_path(OsStr::new("")).is_empty());
    }
}
