use std::path::{Path, PathBuf};

use crate::error::{LocatorError, Result};
use crate::model::{EnvKey, PythonEnvKind};

/// Optional filter threaded through iteration so locators can prune early.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PythonLocatorQuery {
    /// Only these kinds; `None` means all.
    pub kinds: Option<Vec<PythonEnvKind>>,
    /// Only environments under these directories, for locators that
    /// support it; `None` means everywhere.
    pub search_locations: Option<Vec<PathBuf>>,
}

impl PythonLocatorQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kinds(mut self, kinds: impl IntoIterator<Item = PythonEnvKind>) -> Self {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    pub fn with_search_locations(mut self, locations: impl IntoIterator<Item = PathBuf>) -> Self {
        self.search_locations = Some(locations.into_iter().collect());
        self
    }

    /// # Errors
    ///
    /// [`LocatorError::InvalidQuery`] for an empty kind list (which could
    /// never match) or a relative search location.
    pub fn validate(&self) -> Result<()> {
        if matches!(&self.kinds, Some(kinds) if kinds.is_empty()) {
            return Err(LocatorError::InvalidQuery(
                "kinds filter is empty; use None to match all kinds".to_string(),
            ));
        }
        if let Some(locations) = &self.search_locations {
            if let Some(relative) = locations.iter().find(|l| !l.is_absolute()) {
                return Err(LocatorError::InvalidQuery(format!(
                    "search location {:?} is not absolute",
                    relative
                )));
            }
        }
        Ok(())
    }

    pub fn allows_kind(&self, kind: PythonEnvKind) -> bool {
        self.kinds
            .as_ref()
            .map(|kinds| kinds.contains(&kind))
            .unwrap_or(true)
    }

    pub fn has_search_locations(&self) -> bool {
        self.search_locations.is_some()
    }

    /// Is `dir` inside (or equal to) one of the search locations?
    pub fn covers_location(&self, dir: &Path) -> bool {
        match &self.search_locations {
            None => true,
            Some(locations) => locations.iter().any(|loc| is_within(dir, loc)),
        }
    }

    /// The same query without the kind filter.
    pub fn without_kinds(&self) -> Self {
        Self {
            kinds: None,
            search_locations: self.search_locations.clone(),
        }
    }
}

/// Is `path` equal to or below `base`, comparing normalized identities?
pub(crate) fn is_within(path: &Path, base: &Path) -> bool {
    let path = EnvKey::from_path(path);
    let base = EnvKey::from_path(base);
    Path::new(path.as_str()).starts_with(Path::new(base.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_allows_everything() {
        let query = PythonLocatorQuery::default();
        assert!(query.validate().is_ok());
        assert!(query.allows_kind(PythonEnvKind::Conda));
        assert!(query.covers_location(Path::new("/anywhere")));
    }

    #[test]
    fn test_kind_filter() {
        let query = PythonLocatorQuery::new().with_kinds([PythonEnvKind::Pyenv]);
        assert!(query.allows_kind(PythonEnvKind::Pyenv));
        assert!(!query.allows_kind(PythonEnvKind::PathEnvVar));
        assert!(query.without_kinds().allows_kind(PythonEnvKind::PathEnvVar));
    }

    #[test]
    fn test_validate_rejects_malformed() {
        let empty_kinds = PythonLocatorQuery::new().with_kinds(Vec::new());
        assert!(matches!(
            empty_kinds.validate(),
            Err(LocatorError::InvalidQuery(_))
        ));

        let relative = PythonLocatorQuery::new().with_search_locations([PathBuf::from("rel/dir")]);
        assert!(matches!(
            relative.validate(),
            Err(LocatorError::InvalidQuery(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_covers_location() {
        let query = PythonLocatorQuery::new().with_search_locations([PathBuf::from("/work")]);
        assert!(query.covers_location(Path::new("/work")));
        assert!(query.covers_location(Path::new("/work/app/.venv")));
        assert!(query.covers_location(Path::new("/work/./app/")));
        assert!(!query.covers_location(Path::new("/workspace")));
        assert!(!query.covers_location(Path::new("/usr/bin")));
    }
}
