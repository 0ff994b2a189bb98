use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)(?:\.(\d+))?(?:\.(\d+))?((?:a|b|rc|c)\d+|[-.]?dev\d*|\+)?$")
        .expect("version regex is valid")
});

/// A Python version. Each component is `None` when it could not be
/// determined; an unknown micro is distinct from a micro of `0`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PythonVersion {
    pub major: Option<u32>,
    pub minor: Option<u32>,
    pub micro: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
}

impl PythonVersion {
    pub fn new(major: Option<u32>, minor: Option<u32>, micro: Option<u32>) -> Self {
        Self {
            major,
            minor,
            micro,
            release: None,
        }
    }

    pub fn unknown() -> Self {
        Self::default()
    }

    pub fn is_unknown(&self) -> bool {
        self.major.is_none()
    }

    /// Parses `3`, `3.9`, `3.9.0`, `3.11.0rc1`, `3.9-dev` and similar.
    pub fn parse(s: &str) -> Option<Self> {
        let caps = VERSION_RE.captures(s.trim())?;
        let component = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        let release = caps
            .get(4)
            .map(|m| m.as_str().trim_start_matches(['-', '.']).to_string());
        Some(Self {
            major: component(1),
            minor: component(2),
            micro: component(3),
            release,
        })
    }

    fn components(&self) -> [Option<u32>; 3] {
        [self.major, self.minor, self.micro]
    }

    fn known_components(&self) -> usize {
        self.components().iter().take_while(|c| c.is_some()).count()
    }

    /// True when neither version contradicts the other on a component both know.
    fn is_compatible_with(&self, other: &PythonVersion) -> bool {
        self.components()
            .iter()
            .zip(other.components().iter())
            .all(|(a, b)| a.is_none() || b.is_none() || a == b)
    }

    /// Merges two versions as a unit: the more complete of two compatible
    /// versions wins; on a real conflict the authoritative side wins.
    pub fn merged_with(&self, other: &PythonVersion, other_is_authoritative: bool) -> Self {
        if self.is_unknown() {
            return other.clone();
        }
        if other.is_unknown() {
            return self.clone();
        }
        if self.is_compatible_with(other) {
            let mut merged = if other.known_components() > self.known_components() {
                other.clone()
            } else {
                self.clone()
            };
            if merged.release.is_none() {
                merged.release = self.release.clone().or_else(|| other.release.clone());
            }
            return merged;
        }
        if other_is_authoritative {
            other.clone()
        } else {
            self.clone()
        }
    }
}

impl fmt::Display for PythonVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(major) = self.major else {
            return write!(f, "unknown");
        };
        write!(f, "{}", major)?;
        if let Some(minor) = self.minor {
            write!(f, ".{}", minor)?;
            if let Some(micro) = self.micro {
                write!(f, ".{}", micro)?;
            }
        }
        if let Some(release) = &self.release {
            if release.starts_with("dev") {
                write!(f, "-{}", release)?;
            } else {
                write!(f, "{}", release)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full() {
        let v = PythonVersion::parse("3.9.0").unwrap();
        assert_eq!(v, PythonVersion::new(Some(3), Some(9), Some(0)));
        assert_eq!(v.to_string(), "3.9.0");
    }

    #[test]
    fn test_parse_partial_keeps_micro_unknown() {
        let v = PythonVersion::parse("3.10").unwrap();
        assert_eq!(v.micro, None);
        assert_ne!(v, PythonVersion::new(Some(3), Some(10), Some(0)));
        assert_eq!(v.to_string(), "3.10");
    }

    #[test]
    fn test_parse_release_suffix() {
        let v = PythonVersion::parse("3.11.0rc1").unwrap();
        assert_eq!(v.micro, Some(0));
        assert_eq!(v.release.as_deref(), Some("rc1"));
        assert_eq!(v.to_string(), "3.11.0rc1");

        let v = PythonVersion::parse("3.9-dev").unwrap();
        assert_eq!(v.micro, None);
        assert_eq!(v.release.as_deref(), Some("dev"));
        assert_eq!(v.to_string(), "3.9-dev");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(PythonVersion::parse("miniconda3-4.7.12").is_none());
        assert!(PythonVersion::parse("venv1").is_none());
        assert!(PythonVersion::parse("").is_none());
    }

    #[test]
    fn test_unknown() {
        assert!(PythonVersion::unknown().is_unknown());
        assert_eq!(PythonVersion::unknown().to_string(), "unknown");
    }

    #[test]
    fn test_merge_prefers_more_complete() {
        let partial = PythonVersion::new(Some(3), Some(9), None);
        let full = PythonVersion::new(Some(3), Some(9), Some(4));
        assert_eq!(partial.merged_with(&full, false), full);
        assert_eq!(full.merged_with(&partial, true), full);
    }

    #[test]
    fn test_merge_conflict() {
        let a = PythonVersion::new(Some(3), Some(9), Some(0));
        let b = PythonVersion::new(Some(3), Some(8), Some(5));
        assert_eq!(a.merged_with(&b, false), a);
        assert_eq!(a.merged_with(&b, true), b);
    }
}
