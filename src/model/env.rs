use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use super::version::PythonVersion;

/// Provenance tag: which discovery strategy produced a record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum PythonEnvKind {
    #[default]
    Unknown,
    PathEnvVar,
    Pyenv,
    Conda,
    Venv,
    VirtualEnv,
    Pipenv,
    Poetry,
    WindowsStore,
    System,
    Custom,
}

impl PythonEnvKind {
    pub const ALL: [PythonEnvKind; 11] = [
        PythonEnvKind::Unknown,
        PythonEnvKind::PathEnvVar,
        PythonEnvKind::Pyenv,
        PythonEnvKind::Conda,
        PythonEnvKind::Venv,
        PythonEnvKind::VirtualEnv,
        PythonEnvKind::Pipenv,
        PythonEnvKind::Poetry,
        PythonEnvKind::WindowsStore,
        PythonEnvKind::System,
        PythonEnvKind::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PythonEnvKind::Unknown => "unknown",
            PythonEnvKind::PathEnvVar => "path-env-var",
            PythonEnvKind::Pyenv => "pyenv",
            PythonEnvKind::Conda => "conda",
            PythonEnvKind::Venv => "venv",
            PythonEnvKind::VirtualEnv => "virtual-env",
            PythonEnvKind::Pipenv => "pipenv",
            PythonEnvKind::Poetry => "poetry",
            PythonEnvKind::WindowsStore => "windows-store",
            PythonEnvKind::System => "system",
            PythonEnvKind::Custom => "custom",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PythonEnvKind::Unknown => "Unknown",
            PythonEnvKind::PathEnvVar => "PATH",
            PythonEnvKind::Pyenv => "Pyenv",
            PythonEnvKind::Conda => "Conda",
            PythonEnvKind::Venv => "Venv",
            PythonEnvKind::VirtualEnv => "VirtualEnv",
            PythonEnvKind::Pipenv => "Pipenv",
            PythonEnvKind::Poetry => "Poetry",
            PythonEnvKind::WindowsStore => "Windows Store",
            PythonEnvKind::System => "System",
            PythonEnvKind::Custom => "Custom",
        }
    }
}

impl fmt::Display for PythonEnvKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for PythonEnvKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_lowercase();
        match lowered.as_str() {
            "path" | "pathenvvar" => return Ok(PythonEnvKind::PathEnvVar),
            "virtualenv" => return Ok(PythonEnvKind::VirtualEnv),
            "store" | "windowsstore" => return Ok(PythonEnvKind::WindowsStore),
            _ => {}
        }
        PythonEnvKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == lowered)
            .ok_or_else(|| {
                let known: Vec<&str> = PythonEnvKind::ALL.iter().map(|k| k.as_str()).collect();
                format!("Unknown kind: {}. Use one of: {}", s, known.join(", "))
            })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    #[default]
    Unknown,
    X86,
    X64,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Architecture::Unknown => "unknown",
            Architecture::X86 => "x86",
            Architecture::X64 => "x64",
        };
        write!(f, "{}", s)
    }
}

/// Owning distribution of an environment, e.g. `miniconda3` or `pypy3.6`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distro {
    pub org: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Distro {
    pub fn new(org: impl Into<String>) -> Self {
        Self {
            org: org.into(),
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.org.is_empty() && self.version.is_none()
    }
}

/// Identity of an environment: its executable path after lexical
/// normalization. Symlinks are not resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvKey(String);

impl EnvKey {
    pub fn from_path(path: &Path) -> Self {
        let normalized = normalize_path(path).to_string_lossy().into_owned();
        if cfg!(any(windows, target_os = "macos")) {
            EnvKey(normalized.to_lowercase())
        } else {
            EnvKey(normalized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EnvKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lexically normalizes a path: drops `.` components, folds `..` into the
/// preceding component and removes repeated or trailing separators.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                // `..` above the root stays at the root
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// A discovered Python environment.
///
/// Records may be partially populated while they travel through a scan;
/// `executable` is always set. Once handed to a caller a record is never
/// mutated: resolution and merging build new records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PythonEnvInfo {
    pub executable: PathBuf,
    pub kind: PythonEnvKind,
    #[serde(default)]
    pub version: PythonVersion,
    #[serde(default)]
    pub location: PathBuf,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub distro: Distro,
    #[serde(default)]
    pub arch: Architecture,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl PythonEnvInfo {
    /// Creates a minimally populated record. `location` defaults to the
    /// executable's parent directory.
    pub fn new(executable: impl Into<PathBuf>, kind: PythonEnvKind) -> Self {
        let executable = executable.into();
        let location = executable
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self {
            executable,
            kind,
            version: PythonVersion::default(),
            location,
            name: String::new(),
            distro: Distro::default(),
            arch: Architecture::Unknown,
            display_name: None,
        }
    }

    pub fn with_version(mut self, version: PythonVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.location = location.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_distro(mut self, distro: Distro) -> Self {
        self.distro = distro;
        self
    }

    pub fn with_arch(mut self, arch: Architecture) -> Self {
        self.arch = arch;
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn key(&self) -> EnvKey {
        EnvKey::from_path(&self.executable)
    }

    /// Same environment iff the executables normalize to the same key.
    pub fn same_env(&self, other: &PythonEnvInfo) -> bool {
        self.key() == other.key()
    }

    /// The stored display name, or one derived from version, name and kind.
    pub fn display_name(&self) -> String {
        if let Some(name) = &self.display_name {
            return name.clone();
        }
        let version = if self.version.is_unknown() {
            String::new()
        } else {
            format!(" {}", self.version)
        };
        if self.name.is_empty() {
            format!("Python{} ({})", version, self.kind.display_name())
        } else {
            format!(
                "Python{} ('{}': {})",
                version,
                self.name,
                self.kind.display_name()
            )
        }
    }

    /// Builds a new record combining `self` with `other`.
    ///
    /// Empty fields are filled from whichever record has them; a populated
    /// field is never replaced by an empty one. When both records populate a
    /// field differently, `other` wins only if `other_is_authoritative`.
    pub fn merged_with(&self, other: &PythonEnvInfo, other_is_authoritative: bool) -> Self {
        fn pick<T: Clone + PartialEq>(
            mine: &T,
            theirs: &T,
            is_empty: impl Fn(&T) -> bool,
            prefer_theirs: bool,
        ) -> T {
            match (is_empty(mine), is_empty(theirs)) {
                (true, _) => theirs.clone(),
                (false, true) => mine.clone(),
                (false, false) if prefer_theirs && mine != theirs => theirs.clone(),
                (false, false) => mine.clone(),
            }
        }

        let prefer = other_is_authoritative;
        Self {
            executable: self.executable.clone(),
            kind: pick(
                &self.kind,
                &other.kind,
                |k| *k == PythonEnvKind::Unknown,
                prefer,
            ),
            version: self.version.merged_with(&other.version, prefer),
            location: pick(
                &self.location,
                &other.location,
                |p| p.as_os_str().is_empty(),
                prefer,
            ),
            name: pick(&self.name, &other.name, String::is_empty, prefer),
            distro: Distro {
                org: pick(&self.distro.org, &other.distro.org, String::is_empty, prefer),
                version: pick(
                    &self.distro.version,
                    &other.distro.version,
                    Option::is_none,
                    prefer,
                ),
            },
            arch: pick(
                &self.arch,
                &other.arch,
                |a| *a == Architecture::Unknown,
                prefer,
            ),
            display_name: pick(
                &self.display_name,
                &other.display_name,
                Option::is_none,
                prefer,
            ),
        }
    }
}

/// Input to resolution: an executable path or a (possibly partial) record.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvRef {
    Path(PathBuf),
    Info(Box<PythonEnvInfo>),
}

impl EnvRef {
    pub fn executable(&self) -> &Path {
        match self {
            EnvRef::Path(path) => path,
            EnvRef::Info(info) => &info.executable,
        }
    }

    pub fn key(&self) -> EnvKey {
        EnvKey::from_path(self.executable())
    }
}

impl From<PathBuf> for EnvRef {
    fn from(path: PathBuf) -> Self {
        EnvRef::Path(path)
    }
}

impl From<&Path> for EnvRef {
    fn from(path: &Path) -> Self {
        EnvRef::Path(path.to_path_buf())
    }
}

impl From<&str> for EnvRef {
    fn from(path: &str) -> Self {
        EnvRef::Path(PathBuf::from(path))
    }
}

impl From<PythonEnvInfo> for EnvRef {
    fn from(info: PythonEnvInfo) -> Self {
        EnvRef::Info(Box::new(info))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path(Path::new("/usr/./bin/../bin/python3")),
            PathBuf::from("/usr/bin/python3")
        );
        assert_eq!(
            normalize_path(Path::new("/opt//py/")),
            PathBuf::from("/opt/py")
        );
        assert_eq!(normalize_path(Path::new("/../x")), PathBuf::from("/x"));
        assert_eq!(normalize_path(Path::new("../x")), PathBuf::from("../x"));
    }

    #[test]
    fn test_same_env_ignores_lexical_noise() {
        let a = PythonEnvInfo::new("/usr/bin/python3", PythonEnvKind::PathEnvVar);
        let b = PythonEnvInfo::new("/usr/bin/./python3", PythonEnvKind::Pyenv);
        let c = PythonEnvInfo::new("/usr/local/bin/python3", PythonEnvKind::PathEnvVar);
        assert!(a.same_env(&b));
        assert!(!a.same_env(&c));
    }

    #[cfg(not(any(windows, target_os = "macos")))]
    #[test]
    fn test_key_is_case_sensitive_on_linux() {
        let a = EnvKey::from_path(Path::new("/opt/Python/bin/python"));
        let b = EnvKey::from_path(Path::new("/opt/python/bin/python"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("pyenv".parse::<PythonEnvKind>(), Ok(PythonEnvKind::Pyenv));
        assert_eq!("PATH".parse::<PythonEnvKind>(), Ok(PythonEnvKind::PathEnvVar));
        assert_eq!(
            "windows-store".parse::<PythonEnvKind>(),
            Ok(PythonEnvKind::WindowsStore)
        );
        assert!("ruby".parse::<PythonEnvKind>().is_err());
    }

    #[test]
    fn test_merge_fills_missing_fields() {
        let first = PythonEnvInfo::new("/x/bin/python", PythonEnvKind::PathEnvVar);
        let second = PythonEnvInfo::new("/x/bin/python", PythonEnvKind::Pyenv)
            .with_name("x")
            .with_distro(Distro::new("miniconda3"))
            .with_version(PythonVersion::new(Some(3), Some(9), Some(1)));

        let merged = first.merged_with(&second, false);
        assert_eq!(merged.kind, PythonEnvKind::PathEnvVar);
        assert_eq!(merged.name, "x");
        assert_eq!(merged.distro.org, "miniconda3");
        assert_eq!(merged.version.to_string(), "3.9.1");
    }

    #[test]
    fn test_merge_never_overwrites_with_empty() {
        let populated = PythonEnvInfo::new("/x/bin/python", PythonEnvKind::Pyenv)
            .with_name("x")
            .with_arch(Architecture::X64);
        let empty = PythonEnvInfo::new("/x/bin/python", PythonEnvKind::Unknown);

        let merged = populated.merged_with(&empty, true);
        assert_eq!(merged.kind, PythonEnvKind::Pyenv);
        assert_eq!(merged.name, "x");
        assert_eq!(merged.arch, Architecture::X64);
    }

    #[test]
    fn test_merge_conflict_follows_authority() {
        let mine = PythonEnvInfo::new("/x/bin/python", PythonEnvKind::Pyenv).with_name("mine");
        let theirs = PythonEnvInfo::new("/x/bin/python", PythonEnvKind::Venv).with_name("theirs");

        assert_eq!(mine.merged_with(&theirs, false).name, "mine");
        assert_eq!(mine.merged_with(&theirs, true).name, "theirs");
        assert_eq!(mine.merged_with(&theirs, true).kind, PythonEnvKind::Venv);
    }

    #[test]
    fn test_display_name_fallback() {
        let env = PythonEnvInfo::new("/p/bin/python", PythonEnvKind::Pyenv)
            .with_name("3.9.0")
            .with_version(PythonVersion::new(Some(3), Some(9), Some(0)));
        assert_eq!(env.display_name(), "Python 3.9.0 ('3.9.0': Pyenv)");

        let env = env.with_display_name("3.9.0:pyenv");
        assert_eq!(env.display_name(), "3.9.0:pyenv");
    }

    #[test]
    fn test_env_ref_executable() {
        let info = PythonEnvInfo::new("/a/python", PythonEnvKind::Unknown);
        assert_eq!(EnvRef::from(info).executable(), Path::new("/a/python"));
        assert_eq!(EnvRef::from("/b/python").executable(), Path::new("/b/python"));
    }
}
