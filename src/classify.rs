//! Filename heuristics shared by locators.
//!
//! Nothing here executes a binary: these are cheap checks on names and
//! file metadata.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use crate::model::PythonVersion;

static STANDARD_BINARY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^python(\d+(?:\.\d+)?)?$").expect("binary regex is valid"));

/// Strips the Windows `.exe` suffix and lowercases on Windows.
fn binary_stem(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    if cfg!(windows) {
        let lowered = name.to_lowercase();
        lowered.strip_suffix(".exe").map(str::to_string)
    } else {
        Some(name.to_string())
    }
}

/// Does this filename look like a standard Python executable
/// (`python`, `python3`, `python3.9`; with `.exe` on Windows)?
pub fn is_standard_python_binary(path: &Path) -> bool {
    binary_stem(path)
        .map(|stem| STANDARD_BINARY_RE.is_match(&stem))
        .unwrap_or(false)
}

/// Version implied by a standard binary name: `python3.9` gives 3.9 with an
/// unknown micro, plain `python` gives nothing.
pub fn version_from_binary_name(path: &Path) -> PythonVersion {
    let Some(stem) = binary_stem(path) else {
        return PythonVersion::unknown();
    };
    STANDARD_BINARY_RE
        .captures(&stem)
        .and_then(|caps| caps.get(1))
        .and_then(|m| PythonVersion::parse(m.as_str()))
        .unwrap_or_default()
}

/// Platform check for "this file can be executed": the execute bit on unix,
/// the `.exe` extension on Windows. Follows symlinks.
pub async fn looks_like_executable(path: &Path) -> std::io::Result<bool> {
    let metadata = tokio::fs::metadata(path).await?;
    if !metadata.is_file() {
        return Ok(false);
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        Ok(metadata.permissions().mode() & 0o111 != 0)
    }

    #[cfg(not(unix))]
    {
        Ok(path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("exe"))
            .unwrap_or(false))
    }
}

/// Interpreter path inside a virtual environment directory.
pub fn venv_interpreter(env_dir: &Path) -> std::path::PathBuf {
    if cfg!(windows) {
        env_dir.join("Scripts").join("python.exe")
    } else {
        env_dir.join("bin").join("python")
    }
}
