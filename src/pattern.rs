//! Glob-style matching used for watch patterns and ignore lists.

/// Simple glob matching (supports * as wildcard, which also spans `/`).
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();

    if parts.len() == 1 {
        return pattern == text;
    }

    let mut remaining = text;

    // Check prefix (before first *)
    if !parts[0].is_empty() {
        if !remaining.starts_with(parts[0]) {
            return false;
        }
        remaining = &remaining[parts[0].len()..];
    }

    // Check suffix (after last *)
    let last_part = parts[parts.len() - 1];
    if !last_part.is_empty() {
        if !remaining.ends_with(last_part) {
            return false;
        }
        remaining = &remaining[..remaining.len() - last_part.len()];
    }

    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        if let Some(pos) = remaining.find(part) {
            remaining = &remaining[pos + part.len()..];
        } else {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match_exact() {
        assert!(glob_match("python3", "python3"));
        assert!(!glob_match("python3", "python"));
    }

    #[test]
    fn test_glob_match_prefix() {
        assert!(glob_match("/usr/bin/python*", "/usr/bin/python"));
        assert!(glob_match("/usr/bin/python*", "/usr/bin/python3.9"));
        assert!(!glob_match("/usr/bin/python*", "/usr/local/bin/python"));
    }

    #[test]
    fn test_glob_match_suffix() {
        assert!(glob_match("*/pyvenv.cfg", "proj/.venv/pyvenv.cfg"));
        assert!(glob_match("*/pyvenv.cfg", ".venv/pyvenv.cfg"));
        assert!(!glob_match("*/pyvenv.cfg", "pyvenv.cfg"));
    }

    #[test]
    fn test_glob_match_everything() {
        assert!(glob_match("*", "3.9.0"));
        assert!(glob_match("*", ""));
    }

    #[test]
    fn test_glob_match_contains() {
        assert!(glob_match("*conda*", "miniconda3-4.7.12"));
        assert!(!glob_match("*conda*", "3.9.0"));
    }
}
