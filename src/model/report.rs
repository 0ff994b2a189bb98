use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PythonEnvInfo, PythonEnvKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    MacOS,
    Windows,
}

impl Platform {
    pub fn current() -> Self {
        #[cfg(target_os = "macos")]
        return Platform::MacOS;
        #[cfg(target_os = "windows")]
        return Platform::Windows;
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        return Platform::Linux;
    }
}

/// A listing of environments as produced by one discovery pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub scan_time: DateTime<Utc>,
    pub platform: Platform,
    pub environments: Vec<PythonEnvInfo>,
}

impl DiscoveryReport {
    pub fn new(environments: Vec<PythonEnvInfo>) -> Self {
        Self {
            scan_time: Utc::now(),
            platform: Platform::current(),
            environments,
        }
    }

    pub fn count_by_kind(&self, kind: PythonEnvKind) -> usize {
        self.environments.iter().filter(|e| e.kind == kind).count()
    }
}
