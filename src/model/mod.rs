//! Core data types for discovered Python environments.
//!
//! - [`PythonEnvInfo`] - one discovered environment
//! - [`PythonEnvKind`] - which discovery strategy produced it
//! - [`PythonVersion`] - a possibly partial interpreter version
//! - [`EnvKey`] / [`EnvRef`] - identity and resolution input
//! - [`Platform`] - operating system platform
//! - [`DiscoveryReport`] - a timestamped listing for output
//!
//! # Example
//!
//! ```
//! use envscan::model::{PythonEnvInfo, PythonEnvKind, PythonVersion};
//!
//! let env = PythonEnvInfo::new("/usr/bin/python3", PythonEnvKind::PathEnvVar)
//!     .with_version(PythonVersion::new(Some(3), None, None));
//!
//! assert_eq!(env.location.to_str(), Some("/usr/bin"));
//! assert!(env.version.micro.is_none());
//! ```

mod env;
mod report;
mod version;

pub use env::*;
pub use report::*;
pub use version::*;
