pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod locator;
pub mod model;
pub mod output;
pub mod pattern;
pub mod platform;
pub mod watcher;

pub use config::Config;
pub use engine::{EngineState, EnvironmentsEngine};
pub use error::LocatorError;
pub use locator::{Locator, PythonLocatorQuery};
pub use model::{EnvRef, Platform, PythonEnvInfo, PythonEnvKind, PythonVersion};
