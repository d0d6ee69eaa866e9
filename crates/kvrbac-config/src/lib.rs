mod raw;
mod loader;
mod settings;
pub mod error;

pub use loader::{load_mapping, parse_flag};
pub use settings::{load_run_config, RunConfig, RunConfigFile};
pub use error::ConfigError;
