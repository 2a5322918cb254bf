pub mod config;
pub mod types;

pub use config::{ConfigError, ExperimentConfig, parse_duration};
pub use types::*;
