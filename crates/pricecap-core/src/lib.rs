pub mod config;
pub mod types;

pub use config::{ConfigError, ControllerConfig};
pub use types::*;
