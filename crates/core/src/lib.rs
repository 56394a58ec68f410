pub mod config;
pub mod error;

pub use config::{Config, SchedulerConfig};
pub use error::ConfigError;
