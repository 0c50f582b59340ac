pub mod config;
pub mod core;
pub mod logging;

// Re-export commonly used items for convenience
pub use config::{AppConfig, ConfigError, LogLevel};
pub use core::*;
