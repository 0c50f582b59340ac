//! Tracing subscriber setup for the binary and tests.

use tracing_subscriber::fmt;

use crate::config::LogLevel;

/// Install the global `fmt` subscriber at the given level.
///
/// Returns an error if a global subscriber is already set.
pub fn try_init(level: LogLevel) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    fmt()
        .with_max_level(level.as_tracing_level())
        .with_target(false)
        .try_init()
}

/// Install the global subscriber, ignoring a subscriber that is already set.
pub fn init(level: LogLevel) {
    if try_init(level).is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_is_harmless() {
        init(LogLevel::Debug);
        init(LogLevel::Warn);
        assert!(try_init(LogLevel::Info).is_err());
    }
}
