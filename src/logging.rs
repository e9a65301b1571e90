//! Logger setup and small logging helpers.
//!
//! The library only uses the `log` facade. Binaries pick the backend; the
//! CLI uses `env_logger` through [`init_logger`], filtered by `RUST_LOG`.

use crate::state::StateChange;
use log::{debug, error, info, log_enabled, warn, Level};

/// Default filter when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info";

/// Initializes the logger with the `env_logger` crate.
///
/// Does nothing if a logger is already installed.
pub fn init_logger() {
    let _ = try_init_logger(DEFAULT_FILTER);
}

/// Initializes `env_logger`, falling back to `default_filter` when
/// `RUST_LOG` is unset.
pub fn try_init_logger(default_filter: &str) -> Result<(), log::SetLoggerError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .try_init()
}

/// Logger for tests: captured output, all levels.
pub fn init_test_logger() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Trace)
        .try_init();
}

/// Logs an error message.
pub fn log_error(message: &str) {
    if log_enabled!(Level::Error) {
        error!("{message}");
    }
}

/// Logs a warning message.
pub fn log_warn(message: &str) {
    if log_enabled!(Level::Warn) {
        warn!("{message}");
    }
}

/// Logs an informational message.
pub fn log_info(message: &str) {
    if log_enabled!(Level::Info) {
        info!("{message}");
    }
}

/// Logs a debug message.
pub fn log_debug(message: &str) {
    if log_enabled!(Level::Debug) {
        debug!("{message}");
    }
}

/// One-line description of a state change.
pub fn describe_change(change: &StateChange) -> String {
    let validity = if change.valid { "" } else { " (not available)" };
    match change.previous {
        Some(previous) => format!(
            "{}: {} {} -> {}{validity}",
            change.address, change.parameter, previous, change.current
        ),
        None => format!(
            "{}: {} = {}{validity}",
            change.address, change.parameter, change.current
        ),
    }
}

/// Logs a state change at info level.
pub fn log_change(change: &StateChange) {
    if log_enabled!(Level::Info) {
        info!("{}", describe_change(change));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Parameter, Value};
    use crate::state::ReadingSource;
    use chrono::Utc;

    #[test]
    fn test_describe_change() {
        let mut change = StateChange {
            address: 2,
            parameter: Parameter::SupplyFanSpeed,
            previous: None,
            current: Value::Percentage(40),
            valid: true,
            source: ReadingSource::Polled,
            timestamp: Utc::now(),
        };
        assert_eq!(describe_change(&change), "2: supply_fan_speed = 40%");

        change.previous = Some(Value::Percentage(30));
        assert_eq!(describe_change(&change), "2: supply_fan_speed 30% -> 40%");
    }

    #[test]
    fn test_helpers_do_not_panic() {
        init_test_logger();
        init_logger();
        log_error("error");
        log_warn("warn");
        log_info("info");
        log_debug("debug");
    }
}
