//! Diagnostic logging for the `labcomm` binary.
//!
//! Channel lifecycle events (bind, accept, heartbeat failures, closes) are
//! emitted by the library crates through `tracing`. The binary routes them
//! to stderr; stdout carries only received frames and command results.

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;

/// Shape of the stderr log stream.
#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    /// One human-readable line per event.
    Text,
    /// One JSON object per event, for capture next to `--format json` output.
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Silence diagnostics entirely, e.g. when piping raw frames.
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    /// Debug and trace runs show which crate (transport, registry) logged.
    fn shows_source(self) -> bool {
        matches!(self, LogLevel::Debug | LogLevel::Trace)
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Install the global subscriber. A second call is a no-op.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(LevelFilter::from(level))
        .with_ansi(false)
        .with_target(level.shows_source());

    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_map_to_filters() {
        assert_eq!(LevelFilter::from(LogLevel::Off), LevelFilter::OFF);
        assert_eq!(LevelFilter::from(LogLevel::Warn), LevelFilter::WARN);
        assert_eq!(LevelFilter::from(LogLevel::Trace), LevelFilter::TRACE);
    }

    #[test]
    fn source_shown_only_when_verbose() {
        assert!(!LogLevel::Info.shows_source());
        assert!(LogLevel::Debug.shows_source());
    }

    #[test]
    fn level_names_parse_from_cli() {
        assert_eq!(LogLevel::from_str("off", true).unwrap(), LogLevel::Off);
        assert_eq!(LogLevel::from_str("WARN", true).unwrap(), LogLevel::Warn);
    }
}
