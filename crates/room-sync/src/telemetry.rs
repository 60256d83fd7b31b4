//! Logging setup for shells embedding a session client.
//!
//! Library code only emits `tracing` events under `room.*` targets; installing
//! a subscriber is left to the host. `RUST_LOG` overrides the chosen level.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::SessionError;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = SessionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(SessionError::Config(format!("unknown log level {other}"))),
        }
    }
}

fn env_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.to_filter().into()))
}

/// Installs a global fmt subscriber. Fails if one is already installed.
pub fn init_logging(level: LogLevel) -> Result<(), SessionError> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_target(level >= LogLevel::Debug)
        .try_init()
        .map_err(|err| SessionError::Logging(err.to_string()))
}

/// Routes logs through the test harness's captured output. Safe to call
/// from every test.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(LogLevel::Debug))
        .with_test_writer()
        .try_init();
}
