//! Tracing initialisation for programs embedding mergegate.
//!
//! Call [`init_tracing`] (or [`init_tracing_from_env`]) once at program start
//! to install a global subscriber with an `EnvFilter` and either pretty or
//! JSON output. Later calls are ignored (the global subscriber can only be
//! set once).
//!
//! Environment:
//! - `MERGEGATE_LOG`: filter directives, falling back to `RUST_LOG`
//! - `MERGEGATE_LOG_FORMAT`: `json` for newline-delimited JSON, anything
//!   else for human-readable lines

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

pub const LOG_FILTER_ENV: &str = "MERGEGATE_LOG";
pub const LOG_FORMAT_ENV: &str = "MERGEGATE_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if s.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        })
    }
}

/// Install the global subscriber.
///
/// `level` is the default verbosity when neither `MERGEGATE_LOG` nor
/// `RUST_LOG` holds a valid filter.
pub fn init_tracing(format: LogFormat, level: Level) {
    let filter = env_filter(level);
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Json => registry
            .with(fmt::layer().with_target(false).json())
            .try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().with_target(false)).try_init(),
    };
    if installed.is_ok() {
        tracing::debug!(?format, "tracing initialised");
    }
}

/// [`init_tracing`] with the format taken from `MERGEGATE_LOG_FORMAT` and an
/// `info` default level.
pub fn init_tracing_from_env() {
    let format = std::env::var(LOG_FORMAT_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
    init_tracing(format, Level::INFO);
}

fn env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_env(LOG_FILTER_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_parsing_is_lenient() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" JSON ".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
    }

    #[test]
    fn init_twice_is_harmless() {
        init_tracing(LogFormat::Pretty, Level::DEBUG);
        init_tracing(LogFormat::Json, Level::INFO);
        tracing::info!("still logging");
    }
}
