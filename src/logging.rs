//! Tracing setup shared by the binaries

use clap::ValueEnum;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

impl LogLevel {
    /// `-v` count overrides the level
    pub fn with_verbosity(self, verbose_count: u8) -> Self {
        match verbose_count {
            0 => self,
            1 => LogLevel::Verbose,
            2 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    pub fn filter(self) -> &'static str {
        match self {
            LogLevel::Error => "camstream=error,tower_http=error",
            LogLevel::Warn => "camstream=warn,tower_http=warn",
            LogLevel::Info => "camstream=info,tower_http=info",
            LogLevel::Verbose => "camstream=debug,tower_http=info",
            LogLevel::Debug => "camstream=debug,tower_http=debug",
            LogLevel::Trace => "camstream=trace,tower_http=debug",
        }
    }
}

/// Install the global subscriber. `RUST_LOG` takes priority over the level.
pub fn init_logging(level: LogLevel, verbose_count: u8) {
    let filter = level.with_verbosity(verbose_count).filter();

    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_overrides_level() {
        assert_eq!(LogLevel::Warn.with_verbosity(0), LogLevel::Warn);
        assert_eq!(LogLevel::Error.with_verbosity(1), LogLevel::Verbose);
        assert_eq!(LogLevel::Info.with_verbosity(5), LogLevel::Trace);
        assert_eq!(LogLevel::Debug.filter(), "camstream=debug,tower_http=debug");
    }
}
