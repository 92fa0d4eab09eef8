use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Overrides `--log-level` with full filter directives,
/// e.g. `copyline_bridge::receiver=trace,warn`.
pub const LOG_ENV: &str = "COPYLINE_LOG";

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

fn filter(level: LogLevel, env: Option<&str>) -> EnvFilter {
    env.and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(level.directive()))
}

/// Route bridge logs to stderr. Thread names identify the receiver, monitor
/// and supervisor loops.
pub fn init_logging(format: LogFormat, level: LogLevel) {
    let env = std::env::var(LOG_ENV).ok();
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter(level, env.as_deref()))
        .with_ansi(false)
        .with_target(matches!(level, LogLevel::Debug | LogLevel::Trace))
        .with_thread_names(true);

    match format {
        LogFormat::Text => {
            let _ = builder.try_init();
        }
        LogFormat::Json => {
            let _ = builder.json().try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use tracing::level_filters::LevelFilter;

    use super::*;

    #[test]
    fn level_sets_the_default_filter() {
        assert_eq!(filter(LogLevel::Info, None).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(filter(LogLevel::Off, None).max_level_hint(), Some(LevelFilter::OFF));
    }

    #[test]
    fn env_directives_win_over_level() {
        let filter = filter(LogLevel::Warn, Some("copyline_bridge=trace"));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));
    }

    #[test]
    fn malformed_env_falls_back_to_level() {
        let filter = filter(LogLevel::Error, Some("copyline_bridge=loud"));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::ERROR));
    }
}
