use env_logger::{Builder, WriteStyle};
use log::LevelFilter;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("logger init failed: {0}")]
    Init(#[from] log::SetLoggerError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleLoggerConfig {
    pub level: LevelFilter,
    pub colors: bool,
    pub include_module: bool,
    /// Extra `env_logger` filter directives, e.g. "tierloop_core=trace".
    pub filters: Option<String>,
}

impl ConsoleLoggerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let level = get("TIERLOOP_LOG")
            .and_then(|v| v.parse::<LevelFilter>().ok())
            .unwrap_or(LevelFilter::Info);
        let colors = get("TIERLOOP_LOG_COLORS")
            .map(|v| v != "0")
            .unwrap_or(true);
        let include_module = get("TIERLOOP_LOG_MODULE")
            .map(|v| v != "0")
            .unwrap_or(true);
        let filters = get("TIERLOOP_LOG_FILTER").filter(|v| !v.trim().is_empty());

        Self {
            level,
            colors,
            include_module,
            filters,
        }
    }

    #[inline]
    pub fn with_level(mut self, level: LevelFilter) -> Self {
        self.level = level;
        self
    }
}

impl Default for ConsoleLoggerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn builder(config: &ConsoleLoggerConfig) -> Builder {
    let mut builder = Builder::new();
    builder.filter_level(config.level);
    if let Some(filters) = &config.filters {
        builder.parse_filters(filters);
    }
    builder.write_style(if config.colors {
        WriteStyle::Auto
    } else {
        WriteStyle::Never
    });
    builder.format_target(config.include_module);
    builder.format_timestamp_millis();
    builder
}

/// Installs the console logger as the global `log` backend.
///
/// Fails if a logger is already installed.
pub fn init_console_logger(config: &ConsoleLoggerConfig) -> Result<(), LoggerError> {
    builder(config).try_init()?;
    log::debug!("console logger initialized (level={})", config.level);
    Ok(())
}
