//! Logging configuration and initialization
//!
//! Console output (compact or JSON) plus an optional non-blocking log file,
//! selected through environment variables.

use std::ffi::OsString;
use std::path::PathBuf;

use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

pub use tracing_appender::non_blocking::WorkerGuard as LogGuard;

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "FRAMEPACE_LOG";

/// Set to "json" for JSON console output
pub const LOG_FORMAT_ENV: &str = "FRAMEPACE_LOG_FORMAT";

/// Path of a file to mirror the log into
pub const LOG_FILE_ENV: &str = "FRAMEPACE_LOG_FILE";

#[derive(Debug, Clone, PartialEq)]
pub struct LogConfig {
    pub json_console: bool,
    pub file: Option<PathBuf>,
    /// Filter used when neither FRAMEPACE_LOG nor RUST_LOG is set
    pub default_level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            json_console: false,
            file: None,
            default_level: "info".to_string(),
        }
    }
}

impl LogConfig {
    /// Defaults adjusted by FRAMEPACE_LOG_FORMAT and FRAMEPACE_LOG_FILE
    pub fn from_env() -> Self {
        Self::from_values(
            std::env::var(LOG_FORMAT_ENV).ok().as_deref(),
            std::env::var_os(LOG_FILE_ENV),
        )
    }

    fn from_values(format: Option<&str>, file: Option<OsString>) -> Self {
        Self {
            json_console: format.is_some_and(|v| v.eq_ignore_ascii_case("json")),
            file: file.filter(|f| !f.is_empty()).map(PathBuf::from),
            ..Self::default()
        }
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the log file on drop; keep it alive for the
/// life of the program.
pub fn init_logging(config: &LogConfig) -> Result<Option<LogGuard>, Box<dyn std::error::Error + Send + Sync>> {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_env("RUST_LOG"))
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    let (file_layer, guard) = match &config.file {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // Feeder and decoder threads are named, so keep thread names in JSON
    let json_layer = config
        .json_console
        .then(|| fmt::layer().json().with_thread_names(true));
    let compact_layer = (!config.json_console).then(|| fmt::layer().compact());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(json_layer)
        .with(compact_layer)
        .try_init()?;

    tracing::info!(
        target: "framepace",
        version = env!("CARGO_PKG_VERSION"),
        json = config.json_console,
        file = ?config.file,
        "Logging initialized"
    );

    Ok(guard)
}
