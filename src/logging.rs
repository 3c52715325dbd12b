//! Logging configuration with file rotation
//!
//! Logs go to stderr by default. Setting `BOILER_LOG_FILE` adds a daily
//! rotated file, `BOILER_LOG_JSON` switches every output to JSON lines.

use crate::error::{BoilerError, Result};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default level when `RUST_LOG` is not set
    pub level: Level,

    /// Log to a daily rotated file
    pub file_path: Option<PathBuf>,

    /// Log to stderr
    pub stderr: bool,

    /// Emit JSON lines instead of human-readable text
    pub json: bool,

    /// Use `level` even when `RUST_LOG` is set
    pub force_level: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_path: None,
            stderr: true,
            json: false,
            force_level: false,
        }
    }
}

impl LogConfig {
    /// Create config from environment
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(log_file) = std::env::var("BOILER_LOG_FILE") {
            if !log_file.trim().is_empty() {
                config.file_path = Some(PathBuf::from(log_file));
            }
        }

        if let Ok(log_stderr) = std::env::var("BOILER_LOG_STDERR") {
            config.stderr = flag(&log_stderr);
        }

        if let Ok(log_json) = std::env::var("BOILER_LOG_JSON") {
            config.json = flag(&log_json);
        }

        config
    }

    /// Log at DEBUG regardless of `RUST_LOG`
    pub fn with_debug(mut self, debug: bool) -> Self {
        if debug {
            self.level = Level::DEBUG;
            self.force_level = true;
        }
        self
    }
}

fn flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}

/// Initialize logging with the given configuration
pub fn init_logging(config: LogConfig) -> Result<()> {
    let env_filter = if config.force_level {
        EnvFilter::default().add_directive(config.level.into())
    } else {
        EnvFilter::builder()
            .with_default_directive(config.level.into())
            .from_env_lossy()
    };

    let file_appender = match &config.file_path {
        Some(file_path) => {
            let dir = file_path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)?;

            let name = file_path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("boiler-control.log"));
            Some(tracing_appender::rolling::daily(dir, name))
        }
        None => None,
    };

    let stderr_text = (config.stderr && !config.json).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .compact()
    });
    let stderr_json = (config.stderr && config.json)
        .then(|| fmt::layer().json().with_writer(std::io::stderr));

    let (file_text, file_json) = match file_appender {
        Some(appender) if config.json => (None, Some(fmt::layer().json().with_writer(appender))),
        Some(appender) => (
            Some(fmt::layer().with_ansi(false).with_writer(appender)),
            None,
        ),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_text)
        .with(stderr_json)
        .with(file_text)
        .with(file_json)
        .try_init()
        .map_err(|e| BoilerError::internal(format!("Failed to initialise logging: {e}")))
}
