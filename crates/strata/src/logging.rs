//! Logging setup for applications embedding the store.
//!
//! The store only emits `tracing` events. [`LogConfig::build_subscriber`]
//! turns the `log` block of the configuration into a subscriber that the
//! application installs itself, either globally with
//! `tracing::subscriber::set_global_default` or scoped with
//! `tracing::subscriber::with_default`.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::subscriber::NoSubscriber;
use tracing::Subscriber;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Default log level directive.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default timestamp format of log lines.
pub const DEFAULT_LOG_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Default log file path.
pub const DEFAULT_LOG_PATH: &str = "./strata.log";

/// Log line layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Level, target, fields and span context.
    #[default]
    Full,
    /// Shorter single-line layout.
    Compact,
}

/// Configuration of the log output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Emit nothing when false.
    pub enable_log: bool,
    /// Write to `log_path` instead of stderr.
    pub log_to_file: bool,
    /// Log file, appended to.
    pub log_path: PathBuf,
    /// `EnvFilter` directive, e.g. `info` or `alopex_strata=debug`.
    pub log_level: String,
    /// Line layout.
    pub format: LogFormat,
    /// chrono format of the timestamp prefix.
    pub date_format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enable_log: true,
            log_to_file: false,
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            format: LogFormat::default(),
            date_format: DEFAULT_LOG_DATE_FORMAT.to_string(),
        }
    }
}

impl LogConfig {
    /// Sets the level directive.
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Sends output to `path` instead of stderr.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_to_file = true;
        self.log_path = path.into();
        self
    }

    /// Sets the line layout.
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Turns logging off.
    pub fn disabled(mut self) -> Self {
        self.enable_log = false;
        self
    }

    /// Checks the level directive and date format.
    pub fn validate(&self) -> Result<()> {
        self.filter()?;
        crate::codec::validate_format(&self.date_format)
    }

    /// Builds a subscriber for this configuration without installing it.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Config` for an invalid level directive or date
    /// format, and `StoreError::IoError` if the log file cannot be opened.
    ///
    /// # Examples
    /// ```rust,ignore
    /// use alopex_strata::LogConfig;
    ///
    /// let subscriber = LogConfig::default().with_level("debug").build_subscriber()?;
    /// tracing::subscriber::set_global_default(subscriber)?;
    /// ```
    pub fn build_subscriber(&self) -> Result<Box<dyn Subscriber + Send + Sync>> {
        if !self.enable_log {
            return Ok(Box::new(NoSubscriber::default()));
        }
        self.validate()?;
        let filter = self.filter()?;

        if self.log_to_file {
            if let Some(dir) = self.log_path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir)?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_path)?;
            Ok(self.finish(filter, Mutex::new(file), false))
        } else {
            Ok(self.finish(filter, std::io::stderr, true))
        }
    }

    fn filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_new(self.log_level.to_ascii_lowercase()).map_err(|e| {
            StoreError::Config(format!("invalid log_level {:?}: {}", self.log_level, e))
        })
    }

    fn finish<W>(&self, filter: EnvFilter, writer: W, ansi: bool) -> Box<dyn Subscriber + Send + Sync>
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(ChronoLocal::new(self.date_format.clone()))
            .with_writer(writer)
            .with_ansi(ansi);
        match self.format {
            LogFormat::Full => Box::new(builder.finish()),
            LogFormat::Compact => Box::new(builder.compact().finish()),
        }
    }
}
