//! Store configuration.
//!
//! Keys follow the JSON configuration files the store is deployed with. Every
//! key is optional; missing keys take the defaults below.
//!
//! ```json
//! {
//!   "valid_type_header": ["i", "f"],
//!   "initial_col_size": 1024,
//!   "col_size_increase_step": 1024,
//!   "default_data_type": "float64",
//!   "date_dtype": "S10",
//!   "symbol_dtype": "S20",
//!   "db_time_format": "%Y-%m-%d",
//!   "data_split_frequency": "YEAR",
//!   "database_metadata_path": "./data",
//!   "sync_mode": "fsync",
//!   "log": { "log_level": "info" }
//! }
//! ```

use crate::codec::{validate_format, FixedWidthCodec};
use crate::column::{ResizeManager, SyncMode, TypeRegistry};
use crate::error::{Result, StoreError};
use crate::logging::LogConfig;
use crate::shard::{Granularity, ShardRouter};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default initial capacity of a new column file, in slots.
pub const DEFAULT_INITIAL_COL_SIZE: u64 = 1024;

/// Default capacity growth step, in slots.
pub const DEFAULT_COL_SIZE_INCREASE_STEP: u64 = 1024;

/// Default numeric kind for writes that omit one.
pub const DEFAULT_DATA_TYPE: &str = "float64";

/// Default width specifier of the date column.
pub const DEFAULT_DATE_DTYPE: &str = "S10";

/// Default width specifier of the symbol column.
pub const DEFAULT_SYMBOL_DTYPE: &str = "S20";

/// Default chrono format of stored dates.
pub const DEFAULT_TIME_FORMAT: &str = "%Y-%m-%d";

/// Default store root.
pub const DEFAULT_DATA_PATH: &str = "./data";

/// Configuration of a [`crate::Store`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Kind classes admitted by the type registry.
    pub valid_type_header: Vec<String>,
    /// Capacity of a newly created column file.
    pub initial_col_size: u64,
    /// Growth step used when a column file is rebuilt.
    pub col_size_increase_step: u64,
    /// Kind used when a write does not name one.
    pub default_data_type: String,
    /// Width specifier of the date column (`S<n>`).
    pub date_dtype: String,
    /// Width specifier of the symbol column (`S<n>`).
    pub symbol_dtype: String,
    /// chrono format of stored dates and of boundary timestamps.
    pub db_time_format: String,
    /// Shard granularity.
    #[serde(alias = "data_spilt_frequency")]
    pub data_split_frequency: Granularity,
    /// Store root directory.
    pub database_metadata_path: PathBuf,
    /// Durability of column commits.
    pub sync_mode: SyncMode,
    /// Log output.
    pub log: LogConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            valid_type_header: vec!["i".to_string(), "f".to_string()],
            initial_col_size: DEFAULT_INITIAL_COL_SIZE,
            col_size_increase_step: DEFAULT_COL_SIZE_INCREASE_STEP,
            default_data_type: DEFAULT_DATA_TYPE.to_string(),
            date_dtype: DEFAULT_DATE_DTYPE.to_string(),
            symbol_dtype: DEFAULT_SYMBOL_DTYPE.to_string(),
            db_time_format: DEFAULT_TIME_FORMAT.to_string(),
            data_split_frequency: Granularity::default(),
            database_metadata_path: PathBuf::from(DEFAULT_DATA_PATH),
            sync_mode: SyncMode::default(),
            log: LogConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Creates a default configuration rooted at `path`.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            database_metadata_path: path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Parses a JSON configuration.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Sets the store root.
    pub fn with_path(mut self, path: impl AsRef<Path>) -> Self {
        self.database_metadata_path = path.as_ref().to_path_buf();
        self
    }

    /// Sets the kind class whitelist.
    pub fn with_valid_types<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.valid_type_header = classes.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the initial column capacity.
    pub fn with_initial_col_size(mut self, size: u64) -> Self {
        self.initial_col_size = size;
        self
    }

    /// Sets the resize growth step.
    pub fn with_increase_step(mut self, step: u64) -> Self {
        self.col_size_increase_step = step;
        self
    }

    /// Sets the default kind.
    pub fn with_default_data_type(mut self, label: impl Into<String>) -> Self {
        self.default_data_type = label.into();
        self
    }

    /// Sets the date column width specifier.
    pub fn with_date_dtype(mut self, spec: impl Into<String>) -> Self {
        self.date_dtype = spec.into();
        self
    }

    /// Sets the symbol column width specifier.
    pub fn with_symbol_dtype(mut self, spec: impl Into<String>) -> Self {
        self.symbol_dtype = spec.into();
        self
    }

    /// Sets the stored date format.
    pub fn with_time_format(mut self, format: impl Into<String>) -> Self {
        self.db_time_format = format.into();
        self
    }

    /// Sets the shard granularity.
    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.data_split_frequency = granularity;
        self
    }

    /// Sets the sync mode.
    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }

    /// Sets the log configuration.
    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }

    /// Checks every key.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Config` describing the first invalid key.
    pub fn validate(&self) -> Result<()> {
        if self.initial_col_size == 0 {
            return Err(StoreError::Config(
                "initial_col_size must be positive".to_string(),
            ));
        }
        self.type_registry()?;
        self.resize_manager()?;
        self.codec()?;
        validate_format(&self.db_time_format)?;
        self.log.validate()
    }

    /// Builds the type registry from the whitelist and default kind.
    pub fn type_registry(&self) -> Result<TypeRegistry> {
        TypeRegistry::new(&self.valid_type_header, &self.default_data_type)
    }

    /// Builds the resize manager.
    pub fn resize_manager(&self) -> Result<ResizeManager> {
        ResizeManager::new(self.col_size_increase_step)
    }

    /// Builds the symbol/date codec.
    pub fn codec(&self) -> Result<FixedWidthCodec> {
        FixedWidthCodec::from_specs(&self.symbol_dtype, &self.date_dtype)
    }

    /// Builds the shard router.
    pub fn router(&self) -> ShardRouter {
        ShardRouter::new(self.data_split_frequency)
    }
}
