//! Strata - Alopex fixed-width columnar time series store
//!
//! This crate stores numeric fields as fixed-width column files split into
//! calendar shards.
//!
//! # Components
//!
//! - [`TypeRegistry`]: numeric kind whitelist and slot widths
//! - [`ColumnFile`]: fixed-capacity column file with crash-atomic appends
//! - [`ResizeManager`]: rebuild-on-resize with atomic file replacement
//! - [`FixedWidthCodec`]: fixed-width symbol and date tokens
//! - [`ShardRouter`]: timestamp to yearly, quarterly or monthly shard keys
//! - [`Store`]: typed reads and writes across shards
//!
//! # Example
//!
//! ```rust,ignore
//! use alopex_strata::{ColumnValues, Granularity, Store, StoreConfig, TimeRange};
//!
//! let config = StoreConfig::new("/data/strata").with_granularity(Granularity::Quarter);
//! let store = Store::open(config)?;
//!
//! // Plain series
//! let ts = store.parse_time("2018-02-01")?;
//! store.write(ts, "close", Some("f"), ColumnValues::from(vec![10.5]))?;
//!
//! // Cross-section
//! store.write_panel(ts, "volume", Some("i"), &["600000.SH", "000001.SZ"],
//!     ColumnValues::from(vec![1200_i64, 800]))?;
//!
//! let range = TimeRange::new(store.parse_time("2018-01-01")?, store.parse_time("2018-07-01")?)?;
//! let series = store.read(&range, "volume")?;
//! ```

#![deny(missing_docs)]

pub mod codec;
pub mod column;
pub mod config;
pub mod error;
pub mod logging;
pub mod shard;
pub mod store;

pub use codec::FixedWidthCodec;
pub use column::{
    ColumnFile, ColumnKind, ColumnValues, ResizeEvent, ResizeManager, SyncMode, TypeRegistry,
};
pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use logging::{LogConfig, LogFormat};
pub use shard::{shard_key, Granularity, ShardKey, ShardRouter, StoreLayout, TimeRange};
pub use store::{FieldInfo, FieldLayout, FieldSeries, Store};
