//! Store façade: typed, time-sharded reads and writes over column files.
//!
//! # Architecture
//!
//! ```text
//!  write(ts, field, kind, values)
//!        │
//!        ├─ TypeRegistry::resolve      kind whitelist
//!        ├─ FixedWidthCodec            date / symbol tokens
//!        ├─ ShardRouter::shard_key     ts -> 2018Q1
//!        ▼
//!  ┌──────────────────────────────┐
//!  │ ShardGroup (field, shard)    │  one mutex per group
//!  │  values.col  symbols.col     │
//!  │  dates.col (committed last)  │
//!  └──────────────────────────────┘
//!        │ ResizeManager::ensure_room, then append
//!        ▼
//!  <root>/<field>/<shard>/*.col
//! ```
//!
//! Every validation (kind, field name, codec widths, batch lengths, ordering
//! within the batch and against the rows already stored) runs before any file
//! is created or modified.

pub mod catalog;
mod group;

pub use catalog::{FieldEntry, FieldLayout};

use crate::codec::{self, FixedWidthCodec};
use crate::column::{ColumnKind, ColumnValues, TypeRegistry};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::shard::{validate_field_name, ShardKey, ShardRouter, StoreLayout, TimeRange};
use catalog::Catalog;
use chrono::NaiveDateTime;
use group::{GroupContext, RowBatch, ShardGroup};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

type GroupHandle = Arc<Mutex<ShardGroup>>;

/// Rows of one field read over a time range, in timestamp order.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSeries {
    /// Field name.
    pub field: String,
    /// Kind of `values`.
    pub kind: ColumnKind,
    /// Timestamp of every row.
    pub timestamps: Vec<NaiveDateTime>,
    /// Symbol of every row, for panel fields.
    pub symbols: Option<Vec<String>>,
    /// Value of every row.
    pub values: ColumnValues,
}

impl FieldSeries {
    fn empty(field: &str, entry: &FieldEntry) -> Self {
        Self {
            field: field.to_string(),
            kind: entry.kind,
            timestamps: Vec::new(),
            symbols: match entry.layout {
                FieldLayout::Panel => Some(Vec::new()),
                FieldLayout::Plain => None,
            },
            values: ColumnValues::empty(entry.kind),
        }
    }

    /// Returns the number of rows.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Returns true if no rows matched.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Summary of one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    /// Field name.
    pub name: String,
    /// Kind of the values column.
    pub kind: ColumnKind,
    /// Plain or panel.
    pub layout: FieldLayout,
    /// Shards present on disk, oldest first.
    pub shards: Vec<ShardKey>,
    /// Committed rows across every shard.
    pub rows: u64,
}

/// Time-sharded columnar store.
///
/// `Store` is `Send + Sync`. Writes to different `(field, shard)` pairs run
/// independently; writes to the same pair are serialized by that group's
/// lock, which also covers any rebuild the write triggers.
///
/// # Examples
/// ```rust,ignore
/// use alopex_strata::{ColumnValues, Store, StoreConfig, TimeRange};
///
/// let store = Store::open(StoreConfig::new("/data/strata"))?;
/// let ts = store.parse_time("2018-02-01")?;
/// store.write(ts, "close", Some("f"), ColumnValues::from(vec![10.5]))?;
///
/// let range = TimeRange::new(store.parse_time("2018-01-01")?, store.parse_time("2019-01-01")?)?;
/// let series = store.read(&range, "close")?;
/// ```
#[derive(Debug)]
pub struct Store {
    config: StoreConfig,
    registry: TypeRegistry,
    router: ShardRouter,
    ctx: GroupContext,
    catalog: RwLock<Catalog>,
    groups: RwLock<HashMap<(String, ShardKey), GroupHandle>>,
}

impl Store {
    /// Opens the store at `config.database_metadata_path`, creating it if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Config` for an invalid configuration and
    /// `StoreError::GranularityMismatch` if the store was created with another
    /// `data_split_frequency`.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let layout = StoreLayout::new(&config.database_metadata_path);
        fs::create_dir_all(layout.root())?;

        let catalog_path = layout.catalog_path();
        if Catalog::remove_stale_tmp(&catalog_path)? {
            warn!("Removed interrupted catalog write in {:?}", layout.root());
        }

        let catalog = match Catalog::load(&catalog_path)? {
            Some(catalog) => {
                if catalog.granularity != config.data_split_frequency {
                    return Err(StoreError::GranularityMismatch {
                        stored: catalog.granularity.to_string(),
                        configured: config.data_split_frequency.to_string(),
                    });
                }
                catalog
            }
            None => {
                let catalog = Catalog::new(config.data_split_frequency);
                catalog.save(&catalog_path, config.sync_mode)?;
                catalog
            }
        };

        for field in catalog.fields.keys() {
            layout.sweep_rebuild_leftovers(field)?;
        }

        let ctx = GroupContext {
            layout,
            codec: config.codec()?,
            time_format: config.db_time_format.clone(),
            initial_capacity: config.initial_col_size,
            resize: config.resize_manager()?,
            sync_mode: config.sync_mode,
        };

        info!(
            "Opened store at {:?}: {} fields, granularity {}",
            ctx.layout.root(),
            catalog.fields.len(),
            catalog.granularity
        );

        Ok(Self {
            registry: config.type_registry()?,
            router: config.router(),
            ctx,
            catalog: RwLock::new(catalog),
            groups: RwLock::new(HashMap::new()),
            config,
        })
    }

    /// Returns the configuration the store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the store root.
    pub fn root(&self) -> &Path {
        self.ctx.layout.root()
    }

    /// Returns the directory layout.
    pub fn layout(&self) -> &StoreLayout {
        &self.ctx.layout
    }

    /// Returns the type registry.
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Returns the shard router.
    pub fn router(&self) -> &ShardRouter {
        &self.router
    }

    /// Returns the symbol/date codec.
    pub fn codec(&self) -> &FixedWidthCodec {
        &self.ctx.codec
    }

    /// Parses a boundary timestamp with `db_time_format`.
    pub fn parse_time(&self, text: &str) -> Result<NaiveDateTime> {
        codec::parse_timestamp(text, &self.ctx.time_format)
    }

    /// Appends `values` to `field`, every row stamped with `timestamp`.
    ///
    /// `kind` is a type label such as `"f"` or `"int64"`; `None` selects the
    /// configured default. Returns the number of rows written.
    ///
    /// # Errors
    ///
    /// - `UnsupportedType` if the kind is not whitelisted
    /// - `KindMismatch` if the values or the field have another kind
    /// - `OutOfOrder` if `timestamp` precedes the last row of its shard
    /// - `ValueTooLong` if the timestamp does not fit `date_dtype`
    /// - `InvalidTimestamp` if `db_time_format` cannot store `timestamp`
    ///   exactly, e.g. an intraday time with a date-only format
    /// - `RebuildFailed` if a column could not be grown
    pub fn write(
        &self,
        timestamp: NaiveDateTime,
        field: &str,
        kind: Option<&str>,
        values: ColumnValues,
    ) -> Result<usize> {
        let timestamps = vec![timestamp; values.len()];
        self.write_rows(field, kind, FieldLayout::Plain, &timestamps, values, None)
    }

    /// Appends one row per `(timestamps[i], values[i])` to `field`.
    ///
    /// Timestamps must be non-decreasing; rows may span several shards. The
    /// write is all or nothing: if any shard fails, none keeps its rows.
    pub fn write_series(
        &self,
        timestamps: &[NaiveDateTime],
        field: &str,
        kind: Option<&str>,
        values: ColumnValues,
    ) -> Result<usize> {
        self.write_rows(field, kind, FieldLayout::Plain, timestamps, values, None)
    }

    /// Appends a cross-section: one row per `(symbols[i], values[i])`, all
    /// stamped with `timestamp`.
    ///
    /// # Errors
    ///
    /// Besides the errors of [`Store::write`], returns `LengthMismatch` if
    /// `symbols` and `values` differ in length and `FieldLayoutMismatch` if
    /// `field` was written as a plain series.
    pub fn write_panel<S: AsRef<str>>(
        &self,
        timestamp: NaiveDateTime,
        field: &str,
        kind: Option<&str>,
        symbols: &[S],
        values: ColumnValues,
    ) -> Result<usize> {
        if symbols.len() != values.len() {
            return Err(StoreError::LengthMismatch {
                expected: values.len(),
                actual: symbols.len(),
            });
        }
        let mut encoded = Vec::with_capacity(symbols.len() * self.ctx.codec.symbol_width());
        for symbol in symbols {
            encoded.extend_from_slice(&self.ctx.codec.encode_symbol(symbol.as_ref())?);
        }
        let timestamps = vec![timestamp; values.len()];
        self.write_rows(
            field,
            kind,
            FieldLayout::Panel,
            &timestamps,
            values,
            Some(encoded.as_slice()),
        )
    }

    fn write_rows(
        &self,
        field: &str,
        kind: Option<&str>,
        layout: FieldLayout,
        timestamps: &[NaiveDateTime],
        values: ColumnValues,
        symbols: Option<&[u8]>,
    ) -> Result<usize> {
        validate_field_name(field)?;
        let kind = self.registry.resolve_or_default(kind)?;
        if values.kind() != kind {
            return Err(StoreError::KindMismatch {
                expected: kind.to_string(),
                actual: values.kind().to_string(),
            });
        }
        if timestamps.len() != values.len() {
            return Err(StoreError::LengthMismatch {
                expected: values.len(),
                actual: timestamps.len(),
            });
        }
        if let Some(pair) = timestamps.windows(2).find(|pair| pair[1] < pair[0]) {
            return Err(StoreError::OutOfOrder {
                field: field.to_string(),
                timestamp: pair[1].to_string(),
                last: pair[0].to_string(),
            });
        }
        let dates = self.encode_dates(timestamps)?;
        if values.is_empty() {
            return Ok(0);
        }

        self.register_field(field, kind, layout)?;
        let catalog = self.catalog.read();
        let entry = catalog
            .check(field, kind, layout)?
            .ok_or_else(|| StoreError::UnknownField(field.to_string()))?;

        let runs = self.split_by_shard(timestamps);
        for (key, rows) in &runs {
            if let Some(handle) = self.group(field, *key, &entry, false)? {
                check_order(field, timestamps[rows.start], &handle.lock())?;
            }
        }

        // Every target group is created, locked in key order and grown
        // before the first row lands, so a failure leaves no rows behind.
        let mut handles = Vec::with_capacity(runs.len());
        for (key, _) in &runs {
            let handle = self.group(field, *key, &entry, true)?.ok_or_else(|| {
                StoreError::Corrupted(format!("shard {} of {} could not be created", key, field))
            })?;
            handles.push(handle);
        }
        let mut groups: Vec<_> = handles.iter().map(|handle| handle.lock()).collect();
        for ((_, rows), group) in runs.iter().zip(&groups) {
            // Another writer may have appended since the first pass.
            check_order(field, timestamps[rows.start], group)?;
        }
        for ((_, rows), group) in runs.iter().zip(groups.iter_mut()) {
            for event in group.reserve(&self.ctx, rows.len() as u64)? {
                debug!(
                    "Shard {} of {} grew {:?} from {} to {}",
                    group.key(),
                    field,
                    event.path,
                    event.old_capacity,
                    event.new_capacity
                );
            }
        }

        let date_width = self.ctx.codec.date_width();
        let symbol_width = self.ctx.codec.symbol_width();
        let before: Vec<u64> = groups.iter().map(|group| group.len()).collect();
        for (i, (_, rows)) in runs.iter().enumerate() {
            let batch = RowBatch {
                timestamps: &timestamps[rows.clone()],
                values: values.slice(rows.clone()),
                dates: &dates[rows.start * date_width..rows.end * date_width],
                symbols: symbols.map(|s| &s[rows.start * symbol_width..rows.end * symbol_width]),
            };
            if let Err(err) = groups[i].append(batch) {
                for (group, length) in groups[..i].iter_mut().zip(&before) {
                    group.roll_back(*length);
                }
                return Err(err);
            }
        }
        Ok(values.len())
    }

    fn encode_dates(&self, timestamps: &[NaiveDateTime]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(timestamps.len() * self.ctx.codec.date_width());
        let mut previous: Option<(NaiveDateTime, Vec<u8>)> = None;
        for ts in timestamps {
            let slot = match &previous {
                Some((prev, slot)) if prev == ts => slot.clone(),
                _ => self.encode_exact(ts)?,
            };
            out.extend_from_slice(&slot);
            previous = Some((*ts, slot));
        }
        Ok(out)
    }

    /// Encodes `ts`, rejecting timestamps the date column cannot hold exactly.
    fn encode_exact(&self, ts: &NaiveDateTime) -> Result<Vec<u8>> {
        let format = &self.ctx.time_format;
        let slot = self.ctx.codec.encode_timestamp(ts, format)?;
        if self.ctx.codec.decode_timestamp(&slot, format).ok() != Some(*ts) {
            return Err(StoreError::InvalidTimestamp {
                value: ts.to_string(),
                format: format.clone(),
            });
        }
        Ok(slot)
    }

    /// Splits sorted timestamps into runs sharing one shard key.
    fn split_by_shard(&self, timestamps: &[NaiveDateTime]) -> Vec<(ShardKey, Range<usize>)> {
        let mut runs: Vec<(ShardKey, Range<usize>)> = Vec::new();
        for (i, ts) in timestamps.iter().enumerate() {
            let key = self.router.shard_key(ts);
            match runs.last_mut() {
                Some((last, rows)) if *last == key => rows.end = i + 1,
                _ => runs.push((key, i..i + 1)),
            }
        }
        runs
    }

    fn register_field(&self, field: &str, kind: ColumnKind, layout: FieldLayout) -> Result<()> {
        if self.catalog.read().check(field, kind, layout)?.is_some() {
            return Ok(());
        }
        let mut catalog = self.catalog.write();
        if catalog.check(field, kind, layout)?.is_some() {
            return Ok(());
        }
        catalog
            .fields
            .insert(field.to_string(), FieldEntry { kind, layout });
        if let Err(err) = catalog.save(&self.ctx.layout.catalog_path(), self.ctx.sync_mode) {
            catalog.fields.remove(field);
            return Err(err);
        }
        debug!("Registered field {} ({}, {})", field, kind, layout.as_str());
        Ok(())
    }

    /// Returns the cached group, opening or (if `create`) creating it.
    fn group(
        &self,
        field: &str,
        key: ShardKey,
        entry: &FieldEntry,
        create: bool,
    ) -> Result<Option<GroupHandle>> {
        let cache_key = (field.to_string(), key);
        if let Some(handle) = self.groups.read().get(&cache_key) {
            return Ok(Some(Arc::clone(handle)));
        }

        let mut groups = self.groups.write();
        if let Some(handle) = groups.get(&cache_key) {
            return Ok(Some(Arc::clone(handle)));
        }
        let group = if ShardGroup::exists(&self.ctx, field, &key) {
            ShardGroup::open(&self.ctx, field, key, entry.kind, entry.layout)?
        } else if create {
            ShardGroup::create(&self.ctx, field, key, entry.kind, entry.layout)?
        } else {
            return Ok(None);
        };
        let handle = Arc::new(Mutex::new(group));
        groups.insert(cache_key, Arc::clone(&handle));
        Ok(Some(handle))
    }

    /// Reads the rows of `field` with `range.start <= ts < range.end`.
    ///
    /// # Errors
    ///
    /// - `InvalidRange` if the range is empty
    /// - `UnknownField` if the field was never written
    /// - `ShardNotFound` if no shard of the field intersects the range; an
    ///   intersecting shard without matching rows yields an empty series
    pub fn read(&self, range: &TimeRange, field: &str) -> Result<FieldSeries> {
        if range.end <= range.start {
            return Err(StoreError::InvalidRange {
                start: range.start.to_string(),
                end: range.end.to_string(),
            });
        }
        let catalog = self.catalog.read();
        let entry = *catalog
            .fields
            .get(field)
            .ok_or_else(|| StoreError::UnknownField(field.to_string()))?;

        let shards: Vec<ShardKey> = self
            .ctx
            .layout
            .list_shards(field, &self.router)?
            .into_iter()
            .filter(|key| key.start() < range.end && key.end().map_or(true, |end| end > range.start))
            .collect();
        if shards.is_empty() {
            return Err(StoreError::ShardNotFound {
                field: field.to_string(),
                start: range.start.to_string(),
                end: range.end.to_string(),
            });
        }

        let mut series = FieldSeries::empty(field, &entry);
        for key in shards {
            let Some(handle) = self.group(field, key, &entry, false)? else {
                continue;
            };
            let group = handle.lock();
            let rows = group.row_range(&range.start, &range.end);
            if rows.is_empty() {
                continue;
            }
            let part = group.read(&self.ctx, rows)?;
            series.timestamps.extend(part.timestamps);
            series.values.extend(part.values)?;
            if let (Some(all), Some(part)) = (series.symbols.as_mut(), part.symbols) {
                all.extend(part);
            }
        }
        Ok(series)
    }

    /// Lists every field, sorted by name.
    pub fn fields(&self) -> Vec<String> {
        self.catalog.read().fields.keys().cloned().collect()
    }

    /// Describes one field.
    pub fn field_info(&self, field: &str) -> Result<FieldInfo> {
        let catalog = self.catalog.read();
        let entry = *catalog
            .fields
            .get(field)
            .ok_or_else(|| StoreError::UnknownField(field.to_string()))?;

        let shards = self.ctx.layout.list_shards(field, &self.router)?;
        let mut rows = 0;
        for key in &shards {
            if let Some(handle) = self.group(field, *key, &entry, false)? {
                rows += handle.lock().len();
            }
        }
        Ok(FieldInfo {
            name: field.to_string(),
            kind: entry.kind,
            layout: entry.layout,
            shards,
            rows,
        })
    }

    /// Deletes a field and every shard it owns.
    pub fn remove_field(&self, field: &str) -> Result<()> {
        let mut catalog = self.catalog.write();
        if !catalog.fields.contains_key(field) {
            return Err(StoreError::UnknownField(field.to_string()));
        }
        self.groups.write().retain(|(name, _), _| name != field);

        match fs::remove_dir_all(self.ctx.layout.field_dir(field)) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        let entry = catalog.fields.remove(field);
        if let Err(err) = catalog.save(&self.ctx.layout.catalog_path(), self.ctx.sync_mode) {
            if let Some(entry) = entry {
                catalog.fields.insert(field.to_string(), entry);
            }
            return Err(err);
        }
        info!("Removed field {}", field);
        Ok(())
    }

    /// Renames a field, moving its shards.
    ///
    /// # Errors
    ///
    /// Returns `UnknownField` if `from` does not exist, `FieldExists` if `to`
    /// does, and `InvalidFieldName` if `to` is not a plain name.
    pub fn rename_field(&self, from: &str, to: &str) -> Result<()> {
        validate_field_name(to)?;
        let mut catalog = self.catalog.write();
        let Some(entry) = catalog.fields.get(from).copied() else {
            return Err(StoreError::UnknownField(from.to_string()));
        };
        let target_dir = self.ctx.layout.field_dir(to);
        if catalog.fields.contains_key(to) || target_dir.exists() {
            return Err(StoreError::FieldExists(to.to_string()));
        }
        self.groups.write().retain(|(name, _), _| name != from);

        let source_dir = self.ctx.layout.field_dir(from);
        if source_dir.exists() {
            fs::rename(&source_dir, &target_dir)?;
        }

        catalog.fields.remove(from);
        catalog.fields.insert(to.to_string(), entry);
        if let Err(err) = catalog.save(&self.ctx.layout.catalog_path(), self.ctx.sync_mode) {
            catalog.fields.remove(to);
            catalog.fields.insert(from.to_string(), entry);
            if target_dir.exists() {
                if let Err(undo) = fs::rename(&target_dir, &source_dir) {
                    warn!(
                        "Failed to move {:?} back to {:?}: {:?}",
                        target_dir, source_dir, undo
                    );
                }
            }
            return Err(err);
        }
        info!("Renamed field {} to {}", from, to);
        Ok(())
    }
}

fn check_order(field: &str, first: NaiveDateTime, group: &ShardGroup) -> Result<()> {
    match group.last_timestamp() {
        Some(last) if first < last => Err(StoreError::OutOfOrder {
            field: field.to_string(),
            timestamp: first.to_string(),
            last: last.to_string(),
        }),
        _ => Ok(()),
    }
}
