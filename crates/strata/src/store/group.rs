//! Shard groups: the column files of one field in one shard.
//!
//! A group holds a values column, a dates column and, for panel fields, a
//! symbols column. Rows are appended to every column and the dates column is
//! committed last, so a crash between column commits leaves the dates column
//! no longer than the others. Opening a group rolls longer columns back to the
//! shortest committed length.

use crate::codec::FixedWidthCodec;
use crate::column::{ColumnFile, ColumnKind, ColumnValues, ResizeEvent, ResizeManager, SyncMode};
use crate::error::{Result, StoreError};
use crate::shard::{ColumnRole, ShardKey, StoreLayout};
use crate::store::catalog::FieldLayout;
use chrono::NaiveDateTime;
use std::fs;
use std::ops::Range;
use tracing::{debug, error, warn};

/// Settings shared by every shard group of a store.
#[derive(Debug, Clone)]
pub(crate) struct GroupContext {
    pub(crate) layout: StoreLayout,
    pub(crate) codec: FixedWidthCodec,
    pub(crate) time_format: String,
    pub(crate) initial_capacity: u64,
    pub(crate) resize: ResizeManager,
    pub(crate) sync_mode: SyncMode,
}

/// Rows destined for one shard, already encoded.
pub(crate) struct RowBatch<'a> {
    pub(crate) timestamps: &'a [NaiveDateTime],
    pub(crate) values: ColumnValues,
    pub(crate) dates: &'a [u8],
    pub(crate) symbols: Option<&'a [u8]>,
}

/// Rows read from one shard.
#[derive(Debug)]
pub(crate) struct GroupRows {
    pub(crate) timestamps: Vec<NaiveDateTime>,
    pub(crate) symbols: Option<Vec<String>>,
    pub(crate) values: ColumnValues,
}

#[derive(Debug)]
pub(crate) struct ShardGroup {
    key: ShardKey,
    values: ColumnFile,
    dates: ColumnFile,
    symbols: Option<ColumnFile>,
    timestamps: Vec<NaiveDateTime>,
}

impl ShardGroup {
    /// Returns true if the group's commit column exists on disk.
    pub(crate) fn exists(ctx: &GroupContext, field: &str, key: &ShardKey) -> bool {
        ctx.layout
            .column_path(field, key, ColumnRole::Dates)
            .is_file()
    }

    /// Creates an empty group. The dates column is created last.
    pub(crate) fn create(
        ctx: &GroupContext,
        field: &str,
        key: ShardKey,
        kind: ColumnKind,
        layout: FieldLayout,
    ) -> Result<Self> {
        fs::create_dir_all(ctx.layout.shard_dir(field, &key))?;
        let create = |role: ColumnRole, kind: ColumnKind| {
            ColumnFile::create(
                ctx.layout.column_path(field, &key, role),
                kind,
                ctx.initial_capacity,
                ctx.sync_mode,
            )
        };

        let values = create(ColumnRole::Values, kind)?;
        let symbols = match layout {
            FieldLayout::Panel => Some(create(ColumnRole::Symbols, ctx.codec.symbol_kind())?),
            FieldLayout::Plain => None,
        };
        let dates = create(ColumnRole::Dates, ctx.codec.date_kind())?;

        debug!(
            "Created shard {} of field {} ({}, {})",
            key,
            field,
            kind,
            layout.as_str()
        );

        Ok(Self {
            key,
            values,
            dates,
            symbols,
            timestamps: Vec::new(),
        })
    }

    /// Opens an existing group and repairs uneven column lengths.
    pub(crate) fn open(
        ctx: &GroupContext,
        field: &str,
        key: ShardKey,
        kind: ColumnKind,
        layout: FieldLayout,
    ) -> Result<Self> {
        let open = |role: ColumnRole, expected: ColumnKind| -> Result<ColumnFile> {
            let file = ColumnFile::open(ctx.layout.column_path(field, &key, role), ctx.sync_mode)?;
            if file.kind() != expected {
                return Err(StoreError::Corrupted(format!(
                    "{:?} holds {}, expected {}",
                    file.path(),
                    file.kind(),
                    expected
                )));
            }
            Ok(file)
        };

        let mut values = open(ColumnRole::Values, kind)?;
        let mut symbols = match layout {
            FieldLayout::Panel => Some(open(ColumnRole::Symbols, ctx.codec.symbol_kind())?),
            FieldLayout::Plain => None,
        };
        let mut dates = open(ColumnRole::Dates, ctx.codec.date_kind())?;

        let length = [
            Some(values.length()),
            Some(dates.length()),
            symbols.as_ref().map(ColumnFile::length),
        ]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(0);

        for file in [Some(&mut values), Some(&mut dates), symbols.as_mut()]
            .into_iter()
            .flatten()
        {
            if file.length() > length {
                warn!(
                    "Rolling back {:?} from {} to {} rows after interrupted write",
                    file.path(),
                    file.length(),
                    length
                );
                file.roll_back_to(length)?;
            }
        }

        let raw = dates.read_raw(0..length)?;
        let timestamps = raw
            .chunks_exact(ctx.codec.date_width())
            .map(|slot| ctx.codec.decode_timestamp(slot, &ctx.time_format))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            key,
            values,
            dates,
            symbols,
            timestamps,
        })
    }

    pub(crate) fn key(&self) -> ShardKey {
        self.key
    }

    /// Committed row count.
    pub(crate) fn len(&self) -> u64 {
        self.timestamps.len() as u64
    }

    pub(crate) fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.timestamps.last().copied()
    }

    /// Grows every column so `rows` more rows fit.
    ///
    /// Rebuilds never change committed rows, so a failure part way leaves the
    /// group readable and appendable.
    pub(crate) fn reserve(&mut self, ctx: &GroupContext, rows: u64) -> Result<Vec<ResizeEvent>> {
        let mut events = Vec::new();
        for file in self.columns_mut() {
            if let Some(event) = ctx.resize.ensure_room(file, rows)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Appends the batch to every column. Call [`Self::reserve`] first.
    ///
    /// On failure every column is rolled back to the previous row count.
    pub(crate) fn append(&mut self, batch: RowBatch<'_>) -> Result<()> {
        if batch.values.is_empty() {
            return Ok(());
        }
        let before = self.len();
        if let Err(err) = self.append_columns(&batch) {
            self.roll_back(before);
            return Err(err);
        }
        self.timestamps.extend_from_slice(batch.timestamps);
        Ok(())
    }

    /// Drops every row past `length`.
    pub(crate) fn roll_back(&mut self, length: u64) {
        for file in self.columns_mut() {
            if let Err(err) = file.roll_back_to(length) {
                error!(
                    "Failed to roll back {:?} to {} rows: {:?}",
                    file.path(),
                    length,
                    err
                );
            }
        }
        self.timestamps.truncate(length as usize);
    }

    fn append_columns(&mut self, batch: &RowBatch<'_>) -> Result<()> {
        self.values.append(&batch.values)?;
        if let (Some(file), Some(bytes)) = (self.symbols.as_mut(), batch.symbols) {
            file.append_raw(bytes)?;
        }
        self.dates.append_raw(batch.dates)?;
        Ok(())
    }

    fn columns_mut(&mut self) -> impl Iterator<Item = &mut ColumnFile> + '_ {
        [Some(&mut self.values), self.symbols.as_mut(), Some(&mut self.dates)]
            .into_iter()
            .flatten()
    }

    /// Index range of the rows with `start <= ts < end`.
    pub(crate) fn row_range(&self, start: &NaiveDateTime, end: &NaiveDateTime) -> Range<u64> {
        let lo = self.timestamps.partition_point(|ts| ts < start);
        let hi = self.timestamps.partition_point(|ts| ts < end);
        lo as u64..hi.max(lo) as u64
    }

    /// Reads the rows in `range`.
    pub(crate) fn read(&self, ctx: &GroupContext, range: Range<u64>) -> Result<GroupRows> {
        let values = self.values.read(range.clone())?;
        let symbols = match &self.symbols {
            Some(file) => Some(
                file.read_raw(range.clone())?
                    .chunks_exact(ctx.codec.symbol_width())
                    .map(|slot| ctx.codec.decode_symbol(slot))
                    .collect::<Result<Vec<_>>>()?,
            ),
            None => None,
        };
        let timestamps = self.timestamps[range.start as usize..range.end as usize].to_vec();
        Ok(GroupRows {
            timestamps,
            symbols,
            values,
        })
    }
}
