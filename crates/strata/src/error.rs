//! Error and Result types for Strata storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A convenience `Result` type for Strata operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// The error type for column store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Requested kind label is not in the configured whitelist.
    #[error("Unsupported data type: {0}")]
    UnsupportedType(String),

    /// Column capacity must be positive.
    #[error("Invalid column capacity: {0}")]
    InvalidCapacity(u64),

    /// Append would run past the allocated slots of a column file.
    ///
    /// The store façade recovers from this by rebuilding the column with a
    /// larger capacity; callers of [`crate::Store::write`] never see it.
    #[error("Capacity exceeded: length {length} + {requested} > capacity {capacity}")]
    CapacityExceeded {
        /// Committed slot count.
        length: u64,
        /// Allocated slot count.
        capacity: u64,
        /// Number of slots the append asked for.
        requested: u64,
    },

    /// Read range is outside the committed slots.
    #[error("Range [{start}, {end}) out of bounds for length {length}")]
    OutOfRange {
        /// Range start (inclusive).
        start: u64,
        /// Range end (exclusive).
        end: u64,
        /// Committed slot count.
        length: u64,
    },

    /// A column rebuild could not complete; the original file is untouched.
    #[error("Rebuild of {path:?} failed: {source}")]
    RebuildFailed {
        /// Path of the column file that was being rebuilt.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: Box<StoreError>,
    },

    /// Encoded text does not fit the configured fixed width.
    #[error("Value too long: {len} bytes exceeds fixed width {width}")]
    ValueTooLong {
        /// Encoded length in bytes.
        len: usize,
        /// Configured fixed width in bytes.
        width: usize,
    },

    /// Text cannot be stored in a fixed-width slot.
    #[error("Invalid text value {0:?}: embedded NUL byte")]
    InvalidText(String),

    /// Field has never been written.
    #[error("Unknown field: {0}")]
    UnknownField(String),

    /// No shard of the field intersects the requested range.
    #[error("No shard of field {field} covers [{start}, {end})")]
    ShardNotFound {
        /// Field name.
        field: String,
        /// Requested range start.
        start: String,
        /// Requested range end.
        end: String,
    },

    /// Values or a column do not have the expected kind.
    #[error("Kind mismatch: expected {expected}, got {actual}")]
    KindMismatch {
        /// Kind required by the column or field.
        expected: String,
        /// Kind that was supplied.
        actual: String,
    },

    /// Parallel inputs have different lengths.
    #[error("Length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },

    /// Timestamp is older than the last row stored in its shard.
    #[error("Out of order write to {field}: {timestamp} precedes {last}")]
    OutOfOrder {
        /// Field name.
        field: String,
        /// Timestamp of the rejected write.
        timestamp: String,
        /// Timestamp of the last stored row.
        last: String,
    },

    /// Panel writes to a plain field or plain writes to a panel field.
    #[error("Field {field} layout mismatch: stored as {stored}")]
    FieldLayoutMismatch {
        /// Field name.
        field: String,
        /// Layout recorded in the catalog.
        stored: &'static str,
    },

    /// Target field of a rename already exists.
    #[error("Field already exists: {0}")]
    FieldExists(String),

    /// Field name is not a single, plain path component.
    #[error("Invalid field name: {0:?}")]
    InvalidFieldName(String),

    /// Time range is empty or reversed.
    #[error("Invalid time range: start {start} is not before end {end}")]
    InvalidRange {
        /// Range start.
        start: String,
        /// Range end.
        end: String,
    },

    /// Timestamp text does not match the configured format, or a timestamp
    /// is finer than the format can store.
    #[error("Invalid timestamp {value:?} for format {format:?}")]
    InvalidTimestamp {
        /// Offending text.
        value: String,
        /// Expected chrono format.
        format: String,
    },

    /// Store was created with a different shard granularity.
    #[error("Granularity mismatch: store uses {stored}, configured {configured}")]
    GranularityMismatch {
        /// Granularity recorded in the catalog.
        stored: String,
        /// Granularity in the current configuration.
        configured: String,
    },

    /// Invalid magic bytes in a column file header.
    #[error("Invalid magic bytes: expected SCOL, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported column file format version.
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    /// Header checksum does not match the stored value.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Stored CRC32 checksum.
        expected: u32,
        /// Computed CRC32 checksum.
        actual: u32,
    },

    /// Column file contents are structurally invalid.
    #[error("Corrupted column file: {0}")]
    Corrupted(String),

    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Catalog or configuration JSON could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl StoreError {
    /// Wraps a failure that interrupted a rebuild of `path`.
    pub(crate) fn rebuild_failed(path: impl Into<PathBuf>, source: StoreError) -> Self {
        Self::RebuildFailed {
            path: path.into(),
            source: Box::new(source),
        }
    }
}
