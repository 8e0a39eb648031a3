//! Column file format implementation.
//!
//! A column file holds a fixed number of homogeneous, fixed-width slots for
//! one field in one shard. Capacity is allocated up front; only the committed
//! length moves on append.
//!
//! ## File Structure
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Fixed Header (32 bytes)                                     │
//! │  - Magic: "SCOL" (4 bytes)                                   │
//! │  - Version: u16 (2 bytes) = 1                                │
//! │  - Kind tag: u8 (1 byte)                                     │
//! │  - Reserved: 1 byte                                          │
//! │  - Byte width: u16 (2 bytes)                                 │
//! │  - Reserved: 6 bytes                                         │
//! │  - Capacity: u64 (8 bytes)                                   │
//! │  - Header CRC32 over bytes 0..24 (4 bytes)                   │
//! │  - Reserved: 4 bytes                                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Commit Slot 0 (32 bytes) / Commit Slot 1 (32 bytes)         │
//! │  - Sequence: u64, Length: u64, CRC32, padding                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Data Region (capacity × byte width)                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Commit protocol
//!
//! Appends write slot bytes past the committed length, sync, then write a
//! commit record with the next sequence number into the commit slot that does
//! not hold the current commit, and sync again. On open the valid record with
//! the highest sequence wins, so a crash at any point leaves the previous
//! length in force.

use crate::column::{ColumnKind, ColumnValues};
use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Magic bytes for the column file header: "SCOL"
pub const COLUMN_MAGIC: [u8; 4] = *b"SCOL";

/// Current column file format version.
pub const COLUMN_VERSION: u16 = 1;

/// Fixed header size in bytes.
pub const FIXED_HEADER_SIZE: usize = 32;

/// Size of one commit slot in bytes.
pub const COMMIT_SLOT_SIZE: usize = 32;

/// Total header size (fixed header plus both commit slots).
pub const HEADER_SIZE: usize = FIXED_HEADER_SIZE + 2 * COMMIT_SLOT_SIZE;

/// Extension used for column files.
pub const COLUMN_EXTENSION: &str = "col";

/// Sync mode for column file durability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Fsync data and metadata on every commit (default, highest durability).
    #[default]
    Fsync,
    /// Use fdatasync (skip metadata update, faster).
    Fdatasync,
    /// No sync (fastest, lowest durability - for testing only).
    None,
}

impl SyncMode {
    pub(crate) fn sync(self, file: &File) -> std::io::Result<()> {
        match self {
            Self::Fsync => file.sync_all(),
            Self::Fdatasync => file.sync_data(),
            Self::None => Ok(()),
        }
    }
}

/// Fixed part of the column file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnHeader {
    /// Slot kind.
    pub kind: ColumnKind,
    /// Allocated slot count.
    pub capacity: u64,
}

impl ColumnHeader {
    /// Writes the fixed header using little-endian byte order.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut buf = [0u8; FIXED_HEADER_SIZE];
        buf[0..4].copy_from_slice(&COLUMN_MAGIC);
        buf[4..6].copy_from_slice(&COLUMN_VERSION.to_le_bytes());
        buf[6] = self.kind.tag();
        buf[8..10].copy_from_slice(&(self.kind.byte_width() as u16).to_le_bytes());
        buf[16..24].copy_from_slice(&self.capacity.to_le_bytes());
        let crc = crc32fast::hash(&buf[0..24]);
        buf[24..28].copy_from_slice(&crc.to_le_bytes());
        writer.write_all(&buf)?;
        Ok(())
    }

    /// Reads and validates the fixed header.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidMagic`, `StoreError::UnsupportedVersion`,
    /// `StoreError::ChecksumMismatch` or `StoreError::Corrupted` for headers
    /// that fail validation.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; FIXED_HEADER_SIZE];
        reader.read_exact(&mut buf)?;

        let magic = [buf[0], buf[1], buf[2], buf[3]];
        if magic != COLUMN_MAGIC {
            return Err(StoreError::InvalidMagic(magic));
        }

        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version > COLUMN_VERSION {
            return Err(StoreError::UnsupportedVersion(version));
        }

        let expected = u32::from_le_bytes([buf[24], buf[25], buf[26], buf[27]]);
        let actual = crc32fast::hash(&buf[0..24]);
        if expected != actual {
            return Err(StoreError::ChecksumMismatch { expected, actual });
        }

        let byte_width = u16::from_le_bytes([buf[8], buf[9]]);
        let kind = ColumnKind::from_tag(buf[6], byte_width).ok_or_else(|| {
            StoreError::Corrupted(format!(
                "unknown kind tag {} with byte width {}",
                buf[6], byte_width
            ))
        })?;

        let mut cap = [0u8; 8];
        cap.copy_from_slice(&buf[16..24]);
        let capacity = u64::from_le_bytes(cap);
        if capacity == 0 {
            return Err(StoreError::Corrupted("zero capacity".to_string()));
        }

        Ok(Self { kind, capacity })
    }
}

/// One commit slot: the committed length tagged with a sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitRecord {
    /// Monotonic commit sequence.
    pub sequence: u64,
    /// Committed slot count.
    pub length: u64,
}

impl CommitRecord {
    /// Encodes the record into its 32-byte slot.
    pub fn to_bytes(self) -> [u8; COMMIT_SLOT_SIZE] {
        let mut buf = [0u8; COMMIT_SLOT_SIZE];
        buf[0..8].copy_from_slice(&self.sequence.to_le_bytes());
        buf[8..16].copy_from_slice(&self.length.to_le_bytes());
        let crc = crc32fast::hash(&buf[0..16]);
        buf[16..20].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes a slot, returning `None` if its checksum does not match.
    pub fn from_bytes(buf: &[u8; COMMIT_SLOT_SIZE]) -> Option<Self> {
        let stored = u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]);
        if crc32fast::hash(&buf[0..16]) != stored {
            return None;
        }
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&buf[0..8]);
        let mut len = [0u8; 8];
        len.copy_from_slice(&buf[8..16]);
        Some(Self {
            sequence: u64::from_le_bytes(seq),
            length: u64::from_le_bytes(len),
        })
    }

    /// Byte offset of the commit slot this record is written to.
    fn slot_offset(self) -> u64 {
        (FIXED_HEADER_SIZE + (self.sequence % 2) as usize * COMMIT_SLOT_SIZE) as u64
    }
}

/// Handle to an open column file.
///
/// # Examples
/// ```rust,ignore
/// use alopex_strata::column::{ColumnFile, ColumnKind, ColumnValues, SyncMode};
///
/// let mut file = ColumnFile::create("close.col", ColumnKind::Float64, 4, SyncMode::Fsync)?;
/// file.append(&ColumnValues::from(vec![1.0, 2.0]))?;
/// let values = file.read(0..2)?;
/// ```
#[derive(Debug)]
pub struct ColumnFile {
    path: PathBuf,
    file: File,
    header: ColumnHeader,
    commit: CommitRecord,
    sync_mode: SyncMode,
}

impl ColumnFile {
    /// Creates a new, empty column file, replacing anything at `path`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidCapacity` if `capacity` is zero or the data
    /// region would not be addressable.
    pub fn create(
        path: impl AsRef<Path>,
        kind: ColumnKind,
        capacity: u64,
        sync_mode: SyncMode,
    ) -> Result<Self> {
        let data_size = data_region_size(kind, capacity)?;
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let header = ColumnHeader { kind, capacity };
        let commit = CommitRecord {
            sequence: 1,
            length: 0,
        };

        let mut buf = Vec::with_capacity(HEADER_SIZE);
        header.write_to(&mut buf)?;
        buf.resize(HEADER_SIZE, 0);
        let offset = commit.slot_offset() as usize;
        buf[offset..offset + COMMIT_SLOT_SIZE].copy_from_slice(&commit.to_bytes());
        file.write_all(&buf)?;
        file.set_len(HEADER_SIZE as u64 + data_size)?;
        sync_mode.sync(&file)?;

        Ok(Self {
            path,
            file,
            header,
            commit,
            sync_mode,
        })
    }

    /// Opens an existing column file and recovers its last committed length.
    ///
    /// # Errors
    ///
    /// Returns a header validation error, or `StoreError::Corrupted` if no
    /// commit slot is valid or the data region is truncated.
    pub fn open(path: impl AsRef<Path>, sync_mode: SyncMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let header = ColumnHeader::read_from(&mut file)?;

        let mut slots = [[0u8; COMMIT_SLOT_SIZE]; 2];
        file.read_exact(&mut slots[0])?;
        file.read_exact(&mut slots[1])?;
        let commit = slots
            .iter()
            .filter_map(CommitRecord::from_bytes)
            .max_by_key(|record| record.sequence)
            .ok_or_else(|| StoreError::Corrupted(format!("{:?}: no valid commit record", path)))?;

        if commit.length > header.capacity {
            return Err(StoreError::Corrupted(format!(
                "{:?}: committed length {} exceeds capacity {}",
                path, commit.length, header.capacity
            )));
        }

        let expected_size = HEADER_SIZE as u64 + data_region_size(header.kind, header.capacity)?;
        let actual_size = file.metadata()?.len();
        if actual_size < expected_size {
            return Err(StoreError::Corrupted(format!(
                "{:?}: file is {} bytes, expected at least {}",
                path, actual_size, expected_size
            )));
        }

        Ok(Self {
            path,
            file,
            header,
            commit,
            sync_mode,
        })
    }

    /// Appends values after the committed length.
    ///
    /// Returns the number of slots written.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::KindMismatch` if the values have another kind, and
    /// `StoreError::CapacityExceeded` if they do not fit; the file is not
    /// modified in either case.
    pub fn append(&mut self, values: &ColumnValues) -> Result<usize> {
        if values.kind() != self.header.kind {
            return Err(StoreError::KindMismatch {
                expected: self.header.kind.to_string(),
                actual: values.kind().to_string(),
            });
        }
        self.append_raw(&values.encode())
    }

    /// Appends raw, already encoded slots.
    pub(crate) fn append_raw(&mut self, bytes: &[u8]) -> Result<usize> {
        let width = self.byte_width();
        if bytes.len() % width != 0 {
            return Err(StoreError::Corrupted(format!(
                "{} bytes is not a multiple of slot width {}",
                bytes.len(),
                width
            )));
        }
        let count = (bytes.len() / width) as u64;
        if count == 0 {
            return Ok(0);
        }
        if count > self.remaining() {
            return Err(StoreError::CapacityExceeded {
                length: self.commit.length,
                capacity: self.header.capacity,
                requested: count,
            });
        }

        self.write_at(self.slot_offset(self.commit.length), bytes)?;
        self.sync_mode.sync(&self.file)?;
        self.commit_length(self.commit.length + count)?;
        Ok(count as usize)
    }

    /// Reads the committed slots in `range`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::OutOfRange` if the range is reversed or reaches
    /// past the committed length.
    pub fn read(&self, range: Range<u64>) -> Result<ColumnValues> {
        let bytes = self.read_raw(range)?;
        ColumnValues::decode(self.header.kind, &bytes)
    }

    /// Reads every committed slot.
    pub fn read_all(&self) -> Result<ColumnValues> {
        self.read(0..self.commit.length)
    }

    pub(crate) fn read_raw(&self, range: Range<u64>) -> Result<Vec<u8>> {
        if range.start > range.end || range.end > self.commit.length {
            return Err(StoreError::OutOfRange {
                start: range.start,
                end: range.end,
                length: self.commit.length,
            });
        }
        let len = (range.end - range.start) as usize * self.byte_width();
        let mut buf = vec![0u8; len];
        if len > 0 {
            let mut file = &self.file;
            file.seek(SeekFrom::Start(self.slot_offset(range.start)))?;
            file.read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    /// Moves the committed length back to `length`.
    ///
    /// Only used to repair shard groups whose columns were left with different
    /// lengths by a crash between column commits.
    pub(crate) fn roll_back_to(&mut self, length: u64) -> Result<()> {
        if length >= self.commit.length {
            return Ok(());
        }
        self.commit_length(length)
    }

    /// Flushes data and metadata to disk regardless of the sync mode.
    pub fn sync_all(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    pub(crate) fn set_path(&mut self, path: PathBuf) {
        self.path = path;
    }

    pub(crate) fn set_sync_mode(&mut self, sync_mode: SyncMode) {
        self.sync_mode = sync_mode;
    }

    /// Returns the slot kind.
    pub fn kind(&self) -> ColumnKind {
        self.header.kind
    }

    /// Returns the width of one slot in bytes.
    pub fn byte_width(&self) -> usize {
        self.header.kind.byte_width()
    }

    /// Returns the allocated slot count.
    pub fn capacity(&self) -> u64 {
        self.header.capacity
    }

    /// Returns the committed slot count.
    pub fn length(&self) -> u64 {
        self.commit.length
    }

    /// Returns the number of free slots.
    pub fn remaining(&self) -> u64 {
        self.header.capacity - self.commit.length
    }

    /// Returns the path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the sync mode used for commits.
    pub fn sync_mode(&self) -> SyncMode {
        self.sync_mode
    }

    fn commit_length(&mut self, length: u64) -> Result<()> {
        let next = CommitRecord {
            sequence: self.commit.sequence + 1,
            length,
        };
        self.write_at(next.slot_offset(), &next.to_bytes())?;
        self.sync_mode.sync(&self.file)?;
        self.commit = next;
        Ok(())
    }

    fn slot_offset(&self, slot: u64) -> u64 {
        HEADER_SIZE as u64 + slot * self.byte_width() as u64
    }

    fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        Ok(())
    }
}

fn data_region_size(kind: ColumnKind, capacity: u64) -> Result<u64> {
    if capacity == 0 {
        return Err(StoreError::InvalidCapacity(capacity));
    }
    capacity
        .checked_mul(kind.byte_width() as u64)
        .ok_or(StoreError::InvalidCapacity(capacity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn float_file(dir: &TempDir, capacity: u64) -> ColumnFile {
        ColumnFile::create(
            dir.path().join("values.col"),
            ColumnKind::Float64,
            capacity,
            SyncMode::None,
        )
        .unwrap()
    }

    #[test]
    fn test_create_rejects_zero_capacity() {
        let dir = TempDir::new().unwrap();
        let err = ColumnFile::create(dir.path().join("x.col"), ColumnKind::Int64, 0, SyncMode::None)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidCapacity(0)));
    }

    #[test]
    fn test_create_allocates_capacity() {
        let dir = TempDir::new().unwrap();
        let file = float_file(&dir, 16);
        assert_eq!(file.length(), 0);
        assert_eq!(file.capacity(), 16);
        let size = std::fs::metadata(file.path()).unwrap().len();
        assert_eq!(size, HEADER_SIZE as u64 + 16 * 8);
    }

    #[test]
    fn test_header_roundtrip() {
        let header = ColumnHeader {
            kind: ColumnKind::Bytes(10),
            capacity: 42,
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), FIXED_HEADER_SIZE);
        let decoded = ColumnHeader::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_header_checksum_detects_corruption() {
        let header = ColumnHeader {
            kind: ColumnKind::Int32,
            capacity: 8,
        };
        let mut buf = Vec::new();
        header.write_to(&mut buf).unwrap();
        buf[17] ^= 0xFF;
        let err = ColumnHeader::read_from(&mut buf.as_slice()).unwrap_err();
        assert!(matches!(err, StoreError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_commit_record_checksum() {
        let record = CommitRecord {
            sequence: 9,
            length: 3,
        };
        let mut bytes = record.to_bytes();
        assert_eq!(CommitRecord::from_bytes(&bytes), Some(record));
        bytes[8] ^= 1;
        assert_eq!(CommitRecord::from_bytes(&bytes), None);
        assert_eq!(CommitRecord::from_bytes(&[0u8; COMMIT_SLOT_SIZE]), None);
    }

    #[test]
    fn test_append_and_read() {
        let dir = TempDir::new().unwrap();
        let mut file = float_file(&dir, 8);
        assert_eq!(file.append(&ColumnValues::from(vec![1.0, 2.0])).unwrap(), 2);
        assert_eq!(file.append(&ColumnValues::from(vec![3.0])).unwrap(), 1);
        assert_eq!(file.length(), 3);
        assert_eq!(file.read(0..3).unwrap(), ColumnValues::from(vec![1.0, 2.0, 3.0]));
        assert_eq!(file.read(1..2).unwrap(), ColumnValues::from(vec![2.0]));
        assert_eq!(file.read(3..3).unwrap(), ColumnValues::from(Vec::<f64>::new()));
    }

    #[test]
    fn test_append_capacity_exceeded_leaves_file_unchanged() {
        let dir = TempDir::new().unwrap();
        let mut file = float_file(&dir, 2);
        file.append(&ColumnValues::from(vec![1.0])).unwrap();

        let err = file.append(&ColumnValues::from(vec![2.0, 3.0])).unwrap_err();
        assert!(matches!(
            err,
            StoreError::CapacityExceeded {
                length: 1,
                capacity: 2,
                requested: 2
            }
        ));
        assert_eq!(file.length(), 1);
        assert_eq!(file.read_all().unwrap(), ColumnValues::from(vec![1.0]));
    }

    #[test]
    fn test_append_kind_mismatch() {
        let dir = TempDir::new().unwrap();
        let mut file = float_file(&dir, 2);
        let err = file.append(&ColumnValues::from(vec![1i64])).unwrap_err();
        assert!(matches!(err, StoreError::KindMismatch { .. }));
        assert_eq!(file.length(), 0);
    }

    #[test]
    fn test_read_out_of_range() {
        let dir = TempDir::new().unwrap();
        let mut file = float_file(&dir, 4);
        file.append(&ColumnValues::from(vec![1.0, 2.0])).unwrap();
        assert!(matches!(
            file.read(0..3),
            Err(StoreError::OutOfRange {
                start: 0,
                end: 3,
                length: 2
            })
        ));
        assert!(matches!(file.read(2..1), Err(StoreError::OutOfRange { .. })));
    }

    #[test]
    fn test_reopen_preserves_data() {
        let dir = TempDir::new().unwrap();
        let path = {
            let mut file = float_file(&dir, 4);
            file.append(&ColumnValues::from(vec![0.5, 1.5, 2.5])).unwrap();
            file.path().to_path_buf()
        };
        let file = ColumnFile::open(&path, SyncMode::None).unwrap();
        assert_eq!(file.kind(), ColumnKind::Float64);
        assert_eq!(file.capacity(), 4);
        assert_eq!(file.length(), 3);
        assert_eq!(file.read_all().unwrap(), ColumnValues::from(vec![0.5, 1.5, 2.5]));
    }

    #[test]
    fn test_uncommitted_bytes_are_invisible() {
        let dir = TempDir::new().unwrap();
        let mut file = float_file(&dir, 4);
        file.append(&ColumnValues::from(vec![1.0])).unwrap();
        // Slot bytes written without a commit record, as after a crash.
        file.write_at(file.slot_offset(1), &9.0f64.to_le_bytes()).unwrap();
        let path = file.path().to_path_buf();
        drop(file);

        let file = ColumnFile::open(&path, SyncMode::None).unwrap();
        assert_eq!(file.length(), 1);
        assert_eq!(file.read_all().unwrap(), ColumnValues::from(vec![1.0]));
    }

    #[test]
    fn test_torn_commit_falls_back_to_previous_length() {
        let dir = TempDir::new().unwrap();
        let mut file = float_file(&dir, 4);
        file.append(&ColumnValues::from(vec![1.0, 2.0])).unwrap();
        file.append(&ColumnValues::from(vec![3.0])).unwrap();
        let latest = file.commit;
        let path = file.path().to_path_buf();
        drop(file);

        let mut raw = std::fs::read(&path).unwrap();
        let offset = latest.slot_offset() as usize;
        raw[offset + 8] ^= 0xFF;
        std::fs::write(&path, &raw).unwrap();

        let file = ColumnFile::open(&path, SyncMode::None).unwrap();
        assert_eq!(file.length(), 2);
        assert_eq!(file.read_all().unwrap(), ColumnValues::from(vec![1.0, 2.0]));
    }

    #[test]
    fn test_open_rejects_invalid_magic() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.col");
        std::fs::write(&path, vec![0u8; HEADER_SIZE + 8]).unwrap();
        assert!(matches!(
            ColumnFile::open(&path, SyncMode::None),
            Err(StoreError::InvalidMagic([0, 0, 0, 0]))
        ));
    }

    #[test]
    fn test_open_rejects_truncated_data_region() {
        let dir = TempDir::new().unwrap();
        let file = float_file(&dir, 8);
        let path = file.path().to_path_buf();
        drop(file);
        let handle = OpenOptions::new().write(true).open(&path).unwrap();
        handle.set_len(HEADER_SIZE as u64 + 8).unwrap();
        assert!(matches!(
            ColumnFile::open(&path, SyncMode::None),
            Err(StoreError::Corrupted(_))
        ));
    }

    #[test]
    fn test_roll_back_to() {
        let dir = TempDir::new().unwrap();
        let mut file = float_file(&dir, 4);
        file.append(&ColumnValues::from(vec![1.0, 2.0, 3.0])).unwrap();
        file.roll_back_to(1).unwrap();
        assert_eq!(file.length(), 1);
        file.append(&ColumnValues::from(vec![7.0])).unwrap();
        assert_eq!(file.read_all().unwrap(), ColumnValues::from(vec![1.0, 7.0]));
    }

    #[test]
    fn test_bytes_kind() {
        let dir = TempDir::new().unwrap();
        let mut file = ColumnFile::create(
            dir.path().join("dates.col"),
            ColumnKind::Bytes(4),
            2,
            SyncMode::None,
        )
        .unwrap();
        let values = ColumnValues::Bytes {
            width: 4,
            data: b"abcdwxyz".to_vec(),
        };
        file.append(&values).unwrap();
        assert_eq!(file.read_all().unwrap(), values);
    }
}
