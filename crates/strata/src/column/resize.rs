//! Capacity planning and rebuild-on-resize for column files.
//!
//! A column file never grows in place. When an append needs more slots than
//! are allocated, the [`ResizeManager`] rebuilds it:
//!
//! 1. Create `{name}.tmp` with the grown capacity
//! 2. Copy every committed slot, preserving order and indices
//! 3. fsync the temp file
//! 4. fsync directory (file entry persistence)
//! 5. Atomic rename over the original
//! 6. fsync directory again (rename persistence)
//! 7. Swap the caller's handle; the old storage is released when it drops
//!
//! Until step 5 the original file is the only one reachable under its name
//! and the caller's handle still points at it, so a failure or crash before
//! the rename leaves it fully intact.

use crate::column::ColumnFile;
use crate::error::{Result, StoreError};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Suffix appended to a column file name while it is being rebuilt.
pub const REBUILD_SUFFIX: &str = "tmp";

/// Number of slots copied per chunk during a rebuild.
const COPY_CHUNK_SLOTS: u64 = 64 * 1024;

/// Record of one capacity overflow that was resolved by a rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeEvent {
    /// Path of the rebuilt column file.
    pub path: PathBuf,
    /// Capacity before the rebuild.
    pub old_capacity: u64,
    /// Capacity after the rebuild.
    pub new_capacity: u64,
    /// Number of slots the triggering write needed beyond the old capacity.
    pub triggering_write_size: u64,
}

/// Grows column files by a fixed step.
#[derive(Debug, Clone, Copy)]
pub struct ResizeManager {
    increase_step: u64,
}

impl ResizeManager {
    /// Creates a manager that grows capacity in multiples of `increase_step`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Config` if `increase_step` is zero.
    pub fn new(increase_step: u64) -> Result<Self> {
        if increase_step == 0 {
            return Err(StoreError::Config(
                "col_size_increase_step must be positive".to_string(),
            ));
        }
        Ok(Self { increase_step })
    }

    /// Returns the configured growth step.
    pub fn increase_step(&self) -> u64 {
        self.increase_step
    }

    /// Returns the capacity needed to hold `needed` slots.
    ///
    /// Growth is linear: the smallest multiple of the step that covers the
    /// shortfall is added to `current`.
    pub fn grown_capacity(&self, current: u64, needed: u64) -> u64 {
        if needed <= current {
            return current;
        }
        let steps = (needed - current).div_ceil(self.increase_step);
        current.saturating_add(steps.saturating_mul(self.increase_step))
    }

    /// Makes sure `file` can hold `needed_length` slots, rebuilding if not.
    ///
    /// Returns `None` when the capacity was already sufficient. On success
    /// after a rebuild, `file` refers to the new, larger file at the same path.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::RebuildFailed` if the rebuild could not complete.
    /// `file` then still refers to the original, unchanged column.
    ///
    /// Once the grown file has been renamed into place, `file` refers to it.
    /// A failing directory sync after that point is reported as a plain
    /// `StoreError::IoError`, since the original is already replaced.
    pub fn ensure_capacity(
        &self,
        file: &mut ColumnFile,
        needed_length: u64,
    ) -> Result<Option<ResizeEvent>> {
        let old_capacity = file.capacity();
        if old_capacity >= needed_length {
            return Ok(None);
        }

        let new_capacity = self.grown_capacity(old_capacity, needed_length);
        let path = file.path().to_path_buf();
        let tmp_path = rebuild_path(&path);

        let rebuilt = match self.build_copy(file, &tmp_path, new_capacity) {
            Ok(rebuilt) => rebuilt,
            Err(err) => {
                remove_stale(&tmp_path);
                return Err(StoreError::rebuild_failed(path, err));
            }
        };

        if let Err(err) = fs::rename(&tmp_path, &path) {
            remove_stale(&tmp_path);
            return Err(StoreError::rebuild_failed(path, err.into()));
        }

        // The rename is done: the grown file is the one reachable by name.
        let mut rebuilt = rebuilt;
        rebuilt.set_path(path.clone());
        *file = rebuilt;

        sync_parent(&path, file)?;

        info!(
            "Rebuilt column {:?}: capacity {} -> {} for {} slots",
            path, old_capacity, new_capacity, needed_length
        );

        Ok(Some(ResizeEvent {
            path,
            old_capacity,
            new_capacity,
            triggering_write_size: needed_length - old_capacity,
        }))
    }

    /// Convenience wrapper: makes room for `additional` slots after the
    /// committed length.
    pub fn ensure_room(&self, file: &mut ColumnFile, additional: u64) -> Result<Option<ResizeEvent>> {
        let needed = file.length().saturating_add(additional);
        self.ensure_capacity(file, needed)
    }

    fn build_copy(&self, source: &ColumnFile, tmp_path: &Path, capacity: u64) -> Result<ColumnFile> {
        let mut target = ColumnFile::create(
            tmp_path,
            source.kind(),
            capacity,
            crate::column::SyncMode::None,
        )?;

        let length = source.length();
        let mut start = 0;
        while start < length {
            let end = (start + COPY_CHUNK_SLOTS).min(length);
            let bytes = source.read_raw(start..end)?;
            target.append_raw(&bytes)?;
            start = end;
        }

        if target.length() != length {
            return Err(StoreError::Corrupted(format!(
                "rebuild copied {} of {} slots",
                target.length(),
                length
            )));
        }

        target.sync_all()?;
        target.set_sync_mode(source.sync_mode());
        sync_parent(tmp_path, &target)?;
        Ok(target)
    }
}

/// Returns the temporary path used while rebuilding `path`.
pub fn rebuild_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(REBUILD_SUFFIX);
    path.with_file_name(name)
}

fn sync_parent(path: &Path, file: &ColumnFile) -> Result<()> {
    if file.sync_mode() == crate::column::SyncMode::None {
        return Ok(());
    }
    if let Some(dir) = path.parent() {
        File::open(dir)?.sync_all()?;
    }
    Ok(())
}

fn remove_stale(tmp_path: &Path) {
    match fs::remove_file(tmp_path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => error!(
            "Failed to remove rebuild leftover {:?}: {:?}",
            tmp_path, err
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::{ColumnKind, ColumnValues, SyncMode};
    use tempfile::TempDir;

    fn column(dir: &TempDir, capacity: u64) -> ColumnFile {
        ColumnFile::create(
            dir.path().join("values.col"),
            ColumnKind::Float64,
            capacity,
            SyncMode::None,
        )
        .unwrap()
    }

    #[test]
    fn test_zero_step_rejected() {
        assert!(matches!(ResizeManager::new(0), Err(StoreError::Config(_))));
    }

    #[test]
    fn test_grown_capacity_is_linear() {
        let manager = ResizeManager::new(2).unwrap();
        assert_eq!(manager.grown_capacity(4, 3), 4);
        assert_eq!(manager.grown_capacity(4, 4), 4);
        assert_eq!(manager.grown_capacity(4, 5), 6);
        assert_eq!(manager.grown_capacity(4, 6), 6);
        assert_eq!(manager.grown_capacity(4, 7), 8);
        assert_eq!(manager.grown_capacity(4, 11), 12);
    }

    #[test]
    fn test_rebuild_on_overflow() {
        let dir = TempDir::new().unwrap();
        let manager = ResizeManager::new(2).unwrap();
        let mut file = column(&dir, 4);
        file.append(&ColumnValues::from(vec![1.0, 2.0, 3.0, 4.0])).unwrap();

        let event = manager.ensure_room(&mut file, 1).unwrap().unwrap();
        assert_eq!(event.old_capacity, 4);
        assert_eq!(event.new_capacity, 6);
        assert_eq!(event.triggering_write_size, 1);

        file.append(&ColumnValues::from(vec![5.0])).unwrap();
        assert_eq!(file.length(), 5);
        assert_eq!(file.capacity(), 6);
        assert_eq!(
            file.read(0..5).unwrap(),
            ColumnValues::from(vec![1.0, 2.0, 3.0, 4.0, 5.0])
        );
        assert!(!rebuild_path(file.path()).exists());
    }

    #[test]
    fn test_ensure_capacity_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let manager = ResizeManager::new(3).unwrap();
        let mut file = column(&dir, 2);

        assert!(manager.ensure_capacity(&mut file, 5).unwrap().is_some());
        let capacity = file.capacity();
        assert!(manager.ensure_capacity(&mut file, 5).unwrap().is_none());
        assert_eq!(file.capacity(), capacity);
    }

    #[test]
    fn test_rebuild_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let manager = ResizeManager::new(10).unwrap();
        let mut file = column(&dir, 2);
        file.append(&ColumnValues::from(vec![1.0, 2.0])).unwrap();
        manager.ensure_capacity(&mut file, 3).unwrap();
        file.append(&ColumnValues::from(vec![3.0])).unwrap();
        let path = file.path().to_path_buf();
        drop(file);

        let reopened = ColumnFile::open(&path, SyncMode::None).unwrap();
        assert_eq!(reopened.capacity(), 12);
        assert_eq!(reopened.read_all().unwrap(), ColumnValues::from(vec![1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_failed_rebuild_leaves_original_intact() {
        let dir = TempDir::new().unwrap();
        let manager = ResizeManager::new(2).unwrap();
        let mut file = column(&dir, 2);
        file.append(&ColumnValues::from(vec![1.0, 2.0])).unwrap();

        // A directory squatting on the temp path makes the copy step fail.
        let blocker = rebuild_path(file.path());
        fs::create_dir(&blocker).unwrap();

        let err = manager.ensure_room(&mut file, 1).unwrap_err();
        assert!(matches!(err, StoreError::RebuildFailed { .. }));
        assert_eq!(file.capacity(), 2);
        assert_eq!(file.read_all().unwrap(), ColumnValues::from(vec![1.0, 2.0]));

        let reopened = ColumnFile::open(file.path(), SyncMode::None).unwrap();
        assert_eq!(reopened.capacity(), 2);
        assert_eq!(reopened.length(), 2);
    }

    #[test]
    fn test_rebuild_with_fsync_publishes_grown_file() {
        let dir = TempDir::new().unwrap();
        let manager = ResizeManager::new(4).unwrap();
        let path = dir.path().join("values.col");
        let mut file = ColumnFile::create(&path, ColumnKind::Int64, 1, SyncMode::Fsync).unwrap();
        file.append(&ColumnValues::from(vec![7i64])).unwrap();

        let event = manager.ensure_room(&mut file, 1).unwrap().unwrap();
        assert_eq!(event.new_capacity, 5);
        // The handle already points at the renamed file.
        assert_eq!(file.path(), path.as_path());
        assert_eq!(file.capacity(), 5);
        assert_eq!(file.sync_mode(), SyncMode::Fsync);
        assert!(!rebuild_path(&path).exists());

        let reopened = ColumnFile::open(&path, SyncMode::Fsync).unwrap();
        assert_eq!(reopened.capacity(), 5);
        assert_eq!(reopened.read_all().unwrap(), ColumnValues::from(vec![7i64]));
    }

    #[test]
    fn test_rebuild_path() {
        assert_eq!(
            rebuild_path(Path::new("/data/close/2018/values.col")),
            PathBuf::from("/data/close/2018/values.col.tmp")
        );
    }
}
