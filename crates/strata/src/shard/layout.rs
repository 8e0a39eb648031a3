//! On-disk layout of a store directory.
//!
//! ```text
//! <root>/store.json                              catalog
//! <root>/<field>/<shard_key>/values.col          numeric values
//! <root>/<field>/<shard_key>/dates.col           encoded timestamps
//! <root>/<field>/<shard_key>/symbols.col         panel fields only
//! ```

use crate::column::{rebuild_path, COLUMN_EXTENSION};
use crate::error::{Result, StoreError};
use crate::shard::{ShardKey, ShardRouter};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// File name of the store catalog.
pub const CATALOG_FILE: &str = "store.json";

/// Role of a column inside a shard directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnRole {
    /// Numeric values of the field.
    Values,
    /// Fixed-width encoded timestamps.
    Dates,
    /// Fixed-width encoded symbols (panel fields).
    Symbols,
}

impl ColumnRole {
    /// File stem of the column, e.g. `values`.
    pub fn stem(self) -> &'static str {
        match self {
            Self::Values => "values",
            Self::Dates => "dates",
            Self::Symbols => "symbols",
        }
    }

    /// File name of the column, e.g. `values.col`.
    pub fn file_name(self) -> String {
        format!("{}.{}", self.stem(), COLUMN_EXTENSION)
    }
}

/// Checks that `name` can be used as a field directory name.
///
/// # Errors
///
/// Returns `StoreError::InvalidFieldName` for empty names, hidden names,
/// names containing separators or NUL, and the catalog file name.
pub fn validate_field_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name.starts_with('.')
        || name == CATALOG_FILE
        || name.contains(&['/', '\\', '\0'][..]);
    if invalid {
        return Err(StoreError::InvalidFieldName(name.to_string()));
    }
    Ok(())
}

/// Provides filesystem paths for fields, shards and columns.
///
/// # Examples
/// ```rust,ignore
/// use alopex_strata::shard::{ColumnRole, Granularity, ShardRouter, StoreLayout};
///
/// let layout = StoreLayout::new("/data");
/// let key = ShardRouter::new(Granularity::Year).shard_key(&ts);
/// let path = layout.column_path("close", &key, ColumnRole::Values);
/// ```
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    /// Creates a layout rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Returns the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the catalog path.
    pub fn catalog_path(&self) -> PathBuf {
        self.root.join(CATALOG_FILE)
    }

    /// Returns the directory holding every shard of `field`.
    pub fn field_dir(&self, field: &str) -> PathBuf {
        self.root.join(field)
    }

    /// Returns the directory of one shard.
    pub fn shard_dir(&self, field: &str, key: &ShardKey) -> PathBuf {
        self.field_dir(field).join(key.to_string())
    }

    /// Returns the path of one column file.
    pub fn column_path(&self, field: &str, key: &ShardKey, role: ColumnRole) -> PathBuf {
        self.shard_dir(field, key).join(role.file_name())
    }

    /// Lists the shards of `field` that exist on disk, oldest first.
    ///
    /// Entries whose names are not shard keys of the router's granularity are
    /// skipped. A missing field directory yields an empty list.
    pub fn list_shards(&self, field: &str, router: &ShardRouter) -> Result<Vec<ShardKey>> {
        let dir = self.field_dir(field);
        let mut keys = Vec::new();

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(err) => return Err(err.into()),
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            match router.parse_key(name) {
                Some(key) => keys.push(key),
                None => warn!("Skipping unrecognized shard directory {:?}", entry.path()),
            }
        }

        keys.sort();
        Ok(keys)
    }

    /// Removes rebuild leftovers (`*.col.tmp`) under every shard of `field`.
    ///
    /// Returns the number of files removed.
    pub fn sweep_rebuild_leftovers(&self, field: &str) -> Result<usize> {
        let dir = self.field_dir(field);
        let shards = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut removed = 0;
        for shard in shards {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for role in [ColumnRole::Values, ColumnRole::Dates, ColumnRole::Symbols] {
                let leftover = rebuild_path(&shard.path().join(role.file_name()));
                match fs::remove_file(&leftover) {
                    Ok(()) => {
                        warn!("Removed rebuild leftover {:?}", leftover);
                        removed += 1;
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                    Err(err) => return Err(err.into()),
                }
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::Granularity;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn key(granularity: Granularity, y: i32, m: u32) -> ShardKey {
        let ts = NaiveDate::from_ymd_opt(y, m, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        ShardRouter::new(granularity).shard_key(&ts)
    }

    #[test]
    fn test_column_path() {
        let layout = StoreLayout::new("/data");
        let key = key(Granularity::Quarter, 2018, 2);
        assert_eq!(
            layout.column_path("close", &key, ColumnRole::Values),
            PathBuf::from("/data/close/2018Q1/values.col")
        );
        assert_eq!(layout.catalog_path(), PathBuf::from("/data/store.json"));
    }

    #[test]
    fn test_validate_field_name() {
        assert!(validate_field_name("close").is_ok());
        assert!(validate_field_name("adj_close-2").is_ok());
        for bad in ["", ".", "..", ".hidden", "a/b", "a\\b", "store.json"] {
            assert!(
                matches!(validate_field_name(bad), Err(StoreError::InvalidFieldName(_))),
                "{:?}",
                bad
            );
        }
    }

    #[test]
    fn test_list_shards_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        let layout = StoreLayout::new(dir.path());
        let router = ShardRouter::new(Granularity::Month);
        for name in ["201803", "201712", "201801", "notashard"] {
            fs::create_dir_all(layout.field_dir("close").join(name)).unwrap();
        }
        fs::write(layout.field_dir("close").join("201802"), b"file").unwrap();

        let names: Vec<String> = layout
            .list_shards("close", &router)
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(names, vec!["201712", "201801", "201803"]);
        assert!(layout.list_shards("missing", &router).unwrap().is_empty());
    }

    #[test]
    fn test_sweep_rebuild_leftovers() {
        let dir = TempDir::new().unwrap();
        let layout = StoreLayout::new(dir.path());
        let key = key(Granularity::Year, 2018, 1);
        fs::create_dir_all(layout.shard_dir("close", &key)).unwrap();
        let values = layout.column_path("close", &key, ColumnRole::Values);
        fs::write(&values, b"keep").unwrap();
        fs::write(rebuild_path(&values), b"stale").unwrap();

        assert_eq!(layout.sweep_rebuild_leftovers("close").unwrap(), 1);
        assert!(values.exists());
        assert!(!rebuild_path(&values).exists());
        assert_eq!(layout.sweep_rebuild_leftovers("missing").unwrap(), 0);
    }
}
