//! Persistent store catalog (`store.json`).
//!
//! The catalog records the shard granularity the store was created with and
//! the kind and layout of every field. It is rewritten atomically:
//!
//! 1. Write to `store.json.tmp`
//! 2. fsync temp file
//! 3. Atomic rename to `store.json`
//! 4. fsync directory (rename persistence)

use crate::column::{ColumnKind, SyncMode};
use crate::error::{Result, StoreError};
use crate::shard::Granularity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Current catalog format version.
pub const CATALOG_VERSION: u32 = 1;

/// Whether a field stores one value per timestamp or one per symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldLayout {
    /// One series: rows carry a timestamp and a value.
    Plain,
    /// Cross-sections: rows carry a timestamp, a symbol and a value.
    Panel,
}

impl FieldLayout {
    /// Returns the layout name used in the catalog.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Panel => "panel",
        }
    }
}

/// Catalog record of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldEntry {
    /// Kind of the values column, fixed by the first write.
    pub kind: ColumnKind,
    /// Layout, fixed by the first write.
    pub layout: FieldLayout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Catalog {
    pub(crate) version: u32,
    pub(crate) granularity: Granularity,
    pub(crate) fields: BTreeMap<String, FieldEntry>,
}

impl Catalog {
    pub(crate) fn new(granularity: Granularity) -> Self {
        Self {
            version: CATALOG_VERSION,
            granularity,
            fields: BTreeMap::new(),
        }
    }

    /// Loads the catalog, or `None` if the store has none yet.
    pub(crate) fn load(path: &Path) -> Result<Option<Self>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let catalog: Self = serde_json::from_slice(&bytes)?;
        if catalog.version != CATALOG_VERSION {
            return Err(StoreError::UnsupportedVersion(
                u16::try_from(catalog.version).unwrap_or(u16::MAX),
            ));
        }
        Ok(Some(catalog))
    }

    pub(crate) fn save(&self, path: &Path, sync_mode: SyncMode) -> Result<()> {
        let tmp_path = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(self)?;

        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&json)?;
            sync_mode.sync(&file)?;
        }

        fs::rename(&tmp_path, path)?;

        if sync_mode != SyncMode::None {
            if let Some(dir) = path.parent() {
                File::open(dir)?.sync_all()?;
            }
        }
        Ok(())
    }

    /// Removes a catalog temp file left by an interrupted save.
    pub(crate) fn remove_stale_tmp(path: &Path) -> Result<bool> {
        match fs::remove_file(path.with_extension("json.tmp")) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Checks a write against the recorded entry of `field`, if any.
    pub(crate) fn check(
        &self,
        field: &str,
        kind: ColumnKind,
        layout: FieldLayout,
    ) -> Result<Option<FieldEntry>> {
        let Some(entry) = self.fields.get(field) else {
            return Ok(None);
        };
        if entry.layout != layout {
            return Err(StoreError::FieldLayoutMismatch {
                field: field.to_string(),
                stored: entry.layout.as_str(),
            });
        }
        if entry.kind != kind {
            return Err(StoreError::KindMismatch {
                expected: entry.kind.to_string(),
                actual: kind.to_string(),
            });
        }
        Ok(Some(*entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        assert!(Catalog::load(&path).unwrap().is_none());

        let mut catalog = Catalog::new(Granularity::Quarter);
        catalog.fields.insert(
            "close".to_string(),
            FieldEntry {
                kind: ColumnKind::Float64,
                layout: FieldLayout::Panel,
            },
        );
        catalog.save(&path, SyncMode::Fsync).unwrap();

        assert_eq!(Catalog::load(&path).unwrap(), Some(catalog));
        assert!(!path.with_extension("json.tmp").exists());
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"QUARTER\""));
        assert!(text.contains("\"float64\""));
        assert!(text.contains("\"panel\""));
    }

    #[test]
    fn test_check_entry() {
        let mut catalog = Catalog::new(Granularity::Year);
        catalog.fields.insert(
            "volume".to_string(),
            FieldEntry {
                kind: ColumnKind::Int64,
                layout: FieldLayout::Plain,
            },
        );

        assert!(catalog
            .check("open", ColumnKind::Float64, FieldLayout::Plain)
            .unwrap()
            .is_none());
        assert!(catalog
            .check("volume", ColumnKind::Int64, FieldLayout::Plain)
            .unwrap()
            .is_some());
        assert!(matches!(
            catalog.check("volume", ColumnKind::Float64, FieldLayout::Plain),
            Err(StoreError::KindMismatch { .. })
        ));
        assert!(matches!(
            catalog.check("volume", ColumnKind::Int64, FieldLayout::Panel),
            Err(StoreError::FieldLayoutMismatch { stored: "plain", .. })
        ));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, r#"{"version":9,"granularity":"YEAR","fields":{}}"#).unwrap();
        assert!(matches!(
            Catalog::load(&path),
            Err(StoreError::UnsupportedVersion(9))
        ));
    }
}
