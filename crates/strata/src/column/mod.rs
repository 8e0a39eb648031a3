//! Fixed-width column storage.
//!
//! - [`TypeRegistry`] / [`ColumnKind`]: numeric kind whitelist and slot widths
//! - [`ColumnFile`]: fixed-capacity on-disk column with crash-atomic appends
//! - [`ResizeManager`]: rebuild-on-resize with atomic file replacement

pub mod file;
pub mod kind;
pub mod resize;
pub mod values;

pub use file::{ColumnFile, ColumnHeader, CommitRecord, SyncMode, COLUMN_EXTENSION, HEADER_SIZE};
pub use kind::{ColumnKind, RegistryEntry, TypeRegistry};
pub use resize::{rebuild_path, ResizeEvent, ResizeManager};
pub use values::ColumnValues;
