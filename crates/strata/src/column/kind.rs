//! Column kinds and the type registry that whitelists them.
//!
//! Kind labels follow the numpy dtype vocabulary used by the store
//! configuration: a class letter (`i`, `f`), a sized code (`i4`, `f8`) or a
//! full name (`int64`, `float32`). Labels are resolved once into the closed
//! [`ColumnKind`] enum; nothing past the registry dispatches on strings.

use crate::error::{Result, StoreError};
use std::fmt;

/// Class letter of integer kinds.
pub const INT_CLASS: char = 'i';

/// Class letter of floating-point kinds.
pub const FLOAT_CLASS: char = 'f';

/// Class letter of fixed-width byte kinds.
pub const BYTES_CLASS: char = 'S';

/// Physical type of the slots in a column file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 32-bit IEEE float.
    Float32,
    /// 64-bit IEEE float.
    Float64,
    /// Fixed-width byte string (codec-encoded symbols and dates).
    Bytes(u16),
}

impl ColumnKind {
    /// Returns the number of bytes one slot occupies.
    pub fn byte_width(self) -> usize {
        match self {
            Self::Int32 | Self::Float32 => 4,
            Self::Int64 | Self::Float64 => 8,
            Self::Bytes(width) => width as usize,
        }
    }

    /// Returns the class letter used by the whitelist.
    pub fn class(self) -> char {
        match self {
            Self::Int32 | Self::Int64 => INT_CLASS,
            Self::Float32 | Self::Float64 => FLOAT_CLASS,
            Self::Bytes(_) => BYTES_CLASS,
        }
    }

    /// Returns true for the integer and floating-point kinds.
    pub fn is_numeric(self) -> bool {
        !matches!(self, Self::Bytes(_))
    }

    /// Parses a kind label.
    ///
    /// Returns `None` for labels outside the supported vocabulary.
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "i" | "i8" | "int64" => Some(Self::Int64),
            "i4" | "int32" => Some(Self::Int32),
            "f" | "f8" | "float64" => Some(Self::Float64),
            "f4" | "float32" => Some(Self::Float32),
            _ => {
                let width = label.strip_prefix(BYTES_CLASS)?.parse::<u16>().ok()?;
                (width > 0).then_some(Self::Bytes(width))
            }
        }
    }

    pub(crate) fn tag(self) -> u8 {
        match self {
            Self::Int32 => 1,
            Self::Int64 => 2,
            Self::Float32 => 3,
            Self::Float64 => 4,
            Self::Bytes(_) => 5,
        }
    }

    pub(crate) fn from_tag(tag: u8, byte_width: u16) -> Option<Self> {
        let kind = match tag {
            1 => Self::Int32,
            2 => Self::Int64,
            3 => Self::Float32,
            4 => Self::Float64,
            5 if byte_width > 0 => Self::Bytes(byte_width),
            _ => return None,
        };
        (kind.byte_width() == byte_width as usize).then_some(kind)
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int32 => f.write_str("int32"),
            Self::Int64 => f.write_str("int64"),
            Self::Float32 => f.write_str("float32"),
            Self::Float64 => f.write_str("float64"),
            Self::Bytes(width) => write!(f, "{}{}", BYTES_CLASS, width),
        }
    }
}

impl From<ColumnKind> for String {
    fn from(kind: ColumnKind) -> Self {
        kind.to_string()
    }
}

impl TryFrom<String> for ColumnKind {
    type Error = String;

    fn try_from(label: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&label).ok_or_else(|| format!("unknown column kind {:?}", label))
    }
}

impl serde::Serialize for ColumnKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for ColumnKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Self::try_from(label).map_err(serde::de::Error::custom)
    }
}

/// One kind admitted by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryEntry {
    /// The admitted kind.
    pub kind: ColumnKind,
    /// Slot width in bytes.
    pub byte_width: usize,
    /// True for the single default kind.
    pub default_kind: bool,
}

/// Whitelist of numeric kinds a store accepts.
///
/// # Examples
/// ```rust,ignore
/// use alopex_strata::column::{ColumnKind, TypeRegistry};
///
/// let registry = TypeRegistry::new(["i", "f"], "float64")?;
/// assert_eq!(registry.validate("i")?, 8);
/// assert_eq!(registry.default_kind(), ColumnKind::Float64);
/// ```
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    classes: Vec<char>,
    default_kind: ColumnKind,
}

impl TypeRegistry {
    /// Builds a registry from whitelisted class letters and the default label.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Config` if the whitelist is empty, names a class
    /// other than `i`/`f`, or does not admit the default kind.
    pub fn new<I, S>(classes: I, default_label: &str) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut admitted = Vec::new();
        for class in classes {
            let class = class.as_ref();
            let letter = match class {
                "i" => INT_CLASS,
                "f" => FLOAT_CLASS,
                other => {
                    return Err(StoreError::Config(format!(
                        "valid_type_header entry {:?} is not a numeric kind class",
                        other
                    )))
                }
            };
            if !admitted.contains(&letter) {
                admitted.push(letter);
            }
        }
        if admitted.is_empty() {
            return Err(StoreError::Config("valid_type_header is empty".to_string()));
        }

        let default_kind = ColumnKind::parse(default_label)
            .filter(|kind| admitted.contains(&kind.class()))
            .ok_or_else(|| {
                StoreError::Config(format!(
                    "default_data_type {:?} is not admitted by valid_type_header",
                    default_label
                ))
            })?;

        Ok(Self {
            classes: admitted,
            default_kind,
        })
    }

    /// Validates a kind label and returns its byte width.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::UnsupportedType` if the label is unknown or its
    /// class is not whitelisted.
    pub fn validate(&self, label: &str) -> Result<usize> {
        self.resolve(label).map(ColumnKind::byte_width)
    }

    /// Resolves a kind label into a whitelisted [`ColumnKind`].
    pub fn resolve(&self, label: &str) -> Result<ColumnKind> {
        ColumnKind::parse(label)
            .filter(|kind| self.admits(*kind))
            .ok_or_else(|| StoreError::UnsupportedType(label.to_string()))
    }

    /// Resolves an optional label, falling back to the default kind.
    pub fn resolve_or_default(&self, label: Option<&str>) -> Result<ColumnKind> {
        match label {
            Some(label) => self.resolve(label),
            None => Ok(self.default_kind),
        }
    }

    /// Returns true if the kind is numeric and its class is whitelisted.
    pub fn admits(&self, kind: ColumnKind) -> bool {
        kind.is_numeric() && self.classes.contains(&kind.class())
    }

    /// Returns the default kind.
    pub fn default_kind(&self) -> ColumnKind {
        self.default_kind
    }

    /// Lists every admitted kind.
    pub fn entries(&self) -> Vec<RegistryEntry> {
        [
            ColumnKind::Int32,
            ColumnKind::Int64,
            ColumnKind::Float32,
            ColumnKind::Float64,
        ]
        .into_iter()
        .filter(|kind| self.admits(*kind))
        .map(|kind| RegistryEntry {
            kind,
            byte_width: kind.byte_width(),
            default_kind: kind == self.default_kind,
        })
        .collect()
    }
}
