//! Typed value buffers exchanged with column files.

use crate::column::ColumnKind;
use crate::error::{Result, StoreError};
use std::ops::Range;

/// A homogeneous run of slot values.
///
/// Every variant maps to exactly one [`ColumnKind`]; the on-disk encoding is
/// little-endian for numbers and raw bytes for `Bytes`.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    /// 32-bit integers.
    Int32(Vec<i32>),
    /// 64-bit integers.
    Int64(Vec<i64>),
    /// 32-bit floats.
    Float32(Vec<f32>),
    /// 64-bit floats.
    Float64(Vec<f64>),
    /// Fixed-width byte slots stored back to back.
    Bytes {
        /// Width of one slot.
        width: u16,
        /// `len * width` bytes.
        data: Vec<u8>,
    },
}

impl ColumnValues {
    /// Creates an empty buffer of the given kind.
    pub fn empty(kind: ColumnKind) -> Self {
        match kind {
            ColumnKind::Int32 => Self::Int32(Vec::new()),
            ColumnKind::Int64 => Self::Int64(Vec::new()),
            ColumnKind::Float32 => Self::Float32(Vec::new()),
            ColumnKind::Float64 => Self::Float64(Vec::new()),
            ColumnKind::Bytes(width) => Self::Bytes {
                width,
                data: Vec::new(),
            },
        }
    }

    /// Returns the kind of the values.
    pub fn kind(&self) -> ColumnKind {
        match self {
            Self::Int32(_) => ColumnKind::Int32,
            Self::Int64(_) => ColumnKind::Int64,
            Self::Float32(_) => ColumnKind::Float32,
            Self::Float64(_) => ColumnKind::Float64,
            Self::Bytes { width, .. } => ColumnKind::Bytes(*width),
        }
    }

    /// Returns the number of slots.
    pub fn len(&self) -> usize {
        match self {
            Self::Int32(v) => v.len(),
            Self::Int64(v) => v.len(),
            Self::Float32(v) => v.len(),
            Self::Float64(v) => v.len(),
            Self::Bytes { width, data } => data.len() / (*width as usize).max(1),
        }
    }

    /// Returns true if there are no slots.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Encodes the values into their on-disk byte representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len() * self.kind().byte_width());
        match self {
            Self::Int32(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            Self::Int64(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            Self::Float32(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            Self::Float64(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
            Self::Bytes { data, .. } => out.extend_from_slice(data),
        }
        out
    }

    /// Decodes slots of `kind` from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Corrupted` if `bytes` is not a whole number of slots.
    pub fn decode(kind: ColumnKind, bytes: &[u8]) -> Result<Self> {
        let width = kind.byte_width();
        if width == 0 || bytes.len() % width != 0 {
            return Err(StoreError::Corrupted(format!(
                "{} bytes is not a multiple of slot width {}",
                bytes.len(),
                width
            )));
        }

        let values = match kind {
            ColumnKind::Int32 => Self::Int32(
                bytes
                    .chunks_exact(4)
                    .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            ColumnKind::Int64 => Self::Int64(
                bytes
                    .chunks_exact(8)
                    .map(le_u64_bytes)
                    .map(i64::from_le_bytes)
                    .collect(),
            ),
            ColumnKind::Float32 => Self::Float32(
                bytes
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            ColumnKind::Float64 => Self::Float64(
                bytes
                    .chunks_exact(8)
                    .map(le_u64_bytes)
                    .map(f64::from_le_bytes)
                    .collect(),
            ),
            ColumnKind::Bytes(width) => Self::Bytes {
                width,
                data: bytes.to_vec(),
            },
        };
        Ok(values)
    }

    /// Appends `other` to these values.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::KindMismatch` if the kinds differ.
    pub fn extend(&mut self, other: ColumnValues) -> Result<()> {
        match (self, other) {
            (Self::Int32(a), Self::Int32(b)) => a.extend(b),
            (Self::Int64(a), Self::Int64(b)) => a.extend(b),
            (Self::Float32(a), Self::Float32(b)) => a.extend(b),
            (Self::Float64(a), Self::Float64(b)) => a.extend(b),
            (Self::Bytes { width: wa, data: a }, Self::Bytes { width: wb, data: b }) if *wa == wb => {
                a.extend(b)
            }
            (this, other) => {
                return Err(StoreError::KindMismatch {
                    expected: this.kind().to_string(),
                    actual: other.kind().to_string(),
                })
            }
        }
        Ok(())
    }

    /// Returns a copy of the slots in `range`.
    ///
    /// # Panics
    ///
    /// Panics if `range` is out of bounds, like slice indexing.
    pub fn slice(&self, range: Range<usize>) -> Self {
        match self {
            Self::Int32(v) => Self::Int32(v[range].to_vec()),
            Self::Int64(v) => Self::Int64(v[range].to_vec()),
            Self::Float32(v) => Self::Float32(v[range].to_vec()),
            Self::Float64(v) => Self::Float64(v[range].to_vec()),
            Self::Bytes { width, data } => {
                let w = *width as usize;
                Self::Bytes {
                    width: *width,
                    data: data[range.start * w..range.end * w].to_vec(),
                }
            }
        }
    }

    /// Iterates over fixed-width byte slots; `None` for numeric values.
    pub fn byte_slots(&self) -> Option<std::slice::ChunksExact<'_, u8>> {
        match self {
            Self::Bytes { width, data } => Some(data.chunks_exact((*width as usize).max(1))),
            _ => None,
        }
    }

    /// Returns the values as `f64` if they are 64-bit floats.
    pub fn as_f64(&self) -> Option<&[f64]> {
        match self {
            Self::Float64(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the values as `i64` if they are 64-bit integers.
    pub fn as_i64(&self) -> Option<&[i64]> {
        match self {
            Self::Int64(v) => Some(v),
            _ => None,
        }
    }
}

fn le_u64_bytes(chunk: &[u8]) -> [u8; 8] {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(chunk);
    buf
}

impl From<Vec<i32>> for ColumnValues {
    fn from(v: Vec<i32>) -> Self {
        Self::Int32(v)
    }
}

impl From<Vec<i64>> for ColumnValues {
    fn from(v: Vec<i64>) -> Self {
        Self::Int64(v)
    }
}

impl From<Vec<f32>> for ColumnValues {
    fn from(v: Vec<f32>) -> Self {
        Self::Float32(v)
    }
}

impl From<Vec<f64>> for ColumnValues {
    fn from(v: Vec<f64>) -> Self {
        Self::Float64(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_each_kind() {
        let cases = vec![
            ColumnValues::Int32(vec![-1, 0, i32::MAX]),
            ColumnValues::Int64(vec![i64::MIN, 7]),
            ColumnValues::Float32(vec![1.5, -0.25]),
            ColumnValues::Float64(vec![std::f64::consts::PI, -1e300]),
            ColumnValues::Bytes {
                width: 3,
                data: b"abcdef".to_vec(),
            },
        ];
        for values in cases {
            let bytes = values.encode();
            assert_eq!(bytes.len(), values.len() * values.kind().byte_width());
            assert_eq!(ColumnValues::decode(values.kind(), &bytes).unwrap(), values);
        }
    }

    #[test]
    fn test_decode_rejects_partial_slot() {
        let err = ColumnValues::decode(ColumnKind::Int64, &[0u8; 12]).unwrap_err();
        assert!(matches!(err, StoreError::Corrupted(_)));
    }

    #[test]
    fn test_extend_checks_kind() {
        let mut values = ColumnValues::from(vec![1.0f64]);
        values.extend(ColumnValues::from(vec![2.0f64])).unwrap();
        assert_eq!(values.as_f64().unwrap(), &[1.0, 2.0]);

        let err = values.extend(ColumnValues::from(vec![3i64])).unwrap_err();
        assert!(matches!(err, StoreError::KindMismatch { .. }));
    }

    #[test]
    fn test_slice_bytes() {
        let values = ColumnValues::Bytes {
            width: 2,
            data: b"aabbcc".to_vec(),
        };
        let sliced = values.slice(1..3);
        let slots: Vec<&[u8]> = sliced.byte_slots().unwrap().collect();
        assert_eq!(slots, vec![b"bb".as_slice(), b"cc".as_slice()]);
    }
}
