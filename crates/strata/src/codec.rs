//! Fixed-width encodings for symbol and date tokens.
//!
//! Tokens are stored the way numpy stores `S<n>` strings: UTF-8 bytes padded
//! with NUL to exactly `n` bytes. Values that do not fit are rejected with
//! [`StoreError::ValueTooLong`]; nothing is ever truncated. Text containing a
//! NUL byte is rejected as well since the padding would swallow it.
//!
//! Dates are parsed with a chrono format and stored in their canonical
//! re-formatted form, so `decode_date(encode_date(s))` returns `s` whenever
//! `s` is already canonical for the format.

use crate::column::ColumnKind;
use crate::error::{Result, StoreError};
use chrono::format::{Item, StrftimeItems};
use chrono::{NaiveDate, NaiveDateTime};
use std::fmt::Write;

/// Parses a fixed-width specifier (`S10`, `|S10`, `a10`) into a byte width.
///
/// # Errors
///
/// Returns `StoreError::Config` for anything else, including zero widths.
pub fn parse_width(spec: &str) -> Result<u16> {
    let body = spec.strip_prefix('|').unwrap_or(spec);
    let digits = body
        .strip_prefix('S')
        .or_else(|| body.strip_prefix('a'))
        .ok_or_else(|| StoreError::Config(format!("unsupported width specifier {:?}", spec)))?;
    match digits.parse::<u16>() {
        Ok(width) if width > 0 => Ok(width),
        _ => Err(StoreError::Config(format!(
            "invalid width in specifier {:?}",
            spec
        ))),
    }
}

/// Checks that a chrono format string has no invalid specifiers.
pub fn validate_format(format: &str) -> Result<()> {
    if format.is_empty() || StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(StoreError::Config(format!(
            "invalid time format {:?}",
            format
        )));
    }
    Ok(())
}

/// Parses `text` with `format`, accepting date-only formats (midnight).
///
/// # Errors
///
/// Returns `StoreError::InvalidTimestamp` if the text does not match.
pub fn parse_timestamp(text: &str, format: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, format)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, format)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| StoreError::InvalidTimestamp {
            value: text.to_string(),
            format: format.to_string(),
        })
}

/// Formats `ts` with `format`.
pub fn format_timestamp(ts: &NaiveDateTime, format: &str) -> Result<String> {
    let mut out = String::new();
    write!(out, "{}", ts.format(format)).map_err(|_| {
        StoreError::Config(format!("invalid time format {:?}", format))
    })?;
    Ok(out)
}

/// Encoder/decoder for the symbol and date auxiliary columns.
///
/// # Examples
/// ```rust,ignore
/// use alopex_strata::codec::FixedWidthCodec;
///
/// let codec = FixedWidthCodec::from_specs("S20", "S10")?;
/// let bytes = codec.encode_symbol("600000.SH")?;
/// assert_eq!(codec.decode_symbol(&bytes)?, "600000.SH");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWidthCodec {
    symbol_width: u16,
    date_width: u16,
}

impl FixedWidthCodec {
    /// Creates a codec with explicit widths.
    pub fn new(symbol_width: u16, date_width: u16) -> Result<Self> {
        if symbol_width == 0 || date_width == 0 {
            return Err(StoreError::Config("codec widths must be positive".to_string()));
        }
        Ok(Self {
            symbol_width,
            date_width,
        })
    }

    /// Creates a codec from `symbol_dtype` / `date_dtype` specifiers.
    pub fn from_specs(symbol_dtype: &str, date_dtype: &str) -> Result<Self> {
        Self::new(parse_width(symbol_dtype)?, parse_width(date_dtype)?)
    }

    /// Returns the symbol width in bytes.
    pub fn symbol_width(&self) -> usize {
        self.symbol_width as usize
    }

    /// Returns the date width in bytes.
    pub fn date_width(&self) -> usize {
        self.date_width as usize
    }

    /// Column kind of the symbol auxiliary column.
    pub fn symbol_kind(&self) -> ColumnKind {
        ColumnKind::Bytes(self.symbol_width)
    }

    /// Column kind of the date auxiliary column.
    pub fn date_kind(&self) -> ColumnKind {
        ColumnKind::Bytes(self.date_width)
    }

    /// Encodes a symbol into exactly `symbol_width` bytes.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::ValueTooLong` if the UTF-8 encoding is wider than
    /// the configured width.
    pub fn encode_symbol(&self, text: &str) -> Result<Vec<u8>> {
        pad(text, self.symbol_width())
    }

    /// Decodes a symbol produced by [`Self::encode_symbol`].
    pub fn decode_symbol(&self, bytes: &[u8]) -> Result<String> {
        unpad(bytes, self.symbol_width())
    }

    /// Parses `text` with `format` and encodes its canonical form.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidTimestamp` if the text does not parse, or
    /// `StoreError::ValueTooLong` if the canonical form does not fit.
    pub fn encode_date(&self, text: &str, format: &str) -> Result<Vec<u8>> {
        let ts = parse_timestamp(text, format)?;
        self.encode_timestamp(&ts, format)
    }

    /// Decodes a date produced by [`Self::encode_date`] back to text.
    pub fn decode_date(&self, bytes: &[u8]) -> Result<String> {
        unpad(bytes, self.date_width())
    }

    /// Encodes a timestamp with `format`.
    pub fn encode_timestamp(&self, ts: &NaiveDateTime, format: &str) -> Result<Vec<u8>> {
        pad(&format_timestamp(ts, format)?, self.date_width())
    }

    /// Decodes a date slot into a timestamp.
    pub fn decode_timestamp(&self, bytes: &[u8], format: &str) -> Result<NaiveDateTime> {
        let text = self.decode_date(bytes)?;
        parse_timestamp(&text, format).map_err(|_| {
            StoreError::Corrupted(format!("date slot {:?} does not match {:?}", text, format))
        })
    }
}

fn pad(text: &str, width: usize) -> Result<Vec<u8>> {
    let bytes = text.as_bytes();
    if bytes.contains(&0) {
        return Err(StoreError::InvalidText(text.to_string()));
    }
    if bytes.len() > width {
        return Err(StoreError::ValueTooLong {
            len: bytes.len(),
            width,
        });
    }
    let mut out = Vec::with_capacity(width);
    out.extend_from_slice(bytes);
    out.resize(width, 0);
    Ok(out)
}

fn unpad(bytes: &[u8], width: usize) -> Result<String> {
    if bytes.len() != width {
        return Err(StoreError::Corrupted(format!(
            "slot is {} bytes, expected {}",
            bytes.len(),
            width
        )));
    }
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    String::from_utf8(bytes[..end].to_vec())
        .map_err(|e| StoreError::Corrupted(format!("invalid UTF-8 in slot: {}", e)))
}
