//! Timestamp to shard key routing.
//!
//! Shard keys are calendar windows: a year, a quarter or a month. They render
//! as `2018`, `2018Q1` and `201802` respectively, which is also the directory
//! name of the shard on disk.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

/// Calendar window used to split a field into shards.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Granularity {
    /// One shard per calendar year.
    #[default]
    Year,
    /// One shard per calendar quarter.
    Quarter,
    /// One shard per calendar month.
    Month,
}

impl Granularity {
    /// Number of shards per calendar year.
    pub fn periods_per_year(self) -> u32 {
        match self {
            Self::Year => 1,
            Self::Quarter => 4,
            Self::Month => 12,
        }
    }

    /// Period (1-based) containing the given month (1-12).
    fn period_of_month(self, month: u32) -> u32 {
        match self {
            Self::Year => 1,
            Self::Quarter => (month - 1) / 3 + 1,
            Self::Month => month,
        }
    }

    /// First month (1-12) of the given period.
    fn first_month(self, period: u32) -> u32 {
        match self {
            Self::Year => 1,
            Self::Quarter => (period - 1) * 3 + 1,
            Self::Month => period,
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Year => f.write_str("YEAR"),
            Self::Quarter => f.write_str("QUARTER"),
            Self::Month => f.write_str("MONTH"),
        }
    }
}

impl FromStr for Granularity {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "YEAR" => Ok(Self::Year),
            "QUARTER" => Ok(Self::Quarter),
            "MONTH" => Ok(Self::Month),
            _ => Err(StoreError::Config(format!(
                "unknown data_split_frequency {:?}",
                s
            ))),
        }
    }
}

/// Identifies the calendar window a timestamp belongs to.
///
/// Keys order chronologically within one granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardKey {
    year: i32,
    period: u32,
    granularity: Granularity,
}

impl ShardKey {
    /// Creates a key, returning `None` if `period` is out of range for the
    /// granularity or the window start is not a representable date.
    pub fn new(granularity: Granularity, year: i32, period: u32) -> Option<Self> {
        if period == 0 || period > granularity.periods_per_year() {
            return None;
        }
        NaiveDate::from_ymd_opt(year, granularity.first_month(period), 1)?;
        Some(Self {
            year,
            period,
            granularity,
        })
    }

    /// Returns the calendar year.
    pub fn year(&self) -> i32 {
        self.year
    }

    /// Returns the 1-based period within the year (always 1 for yearly keys).
    pub fn period(&self) -> u32 {
        self.period
    }

    /// Returns the granularity of the key.
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// First instant of the window.
    pub fn start(&self) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(self.year, self.granularity.first_month(self.period), 1)
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .unwrap_or(NaiveDateTime::MIN)
    }

    /// First instant after the window, or `None` past the calendar range.
    pub fn end(&self) -> Option<NaiveDateTime> {
        self.next().map(|next| next.start())
    }

    /// The following window.
    pub fn next(&self) -> Option<Self> {
        if self.period < self.granularity.periods_per_year() {
            Self::new(self.granularity, self.year, self.period + 1)
        } else {
            Self::new(self.granularity, self.year.checked_add(1)?, 1)
        }
    }

    /// Returns true if `ts` falls inside the window.
    pub fn contains(&self, ts: &NaiveDateTime) -> bool {
        shard_key(ts, self.granularity) == *self
    }

    /// Parses a key rendered by `Display`.
    pub fn parse(text: &str, granularity: Granularity) -> Option<Self> {
        let (year, period) = match granularity {
            Granularity::Year => (text, None),
            Granularity::Quarter => {
                let (year, quarter) = text.rsplit_once('Q')?;
                (year, Some(quarter))
            }
            Granularity::Month => {
                if text.len() < 3 || !text.is_char_boundary(text.len() - 2) {
                    return None;
                }
                let (year, month) = text.split_at(text.len() - 2);
                (year, Some(month))
            }
        };
        let year = year.parse::<i32>().ok()?;
        let period = match period {
            Some(p) if p.bytes().all(|b| b.is_ascii_digit()) => p.parse::<u32>().ok()?,
            Some(_) => return None,
            None => 1,
        };
        let key = Self::new(granularity, year, period)?;
        (key.to_string() == text).then_some(key)
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.granularity {
            Granularity::Year => write!(f, "{:04}", self.year),
            Granularity::Quarter => write!(f, "{:04}Q{}", self.year, self.period),
            Granularity::Month => write!(f, "{:04}{:02}", self.year, self.period),
        }
    }
}

/// Maps a timestamp to its shard key. Pure and total.
pub fn shard_key(ts: &NaiveDateTime, granularity: Granularity) -> ShardKey {
    ShardKey {
        year: ts.year(),
        period: granularity.period_of_month(ts.month()),
        granularity,
    }
}

/// Routes timestamps to shards with one fixed granularity.
///
/// # Examples
/// ```rust,ignore
/// use alopex_strata::shard::{Granularity, ShardRouter};
///
/// let router = ShardRouter::new(Granularity::Quarter);
/// let key = router.shard_key(&ts);
/// assert_eq!(key.to_string(), "2017Q1");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRouter {
    granularity: Granularity,
}

impl ShardRouter {
    /// Creates a router for the given granularity.
    pub fn new(granularity: Granularity) -> Self {
        Self { granularity }
    }

    /// Returns the granularity.
    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Maps a timestamp to its shard key.
    pub fn shard_key(&self, ts: &NaiveDateTime) -> ShardKey {
        shard_key(ts, self.granularity)
    }

    /// Lists every key from `start`'s shard to `end`'s shard, inclusive.
    pub fn keys_between(&self, start: &NaiveDateTime, end: &NaiveDateTime) -> Vec<ShardKey> {
        let last = self.shard_key(end);
        let mut current = Some(self.shard_key(start));
        let mut keys = Vec::new();
        while let Some(key) = current {
            if key > last {
                break;
            }
            keys.push(key);
            current = key.next();
        }
        keys
    }

    /// Lists the keys whose windows intersect the half-open range `[start, end)`.
    pub fn keys_overlapping(&self, start: &NaiveDateTime, end: &NaiveDateTime) -> Vec<ShardKey> {
        let mut current = Some(self.shard_key(start));
        let mut keys = Vec::new();
        while let Some(key) = current {
            if key.start() >= *end {
                break;
            }
            keys.push(key);
            current = key.next();
        }
        keys
    }

    /// Parses a shard directory name for this router's granularity.
    pub fn parse_key(&self, text: &str) -> Option<ShardKey> {
        ShardKey::parse(text, self.granularity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_quarter_keys() {
        let router = ShardRouter::new(Granularity::Quarter);
        let a = router.shard_key(&ts(2017, 2, 15));
        let b = router.shard_key(&ts(2017, 3, 20));
        let c = router.shard_key(&ts(2017, 4, 1));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "2017Q1");
        assert_eq!(c.to_string(), "2017Q2");
    }

    #[test]
    fn test_key_names() {
        let t = ts(2018, 2, 3);
        assert_eq!(shard_key(&t, Granularity::Year).to_string(), "2018");
        assert_eq!(shard_key(&t, Granularity::Quarter).to_string(), "2018Q1");
        assert_eq!(shard_key(&t, Granularity::Month).to_string(), "201802");
    }

    #[test]
    fn test_parse_roundtrip() {
        for granularity in [Granularity::Year, Granularity::Quarter, Granularity::Month] {
            for t in [ts(1999, 12, 31), ts(2018, 1, 1), ts(2020, 7, 15)] {
                let key = shard_key(&t, granularity);
                assert_eq!(ShardKey::parse(&key.to_string(), granularity), Some(key));
            }
        }
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert_eq!(ShardKey::parse("2018Q5", Granularity::Quarter), None);
        assert_eq!(ShardKey::parse("201813", Granularity::Month), None);
        assert_eq!(ShardKey::parse("2018Q1", Granularity::Month), None);
        assert_eq!(ShardKey::parse("values.col", Granularity::Year), None);
        assert_eq!(ShardKey::parse("02018", Granularity::Year), None);
    }

    #[test]
    fn test_window_bounds() {
        let key = shard_key(&ts(2017, 11, 5), Granularity::Quarter);
        assert_eq!(key.start(), ts(2017, 10, 1));
        assert_eq!(key.end(), Some(ts(2018, 1, 1)));
        assert!(key.contains(&ts(2017, 12, 31)));
        assert!(!key.contains(&ts(2018, 1, 1)));
    }

    #[test]
    fn test_keys_between() {
        let router = ShardRouter::new(Granularity::Quarter);
        let names: Vec<String> = router
            .keys_between(&ts(2018, 1, 1), &ts(2018, 4, 1))
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(names, vec!["2018Q1", "2018Q2"]);

        let keys = router.keys_between(&ts(2017, 1, 1), &ts(2018, 1, 1));
        assert_eq!(keys.len(), 5);

        let yearly = ShardRouter::new(Granularity::Year);
        assert_eq!(yearly.keys_between(&ts(2015, 6, 1), &ts(2017, 1, 1)).len(), 3);
    }

    #[test]
    fn test_keys_overlapping_half_open() {
        let router = ShardRouter::new(Granularity::Month);
        let keys = router.keys_overlapping(&ts(2018, 1, 15), &ts(2018, 3, 1));
        let names: Vec<String> = keys.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["201801", "201802"]);
    }

    #[test]
    fn test_granularity_from_str() {
        assert_eq!("QUARTER".parse::<Granularity>().unwrap(), Granularity::Quarter);
        assert_eq!("month".parse::<Granularity>().unwrap(), Granularity::Month);
        assert!("WEEK".parse::<Granularity>().is_err());
    }
}
