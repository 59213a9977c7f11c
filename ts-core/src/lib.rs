use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

pub mod series;

pub use series::{Series, SeriesRef};

/// Milliseconds since Unix epoch.
pub type Timestamp = i64;

/// Number of milliseconds in common units.
pub const MS: i64 = 1_000;
pub const MINUTE_MS: i64 = 60 * MS;
pub const HOUR_MS: i64 = 60 * MINUTE_MS;
pub const DAY_MS: i64 = 24 * HOUR_MS;

/// Bar interval. Hours are expressed as minute counts ("60", "240").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeFrame {
    Seconds(u32),
    Minutes(u32),
    Days(u32),
    Weeks(u32),
    Months(u32),
}

impl TimeFrame {
    /// Parse a timeframe string.
    ///
    /// Accepts bare minute counts ("1", "15", "240"), `S`/`D`/`W`/`M` suffix
    /// forms with an optional count ("30S", "D", "1D", "W", "3M"), and the
    /// lowercase shorthand "5m", "1h", "4h", "1d", "1w".
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(s.len());
        let (digits, unit) = s.split_at(split);
        let count: u32 = if digits.is_empty() {
            if unit.is_empty() {
                return None;
            }
            1
        } else {
            digits.parse().ok()?
        };
        if count == 0 {
            return None;
        }
        match unit {
            "" | "m" => Some(TimeFrame::Minutes(count)),
            "S" | "s" => Some(TimeFrame::Seconds(count)),
            "h" | "H" => Some(TimeFrame::Minutes(count.checked_mul(60)?)),
            "D" | "d" => Some(TimeFrame::Days(count)),
            "W" | "w" => Some(TimeFrame::Weeks(count)),
            "M" | "mo" => Some(TimeFrame::Months(count)),
            _ => None,
        }
    }
}

/// Canonical form ("15", "1D", "1W", "1M", "30S"), parseable again.
impl fmt::Display for TimeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            TimeFrame::Seconds(s) => write!(f, "{s}S"),
            TimeFrame::Minutes(m) => write!(f, "{m}"),
            TimeFrame::Days(d) => write!(f, "{d}D"),
            TimeFrame::Weeks(w) => write!(f, "{w}W"),
            TimeFrame::Months(m) => write!(f, "{m}M"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTimeFrameError(pub String);

impl fmt::Display for ParseTimeFrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unsupported timeframe: {}", self.0)
    }
}

impl std::error::Error for ParseTimeFrameError {}

impl FromStr for TimeFrame {
    type Err = ParseTimeFrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TimeFrame::parse(s).ok_or_else(|| ParseTimeFrameError(s.to_string()))
    }
}

/// One OHLCV record. Times come from the data provider and are never
/// computed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open_time: Timestamp,
    pub close_time: Timestamp,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn hl2(&self) -> f64 {
        (self.high + self.low) / 2.0
    }

    pub fn hlc3(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    pub fn ohlc4(&self) -> f64 {
        (self.open + self.high + self.low + self.close) / 4.0
    }
}

pub trait HasTimestamp {
    fn ts(&self) -> Timestamp;
}

impl HasTimestamp for Bar {
    fn ts(&self) -> Timestamp {
        self.open_time
    }
}

/// Append-only time-ordered table with binary-searchable timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries<T> {
    data: Vec<T>,
}

impl<T> Default for TimeSeries<T> {
    fn default() -> Self {
        Self { data: Vec::new() }
    }
}

impl<T: HasTimestamp> TimeSeries<T> {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn first(&self) -> Option<&T> {
        self.data.first()
    }

    pub fn last(&self) -> Option<&T> {
        self.data.last()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.data.get(index)
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Append a sample strictly newer than the last one. Returns false (and
    /// leaves the table untouched) for out-of-order samples.
    pub fn push_ordered(&mut self, sample: T) -> bool {
        if let Some(last) = self.data.last() {
            if sample.ts() <= last.ts() {
                return false;
            }
        }
        self.data.push(sample);
        true
    }

    /// Replace the trailing sample when it carries the same timestamp.
    pub fn replace_last(&mut self, sample: T) -> bool {
        match self.data.last_mut() {
            Some(last) if last.ts() == sample.ts() => {
                *last = sample;
                true
            }
            _ => false,
        }
    }

    /// Samples whose timestamps fall in `[start, end]`; a missing bound is
    /// open.
    pub fn range(&self, start: Option<Timestamp>, end: Option<Timestamp>) -> &[T] {
        let start_idx = start.map_or(0, |ts| self.lower_bound(ts));
        let end_idx = end
            .map_or(self.data.len(), |ts| self.lower_bound(ts.saturating_add(1)))
            .max(start_idx);
        &self.data[start_idx..end_idx]
    }

    fn lower_bound(&self, ts: Timestamp) -> usize {
        let mut left = 0usize;
        let mut right = self.data.len();
        while left < right {
            let mid = (left + right) / 2;
            match self.data[mid].ts().cmp(&ts) {
                Ordering::Less => left = mid + 1,
                Ordering::Equal | Ordering::Greater => right = mid,
            }
        }
        left
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_bar(i: i64, close: f64) -> Bar {
        Bar {
            open_time: i * MINUTE_MS,
            close_time: (i + 1) * MINUTE_MS - 1,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn timeframe_parses_minute_counts_and_suffixes() {
        assert_eq!(TimeFrame::parse("1"), Some(TimeFrame::Minutes(1)));
        assert_eq!(TimeFrame::parse("240"), Some(TimeFrame::Minutes(240)));
        assert_eq!(TimeFrame::parse("D"), Some(TimeFrame::Days(1)));
        assert_eq!(TimeFrame::parse("1W"), Some(TimeFrame::Weeks(1)));
        assert_eq!(TimeFrame::parse("3M"), Some(TimeFrame::Months(3)));
        assert_eq!(TimeFrame::parse("30S"), Some(TimeFrame::Seconds(30)));
        assert_eq!(TimeFrame::parse("4h"), Some(TimeFrame::Minutes(240)));
        assert_eq!(TimeFrame::parse(""), None);
        assert_eq!(TimeFrame::parse("0"), None);
        assert_eq!(TimeFrame::parse("5X"), None);
        assert!("bogus".parse::<TimeFrame>().is_err());
    }

    #[test]
    fn timeframe_display_is_canonical() {
        assert_eq!(TimeFrame::Minutes(15).to_string(), "15");
        assert_eq!(TimeFrame::Days(1).to_string(), "1D");
        assert_eq!(TimeFrame::Weeks(2).to_string().parse(), Ok(TimeFrame::Weeks(2)));
    }

    #[test]
    fn bar_table_rejects_out_of_order_and_replaces_last() {
        let mut table = TimeSeries::new();
        assert!(table.push_ordered(mk_bar(0, 1.0)));
        assert!(table.push_ordered(mk_bar(1, 2.0)));
        assert!(!table.push_ordered(mk_bar(1, 3.0)));
        assert!(table.replace_last(mk_bar(1, 3.0)));
        assert_eq!(table.last().map(|b| b.close), Some(3.0));
        assert!(!table.replace_last(mk_bar(5, 1.0)));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn range_slices_by_open_time() {
        let mut table = TimeSeries::new();
        for i in 0..10 {
            table.push_ordered(mk_bar(i, i as f64));
        }
        let slice = table.range(Some(2 * MINUTE_MS), Some(5 * MINUTE_MS));
        assert_eq!(slice.iter().map(|b| b.close).collect::<Vec<_>>(), vec![2.0, 3.0, 4.0, 5.0]);
        assert_eq!(table.range(None, Some(MINUTE_MS)).len(), 2);
        assert_eq!(table.range(Some(8 * MINUTE_MS + 1), None).len(), 1);
        assert!(table.range(Some(5 * MINUTE_MS), Some(2 * MINUTE_MS)).is_empty());
    }
}
