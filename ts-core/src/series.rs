use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Append-ordered value history addressed by lookback offset.
///
/// `get(0)` is always the most recently appended value ("this bar"), `get(1)`
/// the one before it, and so on. When a capacity is set, the oldest values
/// scroll out and buffer positions stop matching offsets; callers must only
/// ever address values by offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series<T> {
    values: VecDeque<T>,
    capacity: Option<usize>,
    appended: usize,
}

impl<T> Default for Series<T> {
    fn default() -> Self {
        Self {
            values: VecDeque::new(),
            capacity: None,
            appended: 0,
        }
    }
}

impl<T> Series<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Series that keeps at most `capacity` values (minimum 1).
    pub fn bounded(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity.max(1)),
            capacity: Some(capacity.max(1)),
            appended: 0,
        }
    }

    pub fn from_values<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut series = Self::new();
        for v in iter {
            series.push(v);
        }
        series
    }

    /// Append a value; it becomes offset 0.
    pub fn push(&mut self, value: T) {
        self.values.push_back(value);
        self.appended += 1;
        if let Some(cap) = self.capacity {
            while self.values.len() > cap {
                self.values.pop_front();
            }
        }
    }

    /// Value `offset` bars before the most recent one.
    pub fn get(&self, offset: usize) -> Option<&T> {
        let len = self.values.len();
        if offset >= len {
            return None;
        }
        self.values.get(len - 1 - offset)
    }

    pub fn current(&self) -> Option<&T> {
        self.values.back()
    }

    /// Overwrite the value at `offset`. Returns false when out of range.
    pub fn set(&mut self, offset: usize, value: T) -> bool {
        let len = self.values.len();
        if offset >= len {
            return false;
        }
        self.values[len - 1 - offset] = value;
        true
    }

    /// Number of retained values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of values ever appended, including scrolled-out ones.
    pub fn appended(&self) -> usize {
        self.appended
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Iterate from the most recent value backwards.
    pub fn iter_recent(&self) -> impl Iterator<Item = &T> {
        self.values.iter().rev()
    }

    /// Read-only view whose offsets are shifted by `offset`.
    pub fn view(&self, offset: usize) -> SeriesRef<'_, T> {
        SeriesRef {
            series: self,
            offset,
        }
    }
}

impl Series<f64> {
    /// Numeric lookback; missing history reads as NaN.
    pub fn at(&self, offset: usize) -> f64 {
        self.get(offset).copied().unwrap_or(f64::NAN)
    }
}

/// Borrowed series handle with a fixed lookback offset, e.g. `close[1]`
/// passed on to a consumer that itself reads `get(0)`, `get(1)`, ...
#[derive(Debug, Clone, Copy)]
pub struct SeriesRef<'a, T> {
    series: &'a Series<T>,
    offset: usize,
}

impl<'a, T> SeriesRef<'a, T> {
    pub fn get(&self, n: usize) -> Option<&'a T> {
        self.series.get(n.saturating_add(self.offset))
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Values reachable through this view.
    pub fn len(&self) -> usize {
        self.series.len().saturating_sub(self.offset)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SeriesRef<'_, f64> {
    pub fn at(&self, n: usize) -> f64 {
        self.get(n).copied().unwrap_or(f64::NAN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookback_counts_back_from_latest() {
        let s = Series::from_values([10.0, 20.0, 30.0]);
        assert_eq!(s.at(0), 30.0);
        assert_eq!(s.at(1), 20.0);
        assert_eq!(s.at(2), 10.0);
        assert!(s.at(3).is_nan());
    }

    #[test]
    fn set_overwrites_current_only() {
        let mut s = Series::from_values([1.0, 2.0]);
        assert!(s.set(0, 5.0));
        assert_eq!(s.at(0), 5.0);
        assert_eq!(s.at(1), 1.0);
        assert!(!s.set(2, 9.0));
    }

    #[test]
    fn bounded_series_scrolls_but_offsets_hold() {
        let mut s = Series::bounded(2);
        for v in [1.0, 2.0, 3.0, 4.0] {
            s.push(v);
        }
        assert_eq!(s.len(), 2);
        assert_eq!(s.appended(), 4);
        assert_eq!(s.at(0), 4.0);
        assert_eq!(s.at(1), 3.0);
        assert!(s.at(2).is_nan());
    }

    #[test]
    fn view_shifts_offsets() {
        let s = Series::from_values([1.0, 2.0, 3.0]);
        let prev = s.view(1);
        assert_eq!(prev.at(0), 2.0);
        assert_eq!(prev.at(1), 1.0);
        assert!(prev.at(2).is_nan());
        assert!(s.view(usize::MAX).at(1).is_nan());
    }
}
