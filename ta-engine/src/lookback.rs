use ts_core::{Series, SeriesRef};

use crate::period_of;
use crate::precision::precision;

/// Read access to an argument's history, most recent first.
pub trait Lookback {
    /// Value `offset` bars back; NaN when unavailable.
    fn at(&self, offset: usize) -> f64;

    /// Number of bars that can be read, the current one included.
    fn depth(&self) -> usize;
}

/// A bare number behaves as a constant series.
impl Lookback for f64 {
    fn at(&self, _offset: usize) -> f64 {
        *self
    }

    fn depth(&self) -> usize {
        usize::MAX
    }
}

impl Lookback for Series<f64> {
    fn at(&self, offset: usize) -> f64 {
        Series::at(self, offset)
    }

    fn depth(&self) -> usize {
        self.len()
    }
}

impl Lookback for SeriesRef<'_, f64> {
    fn at(&self, offset: usize) -> f64 {
        SeriesRef::at(self, offset)
    }

    fn depth(&self) -> usize {
        self.len()
    }
}

fn window(src: &dyn Lookback, length: f64) -> Option<usize> {
    period_of(length).filter(|p| src.depth() >= *p)
}

/// `src - src[length]`.
pub fn change(src: &dyn Lookback, length: f64) -> f64 {
    let Some(n) = period_of(length) else {
        return f64::NAN;
    };
    precision(src.at(0) - src.at(n))
}

pub fn mom(src: &dyn Lookback, length: f64) -> f64 {
    change(src, length)
}

fn extreme(src: &dyn Lookback, length: f64, pick: fn(f64, f64) -> f64) -> f64 {
    let Some(n) = window(src, length) else {
        return f64::NAN;
    };
    (0..n)
        .map(|i| src.at(i))
        .filter(|v| !v.is_nan())
        .reduce(pick)
        .unwrap_or(f64::NAN)
}

pub fn highest(src: &dyn Lookback, length: f64) -> f64 {
    precision(extreme(src, length, f64::max))
}

pub fn lowest(src: &dyn Lookback, length: f64) -> f64 {
    precision(extreme(src, length, f64::min))
}

/// Linearly weighted average, newest value weighted `length`.
pub fn wma(src: &dyn Lookback, length: f64) -> f64 {
    let Some(n) = window(src, length) else {
        return f64::NAN;
    };
    let mut total = 0.0;
    for i in 0..n {
        let v = src.at(i);
        if v.is_nan() {
            return f64::NAN;
        }
        total += v * (n - i) as f64;
    }
    let norm = (n * (n + 1)) as f64 / 2.0;
    precision(total / norm)
}

/// Stochastic %K of `src` within the `length`-bar high/low range.
pub fn stoch(src: &dyn Lookback, high: &dyn Lookback, low: &dyn Lookback, length: f64) -> f64 {
    let hh = extreme(high, length, f64::max);
    let ll = extreme(low, length, f64::min);
    let span = hh - ll;
    if span.is_nan() || span == 0.0 {
        return f64::NAN;
    }
    precision(100.0 * (src.at(0) - ll) / span)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_and_highest_read_history() {
        let s = Series::from_values([1.0, 4.0, 2.0, 3.0]);
        assert_eq!(change(&s, 1.0), 1.0);
        assert_eq!(mom(&s, 3.0), 2.0);
        assert_eq!(highest(&s, 3.0), 4.0);
        assert_eq!(lowest(&s, 2.0), 2.0);
        assert!(highest(&s, 5.0).is_nan());
        assert!(change(&s, 4.0).is_nan());
    }

    #[test]
    fn wma_weights_recent_values_more() {
        let s = Series::from_values([1.0, 2.0, 3.0]);
        // (3*3 + 2*2 + 1*1) / 6
        assert_eq!(wma(&s, 3.0), precision(14.0 / 6.0));
        assert!(wma(&s, 0.0).is_nan());
    }

    #[test]
    fn constants_act_as_flat_series() {
        assert_eq!(highest(&5.0, 10.0), 5.0);
        assert_eq!(change(&5.0, 1.0), 0.0);
    }

    #[test]
    fn stoch_scales_into_range() {
        let close = Series::from_values([1.0, 2.0, 3.0]);
        let high = Series::from_values([2.0, 3.0, 4.0]);
        let low = Series::from_values([0.0, 1.0, 2.0]);
        assert_eq!(stoch(&close, &high, &low, 3.0), 75.0);
    }

    #[test]
    fn offset_view_shifts_history() {
        let s = Series::from_values([1.0, 2.0, 3.0]);
        let prev = s.view(1);
        assert_eq!(highest(&prev, 2.0), 2.0);
        assert!(highest(&prev, 3.0).is_nan());
    }
}
