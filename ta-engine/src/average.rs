use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::precision::precision;
use crate::state::StateRegistry;
use crate::{period_of, TaError};

// ---------- exponential smoothing (ema / rma) --------------------------------

/// Committed half of an EMA/RMA call site: previous average plus the SMA seed
/// accumulated while warming up.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmaState {
    pub average: Option<f64>,
    pub warm_sum: f64,
    pub warm_count: usize,
}

impl EmaState {
    /// Pure step from this state. NaN input leaves the state as is.
    pub fn next(&self, value: f64, period: usize, alpha: f64) -> (EmaState, f64) {
        if value.is_nan() {
            return (self.clone(), f64::NAN);
        }
        match self.average {
            Some(prev) => {
                let avg = alpha * value + (1.0 - alpha) * prev;
                let next = EmaState {
                    average: Some(avg),
                    ..self.clone()
                };
                (next, avg)
            }
            None => {
                let warm_sum = self.warm_sum + value;
                let warm_count = self.warm_count + 1;
                if warm_count >= period {
                    let avg = warm_sum / period as f64;
                    let next = EmaState {
                        average: Some(avg),
                        warm_sum,
                        warm_count,
                    };
                    (next, avg)
                } else {
                    let next = EmaState {
                        average: None,
                        warm_sum,
                        warm_count,
                    };
                    (next, f64::NAN)
                }
            }
        }
    }

    /// Current value without advancing.
    pub fn value(&self) -> f64 {
        self.average.unwrap_or(f64::NAN)
    }
}

pub fn ema_alpha(period: usize) -> f64 {
    2.0 / (period as f64 + 1.0)
}

pub fn rma_alpha(period: usize) -> f64 {
    1.0 / period as f64
}

pub fn ema(
    states: &mut StateRegistry,
    key: &str,
    bar: usize,
    value: f64,
    length: f64,
) -> Result<f64, TaError> {
    let Some(period) = period_of(length) else {
        return Ok(f64::NAN);
    };
    let record = states.record::<EmaState>(key)?;
    let out = record.step(bar, |s| s.next(value, period, ema_alpha(period)));
    Ok(precision(out))
}

pub fn rma(
    states: &mut StateRegistry,
    key: &str,
    bar: usize,
    value: f64,
    length: f64,
) -> Result<f64, TaError> {
    let Some(period) = period_of(length) else {
        return Ok(f64::NAN);
    };
    let record = states.record::<EmaState>(key)?;
    let out = record.step(bar, |s| s.next(value, period, rma_alpha(period)));
    Ok(precision(out))
}

// ---------- rolling window (sma / stdev / variance / bb / sum) ---------------

/// Most-recent-first window capped at the period, with a running sum.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowState {
    pub window: VecDeque<f64>,
    pub sum: f64,
}

impl WindowState {
    /// Insert `value` at the front and evict from the back until the window
    /// fits `period`.
    pub fn next(&self, value: f64, period: usize) -> WindowState {
        let mut next = self.clone();
        next.window.push_front(value);
        next.sum += value;
        while next.window.len() > period {
            if let Some(old) = next.window.pop_back() {
                next.sum -= old;
            }
        }
        next
    }

    pub fn is_full(&self, period: usize) -> bool {
        self.window.len() >= period
    }

    pub fn mean(&self) -> f64 {
        if self.window.is_empty() {
            return f64::NAN;
        }
        self.sum / self.window.len() as f64
    }

    /// Population (biased) variance over the window.
    pub fn variance(&self) -> f64 {
        if self.window.is_empty() {
            return f64::NAN;
        }
        let mean = self.mean();
        let sq: f64 = self.window.iter().map(|v| (v - mean) * (v - mean)).sum();
        sq / self.window.len() as f64
    }
}

/// Shared window stepping; `reduce` runs once the window is full.
fn windowed(
    states: &mut StateRegistry,
    key: &str,
    bar: usize,
    value: f64,
    length: f64,
    reduce: impl FnOnce(&WindowState) -> f64,
) -> Result<f64, TaError> {
    let Some(period) = period_of(length) else {
        return Ok(f64::NAN);
    };
    let record = states.record::<WindowState>(key)?;
    let out = record.step(bar, |s| {
        if value.is_nan() {
            return (s.clone(), f64::NAN);
        }
        let next = s.next(value, period);
        let out = if next.is_full(period) {
            reduce(&next)
        } else {
            f64::NAN
        };
        (next, out)
    });
    Ok(precision(out))
}

pub fn sma(
    states: &mut StateRegistry,
    key: &str,
    bar: usize,
    value: f64,
    length: f64,
) -> Result<f64, TaError> {
    windowed(states, key, bar, value, length, WindowState::mean)
}

pub fn variance(
    states: &mut StateRegistry,
    key: &str,
    bar: usize,
    value: f64,
    length: f64,
) -> Result<f64, TaError> {
    windowed(states, key, bar, value, length, WindowState::variance)
}

pub fn stdev(
    states: &mut StateRegistry,
    key: &str,
    bar: usize,
    value: f64,
    length: f64,
) -> Result<f64, TaError> {
    windowed(states, key, bar, value, length, |w| w.variance().sqrt())
}

/// Rolling sum over `length` values.
pub fn sum(
    states: &mut StateRegistry,
    key: &str,
    bar: usize,
    value: f64,
    length: f64,
) -> Result<f64, TaError> {
    windowed(states, key, bar, value, length, |w| w.sum)
}

/// Bollinger bands: `[basis, upper, lower]`.
pub fn bb(
    states: &mut StateRegistry,
    key: &str,
    bar: usize,
    value: f64,
    length: f64,
    mult: f64,
) -> Result<[f64; 3], TaError> {
    let nan = [f64::NAN; 3];
    let Some(period) = period_of(length) else {
        return Ok(nan);
    };
    let record = states.record::<WindowState>(key)?;
    let out = record.step(bar, |s| {
        if value.is_nan() {
            return (s.clone(), nan);
        }
        let next = s.next(value, period);
        if !next.is_full(period) {
            return (next, nan);
        }
        let basis = next.mean();
        let dev = mult * next.variance().sqrt();
        (next, [basis, basis + dev, basis - dev])
    });
    Ok(out.map(precision))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_sma(values: &[f64], length: f64) -> Vec<f64> {
        let mut states = StateRegistry::new();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| sma(&mut states, "ta.sma#0", i, *v, length).unwrap())
            .collect()
    }

    #[test]
    fn sma_matches_golden_output() {
        let out = run_sma(&[1.0, 2.0, 3.0, 4.0, 5.0], 3.0);
        assert!(out[0].is_nan());
        assert!(out[1].is_nan());
        assert_eq!(&out[2..], &[2.0, 3.0, 4.0]);
    }

    #[test]
    fn ema_seeds_with_sma_then_smooths() {
        let mut states = StateRegistry::new();
        let out: Vec<f64> = [1.0, 2.0, 3.0, 4.0]
            .iter()
            .enumerate()
            .map(|(i, v)| ema(&mut states, "ta.ema#0", i, *v, 3.0).unwrap())
            .collect();
        assert!(out[0].is_nan() && out[1].is_nan());
        assert_eq!(out[2], 2.0);
        assert_eq!(out[3], 3.0);
    }

    #[test]
    fn rma_uses_wilder_alpha() {
        let mut states = StateRegistry::new();
        for (i, v) in [2.0, 4.0].iter().enumerate() {
            rma(&mut states, "ta.rma#0", i, *v, 2.0).unwrap();
        }
        // seed 3.0, then 0.5 * 5 + 0.5 * 3
        let v = rma(&mut states, "ta.rma#0", 2, 5.0, 2.0).unwrap();
        assert_eq!(v, 4.0);
    }

    #[test]
    fn retick_recomputes_from_committed_state() {
        let mut states = StateRegistry::new();
        for (i, v) in [1.0, 2.0, 3.0].iter().enumerate() {
            ema(&mut states, "k", i, *v, 3.0).unwrap();
        }
        let first = ema(&mut states, "k", 3, 100.0, 3.0).unwrap();
        let _ = ema(&mut states, "k", 3, 7.0, 3.0).unwrap();
        let settled = ema(&mut states, "k", 3, 4.0, 3.0).unwrap();
        assert_eq!(settled, 3.0);
        assert_eq!(first, 51.0);
        let next = ema(&mut states, "k", 4, 3.0, 3.0).unwrap();
        assert_eq!(next, 3.0);
    }

    #[test]
    fn nan_input_does_not_advance_window() {
        let mut states = StateRegistry::new();
        sma(&mut states, "k", 0, 1.0, 2.0).unwrap();
        assert!(sma(&mut states, "k", 1, f64::NAN, 2.0).unwrap().is_nan());
        assert_eq!(sma(&mut states, "k", 2, 3.0, 2.0).unwrap(), 2.0);
    }

    #[test]
    fn non_positive_period_yields_nan() {
        let mut states = StateRegistry::new();
        assert!(sma(&mut states, "k", 0, 1.0, 0.0).unwrap().is_nan());
        assert!(ema(&mut states, "e", 0, 1.0, -3.0).unwrap().is_nan());
        assert!(states.is_empty());
    }

    #[test]
    fn bb_bands_are_symmetric_around_basis() {
        let mut states = StateRegistry::new();
        let mut last = [f64::NAN; 3];
        for (i, v) in [1.0, 2.0, 3.0].iter().enumerate() {
            last = bb(&mut states, "ta.bb#0", i, *v, 3.0, 2.0).unwrap();
        }
        assert_eq!(last[0], 2.0);
        assert!((last[1] - last[0] - (last[0] - last[2])).abs() < 1e-9);
        let stdev_val = stdev(&mut StateRegistry::new(), "s", 0, 1.0, 1.0).unwrap();
        assert_eq!(stdev_val, 0.0);
    }
}
