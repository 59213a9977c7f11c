use serde::{Deserialize, Serialize};

use crate::average::{ema_alpha, rma_alpha, EmaState};
use crate::precision::precision;
use crate::state::StateRegistry;
use crate::{period_of, TaError};

// ---------- rsi --------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RsiState {
    pub prev: Option<f64>,
    pub gains: EmaState,
    pub losses: EmaState,
}

impl RsiState {
    pub fn next(&self, value: f64, period: usize) -> (RsiState, f64) {
        if value.is_nan() {
            return (self.clone(), f64::NAN);
        }
        let Some(prev) = self.prev else {
            let next = RsiState {
                prev: Some(value),
                ..self.clone()
            };
            return (next, f64::NAN);
        };
        let delta = value - prev;
        let alpha = rma_alpha(period);
        let (gains, up) = self.gains.next(delta.max(0.0), period, alpha);
        let (losses, down) = self.losses.next((-delta).max(0.0), period, alpha);
        let rsi = if up.is_nan() || down.is_nan() {
            f64::NAN
        } else if down == 0.0 {
            100.0
        } else if up == 0.0 {
            0.0
        } else {
            100.0 - 100.0 / (1.0 + up / down)
        };
        let next = RsiState {
            prev: Some(value),
            gains,
            losses,
        };
        (next, rsi)
    }
}

pub fn rsi(
    states: &mut StateRegistry,
    key: &str,
    bar: usize,
    value: f64,
    length: f64,
) -> Result<f64, TaError> {
    let Some(period) = period_of(length) else {
        return Ok(f64::NAN);
    };
    let record = states.record::<RsiState>(key)?;
    let out = record.step(bar, |s| s.next(value, period));
    Ok(precision(out))
}

// ---------- macd -------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MacdState {
    pub fast: EmaState,
    pub slow: EmaState,
    pub signal: EmaState,
}

impl MacdState {
    pub fn next(&self, value: f64, fast: usize, slow: usize, signal: usize) -> (MacdState, [f64; 3]) {
        if value.is_nan() {
            return (self.clone(), [f64::NAN; 3]);
        }
        let (fast_state, f) = self.fast.next(value, fast, ema_alpha(fast));
        let (slow_state, s) = self.slow.next(value, slow, ema_alpha(slow));
        let line = f - s;
        let (signal_state, sig) = self.signal.next(line, signal, ema_alpha(signal));
        let next = MacdState {
            fast: fast_state,
            slow: slow_state,
            signal: signal_state,
        };
        (next, [line, sig, line - sig])
    }
}

/// `[macd, signal, histogram]`.
pub fn macd(
    states: &mut StateRegistry,
    key: &str,
    bar: usize,
    value: f64,
    fast: f64,
    slow: f64,
    signal: f64,
) -> Result<[f64; 3], TaError> {
    let (Some(fast), Some(slow), Some(signal)) = (period_of(fast), period_of(slow), period_of(signal))
    else {
        return Ok([f64::NAN; 3]);
    };
    let record = states.record::<MacdState>(key)?;
    let out = record.step(bar, |s| s.next(value, fast, slow, signal));
    Ok(out.map(precision))
}

// ---------- crosses ----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrossKind {
    Over,
    Under,
    Either,
}

/// Previous `(a, b)` pair of one cross call site; empty after a NaN input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrossState {
    pub prev: Option<(f64, f64)>,
}

impl CrossState {
    pub fn next(&self, a: f64, b: f64, kind: CrossKind) -> (CrossState, bool) {
        let crossed = match self.prev {
            Some((pa, pb)) => {
                let over = a > b && pa <= pb;
                let under = a < b && pa >= pb;
                match kind {
                    CrossKind::Over => over,
                    CrossKind::Under => under,
                    CrossKind::Either => over || under,
                }
            }
            None => false,
        };
        let prev = (!a.is_nan() && !b.is_nan()).then_some((a, b));
        (CrossState { prev }, crossed)
    }
}

pub fn cross(
    states: &mut StateRegistry,
    key: &str,
    bar: usize,
    a: f64,
    b: f64,
    kind: CrossKind,
) -> Result<bool, TaError> {
    let record = states.record::<CrossState>(key)?;
    Ok(record.step(bar, |s| s.next(a, b, kind)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsi_balances_equal_gains_and_losses() {
        let mut states = StateRegistry::new();
        let out: Vec<f64> = [1.0, 2.0, 1.0, 2.0]
            .iter()
            .enumerate()
            .map(|(i, v)| rsi(&mut states, "ta.rsi#0", i, *v, 2.0).unwrap())
            .collect();
        assert!(out[0].is_nan() && out[1].is_nan());
        assert_eq!(out[2], 50.0);
        // avg gain 0.75, avg loss 0.25
        assert_eq!(out[3], 75.0);
    }

    #[test]
    fn rsi_is_100_without_losses() {
        let mut states = StateRegistry::new();
        let mut last = f64::NAN;
        for (i, v) in [1.0, 2.0, 3.0, 4.0].iter().enumerate() {
            last = rsi(&mut states, "r", i, *v, 2.0).unwrap();
        }
        assert_eq!(last, 100.0);
    }

    #[test]
    fn macd_line_is_fast_minus_slow() {
        let mut states = StateRegistry::new();
        let mut last = [f64::NAN; 3];
        for i in 0..10 {
            last = macd(&mut states, "ta.macd#0", i, 5.0, 2.0, 4.0, 2.0).unwrap();
        }
        assert_eq!(last, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn crossover_needs_previous_pair() {
        let mut states = StateRegistry::new();
        assert!(!cross(&mut states, "c", 0, 2.0, 1.0, CrossKind::Over).unwrap());
        assert!(!cross(&mut states, "c", 1, 0.5, 1.0, CrossKind::Over).unwrap());
        assert!(cross(&mut states, "c", 2, 1.5, 1.0, CrossKind::Over).unwrap());
        // re-tick of bar 2 compares against bar 1 again
        assert!(!cross(&mut states, "c", 2, 0.8, 1.0, CrossKind::Over).unwrap());
        assert!(cross(&mut states, "c", 2, 1.2, 1.0, CrossKind::Either).unwrap());
    }
}
