use serde::{Deserialize, Serialize};
use ts_core::Bar;

use crate::average::{rma_alpha, EmaState};
use crate::precision::precision;
use crate::state::StateRegistry;
use crate::{period_of, TaError};

/// True range of `bar` against the previous close. Without a previous close
/// the result is `high - low` when `handle_na` is set, NaN otherwise.
pub fn true_range(bar: &Bar, prev_close: Option<f64>, handle_na: bool) -> f64 {
    match prev_close {
        Some(pc) if !pc.is_nan() => {
            let hl = bar.high - bar.low;
            let hc = (bar.high - pc).abs();
            let lc = (bar.low - pc).abs();
            hl.max(hc).max(lc)
        }
        _ if handle_na => bar.high - bar.low,
        _ => f64::NAN,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrState {
    pub prev_close: Option<f64>,
}

pub fn tr(
    states: &mut StateRegistry,
    key: &str,
    bar_index: usize,
    bar: &Bar,
    handle_na: bool,
) -> Result<f64, TaError> {
    let record = states.record::<TrState>(key)?;
    let out = record.step(bar_index, |s| {
        let out = true_range(bar, s.prev_close, handle_na);
        let next = TrState {
            prev_close: Some(bar.close),
        };
        (next, out)
    });
    Ok(precision(out))
}

/// Wilder-smoothed true range.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AtrState {
    pub prev_close: Option<f64>,
    pub smoothing: EmaState,
}

impl AtrState {
    /// Pure step; `value` of the returned pair is unrounded.
    pub fn next(&self, bar: &Bar, period: usize) -> (AtrState, f64) {
        let range = true_range(bar, self.prev_close, true);
        let (smoothing, out) = self.smoothing.next(range, period, rma_alpha(period));
        let next = AtrState {
            prev_close: Some(bar.close),
            smoothing,
        };
        (next, out)
    }
}

pub fn atr(
    states: &mut StateRegistry,
    key: &str,
    bar_index: usize,
    bar: &Bar,
    length: f64,
) -> Result<f64, TaError> {
    let Some(period) = period_of(length) else {
        return Ok(f64::NAN);
    };
    let record = states.record::<AtrState>(key)?;
    let out = record.step(bar_index, |s| s.next(bar, period));
    Ok(precision(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(high: f64, low: f64, close: f64) -> Bar {
        Bar {
            open_time: 0,
            close_time: 59_999,
            open: close,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn true_range_uses_gap_to_previous_close() {
        let b = bar(12.0, 11.0, 11.5);
        assert_eq!(true_range(&b, Some(9.0), false), 3.0);
        assert_eq!(true_range(&b, None, true), 1.0);
        assert!(true_range(&b, None, false).is_nan());
    }

    #[test]
    fn atr_warms_up_over_period() {
        let mut states = StateRegistry::new();
        let bars = [bar(2.0, 0.0, 1.0), bar(3.0, 1.0, 2.0), bar(4.0, 2.0, 3.0)];
        let out: Vec<f64> = bars
            .iter()
            .enumerate()
            .map(|(i, b)| atr(&mut states, "ta.atr#0", i, b, 2.0).unwrap())
            .collect();
        assert!(out[0].is_nan());
        assert_eq!(out[1], 2.0);
        assert_eq!(out[2], 2.0);
    }

    #[test]
    fn tr_first_bar_is_na_without_handling() {
        let mut states = StateRegistry::new();
        assert!(tr(&mut states, "t", 0, &bar(2.0, 1.0, 1.5), false)
            .unwrap()
            .is_nan());
        assert_eq!(tr(&mut states, "t", 1, &bar(2.0, 1.0, 1.5), false).unwrap(), 1.0);
    }
}
