use serde::{Deserialize, Serialize};
use ts_core::Bar;

use crate::precision::precision;
use crate::range::AtrState;
use crate::state::StateRegistry;
use crate::{period_of, TaError};

/// Band decision of one finalized bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub upper: f64,
    pub lower: f64,
    pub direction: f64,
    pub supertrend: f64,
}

/// Committed decisions of one SuperTrend call site, as of the previous
/// finalized bar. `prev` stays empty while the ATR is warming up.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuperTrendState {
    pub atr: AtrState,
    pub prev: Option<Decision>,
    pub prev_close: Option<f64>,
}

impl SuperTrendState {
    /// One evaluation against `bar`; returns `[supertrend, direction]` where
    /// direction is `-1` for an up trend and `1` for a down trend.
    pub fn next(&self, bar: &Bar, factor: f64, period: usize) -> (SuperTrendState, [f64; 2]) {
        let (atr_state, atr) = self.atr.next(bar, period);
        let src = bar.hl2();

        if atr.is_nan() {
            let next = SuperTrendState {
                atr: atr_state,
                prev: None,
                prev_close: Some(bar.close),
            };
            return (next, [f64::NAN, f64::NAN]);
        }

        let prev_lower = self.prev.map_or(0.0, |d| d.lower);
        let prev_upper = self.prev.map_or(0.0, |d| d.upper);
        let raw_lower = src - factor * atr;
        let raw_upper = src + factor * atr;
        let closed_below = self.prev_close.is_some_and(|c| c < prev_lower);
        let closed_above = self.prev_close.is_some_and(|c| c > prev_upper);

        let lower = if raw_lower > prev_lower || closed_below {
            raw_lower
        } else {
            prev_lower
        };
        let upper = if raw_upper < prev_upper || closed_above {
            raw_upper
        } else {
            prev_upper
        };

        let direction = match self.prev {
            None => 1.0,
            Some(d) if d.supertrend == d.upper => {
                if bar.close > upper {
                    -1.0
                } else {
                    1.0
                }
            }
            Some(_) => {
                if bar.close < lower {
                    1.0
                } else {
                    -1.0
                }
            }
        };
        let supertrend = if direction == -1.0 { lower } else { upper };

        let next = SuperTrendState {
            atr: atr_state,
            prev: Some(Decision {
                upper,
                lower,
                direction,
                supertrend,
            }),
            prev_close: Some(bar.close),
        };
        (next, [supertrend, direction])
    }
}

pub fn supertrend(
    states: &mut StateRegistry,
    key: &str,
    bar_index: usize,
    bar: &Bar,
    factor: f64,
    atr_length: f64,
) -> Result<[f64; 2], TaError> {
    let Some(period) = period_of(atr_length) else {
        return Ok([f64::NAN, f64::NAN]);
    };
    if factor.is_nan() {
        return Ok([f64::NAN, f64::NAN]);
    }
    let record = states.record::<SuperTrendState>(key)?;
    let out = record.step(bar_index, |s| s.next(bar, factor, period));
    Ok(out.map(precision))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(i: i64, close: f64) -> Bar {
        Bar {
            open_time: i * 60_000,
            close_time: (i + 1) * 60_000 - 1,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn first_value_after_warmup_points_down() {
        let mut states = StateRegistry::new();
        let out: Vec<[f64; 2]> = (0..3)
            .map(|i| supertrend(&mut states, "ta.supertrend#0", i, &bar(i as i64, 10.0), 3.0, 2.0).unwrap())
            .collect();
        assert!(out[0][0].is_nan());
        // atr = 2, hl2 = 10, upper = 16
        assert_eq!(out[1], [16.0, 1.0]);
    }

    #[test]
    fn rising_prices_flip_to_up_trend() {
        let mut states = StateRegistry::new();
        let mut last = [f64::NAN; 2];
        for i in 0..12 {
            let close = if i < 3 { 10.0 } else { 10.0 + (i as f64 - 2.0) * 5.0 };
            last = supertrend(&mut states, "st", i, &bar(i as i64, close), 1.0, 2.0).unwrap();
        }
        assert_eq!(last[1], -1.0);
        assert!(last[0] < 10.0 + 9.0 * 5.0);
    }

    #[test]
    fn retick_does_not_flip_committed_direction() {
        let mut states = StateRegistry::new();
        for i in 0..4 {
            supertrend(&mut states, "st", i, &bar(i as i64, 10.0), 3.0, 2.0).unwrap();
        }
        let spike = supertrend(&mut states, "st", 4, &bar(4, 100.0), 3.0, 2.0).unwrap();
        assert_eq!(spike[1], -1.0);
        let settled = supertrend(&mut states, "st", 4, &bar(4, 10.0), 3.0, 2.0).unwrap();
        assert_eq!(settled[1], 1.0);
    }
}
