use serde::{Deserialize, Serialize};
use ts_core::{Timestamp, DAY_MS};

use crate::precision::precision;
use crate::state::StateRegistry;
use crate::TaError;

/// Running total since the first bar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CumState {
    pub total: f64,
}

pub fn cum(states: &mut StateRegistry, key: &str, bar: usize, value: f64) -> Result<f64, TaError> {
    let record = states.record::<CumState>(key)?;
    let out = record.step(bar, |s| {
        if value.is_nan() {
            return (s.clone(), s.total);
        }
        let total = s.total + value;
        (CumState { total }, total)
    });
    Ok(precision(out))
}

/// Session-anchored volume-weighted average price. The anchor is the UTC day
/// of the bar's open time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VwapState {
    pub day: Option<i64>,
    pub price_volume: f64,
    pub volume: f64,
}

impl VwapState {
    fn value(&self) -> f64 {
        if self.volume == 0.0 {
            f64::NAN
        } else {
            self.price_volume / self.volume
        }
    }
}

pub fn vwap(
    states: &mut StateRegistry,
    key: &str,
    bar: usize,
    open_time: Timestamp,
    price: f64,
    volume: f64,
) -> Result<f64, TaError> {
    let record = states.record::<VwapState>(key)?;
    let day = open_time.div_euclid(DAY_MS);
    let out = record.step(bar, |s| {
        if price.is_nan() || volume.is_nan() {
            return (s.clone(), f64::NAN);
        }
        let base = if s.day == Some(day) {
            s.clone()
        } else {
            VwapState {
                day: Some(day),
                ..VwapState::default()
            }
        };
        let next = VwapState {
            day: Some(day),
            price_volume: base.price_volume + price * volume,
            volume: base.volume + volume,
        };
        let out = next.value();
        (next, out)
    });
    Ok(precision(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cum_skips_nan_inputs() {
        let mut states = StateRegistry::new();
        assert_eq!(cum(&mut states, "ta.cum#0", 0, 1.0).unwrap(), 1.0);
        assert_eq!(cum(&mut states, "ta.cum#0", 1, f64::NAN).unwrap(), 1.0);
        assert_eq!(cum(&mut states, "ta.cum#0", 2, 2.5).unwrap(), 3.5);
    }

    #[test]
    fn vwap_resets_on_new_utc_day() {
        let mut states = StateRegistry::new();
        vwap(&mut states, "v", 0, 0, 100.0, 1.0).unwrap();
        let same_day = vwap(&mut states, "v", 1, 60_000, 102.0, 1.0).unwrap();
        assert_eq!(same_day, 101.0);
        let next_day = vwap(&mut states, "v", 2, DAY_MS, 200.0, 2.0).unwrap();
        assert_eq!(next_day, 200.0);
    }

    #[test]
    fn vwap_without_volume_is_nan() {
        let mut states = StateRegistry::new();
        assert!(vwap(&mut states, "v", 0, 0, 100.0, 0.0).unwrap().is_nan());
    }
}
