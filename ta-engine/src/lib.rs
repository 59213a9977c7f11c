//! Incremental technical-analysis functions keyed by call site.
//!
//! Every stateful function keeps a [`StateRecord`] per call-site key inside a
//! [`StateRegistry`]. Re-invoking a function for the same bar index always
//! recomputes from the committed half, so live re-evaluation of an unclosed
//! bar never compounds.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;
use ts_core::Bar;

pub mod average;
pub mod catalog;
pub mod cumulative;
pub mod lookback;
pub mod oscillator;
pub mod precision;
pub mod range;
pub mod state;
pub mod trend;

pub use catalog::{lookup, FunctionSpec, OutputShape, CATALOG};
pub use lookback::Lookback;
pub use oscillator::CrossKind;
pub use precision::{precision, precision_with, DEFAULT_DECIMALS};
pub use state::{Family, FamilyState, StateRecord, StateRegistry};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaError {
    #[error("unknown indicator function `{0}`")]
    UnknownFunction(String),
    #[error("state for `{key}` belongs to the {found} family, not {expected}")]
    StateMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// Value produced by one indicator invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Output {
    Number(f64),
    Bool(bool),
    Tuple(Vec<f64>),
}

impl<const N: usize> From<[f64; N]> for Output {
    fn from(values: [f64; N]) -> Self {
        Output::Tuple(values.to_vec())
    }
}

/// Interpret a numeric period argument. Non-finite or sub-1 lengths are
/// rejected; fractional lengths truncate.
pub fn period_of(length: f64) -> Option<usize> {
    if length.is_finite() && length >= 1.0 {
        Some(length as usize)
    } else {
        None
    }
}

static MISSING: f64 = f64::NAN;

fn series<'a>(args: &[&'a dyn Lookback], i: usize) -> &'a dyn Lookback {
    args.get(i).copied().unwrap_or(&MISSING)
}

fn arg(args: &[&dyn Lookback], i: usize) -> f64 {
    args.get(i).map_or(f64::NAN, |a| a.at(0))
}

/// Optional argument; an omitted or `na` value takes the default.
fn arg_or(args: &[&dyn Lookback], i: usize, default: f64) -> f64 {
    args.get(i).map(|a| a.at(0)).filter(|v| !v.is_nan()).unwrap_or(default)
}

fn truthy(v: f64) -> bool {
    !v.is_nan() && v != 0.0
}

/// Dispatcher over the function catalog that owns all call-site state of
/// one evaluation context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaEngine {
    states: StateRegistry,
}

impl TaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn states(&self) -> &StateRegistry {
        &self.states
    }

    pub fn states_mut(&mut self) -> &mut StateRegistry {
        &mut self.states
    }

    pub fn reset(&mut self) {
        self.states.clear();
    }

    /// Forget every call made on `bar` by a pass that is being
    /// re-evaluated.
    pub fn rollback(&mut self, bar: usize) {
        self.states.rollback(bar);
    }

    /// Invoke `name` for the call site `key` on bar `bar_index`.
    ///
    /// `args` are the positional argument histories; missing trailing
    /// arguments take the function's default (or read as NaN). Bar-derived
    /// inputs (true range, session anchor, volume) come from `bar`.
    pub fn call(
        &mut self,
        name: &str,
        key: &str,
        bar_index: usize,
        bar: &Bar,
        args: &[&dyn Lookback],
    ) -> Result<Output, TaError> {
        trace!(function = name, key, bar = bar_index, "ta call");
        let states = &mut self.states;
        let out = match name {
            "ema" => Output::Number(average::ema(states, key, bar_index, arg(args, 0), arg(args, 1))?),
            "rma" => Output::Number(average::rma(states, key, bar_index, arg(args, 0), arg(args, 1))?),
            "sma" => Output::Number(average::sma(states, key, bar_index, arg(args, 0), arg(args, 1))?),
            "stdev" => {
                Output::Number(average::stdev(states, key, bar_index, arg(args, 0), arg(args, 1))?)
            }
            "variance" => Output::Number(average::variance(
                states,
                key,
                bar_index,
                arg(args, 0),
                arg(args, 1),
            )?),
            "sum" => Output::Number(average::sum(states, key, bar_index, arg(args, 0), arg(args, 1))?),
            "bb" => average::bb(states, key, bar_index, arg(args, 0), arg(args, 1), arg(args, 2))?.into(),
            "cum" => Output::Number(cumulative::cum(states, key, bar_index, arg(args, 0))?),
            "vwap" => Output::Number(cumulative::vwap(
                states,
                key,
                bar_index,
                bar.open_time,
                arg_or(args, 0, bar.hlc3()),
                bar.volume,
            )?),
            "tr" => Output::Number(range::tr(
                states,
                key,
                bar_index,
                bar,
                truthy(arg_or(args, 0, 0.0)),
            )?),
            "atr" => Output::Number(range::atr(states, key, bar_index, bar, arg(args, 0))?),
            "supertrend" => {
                trend::supertrend(states, key, bar_index, bar, arg(args, 0), arg(args, 1))?.into()
            }
            "rsi" => Output::Number(oscillator::rsi(states, key, bar_index, arg(args, 0), arg(args, 1))?),
            "macd" => oscillator::macd(
                states,
                key,
                bar_index,
                arg(args, 0),
                arg(args, 1),
                arg(args, 2),
                arg(args, 3),
            )?
            .into(),
            "crossover" | "crossunder" | "cross" => {
                let kind = match name {
                    "crossover" => CrossKind::Over,
                    "crossunder" => CrossKind::Under,
                    _ => CrossKind::Either,
                };
                Output::Bool(oscillator::cross(
                    states,
                    key,
                    bar_index,
                    arg(args, 0),
                    arg(args, 1),
                    kind,
                )?)
            }
            "change" => Output::Number(lookback::change(series(args, 0), arg_or(args, 1, 1.0))),
            "mom" => Output::Number(lookback::mom(series(args, 0), arg(args, 1))),
            "highest" => Output::Number(lookback::highest(series(args, 0), arg(args, 1))),
            "lowest" => Output::Number(lookback::lowest(series(args, 0), arg(args, 1))),
            "wma" => Output::Number(lookback::wma(series(args, 0), arg(args, 1))),
            "stoch" => Output::Number(lookback::stoch(
                series(args, 0),
                series(args, 1),
                series(args, 2),
                arg(args, 3),
            )),
            other => return Err(TaError::UnknownFunction(other.to_string())),
        };
        Ok(out)
    }
}
