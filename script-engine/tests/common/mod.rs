#![allow(dead_code)]

use script_engine::{RunOutput, Value};
use ts_core::Bar;

pub fn bar(i: usize, close: f64) -> Bar {
    let t = 1_700_000_000_000 + i as i64 * 60_000;
    Bar {
        open_time: t,
        close_time: t + 59_999,
        open: close,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 10.0,
    }
}

pub fn bars(closes: &[f64]) -> Vec<Bar> {
    closes.iter().enumerate().map(|(i, &c)| bar(i, c)).collect()
}

pub fn plot(output: &RunOutput, title: &str) -> Vec<Value> {
    output.plots[title].iter().map(|p| p.value.clone()).collect()
}

pub fn nums(values: &[f64]) -> Vec<Value> {
    values.iter().copied().map(Value::num).collect()
}
