/// Result shape of a catalog function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputShape {
    Number,
    Bool,
    Tuple(usize),
}

/// Signature of one indicator function: positional parameter names (used to
/// reorder named arguments), how many are required, whether it keeps
/// per-call-site state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub params: &'static [&'static str],
    pub required: usize,
    pub stateful: bool,
    pub output: OutputShape,
}

impl FunctionSpec {
    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.params.iter().position(|p| *p == name)
    }
}

const fn spec(
    name: &'static str,
    params: &'static [&'static str],
    required: usize,
    stateful: bool,
    output: OutputShape,
) -> FunctionSpec {
    FunctionSpec {
        name,
        params,
        required,
        stateful,
        output,
    }
}

use OutputShape::{Bool, Number, Tuple};

pub const CATALOG: &[FunctionSpec] = &[
    spec("ema", &["source", "length"], 2, true, Number),
    spec("rma", &["source", "length"], 2, true, Number),
    spec("sma", &["source", "length"], 2, true, Number),
    spec("stdev", &["source", "length"], 2, true, Number),
    spec("variance", &["source", "length"], 2, true, Number),
    spec("bb", &["series", "length", "mult"], 3, true, Tuple(3)),
    spec("sum", &["source", "length"], 2, true, Number),
    spec("cum", &["source"], 1, true, Number),
    spec("vwap", &["source"], 0, true, Number),
    spec("tr", &["handle_na"], 0, true, Number),
    spec("atr", &["length"], 1, true, Number),
    spec("supertrend", &["factor", "atrPeriod"], 2, true, Tuple(2)),
    spec("rsi", &["source", "length"], 2, true, Number),
    spec(
        "macd",
        &["source", "fastlen", "slowlen", "siglen"],
        4,
        true,
        Tuple(3),
    ),
    spec("crossover", &["source1", "source2"], 2, true, Bool),
    spec("crossunder", &["source1", "source2"], 2, true, Bool),
    spec("cross", &["source1", "source2"], 2, true, Bool),
    spec("change", &["source", "length"], 1, false, Number),
    spec("mom", &["source", "length"], 2, false, Number),
    spec("highest", &["source", "length"], 2, false, Number),
    spec("lowest", &["source", "length"], 2, false, Number),
    spec("wma", &["source", "length"], 2, false, Number),
    spec("stoch", &["source", "high", "low", "length"], 4, false, Number),
];

pub fn lookup(name: &str) -> Option<&'static FunctionSpec> {
    CATALOG.iter().find(|f| f.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique() {
        for (i, f) in CATALOG.iter().enumerate() {
            assert!(CATALOG[i + 1..].iter().all(|g| g.name != f.name), "{}", f.name);
            assert!(f.required <= f.params.len());
        }
    }

    #[test]
    fn named_parameters_resolve_to_positions() {
        let macd = lookup("macd").unwrap();
        assert_eq!(macd.param_index("siglen"), Some(3));
        assert_eq!(lookup("supertrend").unwrap().output, OutputShape::Tuple(2));
        assert!(lookup("nope").is_none());
    }
}
