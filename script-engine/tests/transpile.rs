mod common;

use std::collections::BTreeMap;

use common::{bars, plot};
use script_engine::{run_script, transpile, transpile_with, Dialect, LoweredProgram, SyntaxErrorKind};

const PINE: &str = r#"//@version=5
indicator("Crossover", overlay = true)
fast = ta.ema(close, 3)
slow = ta.sma(close, 5)
var crosses = 0
if ta.crossover(fast, slow)
    crosses := crosses + 1
plot(fast, "fast")
plot(slow, "slow")
plot(crosses, "crosses")
"#;

const HOST: &str = r#"(context) => {
  const { close } = context.data;
  const { ta } = context.pine;
  indicator("Crossover", { overlay: true });
  const fast = ta.ema(close, 3);
  const slow = ta.sma(close, 5);
  var crosses = 0;
  if (ta.crossover(fast, slow)) {
    crosses += 1;
  }
  plot(fast, "fast");
  plot(slow, "slow");
  plot(crosses, "crosses");
}"#;

#[test]
fn transpiling_twice_is_byte_identical() {
    let a = transpile(PINE).unwrap();
    let b = transpile(PINE).unwrap();
    assert_eq!(a.to_json().unwrap(), b.to_json().unwrap());
    assert_eq!(a.to_string(), b.to_string());
    assert_eq!(a.call_keys(), vec!["ta.ema#0", "ta.sma#1", "ta.crossover#2"]);
}

#[test]
fn lowered_program_survives_json() {
    let program = transpile(HOST).unwrap();
    let json = program.to_json().unwrap();
    assert_eq!(LoweredProgram::from_json(&json).unwrap(), program);
}

#[test]
fn both_dialects_lower_to_the_same_keys_and_results() {
    let pine = transpile(PINE).unwrap();
    let host = transpile(HOST).unwrap();
    assert_eq!(pine.dialect, Dialect::Pine);
    assert_eq!(host.dialect, Dialect::Host);
    assert_eq!(pine.call_keys(), host.call_keys());

    let data = bars(&[5.0, 4.0, 3.0, 2.0, 1.0, 2.0, 4.0, 6.0, 8.0, 7.0]);
    let a = run_script(PINE, &data, BTreeMap::new()).unwrap();
    let b = run_script(HOST, &data, BTreeMap::new()).unwrap();
    for title in ["fast", "slow", "crosses"] {
        assert_eq!(plot(&a, title), plot(&b, title), "{title}");
    }
}

#[test]
fn errors_carry_codes_and_locations() {
    let err = transpile("x = ta.nope(close)").unwrap_err();
    assert_eq!(err.kind, SyntaxErrorKind::UnknownFunction);
    assert_eq!(err.span.start_line, 1);

    let err = transpile("plot(close)\nplot(missing)").unwrap_err();
    assert_eq!(err.kind, SyntaxErrorKind::UndeclaredIdentifier);
    assert_eq!(err.span.start_line, 2);

    let err = transpile("x = ta.sma(close)").unwrap_err();
    assert_eq!(err.kind, SyntaxErrorKind::ArityMismatch);

    let err = transpile_with("const { close } = context.quotes;", Dialect::Host).unwrap_err();
    assert_eq!(err.kind, SyntaxErrorKind::UnknownNamespace);
}
