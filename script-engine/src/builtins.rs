//! Runtime implementations of the stateless namespace functions.

use data_feed::SymbolInfo;

use crate::error::RuntimeError;
use crate::value::Value;

fn num(args: &[Value], i: usize) -> f64 {
    args.get(i).map_or(f64::NAN, Value::as_f64)
}

fn unary(args: &[Value], f: impl Fn(f64) -> f64) -> Value {
    Value::num(f(num(args, 0)))
}

fn fold(args: &[Value], f: impl Fn(f64, f64) -> f64) -> Value {
    let mut values = args.iter().map(Value::as_f64);
    let Some(first) = values.next() else {
        return Value::Na;
    };
    let mut acc = first;
    for v in values {
        if v.is_nan() {
            return Value::Na;
        }
        acc = f(acc, v);
    }
    Value::num(acc)
}

pub fn math(name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
    let value = match name {
        "abs" => unary(args, f64::abs),
        "ceil" => unary(args, f64::ceil),
        "floor" => unary(args, f64::floor),
        "round" => {
            let x = num(args, 0);
            match args.get(1).map(Value::as_f64) {
                Some(p) if p.is_finite() && p >= 0.0 => {
                    let scale = 10f64.powi(p as i32);
                    Value::num((x * scale).round() / scale)
                }
                _ => Value::num(x.round()),
            }
        }
        "sqrt" => unary(args, f64::sqrt),
        "pow" => Value::num(num(args, 0).powf(num(args, 1))),
        "log" => unary(args, f64::ln),
        "log10" => unary(args, f64::log10),
        "exp" => unary(args, f64::exp),
        "max" => fold(args, f64::max),
        "min" => fold(args, f64::min),
        "avg" => match fold(args, |a, b| a + b) {
            Value::Num(total) => Value::num(total / args.len() as f64),
            other => other,
        },
        "sign" => unary(args, |x| if x == 0.0 { 0.0 } else { x.signum() }),
        "sin" => unary(args, f64::sin),
        "cos" => unary(args, f64::cos),
        "tan" => unary(args, f64::tan),
        "asin" => unary(args, f64::asin),
        "acos" => unary(args, f64::acos),
        "atan" => unary(args, f64::atan),
        "todegrees" => unary(args, f64::to_degrees),
        "toradians" => unary(args, f64::to_radians),
        other => return Err(RuntimeError::UnknownBuiltin(format!("math.{other}"))),
    };
    Ok(value)
}

fn items<'a>(value: &'a Value, name: &str) -> Result<&'a [Value], RuntimeError> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(RuntimeError::Type(format!(
            "array.{name} expects an array, got {}",
            other.type_name()
        ))),
    }
}

fn index(len: usize, raw: f64) -> Result<usize, RuntimeError> {
    let i = raw as i64;
    let resolved = if i < 0 { len as i64 + i } else { i };
    if raw.is_nan() || resolved < 0 || resolved as usize >= len {
        return Err(RuntimeError::IndexOutOfBounds { index: i, len });
    }
    Ok(resolved as usize)
}

fn numbers(values: &[Value]) -> impl Iterator<Item = f64> + '_ {
    values.iter().map(Value::as_f64).filter(|v| !v.is_nan())
}

/// Non-mutating array functions.
pub fn array(name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
    let arg = |i: usize| args.get(i).cloned().unwrap_or_default();
    let value = match name {
        "new" | "new_float" => {
            let size = num(args, 0);
            let size = if size.is_finite() && size > 0.0 { size as usize } else { 0 };
            Value::Array(vec![arg(1); size])
        }
        "from" => Value::Array(args.to_vec()),
        "get" => {
            let items = items(&arg(0), name)?.to_vec();
            let i = index(items.len(), num(args, 1))?;
            items[i].clone()
        }
        "size" => Value::num(items(&arg(0), name)?.len() as f64),
        "sum" => Value::num(numbers(items(&arg(0), name)?).sum()),
        "avg" => {
            let values: Vec<f64> = numbers(items(&arg(0), name)?).collect();
            if values.is_empty() {
                Value::Na
            } else {
                Value::num(values.iter().sum::<f64>() / values.len() as f64)
            }
        }
        "max" => Value::num(numbers(items(&arg(0), name)?).fold(f64::NAN, f64::max)),
        "min" => Value::num(numbers(items(&arg(0), name)?).fold(f64::NAN, f64::min)),
        "includes" => {
            let needle = arg(1);
            Value::Bool(items(&arg(0), name)?.contains(&needle))
        }
        "first" | "last" => {
            let array = arg(0);
            let items = items(&array, name)?;
            let picked = if name == "first" { items.first() } else { items.last() };
            picked
                .cloned()
                .ok_or(RuntimeError::IndexOutOfBounds { index: 0, len: 0 })?
        }
        other => return Err(RuntimeError::UnknownBuiltin(format!("array.{other}"))),
    };
    Ok(value)
}

/// Array functions that modify `target` in place.
pub fn array_mut(name: &str, target: &mut Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let Value::Array(items) = target else {
        return Err(RuntimeError::Type(format!(
            "array.{name} expects an array, got {}",
            target.type_name()
        )));
    };
    let arg = |i: usize| args.get(i).cloned().unwrap_or_default();
    let value = match name {
        "set" => {
            let i = index(items.len(), num(args, 0))?;
            items[i] = arg(1);
            Value::Na
        }
        "push" => {
            items.push(arg(0));
            Value::Na
        }
        "unshift" => {
            items.insert(0, arg(0));
            Value::Na
        }
        "pop" => items
            .pop()
            .ok_or(RuntimeError::IndexOutOfBounds { index: -1, len: 0 })?,
        "shift" => {
            if items.is_empty() {
                return Err(RuntimeError::IndexOutOfBounds { index: 0, len: 0 });
            }
            items.remove(0)
        }
        "clear" => {
            items.clear();
            Value::Na
        }
        other => return Err(RuntimeError::UnknownBuiltin(format!("array.{other}"))),
    };
    Ok(value)
}

fn parse_hex(color: &str) -> Option<(u8, u8, u8)> {
    let hex = color.strip_prefix('#')?;
    if hex.len() < 6 {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

fn with_alpha(r: u8, g: u8, b: u8, transp: f64) -> String {
    let transp = if transp.is_nan() { 0.0 } else { transp.clamp(0.0, 100.0) };
    let alpha = (255.0 * (1.0 - transp / 100.0)).round() as u8;
    if alpha == 255 {
        format!("#{r:02X}{g:02X}{b:02X}")
    } else {
        format!("#{r:02X}{g:02X}{b:02X}{alpha:02X}")
    }
}

/// `color.new(color, transp)` and `color.rgb(r, g, b, transp)`.
pub fn color(name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
    match name {
        "new" => {
            let base = args.first().and_then(Value::as_str).and_then(parse_hex);
            Ok(base.map_or(Value::Na, |(r, g, b)| Value::Str(with_alpha(r, g, b, num(args, 1)))))
        }
        "rgb" => {
            let channel = |i: usize| num(args, i).clamp(0.0, 255.0) as u8;
            Ok(Value::Str(with_alpha(channel(0), channel(1), channel(2), num(args, 3))))
        }
        other => Err(RuntimeError::UnknownBuiltin(format!("color.{other}"))),
    }
}

pub fn syminfo(name: &str, info: Option<&SymbolInfo>) -> Value {
    let Some(info) = info else {
        return Value::Na;
    };
    match name {
        "ticker" | "tickerid" => Value::Str(info.ticker.clone()),
        "mintick" => Value::num(info.mintick),
        "currency" => Value::Str(info.currency.clone()),
        "description" => Value::Str(info.description.clone()),
        "timezone" => Value::Str(info.timezone.clone()),
        _ => Value::Na,
    }
}

/// Coerce an input override to the declared input kind; an unusable
/// override falls back to the default.
pub fn input(kind: &str, default: Value, overridden: Option<&Value>) -> Value {
    let Some(value) = overridden else {
        return default;
    };
    match (kind, value) {
        ("int", v) if !v.as_f64().is_nan() => Value::num(v.as_f64().trunc()),
        ("float", v) if !v.as_f64().is_nan() => Value::num(v.as_f64()),
        ("bool", Value::Bool(b)) => Value::Bool(*b),
        ("string" | "color", Value::Str(s)) => Value::Str(s.clone()),
        ("input", v) => v.clone(),
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nums(values: &[f64]) -> Vec<Value> {
        values.iter().copied().map(Value::num).collect()
    }

    #[test]
    fn math_functions() {
        assert_eq!(math("abs", &nums(&[-2.5])).unwrap(), Value::Num(2.5));
        assert_eq!(math("max", &nums(&[1.0, 5.0, 3.0])).unwrap(), Value::Num(5.0));
        assert_eq!(math("max", &[Value::num(1.0), Value::Na]).unwrap(), Value::Na);
        assert_eq!(math("avg", &nums(&[1.0, 2.0, 3.0])).unwrap(), Value::Num(2.0));
        assert_eq!(math("round", &nums(&[1.23456, 2.0])).unwrap(), Value::Num(1.23));
        assert_eq!(math("sign", &nums(&[-3.0])).unwrap(), Value::Num(-1.0));
        assert!(math("sqrt", &nums(&[-1.0])).unwrap().is_na());
        assert!(matches!(math("nope", &[]), Err(RuntimeError::UnknownBuiltin(_))));
    }

    #[test]
    fn array_functions() {
        let a = array("from", &nums(&[1.0, 2.0, 3.0])).unwrap();
        assert_eq!(array("size", &[a.clone()]).unwrap(), Value::Num(3.0));
        assert_eq!(array("get", &[a.clone(), Value::num(-1.0)]).unwrap(), Value::Num(3.0));
        assert_eq!(array("sum", &[a.clone()]).unwrap(), Value::Num(6.0));
        assert_eq!(array("includes", &[a.clone(), Value::num(2.0)]).unwrap(), Value::Bool(true));
        assert!(matches!(
            array("get", &[a, Value::num(5.0)]),
            Err(RuntimeError::IndexOutOfBounds { index: 5, len: 3 })
        ));
        assert_eq!(
            array("new", &[Value::num(2.0), Value::num(0.0)]).unwrap(),
            Value::Array(nums(&[0.0, 0.0]))
        );
    }

    #[test]
    fn array_mutation() {
        let mut a = Value::Array(Vec::new());
        array_mut("push", &mut a, &nums(&[1.0])).unwrap();
        array_mut("unshift", &mut a, &nums(&[0.0])).unwrap();
        assert_eq!(a, Value::Array(nums(&[0.0, 1.0])));
        assert_eq!(array_mut("pop", &mut a, &[]).unwrap(), Value::Num(1.0));
        array_mut("set", &mut a, &nums(&[0.0, 9.0])).unwrap();
        assert_eq!(a, Value::Array(nums(&[9.0])));
        let mut not_array = Value::num(1.0);
        assert!(matches!(array_mut("push", &mut not_array, &[]), Err(RuntimeError::Type(_))));
    }

    #[test]
    fn colors() {
        let c = color("new", &[Value::from("#FF0000"), Value::num(50.0)]).unwrap();
        assert_eq!(c, Value::from("#FF000080"));
        let c = color("rgb", &nums(&[0.0, 128.0, 255.0])).unwrap();
        assert_eq!(c, Value::from("#0080FF"));
    }

    #[test]
    fn inputs_coerce_overrides() {
        assert_eq!(input("int", Value::num(14.0), Some(&Value::num(20.7))), Value::Num(20.0));
        assert_eq!(input("int", Value::num(14.0), None), Value::Num(14.0));
        assert_eq!(input("bool", Value::Bool(false), Some(&Value::num(1.0))), Value::Bool(false));
    }

    #[test]
    fn syminfo_reads_symbol() {
        let info = SymbolInfo::new("BTCUSDT").with_mintick(0.1);
        assert_eq!(syminfo("ticker", Some(&info)), Value::from("BTCUSDT"));
        assert_eq!(syminfo("mintick", Some(&info)), Value::Num(0.1));
        assert_eq!(syminfo("ticker", None), Value::Na);
    }
}
