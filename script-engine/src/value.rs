use serde::{Deserialize, Serialize};
use std::fmt;

/// Runtime value of a script expression.
///
/// `Na` and a NaN `Num` both mean "not available"; constructors normalise
/// NaN to `Na` so the two never need to be told apart downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    #[default]
    Na,
    Num(#[serde(with = "nan_as_null")] f64),
    Bool(bool),
    Str(String),
    Array(Vec<Value>),
    Tuple(Vec<Value>),
}

mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        if v.is_nan() {
            s.serialize_none()
        } else {
            s.serialize_some(v)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(d)?.unwrap_or(f64::NAN))
    }
}

impl Value {
    pub fn num(v: f64) -> Value {
        if v.is_nan() {
            Value::Na
        } else {
            Value::Num(v)
        }
    }

    pub fn is_na(&self) -> bool {
        match self {
            Value::Na => true,
            Value::Num(v) => v.is_nan(),
            _ => false,
        }
    }

    /// Numeric view: booleans are 1/0, everything non-numeric is NaN.
    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Num(v) => *v,
            Value::Bool(true) => 1.0,
            Value::Bool(false) => 0.0,
            _ => f64::NAN,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Na => false,
            Value::Num(v) => !v.is_nan() && *v != 0.0,
            Value::Bool(b) => *b,
            Value::Str(s) => !s.is_empty(),
            Value::Array(_) | Value::Tuple(_) => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Na => "na",
            Value::Num(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Tuple(_) => "tuple",
        }
    }

    /// Scalar carried by a series slot: a tuple contributes its first
    /// element, everything else is itself.
    pub fn scalar(self) -> Value {
        match self {
            Value::Tuple(mut items) if !items.is_empty() => items.swap_remove(0),
            other => other,
        }
    }

    /// Plain-array addressing where offset 0 is the last element.
    pub fn from_end(items: &[Value], offset: usize) -> Value {
        items
            .len()
            .checked_sub(offset.saturating_add(1))
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or(Value::Na)
    }

    /// JSON rendering for results (`Na` → null, tuples and arrays → lists).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Na => serde_json::Value::Null,
            Value::Num(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) | Value::Tuple(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::num(v)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Na => f.write_str("na"),
            Value::Num(v) if v.is_nan() => f.write_str("na"),
            Value::Num(v) => write!(f, "{v}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Array(items) | Value::Tuple(items) => {
                let open = if matches!(self, Value::Array(_)) { "array[" } else { "[" };
                f.write_str(open)?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_normalises_to_na() {
        assert_eq!(Value::from(f64::NAN), Value::Na);
        assert!(Value::Num(f64::NAN).is_na());
        assert!(Value::Na.as_f64().is_nan());
        assert!(!Value::Na.truthy());
    }

    #[test]
    fn serialized_nan_reads_back_as_not_available() {
        let json = serde_json::to_string(&Value::Num(f64::NAN)).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert!(back.is_na());
        let tuple = Value::Tuple(vec![Value::Num(1.0), Value::Na]);
        let json = serde_json::to_string(&tuple).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&json).unwrap(), tuple);
    }

    #[test]
    fn from_end_addresses_last_element_first() {
        let items = vec![Value::Num(1.0), Value::Num(2.0), Value::Num(3.0)];
        assert_eq!(Value::from_end(&items, 0), Value::Num(3.0));
        assert_eq!(Value::from_end(&items, 2), Value::Num(1.0));
        assert_eq!(Value::from_end(&items, 3), Value::Na);
    }

    #[test]
    fn json_rendering_uses_null_for_na() {
        let v = Value::Tuple(vec![Value::Num(1.5), Value::Na, Value::Bool(true)]);
        assert_eq!(v.to_json(), serde_json::json!([1.5, null, true]));
    }
}
