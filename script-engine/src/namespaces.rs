//! Names the transpiler resolves without a declaration: data fields, the
//! built-in namespaces and the core functions.

use ta_engine::catalog::{self, FunctionSpec};

use crate::program::Namespace;

/// Functions callable without a namespace.
pub const CORE_FUNCTIONS: &[&str] = &["plot", "indicator", "study", "nz", "na", "fixnan", "input"];

/// Core functions that read their argument's history.
pub const CORE_LOOKBACK: &[&str] = &["fixnan"];

pub const MATH_FUNCTIONS: &[&str] = &[
    "abs", "ceil", "floor", "round", "sqrt", "pow", "log", "log10", "exp", "max", "min", "avg", "sign",
    "sin", "cos", "tan", "asin", "acos", "atan", "todegrees", "toradians", "sum",
];

pub const ARRAY_FUNCTIONS: &[&str] = &[
    "new", "new_float", "from", "get", "set", "push", "pop", "shift", "unshift", "size", "sum", "avg",
    "max", "min", "clear", "includes", "first", "last",
];

/// Array functions that modify their first argument in place.
pub const ARRAY_MUTATORS: &[&str] = &["set", "push", "pop", "shift", "unshift", "clear"];

pub const INPUT_FUNCTIONS: &[&str] = &["int", "float", "bool", "string", "source", "color"];

pub const SYMINFO_PROPERTIES: &[&str] = &["ticker", "tickerid", "mintick", "currency", "description", "timezone"];

pub const COLORS: &[(&str, &str)] = &[
    ("aqua", "#00BCD4"),
    ("black", "#363A45"),
    ("blue", "#2962FF"),
    ("fuchsia", "#E040FB"),
    ("gray", "#787B86"),
    ("green", "#4CAF50"),
    ("lime", "#00E676"),
    ("maroon", "#880E4F"),
    ("navy", "#311B92"),
    ("olive", "#808000"),
    ("orange", "#FF9800"),
    ("purple", "#9C27B0"),
    ("red", "#FF5252"),
    ("silver", "#B2B5BE"),
    ("teal", "#00897B"),
    ("white", "#FFFFFF"),
    ("yellow", "#FFEB3B"),
];

pub const COLOR_FUNCTIONS: &[&str] = &["new", "rgb"];

pub fn color(name: &str) -> Option<&'static str> {
    COLORS.iter().find(|(n, _)| *n == name).map(|(_, hex)| *hex)
}

/// Whether `ns.name(...)` exists.
pub fn has_function(ns: Namespace, name: &str) -> bool {
    match ns {
        Namespace::Core => CORE_FUNCTIONS.contains(&name),
        Namespace::Ta => catalog::lookup(name).is_some(),
        Namespace::Math => MATH_FUNCTIONS.contains(&name),
        Namespace::Array => ARRAY_FUNCTIONS.contains(&name),
        Namespace::Input => INPUT_FUNCTIONS.contains(&name),
        Namespace::Color => COLOR_FUNCTIONS.contains(&name),
        Namespace::Syminfo => false,
    }
}

/// Catalog signature for calls routed to the indicator engine.
pub fn signature(ns: Namespace, name: &str) -> Option<&'static FunctionSpec> {
    match (ns, name) {
        (Namespace::Ta, _) => catalog::lookup(name),
        (Namespace::Math, "sum") => catalog::lookup("sum"),
        _ => None,
    }
}

/// Stateful calls get a call-site key.
pub fn is_stateful(ns: Namespace, name: &str) -> bool {
    signature(ns, name).is_some_and(|spec| spec.stateful)
}

/// Arguments of these namespaces are captured as series handles.
pub fn captures_params(ns: Namespace, name: &str) -> bool {
    match ns {
        Namespace::Ta | Namespace::Math | Namespace::Array => true,
        Namespace::Core => CORE_LOOKBACK.contains(&name),
        _ => false,
    }
}

/// What a bare `ns.name` (no call) means.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Property {
    Constant(f64),
    Color(&'static str),
    /// Zero-argument call, e.g. `ta.tr`, `syminfo.ticker`.
    Call,
}

pub fn property(ns: Namespace, name: &str) -> Option<Property> {
    match ns {
        Namespace::Math => match name {
            "pi" => Some(Property::Constant(std::f64::consts::PI)),
            "e" => Some(Property::Constant(std::f64::consts::E)),
            "phi" => Some(Property::Constant(1.618_033_988_749_895)),
            _ => None,
        },
        Namespace::Color => color(name).map(Property::Color),
        Namespace::Syminfo => SYMINFO_PROPERTIES.contains(&name).then_some(Property::Call),
        Namespace::Ta => catalog::lookup(name)
            .filter(|spec| spec.required == 0)
            .map(|_| Property::Call),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_catalog_functions() {
        assert!(has_function(Namespace::Ta, "sma"));
        assert!(!has_function(Namespace::Ta, "nope"));
        assert!(is_stateful(Namespace::Ta, "ema"));
        assert!(!is_stateful(Namespace::Ta, "highest"));
        assert!(is_stateful(Namespace::Math, "sum"));
        assert!(!is_stateful(Namespace::Math, "abs"));
    }

    #[test]
    fn properties() {
        assert_eq!(property(Namespace::Ta, "tr"), Some(Property::Call));
        assert_eq!(property(Namespace::Ta, "sma"), None);
        assert_eq!(property(Namespace::Color, "red"), Some(Property::Color("#FF5252")));
        assert!(matches!(property(Namespace::Math, "pi"), Some(Property::Constant(_))));
        assert_eq!(property(Namespace::Syminfo, "ticker"), Some(Property::Call));
    }
}
