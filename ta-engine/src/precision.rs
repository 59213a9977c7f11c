/// Decimal grid applied to every numeric indicator result.
pub const DEFAULT_DECIMALS: u32 = 10;

/// Round to [`DEFAULT_DECIMALS`] places.
pub fn precision(value: f64) -> f64 {
    precision_with(value, DEFAULT_DECIMALS)
}

/// Round to a fixed number of decimals. Non-finite values pass through, and
/// magnitudes already beyond the grid's exact range are returned unchanged.
pub fn precision_with(value: f64, decimals: u32) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let factor = 10f64.powi(decimals as i32);
    let scaled = value * factor;
    if !scaled.is_finite() || scaled.abs() >= 9.0e15 {
        return value;
    }
    scaled.round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_float_drift() {
        assert_eq!(precision(0.1 + 0.2), 0.3);
        assert_eq!(precision_with(1.23456, 2), 1.23);
    }

    #[test]
    fn passes_through_nan_and_large_values() {
        assert!(precision(f64::NAN).is_nan());
        assert_eq!(precision(1.0e12 + 0.5), 1.0e12 + 0.5);
        assert_eq!(precision(f64::INFINITY), f64::INFINITY);
    }
}
