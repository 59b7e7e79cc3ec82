/// Round `value` to `decimals` places, half away from zero.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Truncate `value` toward zero at `decimals` places.
///
/// A tiny epsilon absorbs representation error so that e.g. `2.0` computed as
/// `1.9999999999` still truncates to `2.0`.
pub fn truncate_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    ((value * factor) + f64::EPSILON * factor).trunc() / factor
}

/// True when both prices round to the same value at `decimals` places.
pub fn prices_match(a: f64, b: f64, decimals: u32) -> bool {
    let half_tick = 0.5 * 10f64.powi(-(decimals as i32));
    (round_to(a, decimals) - round_to(b, decimals)).abs() < half_tick
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(6.050000000000001, 3), 6.05);
        assert_eq!(round_to(4.05, 3), 4.05);
        assert_eq!(round_to(0.123456, 4), 0.1235);
        assert_eq!(round_to(5.0, 0), 5.0);
    }

    #[test]
    fn test_truncate_to() {
        assert_eq!(truncate_to(1.23456, 3), 1.234);
        assert_eq!(truncate_to(100.0 / 50.0, 6), 2.0);
        assert_eq!(truncate_to(10.0 / 3.0, 2), 3.33);
    }

    #[test]
    fn test_prices_match() {
        assert!(prices_match(5.5, 5.5000001, 3));
        assert!(prices_match(6.05, 6.050000000000001, 3));
        assert!(!prices_match(5.5, 5.501, 3));
    }
}
