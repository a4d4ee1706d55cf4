//! Small indicator helpers shared by the built-in strategies.
//!
//! All functions return `None` until enough history exists; callers map
//! that to a zero-confidence hold.

use rust_decimal::Decimal;

use arbiter_core::Price;

/// Simple moving average of the trailing `period` values.
#[must_use]
pub fn sma(values: &[Price], period: usize) -> Option<Price> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    let sum: Decimal = window.iter().copied().sum();
    Some(sum / Decimal::from(period))
}

/// Rate of change between the latest value and the one `period` steps
/// back, as a fraction of the older value.
#[must_use]
pub fn rate_of_change(values: &[Price], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() <= period {
        return None;
    }
    let latest = values[values.len() - 1];
    let base = values[values.len() - 1 - period];
    if base.is_zero() {
        return None;
    }
    Some((latest - base) / base)
}

/// Relative strength index over the trailing `period` steps, in `[0, 100]`.
#[must_use]
pub fn rsi(values: &[Price], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() <= period {
        return None;
    }
    let window = &values[values.len() - period - 1..];
    let mut gains = Decimal::ZERO;
    let mut losses = Decimal::ZERO;
    for pair in window.windows(2) {
        let delta = pair[1] - pair[0];
        if delta > Decimal::ZERO {
            gains += delta;
        } else {
            losses -= delta;
        }
    }
    let hundred = Decimal::ONE_HUNDRED;
    if losses.is_zero() {
        return Some(hundred);
    }
    let rs = gains / losses;
    Some(hundred - hundred / (Decimal::ONE + rs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn prices(values: &[i64]) -> Vec<Price> {
        values.iter().map(|v| Decimal::from(*v)).collect()
    }

    #[test]
    fn sma_requires_full_window() {
        let values = prices(&[1, 2, 3, 4]);
        assert_eq!(sma(&values, 2), Some(dec!(3.5)));
        assert_eq!(sma(&values, 4), Some(dec!(2.5)));
        assert_eq!(sma(&values, 5), None);
    }

    #[test]
    fn rate_of_change_is_fractional() {
        let values = prices(&[100, 101, 110]);
        assert_eq!(rate_of_change(&values, 2), Some(dec!(0.1)));
        assert_eq!(rate_of_change(&values, 3), None);
    }

    #[test]
    fn rsi_is_bounded() {
        let rising = prices(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(rsi(&rising, 5), Some(dec!(100)));

        let falling = prices(&[6, 5, 4, 3, 2, 1]);
        let value = rsi(&falling, 5).unwrap();
        assert!(value < dec!(1));

        let mixed = prices(&[10, 12, 11, 13, 12, 14]);
        let value = rsi(&mixed, 5).unwrap();
        assert!(value > dec!(50) && value < dec!(100));
    }
}
