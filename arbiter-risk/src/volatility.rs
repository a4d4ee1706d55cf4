//! ATR computation and the volatility-regime classification used to
//! scale position size.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use arbiter_core::{Candle, Price};

/// Average true range over the trailing `period` candles.
#[must_use]
pub fn atr(candles: &[Candle], period: usize) -> Option<Price> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let window = &candles[candles.len() - period - 1..];
    let mut sum = Decimal::ZERO;
    for pair in window.windows(2) {
        sum += pair[1].true_range(Some(pair[0].close));
    }
    Some(sum / Decimal::from(period))
}

/// Volatility classification of ATR relative to price.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum VolatilityRegime {
    Low,
    Normal,
    High,
    Extreme,
}

impl VolatilityRegime {
    /// Classify the ATR-to-price ratio into a regime bucket.
    #[must_use]
    pub fn classify(atr_ratio: Decimal) -> Self {
        if atr_ratio < Decimal::new(1, 2) {
            Self::Low
        } else if atr_ratio < Decimal::new(3, 2) {
            Self::Normal
        } else if atr_ratio < Decimal::new(6, 2) {
            Self::High
        } else {
            Self::Extreme
        }
    }

    /// Multiplier applied to the raw position size in this regime.
    #[must_use]
    pub fn size_factor(self) -> Decimal {
        match self {
            Self::Low | Self::Normal => Decimal::ONE,
            Self::High => Decimal::new(6, 1),
            Self::Extreme => Decimal::new(4, 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn candle(high: Decimal, low: Decimal, close: Decimal, minute: u32) -> Candle {
        Candle {
            symbol: "AAPL".into(),
            open: close,
            high,
            low,
            close,
            start: Utc.with_ymd_and_hms(2025, 3, 3, 10, minute, 0).unwrap(),
        }
    }

    #[test]
    fn atr_averages_true_ranges() {
        let candles = vec![
            candle(dec!(102), dec!(98), dec!(100), 0),
            candle(dec!(103), dec!(99), dec!(101), 1),
            candle(dec!(104), dec!(100), dec!(102), 2),
            candle(dec!(105), dec!(101), dec!(103), 3),
        ];
        // Each bar spans 4 with no gaps, so the ATR is exactly 4.
        assert_eq!(atr(&candles, 3), Some(dec!(4)));
        assert_eq!(atr(&candles, 4), None);
    }

    #[test]
    fn regimes_map_to_documented_factors() {
        assert_eq!(VolatilityRegime::classify(dec!(0.005)), VolatilityRegime::Low);
        assert_eq!(
            VolatilityRegime::classify(dec!(0.02)),
            VolatilityRegime::Normal
        );
        assert_eq!(VolatilityRegime::classify(dec!(0.04)), VolatilityRegime::High);
        assert_eq!(
            VolatilityRegime::classify(dec!(0.10)),
            VolatilityRegime::Extreme
        );

        assert_eq!(VolatilityRegime::Low.size_factor(), dec!(1));
        assert_eq!(VolatilityRegime::Normal.size_factor(), dec!(1));
        assert_eq!(VolatilityRegime::High.size_factor(), dec!(0.6));
        assert_eq!(VolatilityRegime::Extreme.size_factor(), dec!(0.4));
    }
}
