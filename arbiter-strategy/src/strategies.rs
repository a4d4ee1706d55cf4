//! Built-in strategies registered by the engine at startup.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use arbiter_core::{Action, Signal};

use crate::indicators::{rate_of_change, rsi, sma};
use crate::{MarketView, Strategy};

fn decimal_conf(value: Decimal) -> f64 {
    value.abs().to_f64().unwrap_or(0.0).clamp(0.0, 1.0)
}

/// Trend-following vote based on the relation of a fast to a slow SMA.
///
/// Votes the direction of the spread every cycle (not only on the
/// crossing candle) so the aggregate sees a persistent trend opinion;
/// confidence grows with the relative separation of the averages.
pub struct SmaCross {
    pub fast_period: usize,
    pub slow_period: usize,
}

impl Default for SmaCross {
    fn default() -> Self {
        Self {
            fast_period: 10,
            slow_period: 30,
        }
    }
}

impl Strategy for SmaCross {
    fn id(&self) -> &str {
        "sma-cross"
    }

    fn evaluate(&self, view: &MarketView<'_>) -> Signal {
        let closes = view.closes();
        let (Some(fast), Some(slow)) = (
            sma(&closes, self.fast_period),
            sma(&closes, self.slow_period),
        ) else {
            return Signal::new(self.id(), Action::Hold, 0.0)
                .with_reason("insufficient history for moving averages");
        };
        if slow.is_zero() || fast == slow {
            return Signal::new(self.id(), Action::Hold, 0.0);
        }
        let spread = (fast - slow) / slow;
        let action = if spread > Decimal::ZERO {
            Action::Buy
        } else {
            Action::Sell
        };
        let confidence = decimal_conf(spread * Decimal::from(20));
        Signal::new(self.id(), action, confidence).with_reason(format!(
            "fast sma {fast} vs slow sma {slow} (spread {spread:.6})"
        ))
    }
}

/// Momentum vote from the rate of change over a lookback window.
pub struct Momentum {
    pub period: usize,
    /// Minimum absolute rate of change before the strategy votes.
    pub threshold: Decimal,
}

impl Default for Momentum {
    fn default() -> Self {
        Self {
            period: 12,
            threshold: Decimal::new(5, 3), // 0.005
        }
    }
}

impl Strategy for Momentum {
    fn id(&self) -> &str {
        "momentum"
    }

    fn evaluate(&self, view: &MarketView<'_>) -> Signal {
        let closes = view.closes();
        let Some(roc) = rate_of_change(&closes, self.period) else {
            return Signal::new(self.id(), Action::Hold, 0.0)
                .with_reason("insufficient history for rate of change");
        };
        if roc.abs() < self.threshold {
            return Signal::new(self.id(), Action::Hold, 0.0);
        }
        let action = if roc > Decimal::ZERO {
            Action::Buy
        } else {
            Action::Sell
        };
        let confidence = decimal_conf(roc * Decimal::from(10));
        Signal::new(self.id(), action, confidence)
            .with_reason(format!("rate of change {roc:.6} over {} bars", self.period))
    }
}

/// Mean-reversion vote from RSI extremes.
pub struct RsiReversion {
    pub period: usize,
    pub oversold: Decimal,
    pub overbought: Decimal,
}

impl Default for RsiReversion {
    fn default() -> Self {
        Self {
            period: 14,
            oversold: Decimal::from(30),
            overbought: Decimal::from(70),
        }
    }
}

impl Strategy for RsiReversion {
    fn id(&self) -> &str {
        "rsi-reversion"
    }

    fn evaluate(&self, view: &MarketView<'_>) -> Signal {
        let closes = view.closes();
        let Some(value) = rsi(&closes, self.period) else {
            return Signal::new(self.id(), Action::Hold, 0.0)
                .with_reason("insufficient history for rsi");
        };
        if value < self.oversold && self.oversold > Decimal::ZERO {
            let confidence = decimal_conf((self.oversold - value) / self.oversold);
            return Signal::new(self.id(), Action::Buy, confidence)
                .with_reason(format!("rsi {value:.2} below oversold {}", self.oversold));
        }
        let ceiling = Decimal::ONE_HUNDRED - self.overbought;
        if value > self.overbought && ceiling > Decimal::ZERO {
            let confidence = decimal_conf((value - self.overbought) / ceiling);
            return Signal::new(self.id(), Action::Sell, confidence)
                .with_reason(format!("rsi {value:.2} above overbought {}", self.overbought));
        }
        Signal::new(self.id(), Action::Hold, 0.0)
    }
}

/// Watches open positions for stop/target breaches and raises the
/// priority exit that overrides the aggregate vote.
#[derive(Default)]
pub struct ProtectiveStops;

impl Strategy for ProtectiveStops {
    fn id(&self) -> &str {
        "protective-stops"
    }

    fn evaluate(&self, view: &MarketView<'_>) -> Signal {
        let Some(position) = view.position else {
            return Signal::new(self.id(), Action::Hold, 0.0);
        };
        let exit_action = if position.is_long() {
            Action::Sell
        } else {
            Action::Buy
        };
        if let Some(stop) = position.stop_price {
            let breached = if position.is_long() {
                view.last <= stop
            } else {
                view.last >= stop
            };
            if breached {
                return Signal::new(self.id(), exit_action, 1.0)
                    .with_reason(format!("stop {stop} breached at {}", view.last))
                    .into_hard_exit();
            }
        }
        if let Some(target) = position.target_price {
            let reached = if position.is_long() {
                view.last >= target
            } else {
                view.last <= target
            };
            if reached {
                return Signal::new(self.id(), exit_action, 1.0)
                    .with_reason(format!("target {target} reached at {}", view.last))
                    .into_hard_exit();
            }
        }
        Signal::new(self.id(), Action::Hold, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbiter_core::{Candle, Position};
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn candles(closes: &[i64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, close)| {
                let price = Decimal::from(*close);
                Candle {
                    symbol: "AAPL".into(),
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    start: Utc.with_ymd_and_hms(2025, 3, 3, 0, 0, 0).unwrap()
                        + chrono::Duration::minutes(i as i64),
                }
            })
            .collect()
    }

    fn view<'a>(candles: &'a [Candle], position: Option<&'a Position>) -> MarketView<'a> {
        MarketView {
            symbol: "AAPL",
            candles,
            last: candles.last().map(|c| c.close).unwrap_or_default(),
            position,
        }
    }

    #[test]
    fn sma_cross_votes_trend_direction() {
        let strategy = SmaCross {
            fast_period: 2,
            slow_period: 4,
        };
        let rising = candles(&[100, 101, 103, 106, 110]);
        let signal = strategy.evaluate(&view(&rising, None));
        assert_eq!(signal.action, Action::Buy);
        assert!(signal.confidence > 0.0);

        let falling = candles(&[110, 106, 103, 101, 100]);
        let signal = strategy.evaluate(&view(&falling, None));
        assert_eq!(signal.action, Action::Sell);
    }

    #[test]
    fn short_history_yields_zero_confidence_hold() {
        let strategy = SmaCross::default();
        let short = candles(&[100, 101]);
        let signal = strategy.evaluate(&view(&short, None));
        assert_eq!(signal.action, Action::Hold);
        assert_eq!(signal.confidence, 0.0);
    }

    #[test]
    fn momentum_holds_below_threshold() {
        let strategy = Momentum {
            period: 3,
            threshold: dec!(0.05),
        };
        let flat = candles(&[100, 100, 100, 101]);
        assert_eq!(strategy.evaluate(&view(&flat, None)).action, Action::Hold);

        let surging = candles(&[100, 104, 108, 112]);
        let signal = strategy.evaluate(&view(&surging, None));
        assert_eq!(signal.action, Action::Buy);
        assert!(signal.confidence > 0.5);
    }

    #[test]
    fn rsi_reversion_fades_extremes() {
        let strategy = RsiReversion {
            period: 5,
            oversold: dec!(30),
            overbought: dec!(70),
        };
        let crash = candles(&[100, 96, 92, 88, 84, 80]);
        let signal = strategy.evaluate(&view(&crash, None));
        assert_eq!(signal.action, Action::Buy);

        let melt_up = candles(&[100, 104, 108, 112, 116, 120]);
        let signal = strategy.evaluate(&view(&melt_up, None));
        assert_eq!(signal.action, Action::Sell);
    }

    #[test]
    fn protective_stops_raise_hard_exit() {
        let now = Utc::now();
        let position = Position {
            symbol: "AAPL".into(),
            quantity: dec!(10),
            entry_price: dec!(100),
            current_price: dec!(94),
            realized_pnl: Decimal::ZERO,
            stop_price: Some(dec!(95)),
            target_price: Some(dec!(120)),
            opened_at: now,
            updated_at: now,
        };
        let strategy = ProtectiveStops;
        let bars = candles(&[100, 98, 94]);
        let signal = strategy.evaluate(&view(&bars, Some(&position)));
        assert!(signal.hard_exit);
        assert_eq!(signal.action, Action::Sell);
    }
}
