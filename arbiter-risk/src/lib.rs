//! Position sizing, stop/target computation, and portfolio-level limit
//! enforcement. Every declined trade carries a typed, structured reason.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use arbiter_core::{Candle, Instrument, Position, Price, Quantity, Side, Symbol};

pub mod volatility;

pub use volatility::{atr, VolatilityRegime};

/// Result alias for risk checks.
pub type RiskResult<T> = Result<T, RiskRejected>;

/// Typed reasons a prospective trade is declined. Declines are logged
/// and surfaced, never retried.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RiskRejected {
    #[error("computed size {size} is below one lot of {lot_size}")]
    SizeBelowMinimum { size: Quantity, lot_size: Quantity },
    #[error("reward:risk {ratio} below configured minimum {minimum}")]
    RewardRiskTooLow { ratio: Decimal, minimum: Decimal },
    #[error("open position limit reached ({limit})")]
    MaxOpenPositions { limit: usize },
    #[error("daily trade limit for {symbol} reached ({limit})")]
    MaxTradesPerSymbol { symbol: Symbol, limit: u32 },
    #[error("sector {sector} exposure would exceed {limit} of equity")]
    SectorExposureExceeded { sector: String, limit: Decimal },
    #[error("aggregate notional would exceed limit {limit}")]
    NotionalExceeded { limit: Decimal },
    #[error("stop distance is zero; cannot size the trade")]
    ZeroRiskDistance,
    #[error("insufficient candle history to measure volatility")]
    InsufficientHistory,
}

/// Risk configuration shared by entries and exits.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RiskConfig {
    /// Fraction of equity risked per trade (e.g. 0.01 for 1%).
    pub risk_fraction: Decimal,
    /// Minimum acceptable reward:risk ratio for entries.
    pub min_reward_risk: Decimal,
    pub max_open_positions: usize,
    pub max_trades_per_symbol_per_day: u32,
    /// Maximum per-sector notional as a fraction of equity.
    pub max_sector_exposure: Decimal,
    /// Maximum aggregate notional across all positions.
    pub max_total_notional: Decimal,
    /// ATR lookback for stop/target derivation.
    pub atr_period: usize,
    /// Stop distance in ATR multiples.
    pub stop_atr_multiple: Decimal,
    /// Target distance in ATR multiples.
    pub target_atr_multiple: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_fraction: Decimal::new(1, 2),
            min_reward_risk: Decimal::new(15, 1),
            max_open_positions: 10,
            max_trades_per_symbol_per_day: 5,
            max_sector_exposure: Decimal::new(25, 2),
            max_total_notional: Decimal::from(1_000_000),
            atr_period: 14,
            stop_atr_multiple: Decimal::TWO,
            target_atr_multiple: Decimal::from(4),
        }
    }
}

/// Exposure snapshot the portfolio computes under its lock and hands to
/// the risk manager, so limit checks never re-enter portfolio locking.
#[derive(Clone, Debug, Default)]
pub struct PortfolioExposure {
    pub equity: Decimal,
    pub open_positions: usize,
    pub has_position_in_symbol: bool,
    pub trades_today_for_symbol: u32,
    /// Current notional held in the candidate instrument's sector.
    pub sector_notional: Decimal,
    pub total_notional: Decimal,
}

/// A fully sized and risk-approved trade, ready for execution.
#[derive(Clone, Debug, PartialEq)]
pub struct SizedTrade {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Quantity,
    pub entry_price: Price,
    pub stop_price: Price,
    pub target_price: Price,
    pub regime: VolatilityRegime,
}

/// Applies sizing, volatility scaling, and portfolio limits.
pub struct RiskManager {
    config: RiskConfig,
}

impl RiskManager {
    #[must_use]
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Fixed-fractional size: `floor((equity * risk_fraction) / |entry - stop|)`,
    /// scaled by the volatility regime and rounded down to the lot.
    pub fn position_size(
        &self,
        equity: Decimal,
        entry: Price,
        stop: Price,
        instrument: &Instrument,
        regime: VolatilityRegime,
    ) -> RiskResult<Quantity> {
        let risk_per_unit = (entry - stop).abs();
        if risk_per_unit.is_zero() {
            return Err(RiskRejected::ZeroRiskDistance);
        }
        let raw = ((equity * self.config.risk_fraction) / risk_per_unit).floor();
        let scaled = (raw * regime.size_factor()).floor();
        let size = instrument.round_to_lot(scaled);
        if size < instrument.lot_size.max(Decimal::ONE) {
            return Err(RiskRejected::SizeBelowMinimum {
                size,
                lot_size: instrument.lot_size,
            });
        }
        Ok(size)
    }

    /// Validate and size a prospective entry. Stops and targets derive
    /// from ATR multiples; the volatility regime scales the size.
    pub fn evaluate_entry(
        &self,
        instrument: &Instrument,
        side: Side,
        entry: Price,
        candles: &[Candle],
        exposure: &PortfolioExposure,
    ) -> RiskResult<SizedTrade> {
        let atr_value =
            atr(candles, self.config.atr_period).ok_or(RiskRejected::InsufficientHistory)?;
        if atr_value.is_zero() || entry.is_zero() {
            return Err(RiskRejected::InsufficientHistory);
        }
        let regime = VolatilityRegime::classify(atr_value / entry);

        let stop_offset = atr_value * self.config.stop_atr_multiple;
        let target_offset = atr_value * self.config.target_atr_multiple;
        let (stop, target) = match side {
            Side::Buy => (entry - stop_offset, entry + target_offset),
            Side::Sell => (entry + stop_offset, entry - target_offset),
        };

        let ratio = reward_risk(entry, stop, target)?;
        if ratio < self.config.min_reward_risk {
            return Err(RiskRejected::RewardRiskTooLow {
                ratio,
                minimum: self.config.min_reward_risk,
            });
        }

        self.check_limits(instrument, exposure)?;

        let quantity = self.position_size(exposure.equity, entry, stop, instrument, regime)?;
        let notional = entry * quantity;
        if exposure.total_notional + notional > self.config.max_total_notional {
            return Err(RiskRejected::NotionalExceeded {
                limit: self.config.max_total_notional,
            });
        }
        if let Some(sector) = instrument.sector.as_deref() {
            let sector_cap = exposure.equity * self.config.max_sector_exposure;
            if exposure.sector_notional + notional > sector_cap {
                return Err(RiskRejected::SectorExposureExceeded {
                    sector: sector.to_string(),
                    limit: self.config.max_sector_exposure,
                });
            }
        }

        debug!(
            symbol = %instrument.symbol,
            side = ?side,
            qty = %quantity,
            stop = %stop,
            target = %target,
            regime = ?regime,
            "entry sized and approved"
        );
        Ok(SizedTrade {
            symbol: instrument.symbol.clone(),
            side,
            quantity,
            entry_price: entry,
            stop_price: stop,
            target_price: target,
            regime,
        })
    }

    /// Size an exit: close the full open quantity. Exits bypass the
    /// reward:risk minimum and the entry-only limits; an exit must never
    /// be blocked.
    #[must_use]
    pub fn evaluate_exit(&self, position: &Position, exit_price: Price) -> SizedTrade {
        let side = if position.is_long() {
            Side::Sell
        } else {
            Side::Buy
        };
        SizedTrade {
            symbol: position.symbol.clone(),
            side,
            quantity: position.quantity.abs(),
            entry_price: exit_price,
            stop_price: exit_price,
            target_price: exit_price,
            regime: VolatilityRegime::Normal,
        }
    }

    /// Trailing rule: once price has covered half the distance from
    /// entry to target, the stop moves to breakeven so the position can
    /// no longer realize a loss. Returns the updated stop when it moved.
    #[must_use]
    pub fn trail_stop(&self, position: &Position, last: Price) -> Option<Price> {
        let target = position.target_price?;
        let stop = position.stop_price?;
        let entry = position.entry_price;
        let halfway = entry + (target - entry) / Decimal::TWO;
        let crossed = if position.is_long() {
            last >= halfway && stop < entry
        } else {
            last <= halfway && stop > entry
        };
        crossed.then_some(entry)
    }

    fn check_limits(
        &self,
        instrument: &Instrument,
        exposure: &PortfolioExposure,
    ) -> RiskResult<()> {
        if !exposure.has_position_in_symbol
            && exposure.open_positions >= self.config.max_open_positions
        {
            return Err(RiskRejected::MaxOpenPositions {
                limit: self.config.max_open_positions,
            });
        }
        if exposure.trades_today_for_symbol >= self.config.max_trades_per_symbol_per_day {
            return Err(RiskRejected::MaxTradesPerSymbol {
                symbol: instrument.symbol.clone(),
                limit: self.config.max_trades_per_symbol_per_day,
            });
        }
        Ok(())
    }
}

fn reward_risk(entry: Price, stop: Price, target: Price) -> RiskResult<Decimal> {
    let risk = (entry - stop).abs();
    if risk.is_zero() {
        return Err(RiskRejected::ZeroRiskDistance);
    }
    Ok((target - entry).abs() / risk)
}
