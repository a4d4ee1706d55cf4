//! Fundamental data types shared across the entire workspace.

use chrono::{DateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Alias for price precision.
pub type Price = Decimal;
/// Alias for quantity precision.
pub type Quantity = Decimal;
/// Alias used for human-readable market symbols (e.g., `AAPL`).
pub type Symbol = String;
/// Unique identifier assigned to orders (broker or client provided).
pub type OrderId = String;
/// Identifier of the strategy that produced a signal.
pub type StrategyId = String;

/// The side of an order or fill.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Side {
    /// Buy the instrument.
    Buy,
    /// Sell the instrument.
    Sell,
}

impl Side {
    /// Returns the opposite side (buy <-> sell).
    #[must_use]
    pub fn inverse(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }

    /// Signed multiplier applied to quantities and cash flows.
    #[must_use]
    pub fn sign(self) -> Decimal {
        match self {
            Self::Buy => Decimal::ONE,
            Self::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

/// The trade action recommended by a strategy or by the aggregated vote.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    /// Directional sign used by the weighted vote (-1, 0, +1).
    #[must_use]
    pub fn vote_sign(self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
            Self::Hold => 0.0,
        }
    }

    /// Map an actionable decision onto an order side. `Hold` has none.
    #[must_use]
    pub fn side(self) -> Option<Side> {
        match self {
            Self::Buy => Some(Side::Buy),
            Self::Sell => Some(Side::Sell),
            Self::Hold => None,
        }
    }
}

/// Top-of-book quote served by the broker gateway.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Quote {
    pub symbol: Symbol,
    pub bid: Price,
    pub ask: Price,
    pub last: Price,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Midpoint between the current bid and ask.
    #[must_use]
    pub fn mid(&self) -> Price {
        (self.bid + self.ask) / Decimal::TWO
    }
}

/// OHLC bar aggregated from observed quotes over a fixed interval.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Candle {
    pub symbol: Symbol,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub start: DateTime<Utc>,
}

impl Candle {
    /// True range against the previous close, the ATR building block.
    #[must_use]
    pub fn true_range(&self, prev_close: Option<Price>) -> Price {
        let high_low = self.high - self.low;
        match prev_close {
            Some(prev) => high_low
                .max((self.high - prev).abs())
                .max((self.low - prev).abs()),
            None => high_low,
        }
    }
}

/// Daily session window an instrument is tradable in (UTC). `None` end
/// times are not supported; overnight sessions wrap past midnight.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct SessionHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl SessionHours {
    /// Whether the given time-of-day falls inside the session.
    #[must_use]
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.open <= self.close {
            time >= self.open && time < self.close
        } else {
            // Session wraps midnight (e.g. 22:00 -> 04:00).
            time >= self.open || time < self.close
        }
    }
}

/// Immutable metadata describing a tradable market.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Instrument {
    pub symbol: Symbol,
    pub lot_size: Quantity,
    pub tick_size: Price,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default = "default_tradable")]
    pub tradable: bool,
    /// Trading-hours window; `None` means the market never closes.
    #[serde(default)]
    pub session: Option<SessionHours>,
}

fn default_tradable() -> bool {
    true
}

impl Instrument {
    /// Round a raw quantity down to a whole number of lots.
    #[must_use]
    pub fn round_to_lot(&self, quantity: Quantity) -> Quantity {
        if self.lot_size <= Decimal::ZERO {
            return quantity;
        }
        (quantity / self.lot_size).floor() * self.lot_size
    }

    /// Whether the instrument can be traded at the given instant.
    #[must_use]
    pub fn is_open_at(&self, at: DateTime<Utc>) -> bool {
        if !self.tradable {
            return false;
        }
        match self.session {
            Some(session) => session.contains(at.time()),
            None => true,
        }
    }
}

/// Order execution style.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum OrderType {
    /// Execute immediately at best available price.
    Market,
    /// Execute at the provided limit price.
    Limit,
}

/// Desired order placement parameters.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: Quantity,
    pub price: Option<Price>,
    pub client_order_id: Option<String>,
}

/// High-level order status maintained inside the framework.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum OrderStatus {
    PendingNew,
    Filled,
    Canceled,
    Rejected,
    /// Terminal state applied locally once broker retries are exhausted.
    Failed,
}

/// Order representation that aggregates broker state.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub request: OrderRequest,
    pub status: OrderStatus,
    pub filled_quantity: Quantity,
    pub avg_fill_price: Option<Price>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Execution information emitted whenever an order is filled.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Fill {
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Quantity,
    pub price: Price,
    pub fee: Price,
    pub timestamp: DateTime<Utc>,
}

impl Fill {
    /// Gross cash notional of the fill, before fees.
    #[must_use]
    pub fn notional(&self) -> Price {
        self.price * self.quantity
    }
}

/// Snapshot of a portfolio position. Quantity is signed: positive for
/// long exposure, negative for short.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Position {
    pub symbol: Symbol,
    pub quantity: Quantity,
    pub entry_price: Price,
    pub current_price: Price,
    pub realized_pnl: Price,
    #[serde(default)]
    pub stop_price: Option<Price>,
    #[serde(default)]
    pub target_price: Option<Price>,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Profit or loss that would be realized by closing at the current price.
    #[must_use]
    pub fn unrealized_pnl(&self) -> Price {
        (self.current_price - self.entry_price) * self.quantity
    }

    /// Signed market value of the position at the current price.
    #[must_use]
    pub fn market_value(&self) -> Price {
        self.current_price * self.quantity
    }

    /// Absolute notional exposure of the position.
    #[must_use]
    pub fn notional(&self) -> Price {
        self.market_value().abs()
    }

    /// Whether the position is long (positive quantity).
    #[must_use]
    pub fn is_long(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    /// Update the mark price used for unrealized P&L and exposure.
    pub fn mark_price(&mut self, price: Price, at: DateTime<Utc>) {
        self.current_price = price;
        self.updated_at = at;
    }
}

/// High-level intent generated by a single strategy for one symbol.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Signal {
    pub strategy: StrategyId,
    pub action: Action,
    /// Conviction in `[0, 1]`.
    pub confidence: f64,
    pub reasons: Vec<String>,
    /// Set when the strategy detected a hard stop/target breach; forces a
    /// priority exit regardless of the aggregate vote.
    pub hard_exit: bool,
    pub generated_at: DateTime<Utc>,
}

impl Signal {
    /// Convenience constructor for a plain directional signal.
    #[must_use]
    pub fn new(strategy: impl Into<StrategyId>, action: Action, confidence: f64) -> Self {
        Self {
            strategy: strategy.into(),
            action,
            confidence: confidence.clamp(0.0, 1.0),
            reasons: Vec::new(),
            hard_exit: false,
            generated_at: Utc::now(),
        }
    }

    /// Attach a human-readable reason to the signal.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reasons.push(reason.into());
        self
    }

    /// Flag the signal as a hard exit (stop or target breach).
    #[must_use]
    pub fn into_hard_exit(mut self) -> Self {
        self.hard_exit = true;
        self
    }
}

/// The single trade action derived from combining strategy signals.
/// Derived per evaluation cycle and never persisted.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Decision {
    pub symbol: Symbol,
    pub action: Action,
    /// Magnitude of the weighted vote in `[0, 1]`.
    pub confidence: f64,
    /// Raw signed vote score before thresholding.
    pub score: f64,
    pub contributing: Vec<Signal>,
}

impl Decision {
    /// A neutral decision that leaves the book untouched.
    #[must_use]
    pub fn hold(symbol: impl Into<Symbol>) -> Self {
        Self {
            symbol: symbol.into(),
            action: Action::Hold,
            confidence: 0.0,
            score: 0.0,
            contributing: Vec::new(),
        }
    }
}

/// Immutable record published on the telemetry feed after a fill commits.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TradeEvent {
    pub id: Uuid,
    pub order_id: OrderId,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Quantity,
    pub price: Price,
    pub fee: Price,
    pub realized_pnl_delta: Price,
    pub confidence: f64,
    pub closing: bool,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn side_sign_matches_direction() {
        assert_eq!(Side::Buy.sign(), Decimal::ONE);
        assert_eq!(Side::Sell.sign(), Decimal::NEGATIVE_ONE);
        assert_eq!(Side::Buy.inverse(), Side::Sell);
    }

    #[test]
    fn position_unrealized_pnl_is_signed() {
        let now = Utc::now();
        let mut position = Position {
            symbol: "AAPL".into(),
            quantity: dec!(10),
            entry_price: dec!(100),
            current_price: dec!(100),
            realized_pnl: Decimal::ZERO,
            stop_price: None,
            target_price: None,
            opened_at: now,
            updated_at: now,
        };
        position.mark_price(dec!(105), now);
        assert_eq!(position.unrealized_pnl(), dec!(50));

        position.quantity = dec!(-10);
        assert_eq!(position.unrealized_pnl(), dec!(-50));
        assert_eq!(position.notional(), dec!(1050));
    }

    #[test]
    fn session_hours_wrap_midnight() {
        let session = SessionHours {
            open: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            close: NaiveTime::from_hms_opt(4, 0, 0).unwrap(),
        };
        assert!(session.contains(NaiveTime::from_hms_opt(23, 30, 0).unwrap()));
        assert!(session.contains(NaiveTime::from_hms_opt(1, 0, 0).unwrap()));
        assert!(!session.contains(NaiveTime::from_hms_opt(12, 0, 0).unwrap()));
    }

    #[test]
    fn instrument_rounds_quantity_to_lot() {
        let instrument = Instrument {
            symbol: "AAPL".into(),
            lot_size: dec!(10),
            tick_size: dec!(0.01),
            sector: Some("tech".into()),
            tradable: true,
            session: None,
        };
        assert_eq!(instrument.round_to_lot(dec!(57)), dec!(50));
        assert_eq!(instrument.round_to_lot(dec!(9.9)), dec!(0));
    }

    #[test]
    fn closed_instrument_rejects_out_of_session_timestamps() {
        let instrument = Instrument {
            symbol: "ES".into(),
            lot_size: Decimal::ONE,
            tick_size: dec!(0.25),
            sector: None,
            tradable: true,
            session: Some(SessionHours {
                open: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
                close: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            }),
        };
        let open = Utc.with_ymd_and_hms(2025, 3, 3, 10, 0, 0).unwrap();
        let closed = Utc.with_ymd_and_hms(2025, 3, 3, 20, 0, 0).unwrap();
        assert!(instrument.is_open_at(open));
        assert!(!instrument.is_open_at(closed));
    }
}
