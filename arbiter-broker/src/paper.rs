//! In-process paper broker used for dry runs and tests.
//!
//! Fills market orders synchronously at the last seeded price. Missing
//! prices are rejected rather than invented; the engine treats the
//! symbol as untradable for the cycle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use arbiter_core::{
    Fill, Order, OrderId, OrderRequest, OrderStatus, OrderType, Price, Quote, Side, Symbol,
};

use crate::{BrokerError, BrokerGateway, BrokerInfo, BrokerResult, OrderAck};

const BPS_DENOMINATOR: Decimal = Decimal::from_parts(10_000, 0, 0, false, 0);

/// Simulation parameters for the paper broker.
#[derive(Clone, Copy, Debug)]
pub struct PaperBrokerConfig {
    /// Half-spread applied around the last price when quoting.
    pub spread_bps: Decimal,
    /// Adverse price movement applied to fills.
    pub slippage_bps: Decimal,
    /// Commission charged on fill notional.
    pub fee_bps: Decimal,
}

impl Default for PaperBrokerConfig {
    fn default() -> Self {
        Self {
            spread_bps: Decimal::ONE,
            slippage_bps: Decimal::ZERO,
            fee_bps: Decimal::ZERO,
        }
    }
}

/// Deterministic in-memory gateway implementation.
pub struct PaperBroker {
    config: PaperBrokerConfig,
    last_prices: Mutex<HashMap<Symbol, Price>>,
    orders: Mutex<Vec<Order>>,
    fail_next: AtomicU32,
    calls: AtomicU64,
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new(PaperBrokerConfig::default())
    }
}

impl PaperBroker {
    #[must_use]
    pub fn new(config: PaperBrokerConfig) -> Self {
        Self {
            config,
            last_prices: Mutex::new(HashMap::new()),
            orders: Mutex::new(Vec::new()),
            fail_next: AtomicU32::new(0),
            calls: AtomicU64::new(0),
        }
    }

    /// Seed or update the last traded price for a symbol.
    pub fn set_price(&self, symbol: &str, price: Price) {
        let mut prices = self.last_prices.lock().unwrap();
        prices.insert(symbol.to_string(), price);
    }

    /// Inject `count` transport failures into upcoming calls.
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Number of calls that reached the broker (tests use this to prove
    /// fast-fail paths never touch the gateway).
    #[must_use]
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Orders accepted so far, newest last.
    #[must_use]
    pub fn orders(&self) -> Vec<Order> {
        self.orders.lock().unwrap().clone()
    }

    fn admit(&self) -> BrokerResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if remaining {
            return Err(BrokerError::Transport("injected failure".into()));
        }
        Ok(())
    }

    fn last_price(&self, symbol: &str) -> BrokerResult<Price> {
        self.last_prices
            .lock()
            .unwrap()
            .get(symbol)
            .copied()
            .ok_or_else(|| BrokerError::Rejected(format!("no market for symbol {symbol}")))
    }

    fn fill_price(&self, base: Price, side: Side) -> Price {
        let rate = self.config.slippage_bps.max(Decimal::ZERO) / BPS_DENOMINATOR;
        match side {
            Side::Buy => base * (Decimal::ONE + rate),
            Side::Sell => base * (Decimal::ONE - rate),
        }
    }
}

#[async_trait]
impl BrokerGateway for PaperBroker {
    fn info(&self) -> BrokerInfo {
        BrokerInfo {
            name: "paper".into(),
            paper: true,
        }
    }

    async fn get_quote(&self, symbol: &str) -> BrokerResult<Quote> {
        self.admit()?;
        let last = self.last_price(symbol)?;
        let half_spread = last * self.config.spread_bps.max(Decimal::ZERO) / BPS_DENOMINATOR;
        Ok(Quote {
            symbol: symbol.to_string(),
            bid: last - half_spread,
            ask: last + half_spread,
            last,
            timestamp: Utc::now(),
        })
    }

    async fn place_order(&self, request: OrderRequest) -> BrokerResult<OrderAck> {
        self.admit()?;
        if request.quantity <= Decimal::ZERO {
            return Err(BrokerError::InvalidRequest(
                "order quantity must be positive".into(),
            ));
        }
        let base = match request.order_type {
            OrderType::Market => self.last_price(&request.symbol)?,
            OrderType::Limit => request
                .price
                .ok_or_else(|| BrokerError::InvalidRequest("limit order requires price".into()))?,
        };
        let fill_price = self.fill_price(base, request.side);
        let fee = fill_price * request.quantity * self.config.fee_bps.max(Decimal::ZERO)
            / BPS_DENOMINATOR;
        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4().to_string(),
            request: request.clone(),
            status: OrderStatus::Filled,
            filled_quantity: request.quantity,
            avg_fill_price: Some(fill_price),
            created_at: now,
            updated_at: now,
        };
        let fill = Fill {
            order_id: order.id.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            quantity: request.quantity,
            price: fill_price,
            fee,
            timestamp: now,
        };
        self.orders.lock().unwrap().push(order.clone());
        info!(
            symbol = %request.symbol,
            side = ?request.side,
            qty = %request.quantity,
            price = %fill_price,
            "paper order filled"
        );
        Ok(OrderAck {
            order,
            fill: Some(fill),
        })
    }

    async fn cancel_order(&self, order_id: &OrderId) -> BrokerResult<()> {
        self.admit()?;
        let mut orders = self.orders.lock().unwrap();
        match orders.iter_mut().find(|order| order.id == *order_id) {
            Some(order) => {
                order.status = OrderStatus::Canceled;
                order.updated_at = Utc::now();
                Ok(())
            }
            None => Err(BrokerError::Rejected(format!("order {order_id} not found"))),
        }
    }
}
