//! Trade execution: risk gate, guarded broker submission with bounded
//! retries, then a single atomic ledger commit per fill.
//!
//! Lock order on this path is fixed: the guarded gateway acquires the
//! rate limiter and circuit breaker first; the ledger writer lock is
//! only taken after the fill confirmation comes back.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use arbiter_broker::{BrokerError, BrokerGateway, OrderAck};
use arbiter_core::{
    Candle, Decision, Instrument, OrderRequest, OrderType, Position, Price, Symbol, TradeEvent,
};
use arbiter_risk::{RiskManager, RiskRejected, SizedTrade};

use crate::Portfolio;

/// Why a trade was declined before any broker call or state change.
#[derive(Debug, Error)]
pub enum DeclineReason {
    #[error("instrument {0} is not tradable")]
    NotTradable(Symbol),
    #[error("market for {0} is closed")]
    MarketClosed(Symbol),
    #[error("decision for {0} is hold; nothing to execute")]
    NotActionable(Symbol),
    #[error(transparent)]
    Risk(#[from] RiskRejected),
}

/// Structured result of one execution attempt.
#[derive(Debug)]
pub enum TradeOutcome {
    /// Fill confirmed and committed to the ledger.
    Executed(TradeEvent),
    /// Rejected before any state change; never retried.
    Declined(DeclineReason),
    /// Broker retries exhausted or ledger commit refused; the order is
    /// marked failed and cash/positions are unchanged.
    Failed { error: String },
}

impl TradeOutcome {
    /// Whether the outcome mutated portfolio state.
    #[must_use]
    pub fn is_executed(&self) -> bool {
        matches!(self, Self::Executed(_))
    }
}

/// Retry tuning for broker submissions.
#[derive(Clone, Copy, Debug)]
pub struct ExecutionConfig {
    /// Retries after the initial attempt, transient failures only.
    pub retry_limit: u32,
    /// First backoff delay; doubles per retry.
    pub backoff_base: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            backoff_base: Duration::from_millis(250),
        }
    }
}

/// Drives the full execute-trade path against a guarded gateway.
pub struct TradeExecutor {
    portfolio: Arc<Portfolio>,
    gateway: Arc<dyn BrokerGateway>,
    risk: Arc<RiskManager>,
    config: ExecutionConfig,
    events: broadcast::Sender<TradeEvent>,
}

impl TradeExecutor {
    #[must_use]
    pub fn new(
        portfolio: Arc<Portfolio>,
        gateway: Arc<dyn BrokerGateway>,
        risk: Arc<RiskManager>,
        config: ExecutionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            portfolio,
            gateway,
            risk,
            config,
            events,
        }
    }

    /// Subscribe to the read-only trade event feed.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TradeEvent> {
        self.events.subscribe()
    }

    /// Execute an aggregated entry decision.
    pub async fn execute_entry(
        &self,
        instrument: &Instrument,
        decision: &Decision,
        candles: &[Candle],
        last: Price,
    ) -> TradeOutcome {
        let Some(side) = decision.action.side() else {
            return TradeOutcome::Declined(DeclineReason::NotActionable(instrument.symbol.clone()));
        };
        if let Some(declined) = self.check_tradability(instrument) {
            return declined;
        }
        let exposure = self
            .portfolio
            .exposure(&instrument.symbol, instrument.sector.as_deref());
        let sized = match self
            .risk
            .evaluate_entry(instrument, side, last, candles, &exposure)
        {
            Ok(sized) => sized,
            Err(rejected) => {
                info!(
                    symbol = %instrument.symbol,
                    reason = %rejected,
                    "entry declined by risk manager"
                );
                return TradeOutcome::Declined(rejected.into());
            }
        };
        self.submit_and_commit(instrument, sized, decision.confidence, false)
            .await
    }

    /// Execute an exit for an open position. Exits bypass the entry-only
    /// risk limits and must never be blocked by reward:risk.
    pub async fn execute_exit(
        &self,
        instrument: &Instrument,
        position: &Position,
        confidence: f64,
        last: Price,
    ) -> TradeOutcome {
        if let Some(declined) = self.check_tradability(instrument) {
            return declined;
        }
        let sized = self.risk.evaluate_exit(position, last);
        self.submit_and_commit(instrument, sized, confidence, true)
            .await
    }

    fn check_tradability(&self, instrument: &Instrument) -> Option<TradeOutcome> {
        if !instrument.tradable {
            return Some(TradeOutcome::Declined(DeclineReason::NotTradable(
                instrument.symbol.clone(),
            )));
        }
        if !instrument.is_open_at(Utc::now()) {
            return Some(TradeOutcome::Declined(DeclineReason::MarketClosed(
                instrument.symbol.clone(),
            )));
        }
        None
    }

    async fn submit_and_commit(
        &self,
        instrument: &Instrument,
        sized: SizedTrade,
        confidence: f64,
        closing: bool,
    ) -> TradeOutcome {
        let request = OrderRequest {
            symbol: sized.symbol.clone(),
            side: sized.side,
            order_type: OrderType::Market,
            quantity: sized.quantity,
            price: None,
            client_order_id: Some(Uuid::new_v4().to_string()),
        };

        let ack = match self.place_with_retry(request).await {
            Ok(ack) => ack,
            Err(err) => {
                error!(
                    symbol = %sized.symbol,
                    side = ?sized.side,
                    error = %err,
                    "order failed after retries; ledger untouched"
                );
                return TradeOutcome::Failed {
                    error: err.to_string(),
                };
            }
        };
        let Some(fill) = ack.fill else {
            warn!(
                order_id = %ack.order.id,
                symbol = %sized.symbol,
                "order accepted without synchronous fill; no state change"
            );
            return TradeOutcome::Failed {
                error: format!("order {} reported no fill", ack.order.id),
            };
        };

        let realized_before = self.portfolio.realized_pnl();
        {
            let mut txn = self.portfolio.begin();
            txn.stage_cash(-fill.notional() * fill.side.sign())
                .stage_fee(fill.fee)
                .stage_position(
                    fill.symbol.clone(),
                    fill.quantity * fill.side.sign(),
                    fill.price,
                );
            if let Err(err) = txn.commit() {
                error!(
                    order_id = %fill.order_id,
                    symbol = %fill.symbol,
                    error = %err,
                    "ledger refused fill; transaction rolled back"
                );
                return TradeOutcome::Failed {
                    error: err.to_string(),
                };
            }
        }

        if closing {
            self.portfolio.record_trade(&fill.symbol);
        } else {
            self.portfolio.set_protective_levels(
                &fill.symbol,
                Some(sized.stop_price),
                Some(sized.target_price),
            );
            self.portfolio
                .note_sector(&fill.symbol, instrument.sector.as_deref());
            self.portfolio.record_trade(&fill.symbol);
        }
        self.portfolio.mark_dirty();

        let event = TradeEvent {
            id: Uuid::new_v4(),
            order_id: fill.order_id.clone(),
            symbol: fill.symbol.clone(),
            side: fill.side,
            quantity: fill.quantity,
            price: fill.price,
            fee: fill.fee,
            realized_pnl_delta: self.portfolio.realized_pnl() - realized_before,
            confidence,
            closing,
            timestamp: fill.timestamp,
        };
        info!(
            symbol = %event.symbol,
            side = ?event.side,
            qty = %event.quantity,
            price = %event.price,
            closing,
            "trade committed"
        );
        let _ = self.events.send(event.clone());
        TradeOutcome::Executed(event)
    }

    async fn place_with_retry(&self, request: OrderRequest) -> Result<OrderAck, BrokerError> {
        let mut attempt = 0u32;
        loop {
            match self.gateway.place_order(request.clone()).await {
                Ok(ack) => return Ok(ack),
                Err(err) if err.is_transient() && attempt < self.config.retry_limit => {
                    let delay = self.config.backoff_base * 2u32.saturating_pow(attempt);
                    warn!(
                        symbol = %request.symbol,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient broker failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
