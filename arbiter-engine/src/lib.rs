//! The trading engine orchestrator: drives the evaluation loop (fetch
//! data, run strategies, aggregate, risk-check, execute, persist) and
//! owns the lifecycle state machine.
//!
//! All shared components live in an [`EngineContext`] constructed once
//! at startup and passed in; there are no ambient globals.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

use arbiter_broker::BrokerGateway;
use arbiter_core::{Position, Side, Symbol, TradeEvent};
use arbiter_market::{CachedQuote, CandleSeries, InstrumentRegistry, QuoteCache};
use arbiter_portfolio::{
    ExecutionConfig, Portfolio, PortfolioConfig, PortfolioSnapshot, TradeExecutor, TradeOutcome,
};
use arbiter_risk::RiskManager;
use arbiter_state::StateManager;
use arbiter_strategy::{MarketView, SignalAggregator, StrategySet};

mod alerts;
mod control;

pub use alerts::{AlertDispatcher, AlertManager};
pub use control::ControlHandle;

/// Engine lifecycle states. Running is entered only after successful
/// recovery (or an explicit clean start) and an unpaused control handle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EnginePhase {
    Init,
    Recovering,
    Ready,
    Running,
    Paused,
    ShuttingDown,
    Stopped,
}

/// Loop timing and history sizing.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Delay between evaluation cycles.
    pub cycle_interval: Duration,
    /// Width of the OHLC buckets strategies consume.
    pub candle_interval: chrono::Duration,
    /// Sealed candles retained per symbol.
    pub history_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cycle_interval: Duration::from_secs(1),
            candle_interval: chrono::Duration::minutes(1),
            history_capacity: 256,
        }
    }
}

/// Shared components wired once at startup and handed to the engine.
pub struct EngineContext {
    pub registry: Arc<InstrumentRegistry>,
    pub cache: Arc<QuoteCache>,
    pub gateway: Arc<dyn BrokerGateway>,
    pub risk: Arc<RiskManager>,
    pub state: Arc<StateManager>,
    pub alerts: Arc<AlertManager>,
}

/// The orchestrator. One instance drives one evaluation loop.
pub struct TradingEngine {
    ctx: EngineContext,
    config: EngineConfig,
    strategies: StrategySet,
    aggregator: SignalAggregator,
    portfolio: Arc<Portfolio>,
    executor: TradeExecutor,
    control: ControlHandle,
    phase_tx: watch::Sender<EnginePhase>,
    phase_rx: watch::Receiver<EnginePhase>,
    series: HashMap<Symbol, CandleSeries>,
}

impl TradingEngine {
    /// Recover persisted state and wire the engine.
    ///
    /// A snapshot that exists but fails verification is fatal: the
    /// engine refuses to reach the running state on unverified books.
    pub async fn bootstrap(
        ctx: EngineContext,
        config: EngineConfig,
        strategies: StrategySet,
        aggregator: SignalAggregator,
        portfolio_config: PortfolioConfig,
        execution_config: ExecutionConfig,
        control: ControlHandle,
    ) -> Result<Self> {
        let (phase_tx, phase_rx) = watch::channel(EnginePhase::Init);
        phase_tx.send_replace(EnginePhase::Recovering);
        info!(broker = %ctx.gateway.info().name, "recovering portfolio state");

        let state = ctx.state.clone();
        let recovered = tokio::task::spawn_blocking(move || state.recover())
            .await
            .context("state recovery task panicked")?
            .context("state recovery failed; refusing to trade on unverified state")?;

        let portfolio = Arc::new(match recovered {
            Some(snapshot) => {
                info!(
                    version = snapshot.version,
                    cash = %snapshot.cash,
                    positions = snapshot.positions.len(),
                    "portfolio restored from snapshot"
                );
                Portfolio::from_snapshot(&snapshot, portfolio_config)
            }
            None => {
                info!(initial_cash = %portfolio_config.initial_cash, "starting with a clean portfolio");
                Portfolio::new(portfolio_config)
            }
        });

        let executor = TradeExecutor::new(
            portfolio.clone(),
            ctx.gateway.clone(),
            ctx.risk.clone(),
            execution_config,
        );

        let mut series = HashMap::new();
        for symbol in ctx.registry.symbols() {
            series.insert(
                symbol.clone(),
                CandleSeries::new(symbol, config.candle_interval, config.history_capacity),
            );
        }

        phase_tx.send_replace(EnginePhase::Ready);
        Ok(Self {
            ctx,
            config,
            strategies,
            aggregator,
            portfolio,
            executor,
            control,
            phase_tx,
            phase_rx,
            series,
        })
    }

    /// Control handle accepted from the outside world.
    #[must_use]
    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> EnginePhase {
        *self.phase_rx.borrow()
    }

    /// Watch lifecycle transitions.
    #[must_use]
    pub fn watch_phase(&self) -> watch::Receiver<EnginePhase> {
        self.phase_rx.clone()
    }

    /// Read-only trade event feed for telemetry consumers.
    #[must_use]
    pub fn subscribe_trades(&self) -> broadcast::Receiver<TradeEvent> {
        self.executor.subscribe()
    }

    /// Read-only snapshot of the portfolio for telemetry consumers.
    #[must_use]
    pub fn portfolio_snapshot(&self) -> PortfolioSnapshot {
        self.portfolio.snapshot(self.ctx.state.current_version())
    }

    /// Shared portfolio handle, mainly for tests and wiring.
    #[must_use]
    pub fn portfolio(&self) -> Arc<Portfolio> {
        self.portfolio.clone()
    }

    /// Drive the evaluation loop until the kill switch fires, then flush
    /// state and stop.
    pub async fn run(mut self) -> Result<()> {
        info!("engine loop starting");
        while !self.control.kill_requested() {
            if self.control.is_paused() {
                self.set_phase(EnginePhase::Paused);
                if !self.control.sleep(self.config.cycle_interval).await {
                    break;
                }
                continue;
            }
            self.set_phase(EnginePhase::Running);
            self.cycle().await;
            self.persist(false).await;
            if !self.control.sleep(self.config.cycle_interval).await {
                break;
            }
        }
        self.set_phase(EnginePhase::ShuttingDown);
        info!("engine shutting down; flushing state");
        self.persist(true).await;
        self.set_phase(EnginePhase::Stopped);
        info!("engine stopped");
        Ok(())
    }

    /// One full evaluation cycle over every registered symbol. Exposed
    /// so tests can drive the engine deterministically.
    pub async fn cycle(&mut self) {
        for symbol in self.ctx.registry.symbols() {
            self.evaluate_symbol(&symbol).await;
        }
    }

    fn set_phase(&self, phase: EnginePhase) {
        let changed = *self.phase_rx.borrow() != phase;
        if changed {
            debug!(?phase, "lifecycle transition");
        }
        self.phase_tx.send_replace(phase);
    }

    async fn evaluate_symbol(&mut self, symbol: &str) {
        let Ok(instrument) = self.ctx.registry.resolve(symbol) else {
            return;
        };
        // Missing market data fails closed: no quote, no trade, never a
        // synthesized price.
        let Some(hit) = self.fetch_quote(symbol).await else {
            debug!(symbol, "no market data; skipping symbol this cycle");
            return;
        };
        let CachedQuote { quote, stale } = hit;
        if !stale {
            if let Some(series) = self.series.get_mut(symbol) {
                series.record(&quote);
            }
        }
        self.portfolio.mark_price(symbol, quote.last);

        if let Some(position) = self.portfolio.position(symbol) {
            if let Some(new_stop) = self.ctx.risk.trail_stop(&position, quote.last) {
                info!(
                    symbol,
                    stop = %new_stop,
                    "price crossed halfway to target; stop trailed to breakeven"
                );
                self.portfolio
                    .set_protective_levels(symbol, Some(new_stop), None);
                self.portfolio.mark_dirty();
            }
        }

        let position = self.portfolio.position(symbol);
        let candles = self
            .series
            .get(symbol)
            .map(CandleSeries::candles)
            .unwrap_or_default();
        let view = MarketView {
            symbol,
            candles: &candles,
            last: quote.last,
            position: position.as_ref(),
        };
        let weighted = self.strategies.evaluate(&view);
        let closing = position.is_some();
        let decision = self.aggregator.aggregate(symbol, &weighted, closing);

        match (&position, decision.action.side()) {
            (Some(position), Some(side)) if side != held_side(position) => {
                let outcome = self
                    .executor
                    .execute_exit(&instrument, position, decision.confidence, quote.last)
                    .await;
                self.handle_outcome(symbol, outcome).await;
            }
            (Some(_), _) => {
                // Aggregate agrees with the held direction (or holds):
                // keep the position as is.
            }
            (None, Some(_)) => {
                if stale {
                    debug!(symbol, "quote is stale; declining to open new exposure");
                    return;
                }
                let outcome = self
                    .executor
                    .execute_entry(&instrument, &decision, &candles, quote.last)
                    .await;
                self.handle_outcome(symbol, outcome).await;
            }
            (None, None) => {}
        }
    }

    async fn handle_outcome(&self, symbol: &str, outcome: TradeOutcome) {
        match outcome {
            TradeOutcome::Executed(event) => {
                self.ctx.alerts.reset_order_failures();
                debug!(
                    symbol,
                    order_id = %event.order_id,
                    closing = event.closing,
                    "execution committed"
                );
            }
            TradeOutcome::Declined(reason) => {
                debug!(symbol, %reason, "trade declined");
            }
            TradeOutcome::Failed { error } => {
                error!(symbol, %error, "order failed");
                self.ctx.alerts.order_failure(&error).await;
                self.ctx
                    .alerts
                    .notify("Order failed", &format!("{symbol}: {error}"))
                    .await;
            }
        }
    }

    /// Serve a quote from the cache, refreshing through the guarded
    /// gateway on expiry. A failed refresh degrades to the stale entry;
    /// a symbol with no data at all yields `None`.
    async fn fetch_quote(&self, symbol: &str) -> Option<CachedQuote> {
        if let Some(quote) = self.ctx.cache.get_fresh(symbol) {
            return Some(CachedQuote {
                quote,
                stale: false,
            });
        }
        match self.ctx.gateway.get_quote(symbol).await {
            Ok(quote) => {
                self.ctx.cache.insert(quote.clone());
                Some(CachedQuote {
                    quote,
                    stale: false,
                })
            }
            Err(err) => {
                warn!(symbol, error = %err, "quote refresh failed; falling back to last known");
                self.ctx.cache.get(symbol)
            }
        }
    }

    async fn persist(&self, force: bool) {
        if !force && !self.portfolio.is_dirty() {
            return;
        }
        let state = self.ctx.state.clone();
        let portfolio = self.portfolio.clone();
        match tokio::task::spawn_blocking(move || state.persist(&portfolio, force)).await {
            Ok(Ok(Some(version))) => {
                self.portfolio.take_dirty();
                debug!(version, "state persisted");
            }
            Ok(Ok(None)) => {
                // Throttled; the dirty flag stays set for the next cycle.
            }
            Ok(Err(err)) => {
                error!(error = %err, "state persistence failed");
                self.ctx
                    .alerts
                    .notify("State persistence failed", &err.to_string())
                    .await;
            }
            Err(err) => error!(error = %err, "state persistence task panicked"),
        }
    }
}

fn held_side(position: &Position) -> Side {
    if position.is_long() {
        Side::Buy
    } else {
        Side::Sell
    }
}
