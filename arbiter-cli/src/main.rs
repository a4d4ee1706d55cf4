use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use arbiter_broker::{BrokerGateway, GuardConfig, GuardedGateway, PaperBroker, PaperBrokerConfig};
use arbiter_engine::{
    AlertDispatcher, AlertManager, ControlHandle, EngineConfig, EngineContext, TradingEngine,
};
use arbiter_market::{InstrumentRegistry, QuoteCache, QuoteCacheConfig};
use arbiter_portfolio::{ExecutionConfig, PortfolioConfig};
use arbiter_risk::{RiskConfig, RiskManager};
use arbiter_state::{FileStore, MemoryStore, StateManager, StateManagerConfig, StateStore};
use arbiter_strategy::{
    AggregatorConfig, Momentum, ProtectiveStops, RsiReversion, SignalAggregator, SmaCross,
    StrategySet,
};

mod config;
mod telemetry;

use crate::config::{load_config, AppConfig};

#[derive(Parser)]
#[command(author, version, about = "Arbiter trading agent")]
struct Cli {
    /// Selects which configuration environment to load (maps to config/{env}.toml)
    #[arg(long)]
    env: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the trading engine against the paper broker
    Run,
    /// Print the newest recoverable portfolio snapshot as JSON
    Snapshot,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let app = load_config(cli.env.as_deref()).context("failed to load configuration")?;
    telemetry::init_tracing(&app.log_level, app.log_path.as_deref())?;

    match cli.command {
        Command::Run => run_engine(app).await,
        Command::Snapshot => print_snapshot(app),
    }
}

fn build_state_manager(app: &AppConfig) -> Result<Arc<StateManager>> {
    let mut tiers: Vec<Box<dyn StateStore>> = vec![Box::new(MemoryStore::new())];
    tiers.push(Box::new(
        FileStore::new("file", &app.state.dir).context("failed to open state directory")?,
    ));
    if let Some(backup) = &app.state.backup_dir {
        tiers.push(Box::new(
            FileStore::new("backup", backup).context("failed to open backup directory")?,
        ));
    }
    Ok(Arc::new(StateManager::new(
        tiers,
        StateManagerConfig {
            persist_interval: Duration::from_secs(app.state.persist_interval_seconds),
            consistency_tolerance: app.state.consistency_tolerance,
        },
    )))
}

fn build_gateway(app: &AppConfig) -> Arc<dyn BrokerGateway> {
    let paper = PaperBroker::new(PaperBrokerConfig {
        spread_bps: app.broker.paper.spread_bps,
        slippage_bps: app.broker.paper.slippage_bps,
        fee_bps: app.broker.paper.fee_bps,
    });
    for (symbol, price) in &app.broker.paper.seed_prices {
        paper.set_price(symbol, *price);
    }
    Arc::new(GuardedGateway::new(
        paper,
        GuardConfig {
            rate_limit_per_second: app.broker.rate_limit_per_second,
            rate_limit_burst: app.broker.rate_limit_burst,
            circuit_failure_threshold: app.broker.circuit_failure_threshold,
            circuit_cooldown: Duration::from_secs(app.broker.circuit_cooldown_seconds),
            circuit_failure_window: Duration::from_secs(app.broker.circuit_failure_window_seconds),
            acquire_timeout: Duration::from_millis(app.broker.acquire_timeout_ms),
            call_timeout: Duration::from_millis(app.broker.call_timeout_ms),
        },
    ))
}

fn build_strategies(app: &AppConfig) -> StrategySet {
    let mut strategies = StrategySet::new();
    let section = &app.strategies;
    if section.sma_cross.enabled {
        strategies.register(
            Box::new(SmaCross {
                fast_period: section.sma_cross.fast_period,
                slow_period: section.sma_cross.slow_period,
            }),
            section.sma_cross.weight,
        );
    }
    if section.momentum.enabled {
        strategies.register(
            Box::new(Momentum {
                period: section.momentum.period,
                threshold: section.momentum.threshold,
            }),
            section.momentum.weight,
        );
    }
    if section.rsi_reversion.enabled {
        strategies.register(
            Box::new(RsiReversion {
                period: section.rsi_reversion.period,
                oversold: section.rsi_reversion.oversold,
                overbought: section.rsi_reversion.overbought,
            }),
            section.rsi_reversion.weight,
        );
    }
    strategies.register(Box::new(ProtectiveStops), section.protective_stops_weight);
    strategies
}

async fn run_engine(app: AppConfig) -> Result<()> {
    if app.instruments.is_empty() {
        bail!("no instruments configured; nothing to trade");
    }
    let registry = Arc::new(
        InstrumentRegistry::from_instruments(app.instruments.clone())
            .map_err(|err| anyhow::anyhow!(err.to_string()))?,
    );
    let ctx = EngineContext {
        registry,
        cache: Arc::new(QuoteCache::new(QuoteCacheConfig {
            ttl: Duration::from_millis(app.market.quote_ttl_ms),
            capacity: app.market.cache_capacity,
        })),
        gateway: build_gateway(&app),
        risk: Arc::new(RiskManager::new(RiskConfig {
            risk_fraction: app.risk.risk_fraction,
            min_reward_risk: app.risk.min_reward_risk,
            max_open_positions: app.risk.max_open_positions,
            max_trades_per_symbol_per_day: app.risk.max_trades_per_symbol_per_day,
            max_sector_exposure: app.risk.max_sector_exposure,
            max_total_notional: app.risk.max_total_notional,
            atr_period: app.risk.atr_period,
            stop_atr_multiple: app.risk.stop_atr_multiple,
            target_atr_multiple: app.risk.target_atr_multiple,
        })),
        state: build_state_manager(&app)?,
        alerts: Arc::new(AlertManager::new(
            AlertDispatcher::new(app.alerts.webhook_url.clone()),
            app.alerts.max_order_failures,
        )),
    };

    let control = ControlHandle::new();
    control.bind_ctrl_c();

    let engine = TradingEngine::bootstrap(
        ctx,
        EngineConfig {
            cycle_interval: Duration::from_millis(app.engine.cycle_interval_ms),
            candle_interval: chrono::Duration::seconds(app.engine.candle_interval_secs),
            history_capacity: app.engine.history_capacity,
        },
        build_strategies(&app),
        SignalAggregator::new(AggregatorConfig {
            entry_threshold: app.signals.agreement_threshold_entry,
            exit_threshold: app.signals.agreement_threshold_exit,
        }),
        PortfolioConfig {
            initial_cash: app.portfolio.initial_cash,
            allow_short: app.portfolio.allow_short,
        },
        ExecutionConfig {
            retry_limit: app.broker.order_retry_limit,
            backoff_base: Duration::from_millis(app.broker.retry_backoff_ms),
        },
        control,
    )
    .await?;

    info!(
        symbols = app.instruments.len(),
        initial_cash = %app.portfolio.initial_cash,
        "engine bootstrapped; entering loop (ctrl-c to stop)"
    );
    engine.run().await
}

fn print_snapshot(app: AppConfig) -> Result<()> {
    let state = build_state_manager(&app)?;
    match state.recover()? {
        Some(snapshot) => {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        None => println!("no persisted state found"),
    }
    Ok(())
}
