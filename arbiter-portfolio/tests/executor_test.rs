//! End-to-end tests of the execute-trade path against the paper broker.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use arbiter_broker::{GuardConfig, GuardedGateway, PaperBroker, PaperBrokerConfig};
use arbiter_core::{Action, Candle, Decision, Instrument};
use arbiter_portfolio::{ExecutionConfig, Portfolio, PortfolioConfig, TradeExecutor, TradeOutcome};
use arbiter_risk::{RiskConfig, RiskManager};

fn instrument(symbol: &str) -> Instrument {
    Instrument {
        symbol: symbol.into(),
        lot_size: dec!(1),
        tick_size: dec!(0.01),
        sector: None,
        tradable: true,
        session: None,
    }
}

fn steady_candles(symbol: &str, close: Decimal, range: Decimal, count: usize) -> Vec<Candle> {
    (0..count)
        .map(|i| Candle {
            symbol: symbol.into(),
            open: close,
            high: close + range / Decimal::TWO,
            low: close - range / Decimal::TWO,
            close,
            start: Utc.with_ymd_and_hms(2025, 3, 3, 0, 0, 0).unwrap()
                + chrono::Duration::minutes(i as i64),
        })
        .collect()
}

fn decision(symbol: &str, action: Action, confidence: f64) -> Decision {
    Decision {
        symbol: symbol.into(),
        action,
        confidence,
        score: action.vote_sign() * confidence,
        contributing: Vec::new(),
    }
}

struct Harness {
    broker: Arc<PaperBroker>,
    portfolio: Arc<Portfolio>,
    executor: TradeExecutor,
}

fn harness(initial_cash: Decimal, fee_bps: Decimal, retry_limit: u32) -> Harness {
    let broker = Arc::new(PaperBroker::new(PaperBrokerConfig {
        spread_bps: Decimal::ZERO,
        slippage_bps: Decimal::ZERO,
        fee_bps,
    }));
    let portfolio = Arc::new(Portfolio::new(PortfolioConfig {
        initial_cash,
        allow_short: false,
    }));
    let risk = Arc::new(RiskManager::new(RiskConfig::default()));
    let executor = TradeExecutor::new(
        portfolio.clone(),
        broker.clone(),
        risk,
        ExecutionConfig {
            retry_limit,
            backoff_base: Duration::from_millis(1),
        },
    );
    Harness {
        broker,
        portfolio,
        executor,
    }
}

fn assert_value_conserved(portfolio: &Portfolio, initial_cash: Decimal) {
    let holdings: Decimal = portfolio
        .positions()
        .iter()
        .map(|p| p.market_value())
        .sum();
    let lhs = portfolio.cash() + holdings;
    let rhs = initial_cash + portfolio.realized_pnl() - portfolio.fees_paid();
    assert_eq!(lhs, rhs, "value was created or destroyed");
}

#[tokio::test]
async fn entry_commits_fill_and_emits_event() {
    let h = harness(dec!(100000), dec!(2), 0);
    h.broker.set_price("AAPL", dec!(100));
    let mut events = h.executor.subscribe();

    let candles = steady_candles("AAPL", dec!(100), dec!(2), 20);
    let outcome = h
        .executor
        .execute_entry(
            &instrument("AAPL"),
            &decision("AAPL", Action::Buy, 0.8),
            &candles,
            dec!(100),
        )
        .await;
    assert!(outcome.is_executed());

    let position = h.portfolio.position("AAPL").expect("position opened");
    assert_eq!(position.quantity, dec!(250));
    assert_eq!(position.entry_price, dec!(100));
    assert_eq!(position.stop_price, Some(dec!(96)));
    assert_eq!(position.target_price, Some(dec!(108)));
    assert!(h.portfolio.is_dirty());
    assert_eq!(h.portfolio.trades_today("AAPL"), 1);

    let event = events.try_recv().expect("trade event published");
    assert_eq!(event.symbol, "AAPL");
    assert!(!event.closing);
    assert_value_conserved(&h.portfolio, dec!(100000));
}

#[tokio::test]
async fn risk_decline_changes_nothing_and_skips_broker() {
    // Equity too small for a single unit at this stop distance.
    let h = harness(dec!(100), Decimal::ZERO, 0);
    h.broker.set_price("AAPL", dec!(100));
    let candles = steady_candles("AAPL", dec!(100), dec!(2), 20);
    let outcome = h
        .executor
        .execute_entry(
            &instrument("AAPL"),
            &decision("AAPL", Action::Buy, 0.9),
            &candles,
            dec!(100),
        )
        .await;
    assert!(matches!(outcome, TradeOutcome::Declined(_)));
    assert_eq!(h.broker.call_count(), 0);
    assert_eq!(h.portfolio.cash(), dec!(100));
    assert!(h.portfolio.positions().is_empty());
    assert!(!h.portfolio.is_dirty());
}

#[tokio::test]
async fn transient_failures_are_retried_with_backoff() {
    let h = harness(dec!(100000), Decimal::ZERO, 3);
    h.broker.set_price("AAPL", dec!(100));
    h.broker.fail_next(2);
    let candles = steady_candles("AAPL", dec!(100), dec!(2), 20);
    let outcome = h
        .executor
        .execute_entry(
            &instrument("AAPL"),
            &decision("AAPL", Action::Buy, 0.7),
            &candles,
            dec!(100),
        )
        .await;
    assert!(outcome.is_executed());
    assert_eq!(h.broker.call_count(), 3);
}

#[tokio::test]
async fn exhausted_retries_leave_ledger_untouched() {
    let h = harness(dec!(100000), Decimal::ZERO, 2);
    h.broker.set_price("AAPL", dec!(100));
    h.broker.fail_next(10);
    let candles = steady_candles("AAPL", dec!(100), dec!(2), 20);
    let outcome = h
        .executor
        .execute_entry(
            &instrument("AAPL"),
            &decision("AAPL", Action::Buy, 0.7),
            &candles,
            dec!(100),
        )
        .await;
    assert!(matches!(outcome, TradeOutcome::Failed { .. }));
    // Initial attempt plus two retries.
    assert_eq!(h.broker.call_count(), 3);
    assert_eq!(h.portfolio.cash(), dec!(100000));
    assert!(h.portfolio.positions().is_empty());
}

#[tokio::test]
async fn exit_realizes_pnl_and_removes_position() {
    let h = harness(dec!(100000), Decimal::ZERO, 0);
    h.broker.set_price("AAPL", dec!(100));
    let candles = steady_candles("AAPL", dec!(100), dec!(2), 20);
    let outcome = h
        .executor
        .execute_entry(
            &instrument("AAPL"),
            &decision("AAPL", Action::Buy, 0.8),
            &candles,
            dec!(100),
        )
        .await;
    assert!(outcome.is_executed());
    let position = h.portfolio.position("AAPL").unwrap();

    h.broker.set_price("AAPL", dec!(110));
    let outcome = h
        .executor
        .execute_exit(&instrument("AAPL"), &position, 0.9, dec!(110))
        .await;
    let TradeOutcome::Executed(event) = outcome else {
        panic!("exit should execute");
    };
    assert!(event.closing);
    assert_eq!(event.realized_pnl_delta, dec!(2500));
    assert!(h.portfolio.position("AAPL").is_none());
    assert_eq!(h.portfolio.realized_pnl(), dec!(2500));
    assert_value_conserved(&h.portfolio, dec!(100000));
}

#[tokio::test]
async fn value_is_conserved_across_concurrent_executions() {
    let initial_cash = dec!(1000000);
    let broker = Arc::new(PaperBroker::new(PaperBrokerConfig {
        spread_bps: Decimal::ZERO,
        slippage_bps: Decimal::ZERO,
        fee_bps: dec!(3),
    }));
    let portfolio = Arc::new(Portfolio::new(PortfolioConfig {
        initial_cash,
        allow_short: false,
    }));
    // A small risk fraction keeps six concurrent entries within cash and
    // the aggregate notional limit.
    let risk = Arc::new(RiskManager::new(RiskConfig {
        risk_fraction: dec!(0.001),
        ..RiskConfig::default()
    }));
    let executor = TradeExecutor::new(
        portfolio.clone(),
        broker.clone(),
        risk,
        ExecutionConfig::default(),
    );
    let symbols = ["AAPL", "MSFT", "NVDA", "AMZN", "GOOG", "META"];
    for (i, symbol) in symbols.iter().enumerate() {
        broker.set_price(symbol, dec!(100) + Decimal::from(i as u32));
    }
    let executor = Arc::new(executor);

    let mut handles = Vec::new();
    for (i, symbol) in symbols.iter().enumerate() {
        let executor = executor.clone();
        let price = dec!(100) + Decimal::from(i as u32);
        let symbol = symbol.to_string();
        handles.push(tokio::spawn(async move {
            let candles = steady_candles(&symbol, price, dec!(2), 20);
            executor
                .execute_entry(
                    &instrument(&symbol),
                    &decision(&symbol, Action::Buy, 0.8),
                    &candles,
                    price,
                )
                .await
        }));
    }
    let mut executed = 0;
    for handle in handles {
        if handle.await.unwrap().is_executed() {
            executed += 1;
        }
    }
    assert_eq!(executed, symbols.len());
    assert_value_conserved(&portfolio, initial_cash);
}

#[tokio::test]
async fn guarded_gateway_composes_with_executor() {
    let broker = PaperBroker::default();
    broker.set_price("AAPL", dec!(100));
    let guarded = Arc::new(GuardedGateway::new(broker, GuardConfig::default()));
    let portfolio = Arc::new(Portfolio::new(PortfolioConfig {
        initial_cash: dec!(100000),
        allow_short: false,
    }));
    let executor = TradeExecutor::new(
        portfolio.clone(),
        guarded,
        Arc::new(RiskManager::new(RiskConfig::default())),
        ExecutionConfig::default(),
    );
    let candles = steady_candles("AAPL", dec!(100), dec!(2), 20);
    let outcome = executor
        .execute_entry(
            &instrument("AAPL"),
            &decision("AAPL", Action::Buy, 0.8),
            &candles,
            dec!(100),
        )
        .await;
    assert!(outcome.is_executed());
    assert_eq!(portfolio.position("AAPL").unwrap().quantity, dec!(250));
}
