//! Composes the token bucket and circuit breaker around a gateway.
//!
//! Lock order is fixed workspace-wide: rate limiter, then circuit
//! breaker, then (in the portfolio crate) the ledger lock. Never
//! reversed.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use arbiter_core::{OrderId, OrderRequest, Quote};

use crate::breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::limiter::TokenBucket;
use crate::{BrokerError, BrokerGateway, BrokerInfo, BrokerResult, OrderAck};

/// Resource-guard tuning for a wrapped gateway.
#[derive(Clone, Copy, Debug)]
pub struct GuardConfig {
    pub rate_limit_per_second: u32,
    pub rate_limit_burst: u32,
    pub circuit_failure_threshold: u32,
    pub circuit_cooldown: Duration,
    pub circuit_failure_window: Duration,
    /// Deadline for acquiring a rate-limiter token.
    pub acquire_timeout: Duration,
    /// Deadline for the broker call itself; no cycle may block forever.
    pub call_timeout: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            rate_limit_per_second: 10,
            rate_limit_burst: 20,
            circuit_failure_threshold: 5,
            circuit_cooldown: Duration::from_secs(30),
            circuit_failure_window: Duration::from_secs(60),
            acquire_timeout: Duration::from_secs(2),
            call_timeout: Duration::from_secs(5),
        }
    }
}

/// Wraps a [`BrokerGateway`] so every call passes the rate limiter and
/// then the circuit breaker, carrying a per-call timeout.
pub struct GuardedGateway<G> {
    inner: G,
    limiter: TokenBucket,
    breaker: CircuitBreaker,
    acquire_timeout: Duration,
    call_timeout: Duration,
}

impl<G: BrokerGateway> GuardedGateway<G> {
    #[must_use]
    pub fn new(inner: G, config: GuardConfig) -> Self {
        Self {
            inner,
            limiter: TokenBucket::new(config.rate_limit_per_second, config.rate_limit_burst),
            breaker: CircuitBreaker::new(CircuitBreakerConfig {
                failure_threshold: config.circuit_failure_threshold,
                cooldown: config.circuit_cooldown,
                failure_window: config.circuit_failure_window,
            }),
            acquire_timeout: config.acquire_timeout,
            call_timeout: config.call_timeout,
        }
    }

    /// Direct access to the wrapped gateway, for wiring and tests.
    #[must_use]
    pub fn inner(&self) -> &G {
        &self.inner
    }

    /// Breaker handle exposed for telemetry.
    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn run_guarded<T, F>(&self, call: &'static str, fut: F) -> BrokerResult<T>
    where
        F: Future<Output = BrokerResult<T>>,
    {
        self.limiter.acquire(self.acquire_timeout).await?;
        let permit = self.breaker.try_acquire()?;
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(Ok(value)) => {
                self.breaker.record_success(permit);
                Ok(value)
            }
            Ok(Err(err)) => {
                if err.is_infrastructure() {
                    self.breaker.record_failure(permit);
                } else {
                    // The broker answered; only its answer was negative.
                    self.breaker.record_success(permit);
                }
                Err(err)
            }
            Err(_) => {
                warn!(call, timeout_ms = self.call_timeout.as_millis() as u64, "broker call timed out");
                self.breaker.record_failure(permit);
                Err(BrokerError::Timeout)
            }
        }
    }
}

#[async_trait]
impl<G: BrokerGateway> BrokerGateway for GuardedGateway<G> {
    fn info(&self) -> BrokerInfo {
        self.inner.info()
    }

    async fn get_quote(&self, symbol: &str) -> BrokerResult<Quote> {
        self.run_guarded("get_quote", self.inner.get_quote(symbol))
            .await
    }

    async fn place_order(&self, request: OrderRequest) -> BrokerResult<OrderAck> {
        self.run_guarded("place_order", self.inner.place_order(request))
            .await
    }

    async fn cancel_order(&self, order_id: &OrderId) -> BrokerResult<()> {
        self.run_guarded("cancel_order", self.inner.cancel_order(order_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper::PaperBroker;
    use crate::CircuitState;
    use rust_decimal_macros::dec;

    fn quick_guard(broker: PaperBroker) -> GuardedGateway<PaperBroker> {
        GuardedGateway::new(
            broker,
            GuardConfig {
                rate_limit_per_second: 100,
                rate_limit_burst: 100,
                circuit_failure_threshold: 3,
                circuit_cooldown: Duration::from_millis(50),
                circuit_failure_window: Duration::from_secs(60),
                acquire_timeout: Duration::from_millis(100),
                call_timeout: Duration::from_millis(500),
            },
        )
    }

    #[tokio::test]
    async fn breaker_opens_and_fails_fast_without_calling_gateway() {
        let broker = PaperBroker::default();
        broker.set_price("AAPL", dec!(100));
        broker.fail_next(3);
        let guard = quick_guard(broker);

        for _ in 0..3 {
            let err = guard.get_quote("AAPL").await.unwrap_err();
            assert!(matches!(err, BrokerError::Transport(_)));
        }
        assert_eq!(guard.breaker().state(), CircuitState::Open);

        // Injected failures are exhausted, but the open breaker must keep
        // the gateway untouched.
        let calls_before = guard.inner().call_count();
        let err = guard.get_quote("AAPL").await.unwrap_err();
        assert!(matches!(err, BrokerError::CircuitOpen));
        assert_eq!(guard.inner().call_count(), calls_before);
    }

    #[tokio::test]
    async fn probe_after_cooldown_closes_circuit() {
        let broker = PaperBroker::default();
        broker.set_price("AAPL", dec!(100));
        broker.fail_next(3);
        let guard = quick_guard(broker);
        for _ in 0..3 {
            let _ = guard.get_quote("AAPL").await;
        }
        assert_eq!(guard.breaker().state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let quote = guard.get_quote("AAPL").await.expect("probe should pass");
        assert_eq!(quote.last, dec!(100));
        assert_eq!(guard.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn business_rejection_does_not_trip_breaker() {
        let broker = PaperBroker::default();
        let guard = quick_guard(broker);
        for _ in 0..5 {
            // No price seeded: the paper broker rejects the symbol.
            let err = guard.get_quote("MISSING").await.unwrap_err();
            assert!(matches!(err, BrokerError::Rejected(_)));
        }
        assert_eq!(guard.breaker().state(), CircuitState::Closed);
    }
}
