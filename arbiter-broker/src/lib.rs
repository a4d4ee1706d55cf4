//! Broker-agnostic gateway trait and the resource guards every broker
//! call passes through (token bucket, then circuit breaker, in that
//! fixed order).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use arbiter_core::{Fill, Order, OrderId, OrderRequest, Quote};

pub mod breaker;
pub mod guard;
pub mod limiter;
pub mod paper;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use guard::{GuardConfig, GuardedGateway};
pub use limiter::TokenBucket;
pub use paper::{PaperBroker, PaperBrokerConfig};

/// Convenience alias for broker results.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Common error type returned by broker gateways and their guards.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Transport-level failures (network, connection resets).
    #[error("transport error: {0}")]
    Transport(String),
    /// The call did not complete within its deadline.
    #[error("broker call timed out")]
    Timeout,
    /// The request parameters are invalid for the target broker.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Broker responded with a business error (e.g., unknown order id).
    #[error("broker rejected request: {0}")]
    Rejected(String),
    /// No rate-limiter token became available within the acquire timeout.
    #[error("rate limited: no token available")]
    RateLimited,
    /// The circuit breaker is open and the call was failed fast.
    #[error("circuit open: broker calls suspended")]
    CircuitOpen,
}

impl BrokerError {
    /// Whether the failure indicates broker infrastructure trouble.
    ///
    /// Only infrastructure failures count toward tripping the circuit
    /// breaker; a business rejection proves the broker is reachable.
    #[must_use]
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout)
    }

    /// Whether a bounded retry with backoff is worthwhile.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout | Self::RateLimited | Self::CircuitOpen
        )
    }
}

/// Metadata describing a connected gateway, used for startup logging.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct BrokerInfo {
    pub name: String,
    pub paper: bool,
}

/// Acknowledgement returned by [`BrokerGateway::place_order`]. Market
/// orders against the paper broker fill synchronously, so the fill (when
/// present) rides along with the accepted order.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OrderAck {
    pub order: Order,
    pub fill: Option<Fill>,
}

/// The opaque brokerage the engine trades against. Implementations must
/// be cheap to clone behind an `Arc`; every method carries its own
/// deadline when wrapped in a [`GuardedGateway`].
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Metadata about the gateway for telemetry.
    fn info(&self) -> BrokerInfo;

    /// Fetch the current top-of-book quote for a symbol.
    async fn get_quote(&self, symbol: &str) -> BrokerResult<Quote>;

    /// Place a new order with the broker.
    async fn place_order(&self, request: OrderRequest) -> BrokerResult<OrderAck>;

    /// Cancel an existing order by identifier.
    async fn cancel_order(&self, order_id: &OrderId) -> BrokerResult<()>;
}
