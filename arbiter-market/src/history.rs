//! Aggregates observed quotes into fixed-interval OHLC candles.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, DurationRound, Utc};
use tracing::warn;

use arbiter_core::{Candle, Quote, Symbol};

/// Rolling candle history for a single symbol.
///
/// Quotes are bucketed by flooring their timestamp to the interval; when
/// a quote lands in a newer bucket the previous candle is sealed and
/// pushed onto the rolling window.
pub struct CandleSeries {
    symbol: Symbol,
    interval: Duration,
    capacity: usize,
    sealed: VecDeque<Candle>,
    current: Option<Candle>,
}

impl CandleSeries {
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, interval: Duration, capacity: usize) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            capacity: capacity.max(1),
            sealed: VecDeque::with_capacity(capacity.max(1)),
            current: None,
        }
    }

    fn bucket(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        at.duration_trunc(self.interval).unwrap_or(at)
    }

    /// Fold a quote into the series, sealing the previous candle when the
    /// interval boundary is crossed. Out-of-order quotes older than the
    /// current bucket are dropped.
    pub fn record(&mut self, quote: &Quote) {
        if quote.symbol != self.symbol {
            return;
        }
        let start = self.bucket(quote.timestamp);
        let price = quote.last;
        match &mut self.current {
            Some(candle) if candle.start == start => {
                candle.high = candle.high.max(price);
                candle.low = candle.low.min(price);
                candle.close = price;
            }
            Some(candle) if start < candle.start => {
                warn!(symbol = %self.symbol, "dropping out-of-order quote");
            }
            Some(candle) => {
                let sealed = candle.clone();
                if self.sealed.len() >= self.capacity {
                    self.sealed.pop_front();
                }
                self.sealed.push_back(sealed);
                self.current = Some(Candle {
                    symbol: self.symbol.clone(),
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    start,
                });
            }
            None => {
                self.current = Some(Candle {
                    symbol: self.symbol.clone(),
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    start,
                });
            }
        }
    }

    /// Sealed candles oldest-first, excluding the in-progress bucket.
    #[must_use]
    pub fn candles(&self) -> Vec<Candle> {
        self.sealed.iter().cloned().collect()
    }

    /// Number of sealed candles available.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sealed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sealed.is_empty()
    }
}
