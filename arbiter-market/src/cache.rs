//! Bounded TTL cache for broker quotes.
//!
//! A fresh hit never touches the broker. An expired entry is still
//! returned, flagged stale, so a failing upstream degrades to last-known
//! prices instead of failing the evaluation cycle. The cache holds its
//! own lock, independent of the ledger.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use arbiter_core::{Quote, Symbol};

/// Sizing and freshness knobs for the cache.
#[derive(Clone, Copy, Debug)]
pub struct QuoteCacheConfig {
    pub ttl: Duration,
    pub capacity: usize,
}

impl Default for QuoteCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(2_000),
            capacity: 256,
        }
    }
}

/// A cached quote plus its freshness at read time.
#[derive(Clone, Debug)]
pub struct CachedQuote {
    pub quote: Quote,
    /// Set when the entry outlived the TTL and is served as a fallback.
    pub stale: bool,
}

struct Entry {
    quote: Quote,
    inserted_at: Instant,
}

/// Thread-safe TTL cache keyed by symbol.
pub struct QuoteCache {
    config: QuoteCacheConfig,
    entries: Mutex<HashMap<Symbol, Entry>>,
}

impl QuoteCache {
    #[must_use]
    pub fn new(config: QuoteCacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a quote, flagging it stale when past the TTL. `None`
    /// means the symbol has never been quoted; callers must fail closed
    /// rather than substitute a price.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<CachedQuote> {
        let entries = self.entries.lock().unwrap();
        entries.get(symbol).map(|entry| CachedQuote {
            quote: entry.quote.clone(),
            stale: entry.inserted_at.elapsed() > self.config.ttl,
        })
    }

    /// Look up a quote only if it is still within the TTL.
    #[must_use]
    pub fn get_fresh(&self, symbol: &str) -> Option<Quote> {
        self.get(symbol)
            .and_then(|hit| (!hit.stale).then_some(hit.quote))
    }

    /// Insert or refresh a quote, evicting the oldest entry when the
    /// cache is at capacity.
    pub fn insert(&self, quote: Quote) {
        let mut entries = self.entries.lock().unwrap();
        if !entries.contains_key(&quote.symbol) && entries.len() >= self.config.capacity.max(1) {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(symbol, _)| symbol.clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(
            quote.symbol.clone(),
            Entry {
                quote,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Number of cached symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn quote(symbol: &str, last: rust_decimal::Decimal) -> Quote {
        Quote {
            symbol: symbol.into(),
            bid: last - dec!(0.01),
            ask: last + dec!(0.01),
            last,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn fresh_entries_are_not_flagged() {
        let cache = QuoteCache::new(QuoteCacheConfig {
            ttl: Duration::from_secs(60),
            capacity: 8,
        });
        cache.insert(quote("AAPL", dec!(150)));
        let hit = cache.get("AAPL").unwrap();
        assert!(!hit.stale);
        assert_eq!(cache.get_fresh("AAPL").unwrap().last, dec!(150));
    }

    #[test]
    fn expired_entries_are_served_stale() {
        let cache = QuoteCache::new(QuoteCacheConfig {
            ttl: Duration::from_millis(10),
            capacity: 8,
        });
        cache.insert(quote("AAPL", dec!(150)));
        std::thread::sleep(Duration::from_millis(20));
        let hit = cache.get("AAPL").unwrap();
        assert!(hit.stale);
        assert!(cache.get_fresh("AAPL").is_none());
    }

    #[test]
    fn unknown_symbols_miss_entirely() {
        let cache = QuoteCache::new(QuoteCacheConfig::default());
        assert!(cache.get("UNSEEDED").is_none());
    }

    #[test]
    fn capacity_evicts_oldest_entry() {
        let cache = QuoteCache::new(QuoteCacheConfig {
            ttl: Duration::from_secs(60),
            capacity: 2,
        });
        cache.insert(quote("A", dec!(1)));
        std::thread::sleep(Duration::from_millis(5));
        cache.insert(quote("B", dec!(2)));
        std::thread::sleep(Duration::from_millis(5));
        cache.insert(quote("C", dec!(3)));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("A").is_none());
        assert!(cache.get("B").is_some());
        assert!(cache.get("C").is_some());
    }
}
