//! Thread-safe registry providing authoritative instrument metadata.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use thiserror::Error;

use arbiter_core::{Instrument, Symbol};

/// Errors surfaced while building or querying the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no instruments supplied")]
    Empty,
    #[error("unknown symbol: {0}")]
    UnknownSymbol(Symbol),
}

/// Shared registry storing immutable instrument definitions.
#[derive(Default)]
pub struct InstrumentRegistry {
    inner: RwLock<HashMap<Symbol, Instrument>>,
}

impl InstrumentRegistry {
    /// Construct a registry from the provided instruments.
    pub fn from_instruments(instruments: Vec<Instrument>) -> Result<Self, RegistryError> {
        if instruments.is_empty() {
            return Err(RegistryError::Empty);
        }
        let mut map = HashMap::new();
        for instrument in instruments {
            map.insert(instrument.symbol.clone(), instrument);
        }
        Ok(Self {
            inner: RwLock::new(map),
        })
    }

    /// Retrieve instrument metadata for a symbol.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<Instrument> {
        self.inner.read().unwrap().get(symbol).cloned()
    }

    /// Resolve a symbol or fail with a typed error.
    pub fn resolve(&self, symbol: &str) -> Result<Instrument, RegistryError> {
        self.get(symbol)
            .ok_or_else(|| RegistryError::UnknownSymbol(symbol.to_string()))
    }

    /// Whether the instrument exists, is flagged tradable, and is inside
    /// its session window at `at`.
    #[must_use]
    pub fn is_tradable_at(&self, symbol: &str, at: DateTime<Utc>) -> bool {
        self.get(symbol)
            .map(|instrument| instrument.is_open_at(at))
            .unwrap_or(false)
    }

    /// All registered symbols, sorted for deterministic iteration.
    #[must_use]
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.inner.read().unwrap().keys().cloned().collect();
        symbols.sort();
        symbols
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn instrument(symbol: &str, sector: Option<&str>) -> Instrument {
        Instrument {
            symbol: symbol.into(),
            lot_size: dec!(1),
            tick_size: dec!(0.01),
            sector: sector.map(Into::into),
            tradable: true,
            session: None,
        }
    }

    #[test]
    fn empty_registry_is_rejected() {
        assert!(matches!(
            InstrumentRegistry::from_instruments(Vec::new()),
            Err(RegistryError::Empty)
        ));
    }

    #[test]
    fn resolves_registered_symbols() {
        let registry = InstrumentRegistry::from_instruments(vec![
            instrument("AAPL", Some("tech")),
            instrument("XOM", Some("energy")),
        ])
        .unwrap();
        assert_eq!(registry.symbols(), vec!["AAPL".to_string(), "XOM".to_string()]);
        assert!(registry.resolve("AAPL").is_ok());
        assert!(matches!(
            registry.resolve("TSLA"),
            Err(RegistryError::UnknownSymbol(_))
        ));
        assert!(registry.is_tradable_at("XOM", Utc::now()));
        assert!(!registry.is_tradable_at("TSLA", Utc::now()));
    }
}
