//! Portfolio accounting: owns the ledger and open positions, exposes the
//! trade-execution API, and produces the snapshots the state manager
//! persists.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use arbiter_core::{Position, Price, Symbol};
use arbiter_risk::PortfolioExposure;

mod ledger;
pub mod execution;

pub use execution::{DeclineReason, ExecutionConfig, TradeExecutor, TradeOutcome};
pub use ledger::{Book, LedgerError, LedgerResult, PositionDelta, Transaction};

/// Configuration used when instantiating a portfolio.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PortfolioConfig {
    pub initial_cash: Decimal,
    #[serde(default)]
    pub allow_short: bool,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            initial_cash: Decimal::from(100_000),
            allow_short: false,
        }
    }
}

/// Versioned, serializable copy of portfolio state written by the state
/// manager and read once at startup for recovery.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PortfolioSnapshot {
    pub version: u64,
    pub cash: Decimal,
    pub positions: Vec<Position>,
    pub realized_pnl: Decimal,
    pub fees_paid: Decimal,
    /// Equity recorded at snapshot time; recovery verifies it against
    /// the recomputed cash + position value.
    pub equity: Decimal,
    pub trades_today: HashMap<Symbol, u32>,
    pub trading_day: NaiveDate,
    pub created_at: DateTime<Utc>,
}

struct DayCounters {
    date: NaiveDate,
    trades: HashMap<Symbol, u32>,
}

/// Thread-safe portfolio. Mutation is strictly single-writer through
/// [`Portfolio::begin`]; read-only queries take the shared lock.
pub struct Portfolio {
    book: RwLock<Book>,
    day: Mutex<DayCounters>,
    /// Sector membership of held symbols, fed by the engine from
    /// instrument metadata and used for sector exposure sums.
    sector_map: RwLock<HashMap<Symbol, String>>,
    dirty: AtomicBool,
}

impl Portfolio {
    #[must_use]
    pub fn new(config: PortfolioConfig) -> Self {
        Self {
            book: RwLock::new(Book::new(config.initial_cash, config.allow_short)),
            day: Mutex::new(DayCounters {
                date: Utc::now().date_naive(),
                trades: HashMap::new(),
            }),
            sector_map: RwLock::new(HashMap::new()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Rebuild a portfolio from a recovered snapshot.
    #[must_use]
    pub fn from_snapshot(snapshot: &PortfolioSnapshot, config: PortfolioConfig) -> Self {
        let mut book = Book::new(snapshot.cash, config.allow_short);
        book.realized_pnl = snapshot.realized_pnl;
        book.fees_paid = snapshot.fees_paid;
        for position in &snapshot.positions {
            book.positions
                .insert(position.symbol.clone(), position.clone());
        }
        Self {
            book: RwLock::new(book),
            day: Mutex::new(DayCounters {
                date: snapshot.trading_day,
                trades: snapshot.trades_today.clone(),
            }),
            sector_map: RwLock::new(HashMap::new()),
            dirty: AtomicBool::new(false),
        }
    }

    /// Open a ledger transaction, taking the single writer lock for the
    /// whole begin/commit cycle.
    pub fn begin(&self) -> Transaction<'_> {
        Transaction::new(self.book.write().unwrap(), Utc::now())
    }

    /// Cash on hand. Never negative.
    #[must_use]
    pub fn cash(&self) -> Decimal {
        self.book.read().unwrap().cash
    }

    /// Cash plus market value of all open positions.
    #[must_use]
    pub fn equity(&self) -> Decimal {
        self.book.read().unwrap().equity()
    }

    /// Realized profit and loss across all closed trades.
    #[must_use]
    pub fn realized_pnl(&self) -> Decimal {
        self.book.read().unwrap().realized_pnl
    }

    /// Total commissions paid.
    #[must_use]
    pub fn fees_paid(&self) -> Decimal {
        self.book.read().unwrap().fees_paid
    }

    /// Copy of one position, if open.
    #[must_use]
    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.book.read().unwrap().positions.get(symbol).cloned()
    }

    /// Copies of all open positions, sorted by symbol for deterministic
    /// iteration.
    #[must_use]
    pub fn positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self
            .book
            .read()
            .unwrap()
            .positions
            .values()
            .cloned()
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        positions
    }

    /// Refresh the mark price of an open position.
    pub fn mark_price(&self, symbol: &str, price: Price) {
        let mut book = self.book.write().unwrap();
        if let Some(position) = book.positions.get_mut(symbol) {
            position.mark_price(price, Utc::now());
        }
    }

    /// Attach or move protective stop/target levels on an open position.
    pub fn set_protective_levels(
        &self,
        symbol: &str,
        stop: Option<Price>,
        target: Option<Price>,
    ) {
        let mut book = self.book.write().unwrap();
        if let Some(position) = book.positions.get_mut(symbol) {
            if stop.is_some() {
                position.stop_price = stop;
            }
            if target.is_some() {
                position.target_price = target;
            }
            position.updated_at = Utc::now();
        }
    }

    /// Exposure snapshot consumed by the risk manager. Computed under the
    /// shared lock so limit checks never re-enter portfolio locking.
    #[must_use]
    pub fn exposure(&self, symbol: &str, sector: Option<&str>) -> PortfolioExposure {
        let book = self.book.read().unwrap();
        let mut sector_notional = Decimal::ZERO;
        let mut total_notional = Decimal::ZERO;
        for position in book.positions.values() {
            let notional = position.notional();
            total_notional += notional;
        }
        if sector.is_some() {
            sector_notional = self.sector_notional_locked(&book, sector);
        }
        PortfolioExposure {
            equity: book.equity(),
            open_positions: book.positions.len(),
            has_position_in_symbol: book.positions.contains_key(symbol),
            trades_today_for_symbol: self.trades_today(symbol),
            sector_notional,
            total_notional,
        }
    }

    fn sector_notional_locked(&self, book: &Book, sector: Option<&str>) -> Decimal {
        let Some(sector) = sector else {
            return Decimal::ZERO;
        };
        let map = self.sector_map.read().unwrap();
        book.positions
            .values()
            .filter(|position| {
                map.get(&position.symbol)
                    .map(|s| s == sector)
                    .unwrap_or(false)
            })
            .map(|position| position.notional())
            .sum()
    }

    /// Record the sector an open symbol belongs to, for exposure sums.
    pub fn note_sector(&self, symbol: &str, sector: Option<&str>) {
        if let Some(sector) = sector {
            self.sector_map
                .write()
                .unwrap()
                .insert(symbol.to_string(), sector.to_string());
        }
    }

    /// Count of trades executed today for the symbol, rolling over at
    /// UTC midnight.
    #[must_use]
    pub fn trades_today(&self, symbol: &str) -> u32 {
        let mut day = self.day.lock().unwrap();
        let today = Utc::now().date_naive();
        if day.date != today {
            day.date = today;
            day.trades.clear();
        }
        day.trades.get(symbol).copied().unwrap_or(0)
    }

    /// Increment the per-symbol daily trade counter.
    pub fn record_trade(&self, symbol: &str) {
        let mut day = self.day.lock().unwrap();
        let today = Utc::now().date_naive();
        if day.date != today {
            day.date = today;
            day.trades.clear();
        }
        *day.trades.entry(symbol.to_string()).or_insert(0) += 1;
    }

    /// Mark the portfolio changed since the last persisted snapshot.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Consume the dirty flag, returning whether a change was pending.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    /// Whether a change is pending persistence.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Produce a versioned snapshot of the current state.
    #[must_use]
    pub fn snapshot(&self, version: u64) -> PortfolioSnapshot {
        let book = self.book.read().unwrap();
        let day = self.day.lock().unwrap();
        let mut positions: Vec<Position> = book.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        PortfolioSnapshot {
            version,
            cash: book.cash,
            positions,
            realized_pnl: book.realized_pnl,
            fees_paid: book.fees_paid,
            equity: book.equity(),
            trades_today: day.trades.clone(),
            trading_day: day.date,
            created_at: Utc::now(),
        }
    }
}
