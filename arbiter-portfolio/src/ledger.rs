//! Atomic, rollback-capable mutation of cash and positions.
//!
//! A [`Transaction`] holds the portfolio's single writer lock for the
//! whole begin/commit cycle, so concurrent fills never interleave.
//! Commit validates every staged delta against a trial copy of the book
//! and only then swaps it in: either everything applies or nothing does.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use arbiter_core::{Position, Price, Quantity, Symbol};

/// Result alias for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Ledger-level failures. The transaction that produced them is rolled
/// back in full before the error is surfaced.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum LedgerError {
    #[error("insufficient funds: cash {cash} cannot absorb delta {delta}")]
    InsufficientFunds { cash: Decimal, delta: Decimal },
    #[error("invalid position mutation for {symbol}: {reason}")]
    InvalidPosition { symbol: Symbol, reason: String },
}

/// One staged position mutation: a signed quantity delta at a price.
#[derive(Clone, Debug)]
pub struct PositionDelta {
    pub symbol: Symbol,
    pub qty_delta: Quantity,
    pub price: Price,
}

/// The authoritative record of cash and positions.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Book {
    pub(crate) cash: Decimal,
    pub(crate) positions: HashMap<Symbol, Position>,
    pub(crate) realized_pnl: Decimal,
    pub(crate) fees_paid: Decimal,
    pub(crate) allow_short: bool,
}

impl Book {
    pub(crate) fn new(initial_cash: Decimal, allow_short: bool) -> Self {
        Self {
            cash: initial_cash,
            positions: HashMap::new(),
            realized_pnl: Decimal::ZERO,
            fees_paid: Decimal::ZERO,
            allow_short,
        }
    }

    /// Cash plus the market value of every open position.
    pub(crate) fn equity(&self) -> Decimal {
        let holdings: Decimal = self
            .positions
            .values()
            .map(Position::market_value)
            .sum();
        self.cash + holdings
    }

    fn apply_cash(&mut self, delta: Decimal) -> LedgerResult<()> {
        let next = self.cash + delta;
        if next < Decimal::ZERO {
            return Err(LedgerError::InsufficientFunds {
                cash: self.cash,
                delta,
            });
        }
        self.cash = next;
        Ok(())
    }

    fn apply_fee(&mut self, fee: Decimal) -> LedgerResult<()> {
        if fee < Decimal::ZERO {
            return Err(LedgerError::InsufficientFunds {
                cash: self.cash,
                delta: fee,
            });
        }
        self.apply_cash(-fee)?;
        self.fees_paid += fee;
        Ok(())
    }

    fn apply_position(&mut self, delta: &PositionDelta, at: DateTime<Utc>) -> LedgerResult<()> {
        if delta.qty_delta.is_zero() {
            return Err(LedgerError::InvalidPosition {
                symbol: delta.symbol.clone(),
                reason: "zero quantity delta".into(),
            });
        }
        if delta.price <= Decimal::ZERO {
            return Err(LedgerError::InvalidPosition {
                symbol: delta.symbol.clone(),
                reason: format!("non-positive price {}", delta.price),
            });
        }

        let Some(position) = self.positions.get_mut(&delta.symbol) else {
            if delta.qty_delta < Decimal::ZERO && !self.allow_short {
                return Err(LedgerError::InvalidPosition {
                    symbol: delta.symbol.clone(),
                    reason: "short selling is not permitted".into(),
                });
            }
            self.positions.insert(
                delta.symbol.clone(),
                Position {
                    symbol: delta.symbol.clone(),
                    quantity: delta.qty_delta,
                    entry_price: delta.price,
                    current_price: delta.price,
                    realized_pnl: Decimal::ZERO,
                    stop_price: None,
                    target_price: None,
                    opened_at: at,
                    updated_at: at,
                },
            );
            return Ok(());
        };

        let prev_qty = position.quantity;
        let next_qty = prev_qty + delta.qty_delta;

        if next_qty < Decimal::ZERO && !self.allow_short {
            return Err(LedgerError::InvalidPosition {
                symbol: delta.symbol.clone(),
                reason: format!(
                    "closing {} exceeds held {} without short permission",
                    delta.qty_delta.abs(),
                    prev_qty.abs()
                ),
            });
        }

        if prev_qty.is_sign_positive() == delta.qty_delta.is_sign_positive() {
            // Same-direction add: weighted-average entry price.
            let prev_cost = position.entry_price * prev_qty.abs();
            let new_cost = delta.price * delta.qty_delta.abs();
            position.entry_price = (prev_cost + new_cost) / next_qty.abs();
            position.quantity = next_qty;
        } else {
            // Reduce, close, or flip through zero; the closed part
            // realizes P&L against the average entry.
            let closed = delta.qty_delta.abs().min(prev_qty.abs());
            let direction = if prev_qty > Decimal::ZERO {
                Decimal::ONE
            } else {
                Decimal::NEGATIVE_ONE
            };
            let realized = (delta.price - position.entry_price) * closed * direction;
            position.realized_pnl += realized;
            self.realized_pnl += realized;

            if next_qty.is_zero() {
                self.positions.remove(&delta.symbol);
                return Ok(());
            }
            if next_qty.is_sign_positive() == prev_qty.is_sign_positive() {
                // Partial close: entry price unchanged.
                position.quantity = next_qty;
            } else {
                // Flipped: the remainder is a fresh position at the fill
                // price, keeping its realized history.
                position.quantity = next_qty;
                position.entry_price = delta.price;
                position.opened_at = at;
            }
        }
        position.current_price = delta.price;
        position.updated_at = at;
        Ok(())
    }
}

/// Staged deltas plus the held writer lock. Dropping the transaction
/// without committing discards everything (rollback).
pub struct Transaction<'a> {
    pub(crate) book: std::sync::RwLockWriteGuard<'a, Book>,
    staged_cash: Decimal,
    staged_fee: Decimal,
    staged_positions: Vec<PositionDelta>,
    at: DateTime<Utc>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(book: std::sync::RwLockWriteGuard<'a, Book>, at: DateTime<Utc>) -> Self {
        Self {
            book,
            staged_cash: Decimal::ZERO,
            staged_fee: Decimal::ZERO,
            staged_positions: Vec::new(),
            at,
        }
    }

    /// Stage a signed cash delta.
    pub fn stage_cash(&mut self, delta: Decimal) -> &mut Self {
        self.staged_cash += delta;
        self
    }

    /// Stage a commission, tracked separately for value accounting.
    pub fn stage_fee(&mut self, fee: Decimal) -> &mut Self {
        self.staged_fee += fee;
        self
    }

    /// Stage a position mutation.
    pub fn stage_position(
        &mut self,
        symbol: impl Into<Symbol>,
        qty_delta: Quantity,
        price: Price,
    ) -> &mut Self {
        self.staged_positions.push(PositionDelta {
            symbol: symbol.into(),
            qty_delta,
            price,
        });
        self
    }

    /// Apply every staged delta atomically. On any validation failure the
    /// book is left byte-for-byte unchanged and the error is returned.
    pub fn commit(mut self) -> LedgerResult<()> {
        let mut trial = self.book.clone();
        trial.apply_cash(self.staged_cash)?;
        if !self.staged_fee.is_zero() {
            trial.apply_fee(self.staged_fee)?;
        }
        for delta in &self.staged_positions {
            trial.apply_position(delta, self.at)?;
        }
        *self.book = trial;
        Ok(())
    }

    /// Discard all staged deltas.
    pub fn rollback(self) {
        // Dropping the guard releases the lock with the book untouched.
    }
}
