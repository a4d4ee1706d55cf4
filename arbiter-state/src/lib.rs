//! Durable snapshot/recovery of portfolio state across restarts.
//!
//! Persistence writes every tier in order (fast first, durable after);
//! recovery walks the same ordered list and accepts the first tier that
//! holds a snapshot, but only after verifying internal consistency.
//! A snapshot that exists and fails verification is fatal: the engine
//! must refuse to trade on unverified state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{info, warn};

use arbiter_core::Position;
use arbiter_portfolio::{Portfolio, PortfolioSnapshot};

mod store;

pub use store::{FileStore, MemoryStore, StateStore};

/// Result alias for state-manager operations.
pub type StateResult<T> = Result<T, StateError>;

/// Failures surfaced by persistence and recovery.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state store io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
    /// Fatal at startup: the engine refuses to enter the running state.
    #[error("state corruption detected: {0}")]
    Corruption(String),
    #[error("all persistence tiers failed: {0}")]
    AllTiersFailed(String),
}

/// Tuning for the state manager.
#[derive(Clone, Copy, Debug)]
pub struct StateManagerConfig {
    /// Minimum interval between unforced persists.
    pub persist_interval: Duration,
    /// Absolute tolerance when verifying recorded equity against the
    /// recomputed cash + position value.
    pub consistency_tolerance: Decimal,
}

impl Default for StateManagerConfig {
    fn default() -> Self {
        Self {
            persist_interval: Duration::from_secs(30),
            consistency_tolerance: Decimal::new(1, 2),
        }
    }
}

/// Writes versioned snapshots through an ordered list of backends and
/// recovers the newest verified snapshot at startup.
pub struct StateManager {
    tiers: Vec<Box<dyn StateStore>>,
    config: StateManagerConfig,
    version: AtomicU64,
    last_persist: Mutex<Option<Instant>>,
}

impl StateManager {
    /// Build a manager over tiers ordered fastest-first.
    #[must_use]
    pub fn new(tiers: Vec<Box<dyn StateStore>>, config: StateManagerConfig) -> Self {
        Self {
            tiers,
            config,
            version: AtomicU64::new(0),
            last_persist: Mutex::new(None),
        }
    }

    /// Version the next snapshot will carry.
    #[must_use]
    pub fn current_version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Snapshot the portfolio and write it to every tier.
    ///
    /// Unforced persists are throttled to the configured interval and
    /// return `Ok(None)` when skipped. A write failure in one tier is
    /// logged and tolerated as long as at least one tier succeeds.
    pub fn persist(&self, portfolio: &Portfolio, force: bool) -> StateResult<Option<u64>> {
        {
            let mut last = self.last_persist.lock().unwrap();
            if !force {
                if let Some(at) = *last {
                    if at.elapsed() < self.config.persist_interval {
                        return Ok(None);
                    }
                }
            }
            *last = Some(Instant::now());
        }

        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        let snapshot = portfolio.snapshot(version);
        let bytes = serde_json::to_vec(&snapshot)?;

        let mut wrote_any = false;
        let mut failures = Vec::new();
        for tier in &self.tiers {
            match tier.put(version, &bytes) {
                Ok(()) => wrote_any = true,
                Err(err) => {
                    warn!(store = tier.name(), version, error = %err, "tier write failed");
                    failures.push(format!("{}: {err}", tier.name()));
                }
            }
        }
        if !wrote_any {
            return Err(StateError::AllTiersFailed(failures.join("; ")));
        }
        info!(version, "portfolio snapshot persisted");
        Ok(Some(version))
    }

    /// Recover the newest snapshot, trying tiers in order.
    ///
    /// `Ok(None)` means no tier holds any snapshot: a clean start. A
    /// tier that holds a snapshot failing deserialization or consistency
    /// verification is fatal [`StateError::Corruption`].
    pub fn recover(&self) -> StateResult<Option<PortfolioSnapshot>> {
        for tier in &self.tiers {
            let versions = match tier.list_versions() {
                Ok(versions) => versions,
                Err(err) => {
                    warn!(store = tier.name(), error = %err, "tier unavailable during recovery");
                    continue;
                }
            };
            if let Some(err) = check_monotonic(&versions) {
                return Err(err);
            }
            let Some(&newest) = versions.last() else {
                continue;
            };
            let Some(bytes) = tier.get(newest)? else {
                warn!(store = tier.name(), version = newest, "listed snapshot missing on read");
                continue;
            };
            let snapshot: PortfolioSnapshot = serde_json::from_slice(&bytes).map_err(|err| {
                StateError::Corruption(format!(
                    "snapshot v{newest} in {} failed to decode: {err}",
                    tier.name()
                ))
            })?;
            self.verify(&snapshot, newest, tier.name())?;
            self.version.store(snapshot.version, Ordering::Release);
            info!(
                store = tier.name(),
                version = snapshot.version,
                positions = snapshot.positions.len(),
                "recovered portfolio snapshot"
            );
            return Ok(Some(snapshot));
        }
        info!("no persisted state found; starting clean");
        Ok(None)
    }

    fn verify(&self, snapshot: &PortfolioSnapshot, expected: u64, store: &str) -> StateResult<()> {
        if snapshot.version != expected {
            return Err(StateError::Corruption(format!(
                "snapshot in {store} claims version {} but was stored as v{expected}",
                snapshot.version
            )));
        }
        if snapshot.cash < Decimal::ZERO {
            return Err(StateError::Corruption(format!(
                "snapshot v{expected} records negative cash {}",
                snapshot.cash
            )));
        }
        let holdings: Decimal = snapshot.positions.iter().map(Position::market_value).sum();
        let recomputed = snapshot.cash + holdings;
        if (recomputed - snapshot.equity).abs() > self.config.consistency_tolerance {
            return Err(StateError::Corruption(format!(
                "snapshot v{expected} equity {} does not match recomputed {recomputed}",
                snapshot.equity
            )));
        }
        Ok(())
    }
}

fn check_monotonic(versions: &[u64]) -> Option<StateError> {
    for pair in versions.windows(2) {
        if pair[1] <= pair[0] {
            return Some(StateError::Corruption(format!(
                "version sequence is not monotonic: {} then {}",
                pair[0], pair[1]
            )));
        }
    }
    None
}
