//! Layered configuration loading.
//!
//! Sources (lowest to highest precedence):
//! 1. `config/default.toml`
//! 2. `config/{environment}.toml` (if an environment is selected)
//! 3. `config/local.toml` (optional, ignored in git)
//! 4. Environment variables prefixed with `ARBITER__`

use std::path::{Path, PathBuf};

use anyhow::Result;
use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;

use arbiter_core::Instrument;

/// Root application configuration deserialized from layered sources.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub portfolio: PortfolioSection,
    #[serde(default)]
    pub risk: RiskSection,
    #[serde(default)]
    pub signals: SignalsSection,
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub market: MarketSection,
    #[serde(default)]
    pub state: StateSection,
    #[serde(default)]
    pub alerts: AlertsSection,
    #[serde(default)]
    pub strategies: StrategiesSection,
    #[serde(default)]
    pub instruments: Vec<Instrument>,
}

#[derive(Debug, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_cycle_interval_ms")]
    pub cycle_interval_ms: u64,
    #[serde(default = "default_candle_interval_secs")]
    pub candle_interval_secs: i64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            cycle_interval_ms: default_cycle_interval_ms(),
            candle_interval_secs: default_candle_interval_secs(),
            history_capacity: default_history_capacity(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PortfolioSection {
    #[serde(default = "default_initial_cash")]
    pub initial_cash: Decimal,
    #[serde(default)]
    pub allow_short: bool,
}

impl Default for PortfolioSection {
    fn default() -> Self {
        Self {
            initial_cash: default_initial_cash(),
            allow_short: false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RiskSection {
    #[serde(default = "default_risk_fraction")]
    pub risk_fraction: Decimal,
    #[serde(default = "default_min_reward_risk")]
    pub min_reward_risk: Decimal,
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: usize,
    #[serde(default = "default_max_trades_per_symbol_per_day")]
    pub max_trades_per_symbol_per_day: u32,
    #[serde(default = "default_max_sector_exposure")]
    pub max_sector_exposure: Decimal,
    #[serde(default = "default_max_total_notional")]
    pub max_total_notional: Decimal,
    #[serde(default = "default_atr_period")]
    pub atr_period: usize,
    #[serde(default = "default_stop_atr_multiple")]
    pub stop_atr_multiple: Decimal,
    #[serde(default = "default_target_atr_multiple")]
    pub target_atr_multiple: Decimal,
}

impl Default for RiskSection {
    fn default() -> Self {
        Self {
            risk_fraction: default_risk_fraction(),
            min_reward_risk: default_min_reward_risk(),
            max_open_positions: default_max_open_positions(),
            max_trades_per_symbol_per_day: default_max_trades_per_symbol_per_day(),
            max_sector_exposure: default_max_sector_exposure(),
            max_total_notional: default_max_total_notional(),
            atr_period: default_atr_period(),
            stop_atr_multiple: default_stop_atr_multiple(),
            target_atr_multiple: default_target_atr_multiple(),
        }
    }
}

/// Aggregation thresholds are profile-dependent (paper and live disagree
/// on the right level), so they are configuration, never hardcoded.
#[derive(Debug, Deserialize)]
pub struct SignalsSection {
    #[serde(default = "default_agreement_threshold_entry")]
    pub agreement_threshold_entry: f64,
    #[serde(default = "default_agreement_threshold_exit")]
    pub agreement_threshold_exit: f64,
}

impl Default for SignalsSection {
    fn default() -> Self {
        Self {
            agreement_threshold_entry: default_agreement_threshold_entry(),
            agreement_threshold_exit: default_agreement_threshold_exit(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BrokerSection {
    #[serde(default = "default_rate_limit_per_second")]
    pub rate_limit_per_second: u32,
    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: u32,
    #[serde(default = "default_circuit_failure_threshold")]
    pub circuit_failure_threshold: u32,
    #[serde(default = "default_circuit_cooldown_seconds")]
    pub circuit_cooldown_seconds: u64,
    #[serde(default = "default_circuit_failure_window_seconds")]
    pub circuit_failure_window_seconds: u64,
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    #[serde(default = "default_order_retry_limit")]
    pub order_retry_limit: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub paper: PaperSection,
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            rate_limit_per_second: default_rate_limit_per_second(),
            rate_limit_burst: default_rate_limit_burst(),
            circuit_failure_threshold: default_circuit_failure_threshold(),
            circuit_cooldown_seconds: default_circuit_cooldown_seconds(),
            circuit_failure_window_seconds: default_circuit_failure_window_seconds(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            call_timeout_ms: default_call_timeout_ms(),
            order_retry_limit: default_order_retry_limit(),
            retry_backoff_ms: default_retry_backoff_ms(),
            paper: PaperSection::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PaperSection {
    #[serde(default)]
    pub spread_bps: Decimal,
    #[serde(default)]
    pub slippage_bps: Decimal,
    #[serde(default)]
    pub fee_bps: Decimal,
    /// Initial last prices seeded into the paper broker, keyed by symbol.
    #[serde(default)]
    pub seed_prices: std::collections::HashMap<String, Decimal>,
}

#[derive(Debug, Deserialize)]
pub struct MarketSection {
    #[serde(default = "default_quote_ttl_ms")]
    pub quote_ttl_ms: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for MarketSection {
    fn default() -> Self {
        Self {
            quote_ttl_ms: default_quote_ttl_ms(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StateSection {
    #[serde(default = "default_state_dir")]
    pub dir: PathBuf,
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,
    #[serde(default = "default_persist_interval_seconds")]
    pub persist_interval_seconds: u64,
    #[serde(default = "default_consistency_tolerance")]
    pub consistency_tolerance: Decimal,
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
            backup_dir: None,
            persist_interval_seconds: default_persist_interval_seconds(),
            consistency_tolerance: default_consistency_tolerance(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AlertsSection {
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_max_order_failures")]
    pub max_order_failures: u32,
}

impl Default for AlertsSection {
    fn default() -> Self {
        Self {
            webhook_url: None,
            max_order_failures: default_max_order_failures(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StrategiesSection {
    #[serde(default)]
    pub sma_cross: SmaCrossSection,
    #[serde(default)]
    pub momentum: MomentumSection,
    #[serde(default)]
    pub rsi_reversion: RsiReversionSection,
    #[serde(default = "default_protective_weight")]
    pub protective_stops_weight: f64,
}

impl Default for StrategiesSection {
    fn default() -> Self {
        Self {
            sma_cross: SmaCrossSection::default(),
            momentum: MomentumSection::default(),
            rsi_reversion: RsiReversionSection::default(),
            protective_stops_weight: default_protective_weight(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SmaCrossSection {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_sma_fast")]
    pub fast_period: usize,
    #[serde(default = "default_sma_slow")]
    pub slow_period: usize,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl Default for SmaCrossSection {
    fn default() -> Self {
        Self {
            enabled: true,
            fast_period: default_sma_fast(),
            slow_period: default_sma_slow(),
            weight: default_weight(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MomentumSection {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_momentum_period")]
    pub period: usize,
    #[serde(default = "default_momentum_threshold")]
    pub threshold: Decimal,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl Default for MomentumSection {
    fn default() -> Self {
        Self {
            enabled: true,
            period: default_momentum_period(),
            threshold: default_momentum_threshold(),
            weight: default_weight(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RsiReversionSection {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_rsi_period")]
    pub period: usize,
    #[serde(default = "default_rsi_oversold")]
    pub oversold: Decimal,
    #[serde(default = "default_rsi_overbought")]
    pub overbought: Decimal,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

impl Default for RsiReversionSection {
    fn default() -> Self {
        Self {
            enabled: true,
            period: default_rsi_period(),
            oversold: default_rsi_oversold(),
            overbought: default_rsi_overbought(),
            weight: default_weight(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cycle_interval_ms() -> u64 {
    1_000
}

fn default_candle_interval_secs() -> i64 {
    60
}

fn default_history_capacity() -> usize {
    256
}

fn default_initial_cash() -> Decimal {
    Decimal::from(100_000)
}

fn default_risk_fraction() -> Decimal {
    Decimal::new(1, 2)
}

fn default_min_reward_risk() -> Decimal {
    Decimal::new(15, 1)
}

fn default_max_open_positions() -> usize {
    10
}

fn default_max_trades_per_symbol_per_day() -> u32 {
    5
}

fn default_max_sector_exposure() -> Decimal {
    Decimal::new(25, 2)
}

fn default_max_total_notional() -> Decimal {
    Decimal::from(1_000_000)
}

fn default_atr_period() -> usize {
    14
}

fn default_stop_atr_multiple() -> Decimal {
    Decimal::TWO
}

fn default_target_atr_multiple() -> Decimal {
    Decimal::from(4)
}

fn default_agreement_threshold_entry() -> f64 {
    0.4
}

fn default_agreement_threshold_exit() -> f64 {
    0.2
}

fn default_rate_limit_per_second() -> u32 {
    10
}

fn default_rate_limit_burst() -> u32 {
    20
}

fn default_circuit_failure_threshold() -> u32 {
    5
}

fn default_circuit_cooldown_seconds() -> u64 {
    30
}

fn default_circuit_failure_window_seconds() -> u64 {
    60
}

fn default_acquire_timeout_ms() -> u64 {
    2_000
}

fn default_call_timeout_ms() -> u64 {
    5_000
}

fn default_order_retry_limit() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    250
}

fn default_quote_ttl_ms() -> u64 {
    2_000
}

fn default_cache_capacity() -> usize {
    256
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("./state")
}

fn default_persist_interval_seconds() -> u64 {
    30
}

fn default_consistency_tolerance() -> Decimal {
    Decimal::new(1, 2)
}

fn default_max_order_failures() -> u32 {
    3
}

fn default_enabled() -> bool {
    true
}

fn default_weight() -> f64 {
    1.0
}

fn default_protective_weight() -> f64 {
    1.0
}

fn default_sma_fast() -> usize {
    10
}

fn default_sma_slow() -> usize {
    30
}

fn default_momentum_period() -> usize {
    12
}

fn default_momentum_threshold() -> Decimal {
    Decimal::new(5, 3)
}

fn default_rsi_period() -> usize {
    14
}

fn default_rsi_oversold() -> Decimal {
    Decimal::from(30)
}

fn default_rsi_overbought() -> Decimal {
    Decimal::from(70)
}

/// Loads configuration by merging files and environment variables.
pub fn load_config(env: Option<&str>) -> Result<AppConfig> {
    let base_path = Path::new("config");

    let mut builder =
        Config::builder().add_source(File::from(base_path.join("default.toml")).required(true));
    if let Some(env_name) = env {
        builder = builder
            .add_source(File::from(base_path.join(format!("{env_name}.toml"))).required(false));
    }
    builder = builder.add_source(File::from(base_path.join("local.toml")).required(false));
    builder = builder.add_source(
        Environment::with_prefix("ARBITER")
            .separator("__")
            .ignore_empty(true),
    );

    let config = builder.build()?;
    config
        .try_deserialize()
        .map_err(|err: ConfigError| err.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_section() {
        let config: AppConfig = Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(config.engine.cycle_interval_ms, 1_000);
        assert_eq!(config.risk.risk_fraction, Decimal::new(1, 2));
        assert!(config.strategies.sma_cross.enabled);
        assert!(config.instruments.is_empty());
        assert_eq!(config.signals.agreement_threshold_entry, 0.4);
    }
}
