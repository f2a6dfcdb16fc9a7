// Configuration Management for the Index Strength Engine
// JSON file sections with defaults, environment overrides and validation

use chrono::{NaiveTime, Timelike};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::core::types::{ProductClass, TradingMode};

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

// ============================================================================
// Configuration Structures
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Index whose ticks drive the signal engine and whose options are traded
    pub reference_instrument: String,
    pub bar_intervals_minutes: Vec<u32>,
    pub exchange_utc_offset_minutes: i32,

    // ATM discovery
    pub atm_queue_capacity: usize,
    pub atm_workers: usize,

    // Macro refresh
    pub macro_refresh_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            reference_instrument: "BANKNIFTY".to_string(),
            bar_intervals_minutes: vec![3, 5],
            exchange_utc_offset_minutes: 330,
            atm_queue_capacity: 64,
            atm_workers: 2,
            macro_refresh_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BasketConfig {
    /// Constituent weights in percentage points
    pub weights: HashMap<String, f64>,
}

impl Default for BasketConfig {
    fn default() -> Self {
        let weights = [
            ("HDFCBANK", 28.0),
            ("ICICIBANK", 24.0),
            ("KOTAKBANK", 12.0),
            ("AXISBANK", 11.0),
            ("SBIN", 10.0),
            ("INDUSINDBK", 5.0),
            ("BANDHANBNK", 2.5),
            ("FEDERALBNK", 2.0),
            ("PNB", 2.0),
            ("AUBANK", 2.0),
            ("IDFCFIRSTB", 1.5),
        ]
        .iter()
        .map(|(s, w)| (s.to_string(), *w))
        .collect();

        Self { weights }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub threshold: f64,
    pub min_hold_time_secs: i64,
    pub confirmation_count: usize,
    pub enable_straddles: bool,

    // Momentum ring buffer
    pub momentum_lookback_secs: i64,
    pub momentum_retention_secs: i64,
    pub momentum_capacity: usize,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            threshold: 5.5,
            min_hold_time_secs: 60,
            confirmation_count: 5,
            enable_straddles: false,
            momentum_lookback_secs: 120,
            momentum_retention_secs: 600,
            momentum_capacity: 20_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub capital: f64,
    pub max_drawdown_pct: f64,
    pub daily_loss_limit: f64,
    pub tsl_hurdle_pct: f64,
    pub tsl_trail_pct: f64,
    /// Exchange-local wall clock, HH:MM
    pub auto_exit_time: String,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            capital: 100_000.0,
            max_drawdown_pct: 2.0,
            daily_loss_limit: 5_000.0,
            tsl_hurdle_pct: 5.0,
            tsl_trail_pct: 5.0,
            auto_exit_time: "15:15".to_string(),
        }
    }
}

impl RiskConfig {
    /// Auto-exit time as minutes after local midnight
    pub fn auto_exit_minutes(&self) -> Result<u32, ConfigError> {
        let time = NaiveTime::parse_from_str(self.auto_exit_time.trim(), "%H:%M").map_err(|e| {
            ConfigError::Validation(format!("auto_exit_time '{}': {}", self.auto_exit_time, e))
        })?;
        Ok(time.hour() * 60 + time.minute())
    }
}

/// Strength bound above which an OTM offset applies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtmTier {
    pub min_strength: f64,
    pub offset: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub trading_mode: TradingMode,
    pub quantity_lots: i64,
    pub product: ProductClass,
    pub hedged_entries: bool,
    pub hedge_otm_step: f64,
    pub otm_tiers: Vec<OtmTier>,

    // Instrument reference
    pub lot_sizes: HashMap<String, i64>,
    pub strike_steps: HashMap<String, f64>,
    pub default_lot_size: i64,
    pub default_strike_step: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        let strike_steps = [
            ("BANKNIFTY", 100.0),
            ("NIFTY", 50.0),
            ("HDFCBANK", 10.0),
            ("ICICIBANK", 10.0),
            ("KOTAKBANK", 10.0),
            ("AXISBANK", 10.0),
            ("INDUSINDBK", 10.0),
            ("AUBANK", 10.0),
            ("SBIN", 5.0),
            ("BANDHANBNK", 5.0),
            ("FEDERALBNK", 5.0),
            ("IDFCFIRSTB", 1.0),
            ("PNB", 1.0),
        ]
        .iter()
        .map(|(s, step)| (s.to_string(), *step))
        .collect();

        let mut lot_sizes = HashMap::new();
        lot_sizes.insert("BANKNIFTY".to_string(), 15);
        lot_sizes.insert("NIFTY".to_string(), 25);

        Self {
            trading_mode: TradingMode::Paper,
            quantity_lots: 1,
            product: ProductClass::CarryForward,
            hedged_entries: false,
            hedge_otm_step: 1000.0,
            otm_tiers: vec![
                OtmTier { min_strength: 8.0, offset: 200.0 },
                OtmTier { min_strength: 6.5, offset: 100.0 },
            ],
            lot_sizes,
            strike_steps,
            default_lot_size: 1,
            default_strike_step: 5.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
    pub json_logs: bool,
    pub console_output: bool,
    pub event_history: usize,
    /// JSON state file; in-memory store when unset
    pub state_file: Option<String>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "INFO".to_string(),
            json_logs: true,
            console_output: true,
            event_history: 10_000,
            state_file: None,
        }
    }
}

/// Every section in one value, as consumed by the engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub feed: FeedConfig,
    pub basket: BasketConfig,
    pub strategy: StrategyConfig,
    pub risk: RiskConfig,
    pub execution: ExecutionConfig,
    pub monitoring: MonitoringConfig,
}

// ============================================================================
// Configuration Summary
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ConfigSummary {
    pub reference_instrument: String,
    pub trading_mode: TradingMode,
    pub threshold: f64,
    pub confirmation_count: usize,
    pub basket_size: usize,
    pub daily_loss_limit: f64,
    pub log_level: String,
}

// ============================================================================
// Configuration Manager
// ============================================================================

pub struct ConfigManager {
    feed: Arc<RwLock<FeedConfig>>,
    basket: Arc<RwLock<BasketConfig>>,
    strategy: Arc<RwLock<StrategyConfig>>,
    risk: Arc<RwLock<RiskConfig>>,
    execution: Arc<RwLock<ExecutionConfig>>,
    monitoring: Arc<RwLock<MonitoringConfig>>,
}

impl ConfigManager {
    pub fn new(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut manager = Self::from_config(EngineConfig::default());

        if let Some(path) = config_path {
            manager.load_from_file(path)?;
        }

        manager.load_from_env();

        info!("Configuration initialized");
        Ok(manager)
    }

    pub fn from_config(config: EngineConfig) -> Self {
        Self {
            feed: Arc::new(RwLock::new(config.feed)),
            basket: Arc::new(RwLock::new(config.basket)),
            strategy: Arc::new(RwLock::new(config.strategy)),
            risk: Arc::new(RwLock::new(config.risk)),
            execution: Arc::new(RwLock::new(config.execution)),
            monitoring: Arc::new(RwLock::new(config.monitoring)),
        }
    }

    /// Load configuration from JSON file. Missing sections keep their defaults.
    pub fn load_from_file(&mut self, config_path: &str) -> Result<(), ConfigError> {
        let path = Path::new(config_path);
        if !path.exists() {
            warn!(path = config_path, "Config file not found");
            return Ok(());
        }

        let content = fs::read_to_string(path)?;
        let config_data: HashMap<String, serde_json::Value> = serde_json::from_str(&content)?;

        if let Some(data) = config_data.get("feed") {
            *self.feed.write() = serde_json::from_value(data.clone())?;
        }
        if let Some(data) = config_data.get("basket") {
            *self.basket.write() = serde_json::from_value(data.clone())?;
        }
        if let Some(data) = config_data.get("strategy") {
            *self.strategy.write() = serde_json::from_value(data.clone())?;
        }
        if let Some(data) = config_data.get("risk") {
            *self.risk.write() = serde_json::from_value(data.clone())?;
        }
        if let Some(data) = config_data.get("execution") {
            *self.execution.write() = serde_json::from_value(data.clone())?;
        }
        if let Some(data) = config_data.get("monitoring") {
            *self.monitoring.write() = serde_json::from_value(data.clone())?;
        }

        info!(path = config_path, "Configuration loaded");
        Ok(())
    }

    /// Apply environment overrides
    pub fn load_from_env(&mut self) {
        if let Ok(paper) = std::env::var("PAPER_TRADING_MODE") {
            self.execution.write().trading_mode = if paper.trim().eq_ignore_ascii_case("true") {
                TradingMode::Paper
            } else {
                TradingMode::Live
            };
        }
        if let Ok(raw) = std::env::var("MIN_SIGNAL_STRENGTH") {
            match raw.trim().parse::<f64>() {
                Ok(value) => self.strategy.write().threshold = value,
                Err(_) => warn!(value = %raw, "Ignoring invalid MIN_SIGNAL_STRENGTH"),
            }
        }
        if let Ok(raw) = std::env::var("MIN_SIGNAL_HOLD_TIME") {
            match raw.trim().parse::<i64>() {
                Ok(value) => self.strategy.write().min_hold_time_secs = value,
                Err(_) => warn!(value = %raw, "Ignoring invalid MIN_SIGNAL_HOLD_TIME"),
            }
        }
        if let Ok(raw) = std::env::var("ENABLE_STRADDLES") {
            self.strategy.write().enable_straddles = raw.trim().eq_ignore_ascii_case("true");
        }
        if let Ok(raw) = std::env::var("HEDGED_ENTRIES") {
            self.execution.write().hedged_entries = raw.trim().eq_ignore_ascii_case("true");
        }
        if let Ok(level) = std::env::var("ENGINE_LOG_LEVEL") {
            self.monitoring.write().log_level = level;
        }
    }

    /// Save configuration to JSON file
    pub fn save_to_file(&self, config_path: &str) -> Result<(), ConfigError> {
        if let Some(parent) = Path::new(config_path).parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&self.engine_config())?;
        fs::write(config_path, json)?;

        info!(path = config_path, "Configuration saved");
        Ok(())
    }

    /// Validate configuration, reporting every problem at once
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();
        let feed = self.feed.read();
        let basket = self.basket.read();
        let strategy = self.strategy.read();
        let risk = self.risk.read();
        let execution = self.execution.read();

        if feed.reference_instrument.trim().is_empty() {
            errors.push("reference_instrument must not be empty".to_string());
        }
        if feed.bar_intervals_minutes.iter().any(|m| *m == 0) {
            errors.push("bar intervals must be positive".to_string());
        }
        if feed.atm_workers == 0 || feed.atm_queue_capacity == 0 {
            errors.push("ATM discovery needs at least one worker and queue slot".to_string());
        }

        if basket.weights.is_empty() {
            errors.push("basket weights must not be empty".to_string());
        }
        if basket.weights.values().any(|w| !w.is_finite() || *w < 0.0) {
            errors.push("basket weights must be finite and non-negative".to_string());
        }

        if strategy.threshold <= 0.0 {
            errors.push("threshold must be positive".to_string());
        }
        if strategy.confirmation_count == 0 {
            errors.push("confirmation_count must be at least 1".to_string());
        }
        if strategy.min_hold_time_secs < 0 {
            errors.push("min_hold_time_secs must not be negative".to_string());
        }

        if risk.capital <= 0.0 {
            errors.push("capital must be positive".to_string());
        }
        if risk.max_drawdown_pct <= 0.0 || risk.max_drawdown_pct > 100.0 {
            errors.push("max_drawdown_pct must be in (0, 100]".to_string());
        }
        if risk.tsl_hurdle_pct <= 0.0 || risk.tsl_hurdle_pct > 100.0 {
            errors.push("tsl_hurdle_pct must be in (0, 100]".to_string());
        }
        if risk.tsl_trail_pct <= 0.0 || risk.tsl_trail_pct > 100.0 {
            errors.push("tsl_trail_pct must be in (0, 100]".to_string());
        }
        if let Err(e) = risk.auto_exit_minutes() {
            errors.push(e.to_string());
        }

        if execution.quantity_lots <= 0 {
            errors.push("quantity_lots must be positive".to_string());
        }
        if execution.default_strike_step <= 0.0 || execution.strike_steps.values().any(|s| *s <= 0.0) {
            errors.push("strike steps must be positive".to_string());
        }

        if !errors.is_empty() {
            for error in &errors {
                warn!(error = %error, "Config validation error");
            }
            return Err(ConfigError::Validation(errors.join("; ")));
        }

        info!("Configuration validated successfully");
        Ok(())
    }

    /// Get configuration summary
    pub fn get_summary(&self) -> ConfigSummary {
        let feed = self.feed.read();
        let strategy = self.strategy.read();

        ConfigSummary {
            reference_instrument: feed.reference_instrument.clone(),
            trading_mode: self.execution.read().trading_mode,
            threshold: strategy.threshold,
            confirmation_count: strategy.confirmation_count,
            basket_size: self.basket.read().weights.len(),
            daily_loss_limit: self.risk.read().daily_loss_limit,
            log_level: self.monitoring.read().log_level.clone(),
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            feed: self.feed(),
            basket: self.basket(),
            strategy: self.strategy(),
            risk: self.risk(),
            execution: self.execution(),
            monitoring: self.monitoring(),
        }
    }

    // Getters for each config section
    pub fn feed(&self) -> FeedConfig {
        self.feed.read().clone()
    }

    pub fn basket(&self) -> BasketConfig {
        self.basket.read().clone()
    }

    pub fn strategy(&self) -> StrategyConfig {
        self.strategy.read().clone()
    }

    pub fn risk(&self) -> RiskConfig {
        self.risk.read().clone()
    }

    pub fn execution(&self) -> ExecutionConfig {
        self.execution.read().clone()
    }

    pub fn monitoring(&self) -> MonitoringConfig {
        self.monitoring.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_configs() {
        let strategy = StrategyConfig::default();
        assert_eq!(strategy.threshold, 5.5);
        assert_eq!(strategy.confirmation_count, 5);
        assert!(!strategy.enable_straddles);

        let basket = BasketConfig::default();
        assert_eq!(basket.weights.len(), 11);
        let total: f64 = basket.weights.values().sum();
        assert!((total - 100.0).abs() < 1e-9);

        let execution = ExecutionConfig::default();
        assert_eq!(execution.trading_mode, TradingMode::Paper);
        assert_eq!(execution.strike_steps["BANKNIFTY"], 100.0);
    }

    #[test]
    fn test_default_config_validates() {
        let manager = ConfigManager::from_config(EngineConfig::default());
        assert!(manager.validate().is_ok());
    }

    #[test]
    fn test_validation_collects_errors() {
        let mut config = EngineConfig::default();
        config.strategy.confirmation_count = 0;
        config.risk.auto_exit_time = "late".to_string();
        let manager = ConfigManager::from_config(config);

        match manager.validate() {
            Err(ConfigError::Validation(msg)) => {
                assert!(msg.contains("confirmation_count"));
                assert!(msg.contains("auto_exit_time"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_auto_exit_minutes() {
        let risk = RiskConfig::default();
        assert_eq!(risk.auto_exit_minutes().unwrap(), 15 * 60 + 15);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"strategy": {{"threshold": 7.0}}, "risk": {{"capital": 50000.0}}}}"#).unwrap();

        let mut manager = ConfigManager::from_config(EngineConfig::default());
        manager.load_from_file(file.path().to_str().unwrap()).unwrap();

        let strategy = manager.strategy();
        assert_eq!(strategy.threshold, 7.0);
        assert_eq!(strategy.confirmation_count, 5);
        assert_eq!(manager.risk().capital, 50_000.0);
        assert_eq!(manager.feed().reference_instrument, "BANKNIFTY");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("engine.json");
        let path = path.to_str().unwrap();

        let mut config = EngineConfig::default();
        config.execution.hedged_entries = true;
        ConfigManager::from_config(config).save_to_file(path).unwrap();

        let mut reloaded = ConfigManager::from_config(EngineConfig::default());
        reloaded.load_from_file(path).unwrap();
        assert!(reloaded.execution().hedged_entries);
    }

    #[test]
    fn test_config_summary() {
        let manager = ConfigManager::from_config(EngineConfig::default());
        let summary = manager.get_summary();
        assert_eq!(summary.reference_instrument, "BANKNIFTY");
        assert_eq!(summary.basket_size, 11);
    }
}
