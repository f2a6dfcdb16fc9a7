// Instrument Reference - Static lot sizes, strike steps and option chains
// Loaded by a collaborator; the engine only reads it

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use crate::core::config::ExecutionConfig;
use crate::core::types::OptionKind;

#[derive(Debug, Error)]
pub enum LookupError {
    #[error("No option chain for {0}")]
    NoChain(String),
    #[error("Lookup failed: {0}")]
    Failed(String),
}

/// One tradable option leg
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionContract {
    pub underlying: String,
    pub expiry: NaiveDate,
    pub strike: f64,
    pub kind: OptionKind,
    pub symbol: String,
    pub token: String,
}

/// Resolves the call and put legs at a strike for the nearest expiry
#[async_trait]
pub trait OptionLookup: Send + Sync {
    async fn atm_legs(
        &self,
        underlying: &str,
        strike: f64,
        today: NaiveDate,
    ) -> Result<Vec<OptionContract>, LookupError>;
}

pub struct InstrumentReference {
    lot_sizes: HashMap<String, i64>,
    strike_steps: HashMap<String, f64>,
    default_lot_size: i64,
    default_strike_step: f64,
    chains: RwLock<HashMap<String, BTreeMap<NaiveDate, Vec<OptionContract>>>>,
}

impl InstrumentReference {
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            lot_sizes: config.lot_sizes.clone(),
            strike_steps: config.strike_steps.clone(),
            default_lot_size: config.default_lot_size,
            default_strike_step: config.default_strike_step,
            chains: RwLock::new(HashMap::new()),
        }
    }

    pub fn lot_size(&self, underlying: &str) -> i64 {
        self.lot_sizes.get(underlying).copied().unwrap_or(self.default_lot_size)
    }

    pub fn strike_step(&self, underlying: &str) -> f64 {
        self.strike_steps.get(underlying).copied().unwrap_or(self.default_strike_step)
    }

    /// Nearest strike to `price` on the underlying's strike grid
    pub fn atm_strike(&self, underlying: &str, price: f64) -> f64 {
        let step = self.strike_step(underlying);
        (price / step).round() * step
    }

    pub fn add_contract(&self, contract: OptionContract) {
        let mut chains = self.chains.write();
        chains
            .entry(contract.underlying.clone())
            .or_default()
            .entry(contract.expiry)
            .or_default()
            .push(contract);
    }

    /// First listed expiry on or after `today`
    pub fn nearest_expiry(&self, underlying: &str, today: NaiveDate) -> Option<NaiveDate> {
        self.chains
            .read()
            .get(underlying)
            .and_then(|by_expiry| by_expiry.range(today..).next().map(|(d, _)| *d))
    }

    pub fn find_contract(
        &self,
        underlying: &str,
        expiry: NaiveDate,
        strike: f64,
        kind: OptionKind,
    ) -> Option<OptionContract> {
        self.chains.read().get(underlying).and_then(|by_expiry| {
            by_expiry.get(&expiry).and_then(|contracts| {
                contracts
                    .iter()
                    .find(|c| c.kind == kind && (c.strike - strike).abs() < 1e-6)
                    .cloned()
            })
        })
    }

    pub fn has_chain(&self, underlying: &str) -> bool {
        self.chains.read().contains_key(underlying)
    }
}

#[async_trait]
impl OptionLookup for InstrumentReference {
    async fn atm_legs(
        &self,
        underlying: &str,
        strike: f64,
        today: NaiveDate,
    ) -> Result<Vec<OptionContract>, LookupError> {
        let expiry = self
            .nearest_expiry(underlying, today)
            .ok_or_else(|| LookupError::NoChain(underlying.to_string()))?;

        Ok([OptionKind::Call, OptionKind::Put]
            .iter()
            .filter_map(|kind| self.find_contract(underlying, expiry, strike, *kind))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> InstrumentReference {
        let reference = InstrumentReference::from_config(&ExecutionConfig::default());
        let expiry = NaiveDate::from_ymd_opt(2025, 12, 30).unwrap();
        for kind in [OptionKind::Call, OptionKind::Put] {
            reference.add_contract(OptionContract {
                underlying: "HDFCBANK".to_string(),
                expiry,
                strike: 1650.0,
                kind,
                symbol: format!("HDFCBANK30DEC25{}1650", kind.code()),
                token: format!("tok-{}", kind.code()),
            });
        }
        reference
    }

    #[test]
    fn test_atm_strike_uses_step() {
        let reference = reference();
        assert_eq!(reference.atm_strike("BANKNIFTY", 50_049.0), 50_000.0);
        assert_eq!(reference.atm_strike("BANKNIFTY", 50_051.0), 50_100.0);
        assert_eq!(reference.atm_strike("SBIN", 812.4), 810.0);
        assert_eq!(reference.atm_strike("UNKNOWN", 12.6), 15.0);
    }

    #[test]
    fn test_lot_size_default() {
        let reference = reference();
        assert_eq!(reference.lot_size("BANKNIFTY"), 15);
        assert_eq!(reference.lot_size("UNKNOWN"), 1);
    }

    #[test]
    fn test_nearest_expiry_skips_past() {
        let reference = reference();
        let before = NaiveDate::from_ymd_opt(2025, 12, 1).unwrap();
        let after = NaiveDate::from_ymd_opt(2026, 1, 2).unwrap();
        assert_eq!(
            reference.nearest_expiry("HDFCBANK", before),
            NaiveDate::from_ymd_opt(2025, 12, 30)
        );
        assert_eq!(reference.nearest_expiry("HDFCBANK", after), None);
    }

    #[tokio::test]
    async fn test_atm_legs_lookup() {
        let reference = reference();
        let today = NaiveDate::from_ymd_opt(2025, 12, 10).unwrap();
        let legs = reference.atm_legs("HDFCBANK", 1650.0, today).await.unwrap();
        assert_eq!(legs.len(), 2);

        assert!(reference.atm_legs("SBIN", 810.0, today).await.is_err());
        assert!(reference.atm_legs("HDFCBANK", 1660.0, today).await.unwrap().is_empty());
    }
}
