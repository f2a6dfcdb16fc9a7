// History Source Seam - Hourly closes for the macro trend refresh and
// intraday one-minute candles for seeding session state at startup

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;

use crate::core::types::Bar;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("History unavailable for {0}")]
    Unavailable(String),
    #[error("Transport error: {0}")]
    Transport(String),
}

#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Hourly closing prices, oldest first
    async fn hourly_closes(&self, symbol: &str) -> Result<Vec<f64>, HistoryError>;

    /// One-minute candles starting at or after `since_ms`, oldest first
    async fn intraday_candles(&self, symbol: &str, since_ms: i64) -> Result<Vec<Bar>, HistoryError>;
}

/// Fixed series per symbol, for paper sessions and tests
pub struct StaticHistory {
    series: RwLock<HashMap<String, Vec<f64>>>,
    candles: RwLock<HashMap<String, Vec<Bar>>>,
}

impl StaticHistory {
    pub fn new() -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            candles: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_series(&self, symbol: &str, closes: Vec<f64>) {
        self.series.write().insert(symbol.to_string(), closes);
    }

    pub fn set_candles(&self, symbol: &str, mut candles: Vec<Bar>) {
        candles.sort_by_key(|c| c.start);
        self.candles.write().insert(symbol.to_string(), candles);
    }
}

impl Default for StaticHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistorySource for StaticHistory {
    async fn hourly_closes(&self, symbol: &str) -> Result<Vec<f64>, HistoryError> {
        self.series
            .read()
            .get(symbol)
            .cloned()
            .ok_or_else(|| HistoryError::Unavailable(symbol.to_string()))
    }

    async fn intraday_candles(&self, symbol: &str, since_ms: i64) -> Result<Vec<Bar>, HistoryError> {
        let candles = self.candles.read();
        let series = candles
            .get(symbol)
            .ok_or_else(|| HistoryError::Unavailable(symbol.to_string()))?;
        Ok(series.iter().filter(|c| c.start >= since_ms).cloned().collect())
    }
}
