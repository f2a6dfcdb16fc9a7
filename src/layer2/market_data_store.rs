// Market Data Store - Latest quote per instrument
// Readers take an Arc snapshot; writers copy-on-write so a snapshot is never torn

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::core::types::{Tick, Trend};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub instrument: String,
    pub price: f64,
    pub cum_volume: u64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub vwap: f64,
    pub trend: Trend,
    pub timestamp: i64,
}

impl Quote {
    pub fn from_tick(tick: &Tick, vwap: f64, trend: Trend) -> Self {
        Self {
            instrument: tick.instrument.clone(),
            price: tick.price,
            cum_volume: tick.cum_volume,
            open: tick.open,
            high: tick.high,
            low: tick.low,
            vwap,
            trend,
            timestamp: tick.timestamp,
        }
    }
}

pub type QuoteSnapshot = Arc<HashMap<String, Quote>>;

#[derive(Debug, Clone)]
pub struct MarketDataStoreStats {
    pub instruments: usize,
    pub updates: u64,
    pub last_update_ts: Option<i64>,
}

impl fmt::Display for MarketDataStoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MarketData(instruments={}, updates={})",
            self.instruments, self.updates
        )
    }
}

pub struct MarketDataStore {
    quotes: RwLock<QuoteSnapshot>,
    updates: RwLock<u64>,
    last_update_ts: RwLock<Option<i64>>,
}

impl MarketDataStore {
    pub fn new() -> Self {
        Self {
            quotes: RwLock::new(Arc::new(HashMap::new())),
            updates: RwLock::new(0),
            last_update_ts: RwLock::new(None),
        }
    }

    pub fn record(&self, quote: Quote) {
        let ts = quote.timestamp;
        {
            let mut guard = self.quotes.write();
            Arc::make_mut(&mut guard).insert(quote.instrument.clone(), quote);
        }
        *self.updates.write() += 1;
        *self.last_update_ts.write() = Some(ts);
    }

    /// Consistent view of every latest quote
    pub fn snapshot(&self) -> QuoteSnapshot {
        self.quotes.read().clone()
    }

    pub fn latest(&self, instrument: &str) -> Option<Quote> {
        self.quotes.read().get(instrument).cloned()
    }

    pub fn price(&self, instrument: &str) -> Option<f64> {
        self.quotes.read().get(instrument).map(|q| q.price)
    }

    /// Instrument to last price, as consumed by unrealized P&L
    pub fn price_map(&self) -> HashMap<String, f64> {
        self.quotes
            .read()
            .iter()
            .map(|(k, q)| (k.clone(), q.price))
            .collect()
    }

    pub fn get_stats(&self) -> MarketDataStoreStats {
        MarketDataStoreStats {
            instruments: self.quotes.read().len(),
            updates: *self.updates.read(),
            last_update_ts: *self.last_update_ts.read(),
        }
    }
}

impl Default for MarketDataStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quote(instrument: &str, price: f64, ts: i64) -> Quote {
        Quote::from_tick(&Tick::new(instrument, price, 0, ts), price, Trend::Neutral)
    }

    #[test]
    fn test_record_and_latest() {
        let store = MarketDataStore::new();
        store.record(quote("A", 10.0, 1));
        store.record(quote("A", 11.0, 2));
        store.record(quote("B", 5.0, 3));

        assert_eq!(store.price("A"), Some(11.0));
        assert_eq!(store.price("C"), None);
        let stats = store.get_stats();
        assert_eq!(stats.instruments, 2);
        assert_eq!(stats.updates, 3);
        assert_eq!(stats.last_update_ts, Some(3));
    }

    #[test]
    fn test_snapshot_is_stable() {
        let store = MarketDataStore::new();
        store.record(quote("A", 10.0, 1));
        let snapshot = store.snapshot();

        store.record(quote("A", 12.0, 2));
        assert_eq!(snapshot["A"].price, 10.0);
        assert_eq!(store.snapshot()["A"].price, 12.0);
        assert_eq!(store.price_map()["A"], 12.0);
    }
}
