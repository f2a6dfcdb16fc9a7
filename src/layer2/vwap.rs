// VWAP Tracker - Session volume-weighted average price from cumulative feed volume
// Volume only advances by non-negative deltas; a lower cumulative volume is ignored

use std::fmt;

use crate::core::types::Trend;

/// BULLISH above the reference, BEARISH below, NEUTRAL on a tie
pub fn classify_trend(price: f64, reference: f64) -> Trend {
    if price > reference {
        Trend::Bullish
    } else if price < reference {
        Trend::Bearish
    } else {
        Trend::Neutral
    }
}

#[derive(Debug, Clone, Default)]
pub struct VwapStats {
    pub updates_processed: u64,
    /// Ticks whose cumulative volume was below the baseline
    pub regressions: u64,
}

#[derive(Debug, Clone)]
pub struct VwapTracker {
    instrument: String,
    cum_volume: u64,
    cum_pv: f64,
    last_cum_volume: u64,
    last_price: f64,
    stats: VwapStats,
}

impl VwapTracker {
    pub fn new(instrument: &str) -> Self {
        Self {
            instrument: instrument.to_string(),
            cum_volume: 0,
            cum_pv: 0.0,
            last_cum_volume: 0,
            last_price: 0.0,
            stats: VwapStats::default(),
        }
    }

    /// Apply one tick and return the volume delta it contributed
    pub fn update(&mut self, price: f64, cum_volume: u64) -> u64 {
        self.stats.updates_processed += 1;
        self.last_price = price;

        if cum_volume < self.last_cum_volume {
            self.stats.regressions += 1;
            return 0;
        }

        let delta = cum_volume - self.last_cum_volume;
        self.last_cum_volume = cum_volume;
        if delta > 0 {
            self.cum_volume += delta;
            self.cum_pv += price * delta as f64;
        }
        delta
    }

    /// Restore session totals derived from history
    pub fn seed(&mut self, cum_volume: u64, cum_pv: f64, last_cum_volume: u64) {
        self.cum_volume = cum_volume;
        self.cum_pv = cum_pv;
        self.last_cum_volume = last_cum_volume;
    }

    pub fn reset_session(&mut self) {
        self.cum_volume = 0;
        self.cum_pv = 0.0;
        self.last_cum_volume = 0;
    }

    /// Undefined until some volume has been seen
    pub fn vwap(&self) -> Option<f64> {
        if self.cum_volume > 0 {
            Some(self.cum_pv / self.cum_volume as f64)
        } else {
            None
        }
    }

    /// VWAP, falling back to `price` while no volume has been seen
    pub fn reference(&self, price: f64) -> f64 {
        self.vwap().unwrap_or(price)
    }

    pub fn trend(&self, price: f64) -> Trend {
        classify_trend(price, self.reference(price))
    }

    pub fn cum_volume(&self) -> u64 {
        self.cum_volume
    }

    pub fn cum_pv(&self) -> f64 {
        self.cum_pv
    }

    pub fn last_cum_volume(&self) -> u64 {
        self.last_cum_volume
    }

    pub fn get_stats(&self) -> VwapStats {
        self.stats.clone()
    }
}

impl fmt::Display for VwapTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.vwap() {
            Some(v) => write!(f, "VWAP({}: {:.2}, vol={})", self.instrument, v, self.cum_volume),
            None => write!(f, "VWAP({}: n/a, last={:.2})", self.instrument, self.last_price),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vwap_from_cumulative_volume() {
        let mut vwap = VwapTracker::new("X");
        assert_eq!(vwap.update(100.0, 10), 10);
        assert_eq!(vwap.update(110.0, 20), 10);
        assert_eq!(vwap.vwap(), Some(105.0));
    }

    #[test]
    fn test_regression_contributes_nothing() {
        let mut vwap = VwapTracker::new("X");
        vwap.update(100.0, 100);
        assert_eq!(vwap.update(500.0, 40), 0);
        assert_eq!(vwap.vwap(), Some(100.0));
        assert_eq!(vwap.last_cum_volume(), 100);

        // Baseline was not rewound: only 100 -> 110 counts
        assert_eq!(vwap.update(200.0, 110), 10);
        let expected = (100.0 * 100.0 + 200.0 * 10.0) / 110.0;
        assert!((vwap.vwap().unwrap() - expected).abs() < 1e-9);
        assert_eq!(vwap.get_stats().regressions, 1);
    }

    #[test]
    fn test_reference_falls_back_to_price() {
        let mut vwap = VwapTracker::new("X");
        vwap.update(250.0, 0);
        assert_eq!(vwap.vwap(), None);
        assert_eq!(vwap.reference(251.0), 251.0);
        assert_eq!(vwap.trend(251.0), Trend::Neutral);
    }

    #[test]
    fn test_classify_trend_ties_neutral() {
        assert_eq!(classify_trend(10.0, 10.0), Trend::Neutral);
        assert_eq!(classify_trend(10.1, 10.0), Trend::Bullish);
        assert_eq!(classify_trend(9.9, 10.0), Trend::Bearish);
    }

    #[test]
    fn test_seed_and_reset() {
        let mut vwap = VwapTracker::new("X");
        vwap.seed(1_000, 100_000.0, 1_000);
        assert_eq!(vwap.vwap(), Some(100.0));
        assert_eq!(vwap.update(110.0, 1_000), 0);

        vwap.reset_session();
        assert_eq!(vwap.vwap(), None);
        assert_eq!(vwap.update(90.0, 5), 5);
        assert_eq!(vwap.vwap(), Some(90.0));
    }
}
