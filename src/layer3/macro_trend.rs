// Macro Trend - Hourly SMA50 / RSI14 classification per instrument
// Computed off the hot path and published as an atomically swapped snapshot

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::types::{MacroSnapshot, Trend};

const SMA_PERIOD: usize = 50;
const RSI_PERIOD: usize = 14;

/// Simple moving average of the last `period` values
fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// RSI over simple rolling means of gains and losses.
///
/// A window with no losses reads 100; a flat window reads 50.
pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let tail = &closes[closes.len() - period - 1..];
    let (gains, losses) = tail.windows(2).fold((0.0, 0.0), |(g, l), pair| {
        let delta = pair[1] - pair[0];
        if delta > 0.0 {
            (g + delta, l)
        } else {
            (g, l - delta)
        }
    });

    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;

    if avg_loss == 0.0 {
        return Some(if avg_gain == 0.0 { 50.0 } else { 100.0 });
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// Classify hourly closes, oldest first
pub fn compute_macro_trend(closes: &[f64]) -> MacroSnapshot {
    let (Some(sma50), Some(last)) = (sma(closes, SMA_PERIOD), closes.last().copied()) else {
        return MacroSnapshot::neutral("Insufficient Data");
    };

    let trend = if last > sma50 {
        Trend::Bullish
    } else if last < sma50 {
        Trend::Bearish
    } else {
        Trend::Neutral
    };

    let oscillator = rsi(closes, RSI_PERIOD).unwrap_or(50.0);
    let mut message = format!("RSI: {:.1}", oscillator);
    if oscillator > 70.0 {
        message.push_str(" (Overbought)");
    }
    if oscillator < 30.0 {
        message.push_str(" (Oversold)");
    }

    MacroSnapshot {
        trend,
        oscillator,
        message,
    }
}

// ============================================================================
// Snapshot cache
// ============================================================================

pub type MacroMap = Arc<HashMap<String, MacroSnapshot>>;

/// Latest macro classifications. Readers never see a partial refresh.
pub struct MacroCache {
    current: RwLock<MacroMap>,
}

impl MacroCache {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Replace the whole map in one step
    pub fn swap(&self, snapshots: HashMap<String, MacroSnapshot>) {
        *self.current.write() = Arc::new(snapshots);
    }

    pub fn snapshot(&self) -> MacroMap {
        self.current.read().clone()
    }

    pub fn get(&self, symbol: &str) -> Option<MacroSnapshot> {
        self.current.read().get(symbol).cloned()
    }

    /// Trend for a symbol, NEUTRAL when unknown
    pub fn trend_for(&self, symbol: &str) -> Trend {
        self.current
            .read()
            .get(symbol)
            .map(|s| s.trend)
            .unwrap_or(Trend::Neutral)
    }

    pub fn len(&self) -> usize {
        self.current.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.read().is_empty()
    }
}

impl Default for MacroCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_history() {
        let closes: Vec<f64> = (0..49).map(|i| 100.0 + i as f64).collect();
        let snapshot = compute_macro_trend(&closes);
        assert_eq!(snapshot.trend, Trend::Neutral);
        assert_eq!(snapshot.oscillator, 0.0);
        assert_eq!(snapshot.message, "Insufficient Data");
    }

    #[test]
    fn test_rising_series_is_bullish_overbought() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let snapshot = compute_macro_trend(&closes);
        assert_eq!(snapshot.trend, Trend::Bullish);
        assert_eq!(snapshot.oscillator, 100.0);
        assert_eq!(snapshot.message, "RSI: 100.0 (Overbought)");
    }

    #[test]
    fn test_falling_series_is_bearish_oversold() {
        let closes: Vec<f64> = (0..60).map(|i| 200.0 - i as f64).collect();
        let snapshot = compute_macro_trend(&closes);
        assert_eq!(snapshot.trend, Trend::Bearish);
        assert_eq!(snapshot.oscillator, 0.0);
        assert!(snapshot.message.ends_with("(Oversold)"));
    }

    #[test]
    fn test_flat_series_is_neutral() {
        let closes = vec![100.0; 55];
        let snapshot = compute_macro_trend(&closes);
        assert_eq!(snapshot.trend, Trend::Neutral);
        assert_eq!(snapshot.message, "RSI: 50.0");
    }

    #[test]
    fn test_rsi_mixed_moves() {
        // Seven +2 moves and seven -1 moves: rs = 2
        let mut closes = vec![100.0];
        for i in 0..14 {
            let last = *closes.last().unwrap();
            closes.push(if i % 2 == 0 { last + 2.0 } else { last - 1.0 });
        }
        let value = rsi(&closes, 14).unwrap();
        assert!((value - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_cache_swap_and_default() {
        let cache = MacroCache::new();
        assert_eq!(cache.trend_for("BANKNIFTY"), Trend::Neutral);

        let before = cache.snapshot();
        let mut map = HashMap::new();
        map.insert(
            "BANKNIFTY".to_string(),
            MacroSnapshot {
                trend: Trend::Bullish,
                oscillator: 61.0,
                message: "RSI: 61.0".to_string(),
            },
        );
        cache.swap(map);

        assert!(before.is_empty());
        assert_eq!(cache.trend_for("BANKNIFTY"), Trend::Bullish);
        assert_eq!(cache.len(), 1);
    }
}
