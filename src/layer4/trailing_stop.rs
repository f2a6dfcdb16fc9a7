// Trailing Stop - Per-position profit-protecting stop
// Arms at a profit hurdle, then follows the best price by a fixed trail percent

use serde::Serialize;
use tracing::{info, warn};

/// Trailing-stop sub-state of one position.
///
/// Once armed the trigger only tightens: it never falls for a long and
/// never rises for a short. A breach stays set until `reset`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TrailingStop {
    pub armed: bool,
    pub high_water_mark: f64,
    pub trigger: f64,
    pub breached: bool,
}

impl TrailingStop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direction-adjusted profit percent of `price` over `avg_price`
    pub fn profit_pct(direction: i64, avg_price: f64, price: f64) -> f64 {
        if avg_price <= 0.0 {
            return 0.0;
        }
        direction.signum() as f64 * (price - avg_price) / avg_price * 100.0
    }

    /// Advance with the latest price. `direction` is the sign of the net quantity.
    /// Returns true when this call produced the breach.
    pub fn update(
        &mut self,
        direction: i64,
        avg_price: f64,
        price: f64,
        hurdle_pct: f64,
        trail_pct: f64,
    ) -> bool {
        let side = direction.signum();
        if side == 0 || self.breached {
            return false;
        }
        let trail = trail_pct / 100.0;

        if !self.armed {
            let profit = Self::profit_pct(side, avg_price, price);
            if profit >= hurdle_pct {
                self.armed = true;
                self.high_water_mark = price;
                self.trigger = price * (1.0 - trail * side as f64);
                info!(price, profit_pct = profit, trigger = self.trigger, "Trailing stop armed");
            }
            return false;
        }

        if side > 0 {
            if price > self.high_water_mark {
                self.high_water_mark = price;
                self.trigger = self.trigger.max(price * (1.0 - trail));
            } else if price < self.trigger {
                self.breached = true;
            }
        } else if price < self.high_water_mark {
            self.high_water_mark = price;
            self.trigger = self.trigger.min(price * (1.0 + trail));
        } else if price > self.trigger {
            self.breached = true;
        }

        if self.breached {
            warn!(price, trigger = self.trigger, long = side > 0, "Trailing stop breached");
        }
        self.breached
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_arms_trails_and_breaches() {
        let mut tsl = TrailingStop::new();

        assert!(!tsl.update(1, 100.0, 104.0, 5.0, 5.0));
        assert!(!tsl.armed);

        tsl.update(1, 100.0, 110.0, 5.0, 5.0);
        assert!(tsl.armed);
        assert_eq!(tsl.high_water_mark, 110.0);
        assert!((tsl.trigger - 104.5).abs() < 1e-9);

        tsl.update(1, 100.0, 120.0, 5.0, 5.0);
        assert!((tsl.trigger - 114.0).abs() < 1e-9);

        // Pullback above the trigger keeps the stop where it was
        tsl.update(1, 100.0, 115.0, 5.0, 5.0);
        assert!((tsl.trigger - 114.0).abs() < 1e-9);
        assert!(!tsl.breached);

        assert!(tsl.update(1, 100.0, 113.0, 5.0, 5.0));
        assert!(tsl.breached);
    }

    #[test]
    fn test_breach_is_sticky() {
        let mut tsl = TrailingStop::new();
        tsl.update(1, 100.0, 110.0, 5.0, 5.0);
        tsl.update(1, 100.0, 100.0, 5.0, 5.0);
        assert!(tsl.breached);

        // Recovery does not clear the flag
        assert!(!tsl.update(1, 100.0, 130.0, 5.0, 5.0));
        assert!(tsl.breached);

        tsl.reset();
        assert!(!tsl.armed && !tsl.breached);
    }

    #[test]
    fn test_short_mirror() {
        let mut tsl = TrailingStop::new();
        tsl.update(-1, 100.0, 94.0, 5.0, 5.0);
        assert!(tsl.armed);
        assert!((tsl.trigger - 98.7).abs() < 1e-9);

        tsl.update(-1, 100.0, 90.0, 5.0, 5.0);
        assert!((tsl.trigger - 94.5).abs() < 1e-9);

        assert!(tsl.update(-1, 100.0, 95.0, 5.0, 5.0));
    }

    #[test]
    fn test_flat_position_never_arms() {
        let mut tsl = TrailingStop::new();
        assert!(!tsl.update(0, 100.0, 200.0, 5.0, 5.0));
        assert!(!tsl.armed);
        assert_eq!(TrailingStop::profit_pct(-1, 100.0, 90.0), 10.0);
        assert_eq!(TrailingStop::profit_pct(1, 0.0, 90.0), 0.0);
    }
}
