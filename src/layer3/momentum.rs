// Momentum Tracker - Short-horizon price change of the reference index
// Keeps a bounded ring of recent ticks and scores the change over a fixed lookback

use crate::core::config::StrategyConfig;
use crate::layer3::common::TimeWindow;

/// Momentum score contribution for a point change over the lookback
pub fn momentum_score(change_points: f64) -> f64 {
    if change_points >= 60.0 {
        1.5
    } else if change_points >= 30.0 {
        0.5
    } else if change_points <= -60.0 {
        -1.5
    } else if change_points <= -30.0 {
        -0.5
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MomentumReading {
    pub change_points: f64,
    pub score: f64,
}

pub struct MomentumTracker {
    window: TimeWindow<f64>,
    lookback_ms: i64,
}

impl MomentumTracker {
    pub fn new(lookback_secs: i64, retention_secs: i64, capacity: usize) -> Self {
        Self {
            window: TimeWindow::new(retention_secs * 1000, capacity),
            lookback_ms: lookback_secs * 1000,
        }
    }

    pub fn from_config(config: &StrategyConfig) -> Self {
        Self::new(
            config.momentum_lookback_secs,
            config.momentum_retention_secs,
            config.momentum_capacity,
        )
    }

    /// Record a tick and return the change since the lookback reference.
    ///
    /// The reference is the newest sample at least `lookback` old, or the
    /// oldest retained sample when none is that old.
    pub fn update(&mut self, price: f64, ts_ms: i64) -> MomentumReading {
        self.window.add(ts_ms, price);
        self.window.prune(ts_ms);

        if self.window.len() < 2 {
            return MomentumReading {
                change_points: 0.0,
                score: 0.0,
            };
        }

        let reference = self
            .window
            .latest_at_or_before(ts_ms - self.lookback_ms)
            .or_else(|| self.window.first())
            .map(|(_, p)| *p)
            .unwrap_or(price);

        let change_points = price - reference;
        MomentumReading {
            change_points,
            score: momentum_score(change_points),
        }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }
}
