// Signal Engine - Scored state machine over the reference index
// NONE -> CALL | PUT | STRADDLE -> NONE, gated by a confirmation buffer and a cool-down

use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, info};

use crate::core::config::StrategyConfig;
use crate::core::types::{Signal, SignalKind, Stance, Trend};
use crate::layer3::momentum::MomentumTracker;

/// Basket-strength score contribution
pub fn strength_score(strength: f64) -> f64 {
    if strength > 20.0 {
        1.5
    } else if strength > 10.0 {
        0.5
    } else if strength < -20.0 {
        -1.5
    } else if strength < -10.0 {
        -0.5
    } else {
        0.0
    }
}

/// Trend factor against the reference price; zero when no reference is known
fn trend_score(price: f64, reference: f64) -> f64 {
    if reference <= 0.0 {
        return 0.0;
    }
    if price > reference {
        1.0
    } else if price < reference {
        -1.0
    } else {
        0.0
    }
}

/// Per-tick factor breakdown
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScoreBreakdown {
    pub trend: f64,
    pub macro_trend: f64,
    pub strength: f64,
    pub momentum: f64,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        self.trend + self.macro_trend + self.strength + self.momentum
    }
}

#[derive(Debug, Clone, Default)]
pub struct SignalEngineStats {
    pub ticks_scored: u64,
    pub signals_emitted: u64,
    pub suppressed_by_cooldown: u64,
    pub forced_exits: u64,
}

impl fmt::Display for SignalEngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SignalEngine(ticks={}, signals={}, cooldown={}, forced={})",
            self.ticks_scored, self.signals_emitted, self.suppressed_by_cooldown, self.forced_exits
        )
    }
}

pub struct SignalEngine {
    instrument: String,
    threshold: f64,
    min_hold_ms: i64,
    confirmation_count: usize,
    enable_straddles: bool,

    momentum: MomentumTracker,
    scores: VecDeque<f64>,
    stance: Stance,
    last_signal_time: Option<i64>,
    last_breakdown: ScoreBreakdown,

    stats: SignalEngineStats,
}

impl SignalEngine {
    pub fn new(instrument: &str, config: &StrategyConfig) -> Self {
        let confirmation_count = config.confirmation_count.max(1);
        Self {
            instrument: instrument.to_string(),
            threshold: config.threshold,
            min_hold_ms: config.min_hold_time_secs * 1000,
            confirmation_count,
            enable_straddles: config.enable_straddles,
            momentum: MomentumTracker::from_config(config),
            scores: VecDeque::with_capacity(confirmation_count),
            stance: Stance::None,
            last_signal_time: None,
            last_breakdown: ScoreBreakdown::default(),
            stats: SignalEngineStats::default(),
        }
    }

    /// Score one reference tick and apply at most one transition.
    ///
    /// `reference` is the VWAP or benchmark price, `strength` the basket's
    /// weighted strength at this tick.
    pub fn on_tick(
        &mut self,
        price: f64,
        ts_ms: i64,
        reference: f64,
        macro_trend: Trend,
        strength: f64,
    ) -> Option<Signal> {
        let momentum = self.momentum.update(price, ts_ms);
        let breakdown = ScoreBreakdown {
            trend: trend_score(price, reference),
            macro_trend: macro_trend.score(),
            strength: strength_score(strength),
            momentum: momentum.score,
        };
        self.last_breakdown = breakdown;
        self.stats.ticks_scored += 1;

        if self.scores.len() >= self.confirmation_count {
            self.scores.pop_front();
        }
        self.scores.push_back(breakdown.total());

        if self.scores.len() < self.confirmation_count {
            return None;
        }
        let avg = self.avg_score();

        if let Some(last) = self.last_signal_time {
            if ts_ms - last < self.min_hold_ms {
                self.stats.suppressed_by_cooldown += 1;
                return None;
            }
        }

        let mom = breakdown.momentum;
        let transition = match self.stance {
            Stance::None => {
                let conviction = avg - mom;
                if avg >= self.threshold {
                    Some((
                        Stance::Call,
                        SignalKind::BuyCall,
                        format!("Score {:.1} (Mom: {:+.1})", avg, mom),
                    ))
                } else if avg <= -self.threshold {
                    Some((
                        Stance::Put,
                        SignalKind::BuyPut,
                        format!("Score {:.1} (Mom: {:+.1})", avg, mom),
                    ))
                } else if self.enable_straddles && conviction.abs() < 1.0 && mom.abs() >= 1.5 {
                    Some((
                        Stance::Straddle,
                        SignalKind::BuyStraddle,
                        format!("Straddle: Conviction {:.1}, Mom Spike {:+.1}", conviction, mom),
                    ))
                } else {
                    None
                }
            }
            Stance::Call if avg < 0.5 => Some((
                Stance::None,
                SignalKind::Exit,
                format!("Score faded to {:.1}", avg),
            )),
            Stance::Put if avg > -0.5 => Some((
                Stance::None,
                SignalKind::Exit,
                format!("Score faded to {:.1}", avg),
            )),
            Stance::Straddle if mom.abs() < 0.5 || avg.abs() > self.threshold => Some((
                Stance::None,
                SignalKind::Exit,
                format!("Straddle fade (Mom: {:.1})", mom),
            )),
            _ => None,
        };

        let (next, kind, reason) = transition?;
        Some(self.transition(next, kind, price, reason, ts_ms))
    }

    /// Flatten any open stance outside the scoring path. Ignores the cool-down.
    pub fn force_exit(&mut self, price: f64, reason: &str, ts_ms: i64) -> Option<Signal> {
        if self.stance == Stance::None {
            return None;
        }
        self.stats.forced_exits += 1;
        Some(self.transition(Stance::None, SignalKind::Exit, price, reason.to_string(), ts_ms))
    }

    fn transition(
        &mut self,
        next: Stance,
        kind: SignalKind,
        price: f64,
        reason: String,
        ts_ms: i64,
    ) -> Signal {
        debug!(from = %self.stance, to = %next, "Stance transition");
        self.stance = next;
        self.last_signal_time = Some(ts_ms);
        self.stats.signals_emitted += 1;

        let signal = Signal {
            kind,
            instrument: self.instrument.clone(),
            price,
            reason,
            timestamp: ts_ms,
        };
        info!(signal = %signal, "Signal emitted");
        signal
    }

    /// Mean of the confirmation buffer, 0 when empty
    pub fn avg_score(&self) -> f64 {
        if self.scores.is_empty() {
            return 0.0;
        }
        self.scores.iter().sum::<f64>() / self.scores.len() as f64
    }

    pub fn stance(&self) -> Stance {
        self.stance
    }

    pub fn last_signal_time(&self) -> Option<i64> {
        self.last_signal_time
    }

    pub fn last_breakdown(&self) -> ScoreBreakdown {
        self.last_breakdown
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn get_stats(&self) -> SignalEngineStats {
        self.stats.clone()
    }
}
