// Layer 3 - Analytics
// Basket strength, momentum, macro trend and the signal state machine

// Common utilities
pub mod common;

pub mod strength;
pub mod momentum;
pub mod macro_trend;
pub mod signal_engine;

pub use strength::{Contribution, ConstituentStrength};
pub use momentum::{momentum_score, MomentumReading, MomentumTracker};
pub use macro_trend::{compute_macro_trend, rsi, MacroCache, MacroMap};
pub use signal_engine::{strength_score, ScoreBreakdown, SignalEngine, SignalEngineStats};
