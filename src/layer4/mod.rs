// Layer 4 - Execution
// Legs, orders, positions, trailing stops and the tick orchestrator

pub mod trailing_stop;
pub mod position_manager;
pub mod legs;
pub mod order_manager;
pub mod background;
pub mod tick_engine;
pub mod trading_engine;

pub use trailing_stop::TrailingStop;
pub use position_manager::{PositionManager, PositionManagerStats};
pub use legs::{
    atm_strike, exchange_local_time, monthly_expiry, option_symbol, otm_offset, simulated_quote,
    Leg, LegPlanner, LegRole,
};
pub use order_manager::{OrderManager, OrderManagerStats};
pub use background::{
    refresh_macro_once, spawn_macro_refresh, AtmDiscovery, AtmDiscoveryStats, AtmRequest,
    AtmSubscription, SubscriptionMap,
};
pub use tick_engine::{EngineDeps, EngineError, TickEngine, TickEngineStats};
pub use trading_engine::{EngineHandle, NullTradingEngine, TradingEngine};
