// Core Module - Foundational types, config, logging, events

pub mod types;
pub mod config;
pub mod logger;
pub mod events;

// Re-export commonly used items for convenience
pub use types::*;
pub use config::{
    FeedConfig, BasketConfig, StrategyConfig, RiskConfig, ExecutionConfig, MonitoringConfig,
    OtmTier, EngineConfig, ConfigManager, ConfigSummary, ConfigError,
};
pub use logger::{setup_logging, ORDER_LOG_TARGET};
pub use events::{event_data, Event, EventPriority, EventBus, EventBusStatsSnapshot, SubscriptionId};
