// Layer 1 - Collaborator seams
// Broker, state store, instrument reference and history source

pub mod broker;
pub mod store;
pub mod instruments;
pub mod history;

// Re-export commonly used items for convenience
pub use broker::{Broker, BrokerError, BrokerStats, PaperBehavior, PaperBroker};
pub use store::{
    JsonFileStore, MemoryStore, StateStore, StoreError, STATE_AUTO_TRADING, STATE_REALIZED_PNL,
};
pub use instruments::{InstrumentReference, LookupError, OptionContract, OptionLookup};
pub use history::{HistoryError, HistorySource, StaticHistory};
