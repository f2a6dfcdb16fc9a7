// Layer 2 - Data Processing
// Feed parsing, bars, VWAP and the latest-quote store

pub mod parser;
pub mod bars;
pub mod vwap;
pub mod market_data_store;

// Re-export commonly used items
pub use parser::{FeedMessage, FeedParser, ParseError, ParserStats, TokenMap};
pub use bars::{BarAggregator, BarAggregatorStats};
pub use vwap::{classify_trend, VwapStats, VwapTracker};
pub use market_data_store::{MarketDataStore, MarketDataStoreStats, Quote, QuoteSnapshot};
