// Trading Engine Capability - Narrow control surface over the running engine
// Shared by operator tooling; a null implementation stands in when trading is off

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::core::types::{OrderSide, PositionSnapshot, ProductClass};
use crate::layer2::parser::FeedMessage;
use crate::layer4::tick_engine::{EngineError, TickEngine};

pub trait TradingEngine: Send + Sync {
    fn positions(&self) -> Vec<PositionSnapshot>;

    fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: i64,
        product: ProductClass,
    ) -> Result<Option<String>, EngineError>;

    fn set_auto_trade(&self, enabled: bool);

    fn auto_trade_enabled(&self) -> bool;

    /// Realized plus unrealized P&L
    fn total_pnl(&self) -> f64;
}

/// Cloneable handle to a tick engine behind a mutex
#[derive(Clone)]
pub struct EngineHandle {
    engine: Arc<Mutex<TickEngine>>,
}

impl EngineHandle {
    pub fn new(engine: TickEngine) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
        }
    }

    /// Feed loop that holds the lock per message only
    pub async fn run(&self, mut rx: mpsc::Receiver<FeedMessage>) {
        while let Some(message) = rx.recv().await {
            self.engine.lock().on_message(message);
        }
        info!(stats = %self.engine.lock().get_stats(), "Feed closed");
    }

    pub fn with_engine<R>(&self, f: impl FnOnce(&mut TickEngine) -> R) -> R {
        f(&mut self.engine.lock())
    }
}

impl TradingEngine for EngineHandle {
    fn positions(&self) -> Vec<PositionSnapshot> {
        self.engine.lock().positions().snapshot()
    }

    fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: i64,
        product: ProductClass,
    ) -> Result<Option<String>, EngineError> {
        self.engine.lock().place_manual(symbol, side, quantity, product)
    }

    fn set_auto_trade(&self, enabled: bool) {
        self.engine.lock().set_auto_trade(enabled);
    }

    fn auto_trade_enabled(&self) -> bool {
        self.engine.lock().auto_trade_enabled()
    }

    fn total_pnl(&self) -> f64 {
        self.engine.lock().positions().daily_pnl()
    }
}

/// No positions, orders accepted as no-ops
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTradingEngine;

impl TradingEngine for NullTradingEngine {
    fn positions(&self) -> Vec<PositionSnapshot> {
        Vec::new()
    }

    fn place_order(
        &self,
        symbol: &str,
        _side: OrderSide,
        _quantity: i64,
        _product: ProductClass,
    ) -> Result<Option<String>, EngineError> {
        info!(symbol = %symbol, "Trading disabled, order ignored");
        Ok(None)
    }

    fn set_auto_trade(&self, _enabled: bool) {}

    fn auto_trade_enabled(&self) -> bool {
        false
    }

    fn total_pnl(&self) -> f64 {
        0.0
    }
}
