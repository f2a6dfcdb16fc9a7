// Order Manager - Placement, audit trail and the authoritative fill path
// Paper mode fills on placement; live mode fills only from broker notifications

use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::core::events::{
    event_data, EventBus, EventPriority, EVENT_ORDER_ATTEMPT, EVENT_ORDER_RESULT,
    EVENT_ORDER_UPDATE, EVENT_POSITION_UPDATE,
};
use crate::core::logger::ORDER_LOG_TARGET;
use crate::core::types::{OrderRequest, OrderSide, OrderUpdate, PositionSnapshot, TradingMode};
use crate::layer1::broker::{Broker, BrokerError};
use crate::layer2::market_data_store::MarketDataStore;
use crate::layer4::position_manager::PositionManager;

const SOURCE: &str = "order_manager";

#[derive(Debug, Clone, Default)]
pub struct OrderManagerStats {
    pub orders_attempted: u64,
    pub orders_placed: u64,
    pub orders_failed: u64,
    pub fills_applied: u64,
    pub duplicate_fills: u64,
    pub rejections: u64,
    pub closes_covered: u64,
}

impl fmt::Display for OrderManagerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Orders(attempted={}, placed={}, failed={}, fills={}, duplicates={}, rejected={}, covered={})",
            self.orders_attempted,
            self.orders_placed,
            self.orders_failed,
            self.fills_applied,
            self.duplicate_fills,
            self.rejections,
            self.closes_covered
        )
    }
}

pub struct OrderManager {
    broker: Arc<dyn Broker>,
    positions: Arc<PositionManager>,
    market_data: Arc<MarketDataStore>,
    bus: Arc<EventBus>,
    mode: TradingMode,

    /// Order ids whose fill has been applied
    applied: Mutex<HashSet<String>>,
    /// Live orders awaiting a fill notification
    pending: RwLock<HashMap<String, OrderRequest>>,

    stats: RwLock<OrderManagerStats>,
}

impl OrderManager {
    pub fn new(
        broker: Arc<dyn Broker>,
        positions: Arc<PositionManager>,
        market_data: Arc<MarketDataStore>,
        bus: Arc<EventBus>,
        mode: TradingMode,
    ) -> Self {
        info!(mode = %mode, broker = broker.name(), "Order manager initialized");
        Self {
            broker,
            positions,
            market_data,
            bus,
            mode,
            applied: Mutex::new(HashSet::new()),
            pending: RwLock::new(HashMap::new()),
            stats: RwLock::new(OrderManagerStats::default()),
        }
    }

    pub fn mode(&self) -> TradingMode {
        self.mode
    }

    /// Place an order. In paper mode an accepted order is filled at
    /// `paper_price` immediately; nothing is filled on failure.
    pub fn place(
        &self,
        request: &OrderRequest,
        reason: &str,
        paper_price: f64,
        ts_ms: i64,
    ) -> Result<Option<String>, BrokerError> {
        self.stats.write().orders_attempted += 1;
        info!(
            target: ORDER_LOG_TARGET,
            record = "ORDER_ATTEMPT",
            instrument = %request.instrument,
            side = %request.side,
            qty = request.quantity,
            product = %request.product,
            tag = %request.tag,
            reason = %reason,
            "Order attempt"
        );
        self.bus.emit(
            EVENT_ORDER_ATTEMPT,
            ts_ms,
            event_data(json!({
                "instrument": request.instrument,
                "side": request.side.to_string(),
                "qty": request.quantity,
                "tag": request.tag,
                "reason": reason,
            })),
            SOURCE,
            EventPriority::High,
        );

        let outcome = self.broker.place_order(request);
        let (status, order_id, detail) = match &outcome {
            Ok(Some(id)) => ("PLACED", Some(id.clone()), String::new()),
            Ok(None) => ("FAILED", None, "no order id returned".to_string()),
            Err(e) => ("EXCEPTION", None, e.to_string()),
        };

        if order_id.is_some() {
            self.stats.write().orders_placed += 1;
            info!(
                target: ORDER_LOG_TARGET,
                record = "ORDER_RESULT",
                status,
                order_id = order_id.as_deref().unwrap_or_default(),
                instrument = %request.instrument,
                "Order placed"
            );
        } else {
            self.stats.write().orders_failed += 1;
            error!(
                target: ORDER_LOG_TARGET,
                record = "ORDER_RESULT",
                status,
                instrument = %request.instrument,
                side = %request.side,
                qty = request.quantity,
                reason = %reason,
                error = %detail,
                "Order failed"
            );
        }
        self.bus.emit(
            EVENT_ORDER_RESULT,
            ts_ms,
            event_data(json!({
                "status": status,
                "order_id": order_id,
                "instrument": request.instrument,
                "side": request.side.to_string(),
                "qty": request.quantity,
                "reason": reason,
                "error": detail,
            })),
            SOURCE,
            EventPriority::High,
        );

        if let Some(id) = &order_id {
            match self.mode {
                TradingMode::Paper => {
                    self.applied.lock().insert(id.clone());
                    self.apply_fill(&request.instrument, request.quantity, paper_price, request.side, request, ts_ms);
                }
                TradingMode::Live => {
                    self.pending.write().insert(id.clone(), request.clone());
                }
            }
        }

        outcome
    }

    /// Handle a broker status notification
    pub fn on_order_update(&self, update: &OrderUpdate, ts_ms: i64) -> Option<PositionSnapshot> {
        info!(
            target: ORDER_LOG_TARGET,
            record = "ORDER_UPDATE",
            order_id = %update.order_id,
            instrument = %update.instrument,
            status = %update.status,
            rejection = update.rejection_reason.as_deref().unwrap_or_default(),
            "Order update"
        );
        self.bus.emit(
            EVENT_ORDER_UPDATE,
            ts_ms,
            event_data(json!({
                "order_id": update.order_id,
                "instrument": update.instrument,
                "status": update.status,
                "rejection": update.rejection_reason,
            })),
            SOURCE,
            EventPriority::High,
        );

        if update.is_rejected() {
            self.stats.write().rejections += 1;
            self.pending.write().remove(&update.order_id);
            warn!(
                order_id = %update.order_id,
                instrument = %update.instrument,
                reason = update.rejection_reason.as_deref().unwrap_or("unknown"),
                "Order rejected"
            );
            return None;
        }

        if !update.is_filled() {
            return None;
        }

        if self.mode == TradingMode::Paper {
            debug!(order_id = %update.order_id, "Fill notification ignored in paper mode");
            return None;
        }

        if !self.applied.lock().insert(update.order_id.clone()) {
            self.stats.write().duplicate_fills += 1;
            debug!(order_id = %update.order_id, "Duplicate fill ignored");
            return None;
        }

        let pending = self.pending.write().remove(&update.order_id);
        let side = update.side.or_else(|| pending.as_ref().map(|r| r.side));
        let Some(side) = side else {
            warn!(order_id = %update.order_id, "Fill without side ignored");
            return None;
        };
        let quantity = if update.fill_quantity > 0 {
            update.fill_quantity
        } else {
            pending.as_ref().map(|r| r.quantity).unwrap_or(0)
        };

        let request = pending.unwrap_or_else(|| {
            OrderRequest::market(&update.instrument, side, quantity, update.product, "EXTERNAL")
        });
        Some(self.apply_fill(&update.instrument, quantity, update.fill_price, side, &request, ts_ms))
    }

    fn apply_fill(
        &self,
        instrument: &str,
        quantity: i64,
        price: f64,
        side: OrderSide,
        request: &OrderRequest,
        ts_ms: i64,
    ) -> PositionSnapshot {
        let snapshot = self
            .positions
            .on_fill(instrument, quantity, price, side, request.product);
        self.stats.write().fills_applied += 1;

        info!(
            target: ORDER_LOG_TARGET,
            record = "POSITION",
            instrument = %instrument,
            side = %side,
            qty = quantity,
            price,
            net_qty = snapshot.net_qty,
            avg_price = snapshot.avg_price,
            realized_pnl = snapshot.realized_pnl,
            "Fill applied"
        );
        self.bus.emit(
            EVENT_POSITION_UPDATE,
            ts_ms,
            event_data(json!({
                "instrument": instrument,
                "product": request.product.code(),
                "net_qty": snapshot.net_qty,
                "avg_price": snapshot.avg_price,
                "realized_pnl": snapshot.realized_pnl,
            })),
            SOURCE,
            EventPriority::Medium,
        );
        snapshot
    }

    /// Last known price for a position: quote store, last mark, then average
    pub fn mark_price(&self, position: &PositionSnapshot) -> f64 {
        self.market_data
            .price(&position.key.instrument)
            .or(if position.last_price > 0.0 { Some(position.last_price) } else { None })
            .unwrap_or(position.avg_price)
    }

    /// Quantity of unfilled live orders already working against `position`
    pub fn pending_closing_qty(&self, position: &PositionSnapshot) -> i64 {
        let closing = OrderSide::closing(position.net_qty);
        self.pending
            .read()
            .values()
            .filter(|r| {
                r.side == closing
                    && r.product == position.key.product
                    && r.instrument == position.key.instrument
            })
            .map(|r| r.quantity.abs())
            .sum()
    }

    /// Quantity still uncovered once pending closing orders fill
    pub fn uncovered_qty(&self, position: &PositionSnapshot) -> i64 {
        (position.net_qty.abs() - self.pending_closing_qty(position)).max(0)
    }

    /// Opposing market order for the uncovered part of every open position
    /// accepted by `filter`. Returns the number of orders the broker accepted.
    pub fn close_matching<F>(&self, filter: F, tag: &str, reason: &str, ts_ms: i64) -> usize
    where
        F: Fn(&PositionSnapshot) -> bool,
    {
        let targets: Vec<PositionSnapshot> = self
            .positions
            .open_positions()
            .into_iter()
            .filter(|p| filter(p))
            .collect();

        let mut placed = 0;
        for position in targets {
            let quantity = self.uncovered_qty(&position);
            if quantity == 0 {
                self.stats.write().closes_covered += 1;
                debug!(position = %position.key, tag, "Close already pending");
                continue;
            }
            let request = OrderRequest::market(
                &position.key.instrument,
                OrderSide::closing(position.net_qty),
                quantity,
                position.key.product,
                tag,
            );
            warn!(position = %position.key, qty = request.quantity, tag, "Closing position");
            let price = self.mark_price(&position);
            if let Ok(Some(_)) = self.place(&request, reason, price, ts_ms) {
                placed += 1;
            }
        }
        placed
    }

    pub fn close_all(&self, tag: &str, reason: &str, ts_ms: i64) -> usize {
        self.close_matching(|_| true, tag, reason, ts_ms)
    }

    pub fn pending_orders(&self) -> usize {
        self.pending.read().len()
    }

    pub fn get_stats(&self) -> OrderManagerStats {
        self.stats.read().clone()
    }
}
