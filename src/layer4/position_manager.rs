// Position & Risk Manager - Net quantity, average price and P&L per (instrument, product)
// Each position sits behind its own lock; persistence failures never reach the caller

use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::core::config::RiskConfig;
use crate::core::types::{OrderSide, PositionKey, PositionRow, PositionSnapshot, ProductClass};
use crate::layer1::store::{StateStore, StoreError, STATE_REALIZED_PNL};
use crate::layer4::trailing_stop::TrailingStop;

#[derive(Debug, Clone, Default)]
struct Position {
    net_qty: i64,
    avg_price: f64,
    realized_pnl: f64,
    unrealized_pnl: f64,
    last_price: f64,
    tsl: TrailingStop,
}

impl Position {
    fn snapshot(&self, key: &PositionKey) -> PositionSnapshot {
        PositionSnapshot {
            key: key.clone(),
            net_qty: self.net_qty,
            avg_price: self.avg_price,
            realized_pnl: self.realized_pnl,
            unrealized_pnl: self.unrealized_pnl,
            last_price: self.last_price,
            tsl_armed: self.tsl.armed,
            tsl_trigger: self.tsl.trigger,
            tsl_breached: self.tsl.breached,
        }
    }

    fn row(&self, key: &PositionKey) -> PositionRow {
        PositionRow {
            instrument: key.instrument.clone(),
            product: key.product,
            net_qty: self.net_qty,
            avg_price: self.avg_price,
            realized_pnl: self.realized_pnl,
            unrealized_pnl: self.unrealized_pnl,
        }
    }

    /// Apply a signed fill and return the P&L it realized
    fn apply_fill(&mut self, signed_qty: i64, price: f64) -> f64 {
        if signed_qty == 0 {
            return 0.0;
        }

        if self.net_qty == 0 {
            self.net_qty = signed_qty;
            self.avg_price = price;
            self.tsl.reset();
            return 0.0;
        }

        if self.net_qty.signum() == signed_qty.signum() {
            let total_value = self.net_qty as f64 * self.avg_price + signed_qty as f64 * price;
            self.net_qty += signed_qty;
            self.avg_price = total_value / self.net_qty as f64;
            return 0.0;
        }

        // Reducing or reversing
        let closed_qty = signed_qty.abs().min(self.net_qty.abs());
        let realized = if self.net_qty > 0 {
            (price - self.avg_price) * closed_qty as f64
        } else {
            (self.avg_price - price) * closed_qty as f64
        };
        self.realized_pnl += realized;

        let previous = self.net_qty;
        self.net_qty += signed_qty;

        if self.net_qty == 0 {
            self.avg_price = 0.0;
            self.unrealized_pnl = 0.0;
            self.tsl.reset();
        } else if self.net_qty.signum() != previous.signum() {
            // Remainder opens a fresh position at the fill price
            self.avg_price = price;
            self.tsl.reset();
        }

        realized
    }

    fn mark(&mut self, price: f64, hurdle_pct: f64, trail_pct: f64) -> bool {
        self.last_price = price;
        self.unrealized_pnl = if self.net_qty > 0 {
            (price - self.avg_price) * self.net_qty as f64
        } else {
            (self.avg_price - price) * self.net_qty.abs() as f64
        };
        self.tsl
            .update(self.net_qty.signum(), self.avg_price, price, hurdle_pct, trail_pct)
    }
}

#[derive(Debug, Clone, Default)]
pub struct PositionManagerStats {
    pub fills_applied: u64,
    pub unrealized_passes: u64,
    pub persist_failures: u64,
    pub tsl_breaches: u64,
}

impl fmt::Display for PositionManagerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Positions(fills={}, marks={}, persist_failures={}, tsl_breaches={})",
            self.fills_applied, self.unrealized_passes, self.persist_failures, self.tsl_breaches
        )
    }
}

pub struct PositionManager {
    positions: RwLock<BTreeMap<PositionKey, Arc<Mutex<Position>>>>,
    realized_pnl: Mutex<f64>,
    /// Cumulative realized P&L when the current session started
    session_baseline: Mutex<f64>,
    store: Arc<dyn StateStore>,
    risk: RiskConfig,
    stats: RwLock<PositionManagerStats>,
}

impl PositionManager {
    pub fn new(risk: RiskConfig, store: Arc<dyn StateStore>) -> Self {
        Self {
            positions: RwLock::new(BTreeMap::new()),
            realized_pnl: Mutex::new(0.0),
            session_baseline: Mutex::new(0.0),
            store,
            risk,
            stats: RwLock::new(PositionManagerStats::default()),
        }
    }

    /// Rebuild positions and cumulative realized P&L from the store.
    /// Unrealized P&L and trailing state start fresh, and the restored
    /// realized total becomes the session baseline.
    pub fn restore(&self) -> Result<usize, StoreError> {
        let rows = self.store.load_positions()?;
        let saved_total = self
            .store
            .get_state(STATE_REALIZED_PNL)?
            .and_then(|v| v.as_f64());

        let mut positions = self.positions.write();
        positions.clear();
        for row in &rows {
            let position = Position {
                net_qty: row.net_qty,
                avg_price: row.avg_price,
                realized_pnl: row.realized_pnl,
                ..Position::default()
            };
            positions.insert(
                PositionKey::new(&row.instrument, row.product),
                Arc::new(Mutex::new(position)),
            );
        }

        let total = saved_total.unwrap_or_else(|| rows.iter().map(|r| r.realized_pnl).sum());
        *self.realized_pnl.lock() = total;
        *self.session_baseline.lock() = total;

        info!(positions = rows.len(), realized_pnl = total, "Positions restored");
        Ok(rows.len())
    }

    fn entry(&self, key: &PositionKey) -> Arc<Mutex<Position>> {
        if let Some(existing) = self.positions.read().get(key) {
            return existing.clone();
        }
        self.positions
            .write()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Position::default())))
            .clone()
    }

    /// Apply a fill and persist the resulting row
    pub fn on_fill(
        &self,
        instrument: &str,
        quantity: i64,
        price: f64,
        side: OrderSide,
        product: ProductClass,
    ) -> PositionSnapshot {
        let key = PositionKey::new(instrument, product);
        let entry = self.entry(&key);
        let signed_qty = quantity.abs() * side.sign();

        let (snapshot, row, total) = {
            let mut position = entry.lock();
            let realized = position.apply_fill(signed_qty, price);
            let total = {
                let mut total = self.realized_pnl.lock();
                *total += realized;
                *total
            };
            (position.snapshot(&key), position.row(&key), total)
        };
        self.stats.write().fills_applied += 1;

        info!(
            position = %key,
            net_qty = snapshot.net_qty,
            avg_price = snapshot.avg_price,
            realized_pnl = snapshot.realized_pnl,
            "Position updated"
        );

        self.persist_row(&row);
        if let Err(e) = self.store.set_state(STATE_REALIZED_PNL, serde_json::json!(total)) {
            self.persist_failed(&key, &e);
        }

        snapshot
    }

    /// Mark every open position to the snapshot price, advance its trailing stop
    /// and persist the marked rows.
    ///
    /// An instrument missing from the snapshot is marked at its own average price.
    pub fn update_unrealized(&self, prices: &HashMap<String, f64>) -> f64 {
        let entries: Vec<(PositionKey, Arc<Mutex<Position>>)> = self
            .positions
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut total = 0.0;
        let mut breaches = 0;
        let mut marked = Vec::new();
        for (key, entry) in entries {
            let mut position = entry.lock();
            if position.net_qty == 0 {
                position.unrealized_pnl = 0.0;
                continue;
            }

            let price = prices
                .get(&key.instrument)
                .copied()
                .unwrap_or(position.avg_price);
            if position.mark(price, self.risk.tsl_hurdle_pct, self.risk.tsl_trail_pct) {
                breaches += 1;
                warn!(position = %key, price, "Trailing stop breach recorded");
            }
            total += position.unrealized_pnl;
            marked.push(position.row(&key));
        }

        {
            let mut stats = self.stats.write();
            stats.unrealized_passes += 1;
            stats.tsl_breaches += breaches;
        }
        for row in &marked {
            self.persist_row(row);
        }
        total
    }

    /// True when realized plus unrealized P&L is below the drawdown floor
    pub fn check_risk(&self, total_unrealized: f64) -> bool {
        let total = self.total_realized() + total_unrealized;
        let limit = -self.risk.capital * self.risk.max_drawdown_pct / 100.0;
        if total < limit {
            warn!(pnl = total, limit, "Drawdown limit breached");
            return true;
        }
        false
    }

    pub fn tsl_breached(&self, key: &PositionKey) -> bool {
        self.positions
            .read()
            .get(key)
            .map(|p| {
                let position = p.lock();
                position.net_qty != 0 && position.tsl.breached
            })
            .unwrap_or(false)
    }

    /// Open positions whose trailing stop has been breached
    pub fn breached_positions(&self) -> Vec<PositionSnapshot> {
        self.open_positions()
            .into_iter()
            .filter(|p| p.tsl_breached)
            .collect()
    }

    pub fn position(&self, key: &PositionKey) -> Option<PositionSnapshot> {
        self.positions.read().get(key).map(|p| p.lock().snapshot(key))
    }

    pub fn snapshot(&self) -> Vec<PositionSnapshot> {
        self.positions
            .read()
            .iter()
            .map(|(k, p)| p.lock().snapshot(k))
            .collect()
    }

    pub fn open_positions(&self) -> Vec<PositionSnapshot> {
        self.snapshot().into_iter().filter(|p| p.net_qty != 0).collect()
    }

    pub fn total_realized(&self) -> f64 {
        *self.realized_pnl.lock()
    }

    pub fn total_unrealized(&self) -> f64 {
        self.positions
            .read()
            .values()
            .map(|p| p.lock().unrealized_pnl)
            .sum()
    }

    /// Start a new trading session at the current realized total
    pub fn start_session(&self) {
        let total = self.total_realized();
        *self.session_baseline.lock() = total;
        info!(baseline = total, "Session P&L baseline set");
    }

    /// Realized since the session started
    pub fn session_realized(&self) -> f64 {
        self.total_realized() - *self.session_baseline.lock()
    }

    /// Session P&L: realized since the session started plus current unrealized
    pub fn daily_pnl(&self) -> f64 {
        self.session_realized() + self.total_unrealized()
    }

    pub fn get_stats(&self) -> PositionManagerStats {
        self.stats.read().clone()
    }

    fn persist_row(&self, row: &PositionRow) {
        if let Err(e) = self.store.upsert_position(row) {
            self.persist_failed(&PositionKey::new(&row.instrument, row.product), &e);
        } else {
            debug!(instrument = %row.instrument, "Position row persisted");
        }
    }

    fn persist_failed(&self, key: &PositionKey, error: &StoreError) {
        self.stats.write().persist_failures += 1;
        warn!(position = %key, error = %error, "Failed to persist position state");
    }
}
