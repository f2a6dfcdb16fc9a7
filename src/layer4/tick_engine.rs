// Tick Engine - Per-tick orchestration from feed to orders
// Single writer: ticks and order updates are applied in arrival order

use chrono::Timelike;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::config::{ConfigError, EngineConfig};
use crate::core::events::{
    event_data, EventBus, EventPriority, EVENT_ATM_SHIFT, EVENT_BAR_CLOSED, EVENT_HARD_STOP,
    EVENT_SIGNAL, EVENT_TICK, EVENT_TSL_BREACH,
};
use crate::core::logger::ORDER_LOG_TARGET;
use crate::core::types::{
    OrderRequest, OrderSide, OrderUpdate, PositionSnapshot, ProductClass, Signal, SignalKind,
    Stance, Tick, TradingMode,
};
use crate::layer1::broker::{Broker, BrokerError};
use crate::layer1::history::{HistoryError, HistorySource};
use crate::layer1::instruments::InstrumentReference;
use crate::layer1::store::{StateStore, StoreError, STATE_AUTO_TRADING};
use crate::layer2::bars::BarAggregator;
use crate::layer2::market_data_store::{MarketDataStore, Quote};
use crate::layer2::parser::FeedMessage;
use crate::layer2::vwap::VwapTracker;
use crate::layer3::macro_trend::MacroCache;
use crate::layer3::signal_engine::SignalEngine;
use crate::layer3::strength::ConstituentStrength;
use crate::layer4::background::AtmDiscovery;
use crate::layer4::legs::{exchange_local_time, local_to_utc_ms, simulated_quote, Leg, LegPlanner};
use crate::layer4::order_manager::OrderManager;
use crate::layer4::position_manager::PositionManager;

const SOURCE: &str = "tick_engine";

/// Exchange-local session open (hour, minute)
const SESSION_OPEN: (u32, u32) = (9, 15);

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("History error: {0}")]
    History(#[from] HistoryError),
    #[error("No quote for {0}")]
    NoQuote(String),
}

// ============================================================================
// Collaborators
// ============================================================================

/// Everything the engine talks to outside its own state
pub struct EngineDeps {
    pub broker: Arc<dyn Broker>,
    pub store: Arc<dyn StateStore>,
    pub instruments: Arc<InstrumentReference>,
    pub bus: Arc<EventBus>,
}

/// VWAP plus one bar aggregator per configured interval
struct InstrumentState {
    vwap: VwapTracker,
    bars: Vec<BarAggregator>,
}

impl InstrumentState {
    fn new(instrument: &str, intervals: &[u32]) -> Self {
        Self {
            vwap: VwapTracker::new(instrument),
            bars: intervals
                .iter()
                .map(|m| BarAggregator::with_minutes(instrument, *m))
                .collect(),
        }
    }
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct TickEngineStats {
    pub ticks_processed: u64,
    pub ticks_dropped: u64,
    pub bars_closed: u64,
    pub signals: u64,
    pub entries_executed: u64,
    pub entries_skipped: u64,
    pub exits_executed: u64,
    pub tsl_exits: u64,
    pub hard_stops: u64,
    pub order_updates: u64,
    pub instruments_seeded: u64,
}

impl fmt::Display for TickEngineStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TickEngine(ticks={}, dropped={}, bars={}, signals={}, entries={}, skipped={}, exits={}, tsl={}, hard_stops={})",
            self.ticks_processed,
            self.ticks_dropped,
            self.bars_closed,
            self.signals,
            self.entries_executed,
            self.entries_skipped,
            self.exits_executed,
            self.tsl_exits,
            self.hard_stops
        )
    }
}

// ============================================================================
// Tick Engine
// ============================================================================

pub struct TickEngine {
    config: EngineConfig,
    underlying: String,
    auto_exit_minutes: u32,

    instruments: HashMap<String, InstrumentState>,
    market_data: Arc<MarketDataStore>,
    strength: ConstituentStrength,
    signal_engine: SignalEngine,
    macro_cache: Arc<MacroCache>,
    planner: LegPlanner,

    positions: Arc<PositionManager>,
    orders: Arc<OrderManager>,
    store: Arc<dyn StateStore>,
    bus: Arc<EventBus>,
    atm: Option<Arc<AtmDiscovery>>,

    auto_trade: bool,
    /// Set by a hard stop; cleared only by re-enabling auto-trading
    hard_stop_latched: bool,
    /// A trailing-stop close was sent and the stance is not yet flat
    tsl_flatten_pending: bool,
    /// Legs entered under the current stance
    entered_legs: Vec<Leg>,
    last_ts: i64,

    stats: TickEngineStats,
}

impl TickEngine {
    /// Build the engine, restore persisted positions and the auto-trade toggle
    pub fn new(config: EngineConfig, deps: EngineDeps) -> Result<Self, EngineError> {
        let auto_exit_minutes = config.risk.auto_exit_minutes()?;
        let underlying = config.feed.reference_instrument.clone();

        let market_data = Arc::new(MarketDataStore::new());
        let positions = Arc::new(PositionManager::new(config.risk.clone(), deps.store.clone()));
        match positions.restore() {
            Ok(count) => info!(positions = count, "Positions restored"),
            Err(e) => warn!(error = %e, "Position restore failed, starting flat"),
        }

        let orders = Arc::new(OrderManager::new(
            deps.broker,
            positions.clone(),
            market_data.clone(),
            deps.bus.clone(),
            config.execution.trading_mode,
        ));

        let auto_trade = match deps.store.get_state(STATE_AUTO_TRADING) {
            Ok(Some(value)) => value.as_bool().unwrap_or(true),
            Ok(None) => true,
            Err(e) => {
                warn!(error = %e, "Auto-trade toggle unavailable, defaulting to enabled");
                true
            }
        };

        let planner = LegPlanner::new(
            deps.instruments,
            config.execution.clone(),
            config.feed.exchange_utc_offset_minutes,
        );

        info!(
            underlying = %underlying,
            mode = %config.execution.trading_mode,
            auto_trade,
            basket = config.basket.weights.len(),
            "Tick engine initialized"
        );

        Ok(Self {
            strength: ConstituentStrength::new(&config.basket.weights),
            signal_engine: SignalEngine::new(&underlying, &config.strategy),
            macro_cache: Arc::new(MacroCache::new()),
            planner,
            underlying,
            auto_exit_minutes,
            instruments: HashMap::new(),
            market_data,
            positions,
            orders,
            store: deps.store,
            bus: deps.bus,
            atm: None,
            auto_trade,
            hard_stop_latched: false,
            tsl_flatten_pending: false,
            entered_legs: Vec::new(),
            last_ts: 0,
            stats: TickEngineStats::default(),
            config,
        })
    }

    /// Attach the ATM discovery pool fed by underlying ticks
    pub fn with_atm_discovery(mut self, atm: Arc<AtmDiscovery>) -> Self {
        self.atm = Some(atm);
        self
    }

    /// Share a macro cache refreshed elsewhere
    pub fn with_macro_cache(mut self, cache: Arc<MacroCache>) -> Self {
        self.macro_cache = cache;
        self
    }

    // ------------------------------------------------------------------
    // Feed
    // ------------------------------------------------------------------

    /// Consume feed messages until the sender side closes
    pub async fn run(&mut self, mut rx: mpsc::Receiver<FeedMessage>) {
        info!(underlying = %self.underlying, "Tick engine running");
        while let Some(message) = rx.recv().await {
            self.on_message(message);
        }
        info!(stats = %self.stats, "Feed closed, tick engine stopped");
    }

    pub fn on_message(&mut self, message: FeedMessage) {
        match message {
            FeedMessage::Tick(tick) => self.on_tick(&tick),
            FeedMessage::OrderUpdate(update) => {
                self.on_order_update(&update);
            }
        }
    }

    pub fn on_tick(&mut self, tick: &Tick) {
        if !tick.price.is_finite() || tick.price <= 0.0 {
            self.stats.ticks_dropped += 1;
            debug!(instrument = %tick.instrument, price = tick.price, "Dropping tick without a valid price");
            return;
        }
        self.stats.ticks_processed += 1;
        self.last_ts = tick.timestamp;

        let intervals = &self.config.feed.bar_intervals_minutes;
        let state = self
            .instruments
            .entry(tick.instrument.clone())
            .or_insert_with(|| InstrumentState::new(&tick.instrument, intervals));

        let delta = state.vwap.update(tick.price, tick.cum_volume);
        let mut closed = Vec::new();
        for aggregator in state.bars.iter_mut() {
            if let Some(bar) = aggregator.process_tick(tick.price, delta, tick.timestamp) {
                closed.push(bar);
            }
        }
        let reference = state.vwap.reference(tick.price);
        let trend = state.vwap.trend(tick.price);
        self.market_data.record(Quote::from_tick(tick, reference, trend));

        for bar in closed {
            self.stats.bars_closed += 1;
            debug!(bar = %bar, "Bar closed");
            self.bus.emit(
                EVENT_BAR_CLOSED,
                tick.timestamp,
                event_data(json!(bar)),
                SOURCE,
                EventPriority::Low,
            );
        }

        self.observe_atm(tick);

        if self.strength.is_member(&tick.instrument) {
            if let Some(open) = tick.open.filter(|o| *o > 0.0) {
                if self.strength.open_price(&tick.instrument) != Some(open) {
                    self.strength.set_open_price(&tick.instrument, open);
                }
            }
            self.strength.update(&tick.instrument, tick.price, tick.cum_volume, false);
        }

        if tick.instrument == self.underlying {
            self.on_underlying_tick(tick.price, reference, tick.timestamp);
        }
    }

    fn observe_atm(&self, tick: &Tick) {
        let Some(atm) = &self.atm else {
            return;
        };
        if tick.instrument != self.underlying && !self.strength.is_member(&tick.instrument) {
            return;
        }
        let Some(local) = exchange_local_time(tick.timestamp, self.config.feed.exchange_utc_offset_minutes) else {
            return;
        };

        let strike = self.planner.instruments().atm_strike(&tick.instrument, tick.price);
        if atm.observe(&tick.instrument, strike, local.date()) {
            self.bus.emit(
                EVENT_ATM_SHIFT,
                tick.timestamp,
                event_data(json!({
                    "underlying": tick.instrument,
                    "strike": strike,
                    "price": tick.price,
                })),
                SOURCE,
                EventPriority::Low,
            );
        }
    }

    fn on_underlying_tick(&mut self, price: f64, reference: f64, ts_ms: i64) {
        let strength = self.strength.weighted_strength();
        let macro_trend = self.macro_cache.trend_for(&self.underlying);

        let signal = self
            .signal_engine
            .on_tick(price, ts_ms, reference, macro_trend, strength);

        let breakdown = self.signal_engine.last_breakdown();
        self.bus.emit(
            EVENT_TICK,
            ts_ms,
            event_data(json!({
                "instrument": self.underlying,
                "price": price,
                "vwap": reference,
                "strength": strength,
                "score": breakdown.total(),
                "avg_score": self.signal_engine.avg_score(),
                "stance": self.signal_engine.stance().to_string(),
            })),
            SOURCE,
            EventPriority::Info,
        );

        if let Some(signal) = signal {
            self.execute_signal(&signal, strength.abs());
        }

        let prices = self.market_data.price_map();
        let total_unrealized = self.positions.update_unrealized(&prices);

        self.handle_trailing_stops(price, ts_ms);
        self.check_hard_stops(price, total_unrealized, ts_ms);
    }

    // ------------------------------------------------------------------
    // Signal execution
    // ------------------------------------------------------------------

    fn record_signal(&mut self, signal: &Signal, strength: f64) {
        self.stats.signals += 1;
        info!(
            target: ORDER_LOG_TARGET,
            record = "SIGNAL",
            kind = %signal.kind,
            instrument = %signal.instrument,
            price = signal.price,
            strength,
            reason = %signal.reason,
            "Signal"
        );
        self.bus.emit(
            EVENT_SIGNAL,
            signal.timestamp,
            event_data(json!({
                "kind": signal.kind.to_string(),
                "instrument": signal.instrument,
                "price": signal.price,
                "strength": strength,
                "reason": signal.reason,
            })),
            SOURCE,
            EventPriority::Medium,
        );
    }

    fn execute_signal(&mut self, signal: &Signal, strength: f64) {
        self.record_signal(signal, strength);

        if signal.kind == SignalKind::Exit {
            self.exit_underlying("EXIT", &signal.reason, signal.timestamp);
            return;
        }

        if !self.auto_trade {
            self.stats.entries_skipped += 1;
            info!(kind = %signal.kind, "Auto-trading disabled, entry not executed");
            return;
        }

        let legs = self
            .planner
            .plan_entry(signal.kind, &self.underlying, signal.price, strength, signal.timestamp);
        if legs.is_empty() {
            warn!(kind = %signal.kind, price = signal.price, "No legs resolved for entry");
            return;
        }

        for leg in legs {
            let request = OrderRequest::market(
                &leg.symbol,
                leg.side,
                leg.quantity,
                self.config.execution.product,
                &format!("{}-{}", signal.kind, leg.role),
            );
            let paper_price = self
                .market_data
                .price(&leg.symbol)
                .unwrap_or_else(|| simulated_quote(signal.price, leg.strike, leg.kind));

            match self.orders.place(&request, &signal.reason, paper_price, signal.timestamp) {
                Ok(Some(_)) => {
                    self.stats.entries_executed += 1;
                    info!(leg = %leg, "Leg entered");
                    self.entered_legs.push(leg);
                }
                Ok(None) => warn!(leg = %leg, "Leg not placed"),
                Err(e) => error!(leg = %leg, error = %e, "Leg placement failed"),
            }
        }
    }

    /// Close every open position on the traded underlying, including recorded legs
    fn exit_underlying(&mut self, tag: &str, reason: &str, ts_ms: i64) -> usize {
        let underlying = self.underlying.clone();
        let legs: Vec<String> = self.entered_legs.iter().map(|l| l.symbol.clone()).collect();
        let closed = self.orders.close_matching(
            |p| p.key.instrument.starts_with(&underlying) || legs.contains(&p.key.instrument),
            tag,
            reason,
            ts_ms,
        );
        self.entered_legs.clear();
        self.stats.exits_executed += closed as u64;
        info!(closed, reason = %reason, "Underlying exit complete");
        closed
    }

    // ------------------------------------------------------------------
    // Risk
    // ------------------------------------------------------------------

    fn handle_trailing_stops(&mut self, price: f64, ts_ms: i64) {
        // Positions whose closing order is still working are not breached again
        let breached: Vec<PositionSnapshot> = self
            .positions
            .breached_positions()
            .into_iter()
            .filter(|p| self.orders.uncovered_qty(p) > 0)
            .collect();
        if !breached.is_empty() {
            self.close_breached(&breached, ts_ms);
        }

        // Stance goes flat once nothing on the underlying remains open
        if self.tsl_flatten_pending && !self.has_underlying_exposure() {
            self.tsl_flatten_pending = false;
            if let Some(signal) = self.signal_engine.force_exit(price, "Trailing stop breached", ts_ms) {
                self.record_signal(&signal, self.strength.weighted_strength().abs());
            }
        }
    }

    fn close_breached(&mut self, breached: &[PositionSnapshot], ts_ms: i64) {
        for position in breached {
            warn!(position = %position.key, trigger = position.tsl_trigger, "Trailing stop breached");
            self.bus.emit(
                EVENT_TSL_BREACH,
                ts_ms,
                event_data(json!({
                    "instrument": position.key.instrument,
                    "net_qty": position.net_qty,
                    "trigger": position.tsl_trigger,
                    "last_price": position.last_price,
                })),
                SOURCE,
                EventPriority::High,
            );
        }

        let keys: Vec<_> = breached.iter().map(|p| p.key.clone()).collect();
        let closed = self
            .orders
            .close_matching(|p| keys.contains(&p.key), "TSL_EXIT", "Trailing stop breached", ts_ms);
        self.stats.tsl_exits += closed as u64;

        let symbols: Vec<&str> = keys.iter().map(|k| k.instrument.as_str()).collect();
        let on_underlying = symbols.iter().any(|s| {
            s.starts_with(self.underlying.as_str())
                || self.entered_legs.iter().any(|l| l.symbol == *s)
        });
        if closed > 0 && on_underlying {
            self.tsl_flatten_pending = true;
        }
        self.entered_legs.retain(|l| !symbols.contains(&l.symbol.as_str()));
    }

    fn has_underlying_exposure(&self) -> bool {
        self.positions
            .open_positions()
            .iter()
            .any(|p| p.key.instrument.starts_with(&self.underlying))
    }

    fn check_hard_stops(&mut self, price: f64, total_unrealized: f64, ts_ms: i64) {
        if self.hard_stop_latched {
            return;
        }
        if !self.auto_trade && self.positions.open_positions().is_empty() {
            return;
        }

        let daily_pnl = self.positions.daily_pnl();
        let reason = if daily_pnl <= -self.config.risk.daily_loss_limit {
            Some(format!("Daily loss limit hit ({:.2})", daily_pnl))
        } else if self.positions.check_risk(total_unrealized) {
            Some(format!("Max drawdown breached ({:.2})", total_unrealized))
        } else if self.past_auto_exit(ts_ms) {
            Some(format!("Auto-exit time {}", self.config.risk.auto_exit_time))
        } else {
            None
        };

        if let Some(reason) = reason {
            self.hard_stop(&reason, price, ts_ms);
        }
    }

    fn past_auto_exit(&self, ts_ms: i64) -> bool {
        exchange_local_time(ts_ms, self.config.feed.exchange_utc_offset_minutes)
            .map(|local| local.hour() * 60 + local.minute() >= self.auto_exit_minutes)
            .unwrap_or(false)
    }

    /// Flatten everything, go flat and disable auto-trading until re-enabled.
    /// Further automatic hard stops are suppressed until then.
    pub fn hard_stop(&mut self, reason: &str, price: f64, ts_ms: i64) {
        self.stats.hard_stops += 1;
        self.hard_stop_latched = true;
        self.tsl_flatten_pending = false;
        error!(reason = %reason, daily_pnl = self.positions.daily_pnl(), "HARD STOP");

        let closed = self.orders.close_all("HARD_STOP", reason, ts_ms);
        self.entered_legs.clear();
        if let Some(signal) = self.signal_engine.force_exit(price, reason, ts_ms) {
            self.record_signal(&signal, self.strength.weighted_strength().abs());
        }
        self.set_auto_trade(false);

        self.bus.emit(
            EVENT_HARD_STOP,
            ts_ms,
            event_data(json!({
                "reason": reason,
                "closed": closed,
                "daily_pnl": self.positions.daily_pnl(),
            })),
            SOURCE,
            EventPriority::Critical,
        );
    }

    // ------------------------------------------------------------------
    // Orders and controls
    // ------------------------------------------------------------------

    pub fn on_order_update(&mut self, update: &OrderUpdate) -> Option<PositionSnapshot> {
        self.stats.order_updates += 1;
        let ts_ms = if self.last_ts > 0 {
            self.last_ts
        } else {
            chrono::Utc::now().timestamp_millis()
        };
        self.orders.on_order_update(update, ts_ms)
    }

    /// Manual order outside the signal path
    pub fn place_manual(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: i64,
        product: ProductClass,
    ) -> Result<Option<String>, EngineError> {
        let price = match (self.market_data.price(symbol), self.orders.mode()) {
            (Some(price), _) => price,
            (None, TradingMode::Live) => 0.0,
            (None, TradingMode::Paper) => return Err(EngineError::NoQuote(symbol.to_string())),
        };
        let request = OrderRequest::market(symbol, side, quantity, product, "MANUAL");
        let ts_ms = chrono::Utc::now().timestamp_millis();
        Ok(self.orders.place(&request, "Manual order", price, ts_ms)?)
    }

    /// Enable or disable automated entries; the toggle is persisted
    pub fn set_auto_trade(&mut self, enabled: bool) {
        self.auto_trade = enabled;
        if enabled {
            self.hard_stop_latched = false;
        }
        info!(enabled, "Auto-trading toggled");
        if let Err(e) = self.store.set_state(STATE_AUTO_TRADING, json!(enabled)) {
            warn!(error = %e, "Failed to persist auto-trade toggle");
        }
    }

    /// Start a new session: VWAP, bars, basket opens and the daily P&L
    /// baseline begin again
    pub fn reset_session(&mut self) {
        self.instruments.clear();
        self.strength.reset_session();
        self.positions.start_session();
        info!("Session reset");
    }

    /// Seed VWAP totals, basket opens and last quotes from today's one-minute
    /// candles for the underlying and every basket member. A symbol without
    /// history is skipped; the call fails only when nothing could be seeded.
    pub async fn seed_from_history(
        &mut self,
        history: &dyn HistorySource,
        now_ms: i64,
    ) -> Result<usize, EngineError> {
        let offset = self.config.feed.exchange_utc_offset_minutes;
        let session_open = exchange_local_time(now_ms, offset)
            .and_then(|local| local.date().and_hms_opt(SESSION_OPEN.0, SESSION_OPEN.1, 0))
            .map(|open| local_to_utc_ms(open, offset))
            .unwrap_or(now_ms);

        let mut symbols: Vec<String> = self.config.basket.weights.keys().cloned().collect();
        symbols.sort();
        symbols.insert(0, self.underlying.clone());

        let mut seeded = 0;
        let mut last_error = None;
        for symbol in symbols {
            let candles = match history.intraday_candles(&symbol, session_open).await {
                Ok(candles) => candles,
                Err(e) => {
                    warn!(instrument = %symbol, error = %e, "History seed unavailable");
                    last_error = Some(e);
                    continue;
                }
            };
            let (Some(first), Some(last)) = (candles.first(), candles.last()) else {
                debug!(instrument = %symbol, "No candles since session open");
                continue;
            };

            let (cum_volume, cum_pv) = candles
                .iter()
                .fold((0u64, 0.0), |(v, pv), c| (v + c.volume, pv + c.close * c.volume as f64));

            let intervals = &self.config.feed.bar_intervals_minutes;
            let state = self
                .instruments
                .entry(symbol.clone())
                .or_insert_with(|| InstrumentState::new(&symbol, intervals));
            state.vwap.seed(cum_volume, cum_pv, cum_volume);
            let reference = state.vwap.reference(last.close);
            let trend = state.vwap.trend(last.close);

            let tick = Tick::new(&symbol, last.close, cum_volume, last.start).with_open(first.open);
            self.market_data.record(Quote::from_tick(&tick, reference, trend));

            if self.strength.is_member(&symbol) {
                self.strength.set_open_price(&symbol, first.open);
                self.strength.update(&symbol, last.close, cum_volume, false);
            }

            info!(
                instrument = %symbol,
                candles = candles.len(),
                vwap = reference,
                volume = cum_volume,
                "Session seeded from history"
            );
            seeded += 1;
        }

        self.stats.instruments_seeded += seeded as u64;
        match last_error {
            Some(e) if seeded == 0 => Err(e.into()),
            _ => Ok(seeded),
        }
    }

    pub fn auto_trade_enabled(&self) -> bool {
        self.auto_trade
    }

    pub fn underlying(&self) -> &str {
        &self.underlying
    }

    pub fn stance(&self) -> Stance {
        self.signal_engine.stance()
    }

    pub fn weighted_strength(&self) -> f64 {
        self.strength.weighted_strength()
    }

    pub fn vwap(&self, instrument: &str) -> Option<f64> {
        self.instruments.get(instrument).and_then(|s| s.vwap.vwap())
    }

    pub fn completed_bars(&self, instrument: &str) -> u64 {
        self.instruments
            .get(instrument)
            .map(|s| s.bars.iter().map(|b| b.completed_count()).sum())
            .unwrap_or(0)
    }

    pub fn entered_legs(&self) -> &[Leg] {
        &self.entered_legs
    }

    pub fn macro_cache(&self) -> Arc<MacroCache> {
        self.macro_cache.clone()
    }

    pub fn market_data(&self) -> Arc<MarketDataStore> {
        self.market_data.clone()
    }

    pub fn positions(&self) -> Arc<PositionManager> {
        self.positions.clone()
    }

    pub fn orders(&self) -> Arc<OrderManager> {
        self.orders.clone()
    }

    pub fn signal_engine(&self) -> &SignalEngine {
        &self.signal_engine
    }

    pub fn get_stats(&self) -> TickEngineStats {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::events::EVENT_ORDER_RESULT;
    use crate::layer1::broker::PaperBroker;
    use crate::layer1::store::MemoryStore;
    use chrono::{TimeZone, Utc};

    const MINUTE: i64 = 60_000;

    /// 2025-12-10 10:00 IST in UTC milliseconds
    fn session_start() -> i64 {
        Utc.with_ymd_and_hms(2025, 12, 10, 4, 30, 0)
            .single()
            .map(|t| t.timestamp_millis())
            .unwrap()
    }

    fn config() -> EngineConfig {
        let mut config = EngineConfig::default();
        config.basket.weights = [("HDFCBANK".to_string(), 50.0), ("ICICIBANK".to_string(), 50.0)]
            .into_iter()
            .collect();
        config.strategy.threshold = 1.0;
        config.strategy.confirmation_count = 3;
        config.strategy.min_hold_time_secs = 60;
        config
    }

    fn engine_with(config: EngineConfig, store: Arc<MemoryStore>) -> (TickEngine, Arc<PaperBroker>, Arc<EventBus>) {
        let broker = Arc::new(PaperBroker::new());
        let bus = Arc::new(EventBus::new());
        let deps = EngineDeps {
            broker: broker.clone(),
            store,
            instruments: Arc::new(InstrumentReference::from_config(&config.execution)),
            bus: bus.clone(),
        };
        let engine = TickEngine::new(config, deps).unwrap();
        (engine, broker, bus)
    }

    fn engine() -> (TickEngine, Arc<PaperBroker>, Arc<EventBus>) {
        engine_with(config(), Arc::new(MemoryStore::new()))
    }

    /// Basket up 2% on the open: strength 100, score 1.5 per tick
    fn bullish_basket(engine: &mut TickEngine, ts: i64) {
        engine.on_tick(&Tick::new("HDFCBANK", 1_020.0, 10, ts).with_open(1_000.0));
        engine.on_tick(&Tick::new("ICICIBANK", 2_040.0, 10, ts).with_open(2_000.0));
    }

    #[test]
    fn test_invalid_tick_dropped() {
        let (mut engine, _, _) = engine();
        engine.on_tick(&Tick::new("BANKNIFTY", 0.0, 0, session_start()));
        engine.on_tick(&Tick::new("BANKNIFTY", f64::NAN, 0, session_start()));
        let stats = engine.get_stats();
        assert_eq!(stats.ticks_dropped, 2);
        assert_eq!(stats.ticks_processed, 0);
        assert!(engine.market_data().price("BANKNIFTY").is_none());
    }

    #[test]
    fn test_strength_uses_tick_open() {
        let (mut engine, _, _) = engine();
        bullish_basket(&mut engine, session_start());
        assert!((engine.weighted_strength() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_bars_close_and_publish() {
        let (mut engine, _, bus) = engine();
        let t0 = session_start();
        engine.on_tick(&Tick::new("HDFCBANK", 1_000.0, 100, t0));
        engine.on_tick(&Tick::new("HDFCBANK", 1_001.0, 150, t0 + MINUTE));
        engine.on_tick(&Tick::new("HDFCBANK", 1_002.0, 200, t0 + 6 * MINUTE));

        // 3m and 5m aggregators each closed one bar
        assert_eq!(engine.completed_bars("HDFCBANK"), 2);
        assert_eq!(bus.get_recent_events(Some(EVENT_BAR_CLOSED), None).len(), 2);
        assert!(engine.vwap("HDFCBANK").is_some());
    }

    #[test]
    fn test_call_entry_in_paper_mode() {
        let (mut engine, broker, bus) = engine();
        let t0 = session_start();
        bullish_basket(&mut engine, t0);

        for i in 0..3 {
            engine.on_tick(&Tick::new("BANKNIFTY", 59_620.0, 0, t0 + i * 1_000));
        }

        assert_eq!(engine.stance(), Stance::Call);
        assert_eq!(engine.entered_legs().len(), 1);
        let orders = broker.orders();
        assert_eq!(orders.len(), 1);
        assert!(orders[0].1.instrument.starts_with("BANKNIFTY"));
        assert_eq!(orders[0].1.quantity, 15);
        assert_eq!(engine.positions().open_positions().len(), 1);
        assert_eq!(bus.get_recent_events(Some(EVENT_SIGNAL), None).len(), 1);
        assert_eq!(bus.get_recent_events(Some(EVENT_ORDER_RESULT), None).len(), 1);
    }

    #[test]
    fn test_entry_skipped_when_auto_trade_disabled() {
        let (mut engine, broker, _) = engine();
        engine.set_auto_trade(false);
        let t0 = session_start();
        bullish_basket(&mut engine, t0);
        for i in 0..3 {
            engine.on_tick(&Tick::new("BANKNIFTY", 59_620.0, 0, t0 + i * 1_000));
        }

        assert_eq!(engine.stance(), Stance::Call);
        assert!(broker.orders().is_empty());
        assert_eq!(engine.get_stats().entries_skipped, 1);
    }

    #[test]
    fn test_auto_trade_toggle_restored() {
        let store = Arc::new(MemoryStore::new());
        {
            let (mut engine, _, _) = engine_with(config(), store.clone());
            engine.set_auto_trade(false);
        }
        let (engine, _, _) = engine_with(config(), store);
        assert!(!engine.auto_trade_enabled());
    }

    #[test]
    fn test_auto_exit_time_hard_stop() {
        let (mut engine, broker, bus) = engine();
        let t0 = session_start();
        bullish_basket(&mut engine, t0);
        for i in 0..3 {
            engine.on_tick(&Tick::new("BANKNIFTY", 59_620.0, 0, t0 + i * 1_000));
        }
        assert_eq!(engine.positions().open_positions().len(), 1);

        // 15:20 IST
        let late = Utc.with_ymd_and_hms(2025, 12, 10, 9, 50, 0).single().unwrap().timestamp_millis();
        engine.on_tick(&Tick::new("BANKNIFTY", 59_620.0, 0, late));

        assert!(engine.positions().open_positions().is_empty());
        assert_eq!(engine.stance(), Stance::None);
        assert!(!engine.auto_trade_enabled());
        assert_eq!(broker.orders().len(), 2);
        assert_eq!(bus.get_recent_events(Some(EVENT_HARD_STOP), None).len(), 1);

        // Flat and disabled: no repeated hard stop
        engine.on_tick(&Tick::new("BANKNIFTY", 59_620.0, 0, late + 1_000));
        assert_eq!(engine.get_stats().hard_stops, 1);
    }

    #[test]
    fn test_daily_loss_hard_stop() {
        let mut config = config();
        config.risk.daily_loss_limit = 100.0;
        config.risk.max_drawdown_pct = 50.0;
        let (mut engine, _, bus) = engine_with(config, Arc::new(MemoryStore::new()));
        let t0 = session_start();

        engine.on_tick(&Tick::new("SBIN", 800.0, 0, t0));
        engine.place_manual("SBIN", OrderSide::Buy, 10, ProductClass::Intraday).unwrap();
        engine.on_tick(&Tick::new("SBIN", 780.0, 0, t0 + 1_000));
        // Loss is only evaluated on underlying ticks
        engine.on_tick(&Tick::new("BANKNIFTY", 59_000.0, 0, t0 + 2_000));

        assert_eq!(engine.get_stats().hard_stops, 1);
        assert!(engine.positions().open_positions().is_empty());
        assert!((engine.positions().total_realized() + 200.0).abs() < 1e-9);
        assert_eq!(bus.get_recent_events(Some(EVENT_HARD_STOP), None).len(), 1);
    }

    #[test]
    fn test_manual_order_needs_quote_in_paper_mode() {
        let (engine, _, _) = engine();
        let result = engine.place_manual("UNKNOWN", OrderSide::Buy, 1, ProductClass::Intraday);
        assert!(matches!(result, Err(EngineError::NoQuote(_))));
    }

    #[test]
    fn test_trailing_stop_exit_forces_flat() {
        let mut config = config();
        config.risk.tsl_hurdle_pct = 5.0;
        config.risk.tsl_trail_pct = 5.0;
        config.risk.max_drawdown_pct = 100.0;
        config.risk.daily_loss_limit = 1e9;
        let (mut engine, broker, bus) = engine_with(config, Arc::new(MemoryStore::new()));
        let t0 = session_start();
        bullish_basket(&mut engine, t0);
        for i in 0..3 {
            engine.on_tick(&Tick::new("BANKNIFTY", 59_620.0, 0, t0 + i * 1_000));
        }
        let leg = engine.entered_legs()[0].symbol.clone();
        let entry = engine.positions().open_positions()[0].avg_price;

        // Option runs up 20% then falls back through the trail
        engine.on_tick(&Tick::new(&leg, entry * 1.2, 0, t0 + 4_000));
        engine.on_tick(&Tick::new("BANKNIFTY", 59_620.0, 0, t0 + 5_000));
        engine.on_tick(&Tick::new(&leg, entry * 1.1, 0, t0 + 6_000));
        engine.on_tick(&Tick::new("BANKNIFTY", 59_620.0, 0, t0 + 7_000));

        assert!(engine.positions().open_positions().is_empty());
        assert_eq!(engine.get_stats().tsl_exits, 1);
        assert_eq!(engine.stance(), Stance::None);
        assert_eq!(broker.orders().len(), 2);
        assert_eq!(bus.get_recent_events(Some(EVENT_TSL_BREACH), None).len(), 1);
    }

    #[test]
    fn test_invalid_auto_exit_time_rejected() {
        let mut config = config();
        config.risk.auto_exit_time = "25:99".to_string();
        let deps = EngineDeps {
            broker: Arc::new(PaperBroker::new()),
            store: Arc::new(MemoryStore::new()),
            instruments: Arc::new(InstrumentReference::from_config(&config.execution)),
            bus: Arc::new(EventBus::new()),
        };
        assert!(matches!(TickEngine::new(config, deps), Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_run_consumes_feed() {
        let (mut engine, _, _) = engine();
        let (tx, rx) = mpsc::channel(16);
        let t0 = session_start();
        tx.send(FeedMessage::Tick(Tick::new("HDFCBANK", 1_000.0, 10, t0))).await.unwrap();
        tx.send(FeedMessage::Tick(Tick::new("BANKNIFTY", 59_000.0, 0, t0))).await.unwrap();
        drop(tx);

        engine.run(rx).await;
        assert_eq!(engine.get_stats().ticks_processed, 2);
        assert_eq!(engine.signal_engine().get_stats().ticks_scored, 1);
    }

    fn live_config() -> EngineConfig {
        let mut config = config();
        config.execution.trading_mode = TradingMode::Live;
        config.risk.max_drawdown_pct = 100.0;
        config.risk.daily_loss_limit = 1e9;
        config
    }

    fn fill(order_id: &str, instrument: &str, side: OrderSide, qty: i64, price: f64) -> OrderUpdate {
        OrderUpdate {
            order_id: order_id.to_string(),
            instrument: instrument.to_string(),
            status: "COMPLETE".to_string(),
            side: Some(side),
            fill_quantity: qty,
            fill_price: price,
            product: ProductClass::Intraday,
            rejection_reason: None,
        }
    }

    fn sells(broker: &PaperBroker) -> Vec<(String, OrderRequest)> {
        broker
            .orders()
            .into_iter()
            .filter(|(_, r)| r.side == OrderSide::Sell)
            .collect()
    }

    #[test]
    fn test_live_hard_stop_sweeps_once_while_close_pending() {
        let (mut engine, broker, bus) = engine_with(live_config(), Arc::new(MemoryStore::new()));
        let t0 = session_start();

        engine.on_tick(&Tick::new("SBIN", 800.0, 0, t0));
        let id = engine
            .place_manual("SBIN", OrderSide::Buy, 10, ProductClass::Intraday)
            .unwrap()
            .unwrap();
        engine.on_order_update(&fill(&id, "SBIN", OrderSide::Buy, 10, 800.0));
        assert_eq!(engine.positions().open_positions()[0].net_qty, 10);

        // 15:20 IST, three underlying ticks before the close fills
        let late = Utc.with_ymd_and_hms(2025, 12, 10, 9, 50, 0).single().unwrap().timestamp_millis();
        for i in 0..3 {
            engine.on_tick(&Tick::new("BANKNIFTY", 59_620.0, 0, late + i * 1_000));
        }

        let closing = sells(&broker);
        assert_eq!(closing.len(), 1);
        assert_eq!(closing[0].1.quantity, 10);
        assert_eq!(closing[0].1.tag, "HARD_STOP");
        assert_eq!(engine.get_stats().hard_stops, 1);
        assert_eq!(bus.get_recent_events(Some(EVENT_HARD_STOP), None).len(), 1);

        engine.on_order_update(&fill(&closing[0].0, "SBIN", OrderSide::Sell, 10, 799.0));
        engine.on_tick(&Tick::new("BANKNIFTY", 59_620.0, 0, late + 4_000));
        assert!(engine.positions().open_positions().is_empty());
        assert_eq!(sells(&broker).len(), 1);

        // Re-enabling clears the latch; still past auto-exit, so it trips again
        engine.set_auto_trade(true);
        engine.on_tick(&Tick::new("BANKNIFTY", 59_620.0, 0, late + 5_000));
        assert_eq!(engine.get_stats().hard_stops, 2);
        assert!(!engine.auto_trade_enabled());
    }

    #[test]
    fn test_live_trailing_stop_closes_once_then_goes_flat() {
        let mut config = live_config();
        config.risk.tsl_hurdle_pct = 5.0;
        config.risk.tsl_trail_pct = 5.0;
        let (mut engine, broker, bus) = engine_with(config, Arc::new(MemoryStore::new()));
        let t0 = session_start();
        bullish_basket(&mut engine, t0);
        for i in 0..3 {
            engine.on_tick(&Tick::new("BANKNIFTY", 59_620.0, 0, t0 + i * 1_000));
        }
        assert_eq!(engine.stance(), Stance::Call);
        assert!(engine.positions().open_positions().is_empty());

        let (entry_id, entry) = broker.orders()[0].clone();
        let leg = entry.instrument.clone();
        engine.on_order_update(&OrderUpdate {
            product: entry.product,
            ..fill(&entry_id, &leg, OrderSide::Buy, entry.quantity, 200.0)
        });

        engine.on_tick(&Tick::new(&leg, 240.0, 0, t0 + 4_000));
        engine.on_tick(&Tick::new("BANKNIFTY", 59_620.0, 0, t0 + 5_000));
        engine.on_tick(&Tick::new(&leg, 220.0, 0, t0 + 6_000));
        engine.on_tick(&Tick::new("BANKNIFTY", 59_620.0, 0, t0 + 7_000));
        engine.on_tick(&Tick::new("BANKNIFTY", 59_620.0, 0, t0 + 8_000));

        let closing = sells(&broker);
        assert_eq!(closing.len(), 1);
        assert_eq!(closing[0].1.tag, "TSL_EXIT");
        assert_eq!(engine.get_stats().tsl_exits, 1);
        assert_eq!(bus.get_recent_events(Some(EVENT_TSL_BREACH), None).len(), 1);
        // Exposure remains until the fill lands
        assert_eq!(engine.stance(), Stance::Call);

        engine.on_order_update(&OrderUpdate {
            product: entry.product,
            ..fill(&closing[0].0, &leg, OrderSide::Sell, entry.quantity, 219.0)
        });
        engine.on_tick(&Tick::new("BANKNIFTY", 59_620.0, 0, t0 + 9_000));

        assert!(engine.positions().open_positions().is_empty());
        assert_eq!(engine.stance(), Stance::None);
        assert_eq!(broker.orders().len(), 2);
        let signals = bus.get_recent_events(Some(EVENT_SIGNAL), None);
        assert_eq!(signals.len(), 2);
    }

    #[test]
    fn test_daily_loss_ignores_earlier_sessions() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_state(crate::layer1::store::STATE_REALIZED_PNL, json!(-4_900.0))
            .unwrap();
        let mut config = config();
        config.risk.max_drawdown_pct = 50.0;
        let (mut engine, _, _) = engine_with(config, store);
        engine.reset_session();
        let t0 = session_start();

        engine.on_tick(&Tick::new("SBIN", 800.0, 0, t0));
        engine.place_manual("SBIN", OrderSide::Buy, 10, ProductClass::Intraday).unwrap();
        engine.on_tick(&Tick::new("SBIN", 788.0, 0, t0 + 1_000));
        engine.on_tick(&Tick::new("BANKNIFTY", 59_000.0, 0, t0 + 2_000));

        assert!((engine.positions().daily_pnl() + 120.0).abs() < 1e-9);
        assert_eq!(engine.get_stats().hard_stops, 0);
        assert!(engine.auto_trade_enabled());
        assert_eq!(engine.positions().open_positions().len(), 1);
    }
}
