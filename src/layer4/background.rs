// Background Tasks - Macro trend refresh and ATM option discovery
// Both only write their own caches and never block tick processing

use chrono::NaiveDate;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::events::{event_data, EventBus, EventPriority, EVENT_MACRO_UPDATE};
use crate::core::types::MacroSnapshot;
use crate::layer1::history::HistorySource;
use crate::layer1::instruments::{OptionContract, OptionLookup};
use crate::layer2::parser::TokenMap;
use crate::layer3::macro_trend::{compute_macro_trend, MacroCache};

// ============================================================================
// Macro refresh
// ============================================================================

/// Recompute every symbol and swap the cache once.
///
/// A symbol whose history fails keeps its previous snapshot.
pub async fn refresh_macro_once(
    history: &dyn HistorySource,
    symbols: &[String],
    cache: &MacroCache,
) -> usize {
    let previous = cache.snapshot();
    let mut next: HashMap<String, MacroSnapshot> = HashMap::with_capacity(symbols.len());
    let mut refreshed = 0;

    for symbol in symbols {
        match history.hourly_closes(symbol).await {
            Ok(closes) => {
                let snapshot = compute_macro_trend(&closes);
                debug!(symbol = %symbol, trend = %snapshot.trend, message = %snapshot.message, "Macro computed");
                next.insert(symbol.clone(), snapshot);
                refreshed += 1;
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Macro history unavailable");
                if let Some(old) = previous.get(symbol) {
                    next.insert(symbol.clone(), old.clone());
                }
            }
        }
    }

    cache.swap(next);
    refreshed
}

/// Periodic refresh; the first pass runs immediately. Abort the handle to stop.
pub fn spawn_macro_refresh(
    history: Arc<dyn HistorySource>,
    symbols: Vec<String>,
    cache: Arc<MacroCache>,
    bus: Arc<EventBus>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let refreshed = refresh_macro_once(history.as_ref(), &symbols, &cache).await;
            info!(refreshed, total = symbols.len(), "Macro data refreshed");

            bus.emit(
                EVENT_MACRO_UPDATE,
                chrono::Utc::now().timestamp_millis(),
                event_data(json!({ "refreshed": refreshed, "symbols": symbols.len() })),
                "macro_refresh",
                EventPriority::Low,
            );
        }
    })
}

// ============================================================================
// ATM discovery
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct AtmRequest {
    pub underlying: String,
    pub strike: f64,
    pub today: NaiveDate,
}

/// Option legs currently subscribed for one underlying
#[derive(Debug, Clone, PartialEq)]
pub struct AtmSubscription {
    pub underlying: String,
    pub strike: f64,
    pub legs: Vec<OptionContract>,
}

/// Per-underlying subscriptions, each replaced as one value
pub struct SubscriptionMap {
    entries: RwLock<HashMap<String, Arc<AtmSubscription>>>,
}

impl SubscriptionMap {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn replace(&self, subscription: AtmSubscription) {
        self.entries
            .write()
            .insert(subscription.underlying.clone(), Arc::new(subscription));
    }

    pub fn get(&self, underlying: &str) -> Option<Arc<AtmSubscription>> {
        self.entries.read().get(underlying).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for SubscriptionMap {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AtmDiscoveryStats {
    pub shifts_observed: u64,
    pub requests_dropped: u64,
    pub lookups_ok: u64,
    pub lookups_failed: u64,
}

impl fmt::Display for AtmDiscoveryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AtmDiscovery(shifts={}, dropped={}, ok={}, failed={})",
            self.shifts_observed, self.requests_dropped, self.lookups_ok, self.lookups_failed
        )
    }
}

/// Bounded request queue drained by a fixed worker pool
pub struct AtmDiscovery {
    tx: mpsc::Sender<AtmRequest>,
    tracked: Mutex<HashMap<String, f64>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<RwLock<AtmDiscoveryStats>>,
}

impl AtmDiscovery {
    /// Spawn the worker pool. Must run inside a tokio runtime.
    pub fn start(
        lookup: Arc<dyn OptionLookup>,
        subscriptions: Arc<SubscriptionMap>,
        tokens: Arc<TokenMap>,
        queue_capacity: usize,
        worker_count: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let stats = Arc::new(RwLock::new(AtmDiscoveryStats::default()));

        let workers = (0..worker_count.max(1))
            .map(|worker_id| {
                let rx = rx.clone();
                let lookup = lookup.clone();
                let subscriptions = subscriptions.clone();
                let tokens = tokens.clone();
                let stats = stats.clone();

                tokio::spawn(async move {
                    loop {
                        let request = { rx.lock().await.recv().await };
                        let Some(request) = request else {
                            debug!(worker_id, "ATM queue closed");
                            break;
                        };
                        resolve_request(
                            lookup.as_ref(),
                            &subscriptions,
                            &tokens,
                            &stats,
                            request,
                        )
                        .await;
                    }
                })
            })
            .collect();

        info!(workers = worker_count.max(1), capacity = queue_capacity, "ATM discovery started");
        Self {
            tx,
            tracked: Mutex::new(HashMap::new()),
            workers: Mutex::new(workers),
            stats,
        }
    }

    /// Record the current ATM strike; queue a lookup when it moved.
    /// Returns true when a shift was queued.
    pub fn observe(&self, underlying: &str, strike: f64, today: NaiveDate) -> bool {
        {
            let mut tracked = self.tracked.lock();
            if tracked.get(underlying).copied() == Some(strike) {
                return false;
            }
            tracked.insert(underlying.to_string(), strike);
        }

        let request = AtmRequest {
            underlying: underlying.to_string(),
            strike,
            today,
        };
        match self.tx.try_send(request) {
            Ok(()) => {
                self.stats.write().shifts_observed += 1;
                info!(underlying = %underlying, strike, "ATM shift queued");
                true
            }
            Err(e) => {
                // Forget the strike so the next tick retries
                self.tracked.lock().remove(underlying);
                self.stats.write().requests_dropped += 1;
                warn!(underlying = %underlying, strike, error = %e, "ATM request dropped");
                false
            }
        }
    }

    pub fn tracked_strike(&self, underlying: &str) -> Option<f64> {
        self.tracked.lock().get(underlying).copied()
    }

    pub fn stop(&self) {
        for handle in self.workers.lock().drain(..) {
            handle.abort();
        }
        info!("ATM discovery stopped");
    }

    pub fn get_stats(&self) -> AtmDiscoveryStats {
        self.stats.read().clone()
    }
}

async fn resolve_request(
    lookup: &dyn OptionLookup,
    subscriptions: &SubscriptionMap,
    tokens: &TokenMap,
    stats: &RwLock<AtmDiscoveryStats>,
    request: AtmRequest,
) {
    match lookup
        .atm_legs(&request.underlying, request.strike, request.today)
        .await
    {
        Ok(legs) if !legs.is_empty() => {
            for leg in &legs {
                tokens.register(&leg.token, &leg.symbol);
            }
            info!(
                underlying = %request.underlying,
                strike = request.strike,
                legs = legs.len(),
                "ATM legs subscribed"
            );
            subscriptions.replace(AtmSubscription {
                underlying: request.underlying,
                strike: request.strike,
                legs,
            });
            stats.write().lookups_ok += 1;
        }
        Ok(_) => {
            warn!(underlying = %request.underlying, strike = request.strike, "No option legs at strike");
            stats.write().lookups_failed += 1;
        }
        Err(e) => {
            warn!(underlying = %request.underlying, error = %e, "ATM lookup failed");
            stats.write().lookups_failed += 1;
        }
    }
}
