// Event System for the Index Strength Engine
// Explicitly constructed pub/sub bus; subscribers are added and removed by handle

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use uuid::Uuid;

// ============================================================================
// Event types
// ============================================================================

pub const EVENT_TICK: &str = "tick";
pub const EVENT_BAR_CLOSED: &str = "bar_closed";
pub const EVENT_SIGNAL: &str = "signal";
pub const EVENT_ORDER_ATTEMPT: &str = "order_attempt";
pub const EVENT_ORDER_RESULT: &str = "order_result";
pub const EVENT_ORDER_UPDATE: &str = "order_update";
pub const EVENT_POSITION_UPDATE: &str = "position_update";
pub const EVENT_TSL_BREACH: &str = "tsl_breach";
pub const EVENT_HARD_STOP: &str = "hard_stop";
pub const EVENT_MACRO_UPDATE: &str = "macro_update";
pub const EVENT_ATM_SHIFT: &str = "atm_shift";

// ============================================================================
// Event Priority
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventPriority {
    Critical = 1, // Hard stops
    High = 2,     // Orders, trailing-stop breaches
    Medium = 3,   // Signals
    Low = 4,      // Bars, cache refreshes
    Info = 5,     // Ticks
}

impl fmt::Display for EventPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// Event
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub event_type: String,
    pub timestamp: i64,
    pub data: HashMap<String, serde_json::Value>,
    pub source: String,
    pub priority: EventPriority,
    pub event_id: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        timestamp: i64,
        data: HashMap<String, serde_json::Value>,
        source: &str,
        priority: EventPriority,
    ) -> Self {
        Self {
            event_type: event_type.to_string(),
            timestamp,
            data,
            source: source.to_string(),
            priority,
            event_id: Uuid::new_v4().to_string(),
        }
    }
}

/// Event payload from a `json!` object; other values land under "value"
pub fn event_data(value: serde_json::Value) -> HashMap<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        other => {
            let mut data = HashMap::new();
            data.insert("value".to_string(), other);
            data
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event(type={}, source={}, priority={:?}, id={})",
            self.event_type,
            self.source,
            self.priority,
            &self.event_id[..8]
        )
    }
}

// ============================================================================
// Event Bus
// ============================================================================

type EventCallback = Arc<dyn Fn(&Event) + Send + Sync>;

/// Handle returned by `subscribe`, used to remove the subscriber again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscriber {
    id: SubscriptionId,
    event_type: String,
    callback: EventCallback,
}

#[derive(Debug, Clone, Default)]
struct EventBusStats {
    total_published: u64,
    total_delivered: u64,
}

pub struct EventBus {
    tx: broadcast::Sender<Event>,
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    event_history: RwLock<VecDeque<Event>>,
    max_history: usize,
    stats: RwLock<EventBusStats>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_history(10_000)
    }

    pub fn with_history(max_history: usize) -> Self {
        let (tx, _rx) = broadcast::channel(10_000);

        Self {
            tx,
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            event_history: RwLock::new(VecDeque::with_capacity(max_history.min(10_000))),
            max_history,
            stats: RwLock::new(EventBusStats::default()),
        }
    }

    /// Subscribe to events by type, or "*" for all events
    pub fn subscribe<F>(&self, event_type: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push(Subscriber {
            id,
            event_type: event_type.to_string(),
            callback: Arc::new(callback),
        });

        tracing::debug!(event_type = %event_type, id = id.0, "Subscribed to events");
        id
    }

    /// Remove a subscriber. Returns false when the handle is unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        before != subscribers.len()
    }

    /// Publish event to all matching subscribers
    pub fn publish(&self, event: Event) {
        self.stats.write().total_published += 1;

        {
            let mut history = self.event_history.write();
            history.push_back(event.clone());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        // Callbacks run outside the lock so they may publish or unsubscribe
        let targets: Vec<EventCallback> = self
            .subscribers
            .read()
            .iter()
            .filter(|s| s.event_type == "*" || s.event_type == event.event_type)
            .map(|s| s.callback.clone())
            .collect();

        for callback in &targets {
            callback(&event);
        }
        self.stats.write().total_delivered += targets.len() as u64;

        let _ = self.tx.send(event);
    }

    /// Convenience wrapper building the event in place
    pub fn emit(
        &self,
        event_type: &str,
        timestamp: i64,
        data: HashMap<String, serde_json::Value>,
        source: &str,
        priority: EventPriority,
    ) {
        self.publish(Event::new(event_type, timestamp, data, source, priority));
    }

    /// Get a receiver for all events (broadcast channel)
    pub fn subscribe_channel(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Get recent events from history, newest first
    pub fn get_recent_events(&self, event_type: Option<&str>, limit: Option<usize>) -> Vec<Event> {
        let history = self.event_history.read();
        let limit = limit.unwrap_or(100);

        history
            .iter()
            .rev()
            .filter(|e| event_type.map_or(true, |et| e.event_type == et))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Get event bus statistics
    pub fn get_stats(&self) -> EventBusStatsSnapshot {
        let stats = self.stats.read();
        let subscribers = self.subscribers.read();

        let mut event_types: Vec<String> = subscribers.iter().map(|s| s.event_type.clone()).collect();
        event_types.sort();
        event_types.dedup();

        EventBusStatsSnapshot {
            total_published: stats.total_published,
            total_delivered: stats.total_delivered,
            subscriber_count: subscribers.len(),
            event_types,
            history_size: self.event_history.read().len(),
        }
    }

    /// Clear event history
    pub fn clear_history(&self) {
        self.event_history.write().clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of event bus statistics
#[derive(Debug, Clone)]
pub struct EventBusStatsSnapshot {
    pub total_published: u64,
    pub total_delivered: u64,
    pub subscriber_count: usize,
    pub event_types: Vec<String>,
    pub history_size: usize,
}

impl fmt::Display for EventBusStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "EventBus(published={}, delivered={}, subscribers={}, history={})",
            self.total_published, self.total_delivered, self.subscriber_count, self.history_size
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn event(event_type: &str) -> Event {
        Event::new(event_type, 123456789, HashMap::new(), "test_source", EventPriority::Info)
    }

    #[test]
    fn test_event_priority() {
        assert!(EventPriority::Critical < EventPriority::High);
        assert!(EventPriority::High < EventPriority::Medium);
    }

    #[test]
    fn test_event_data_from_json() {
        let data = event_data(serde_json::json!({"instrument": "X", "qty": 15}));
        assert_eq!(data["qty"], 15);

        let data = event_data(serde_json::json!(3.5));
        assert_eq!(data["value"], 3.5);
    }

    #[test]
    fn test_event_creation() {
        let event = event("test");
        assert_eq!(event.event_type, "test");
        assert_eq!(event.source, "test_source");
        assert!(!event.event_id.is_empty());
    }

    #[test]
    fn test_subscribe_and_publish() {
        let bus = EventBus::new();
        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = Arc::clone(&received);

        bus.subscribe(EVENT_SIGNAL, move |_event| {
            received_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(event(EVENT_SIGNAL));
        bus.publish(event(EVENT_TICK));

        assert_eq!(received.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wildcard_and_unsubscribe() {
        let bus = EventBus::new();
        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = Arc::clone(&received);

        let id = bus.subscribe("*", move |_event| {
            received_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(event(EVENT_TICK));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(event(EVENT_TICK));

        assert_eq!(received.load(Ordering::SeqCst), 1);
        assert_eq!(bus.get_stats().subscriber_count, 0);
    }

    #[test]
    fn test_event_history_bounded() {
        let bus = EventBus::with_history(2);
        bus.publish(event("a"));
        bus.publish(event("b"));
        bus.publish(event("c"));

        let history = bus.get_recent_events(None, Some(10));
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].event_type, "c");
        assert_eq!(bus.get_recent_events(Some("a"), None).len(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_channel() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_channel();
        bus.publish(event(EVENT_HARD_STOP));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event_type, EVENT_HARD_STOP);
    }

    #[test]
    fn test_event_bus_stats() {
        let bus = EventBus::new();
        bus.subscribe(EVENT_TICK, |_| {});
        bus.publish(event(EVENT_TICK));
        let stats = bus.get_stats();
        assert_eq!(stats.total_published, 1);
        assert_eq!(stats.total_delivered, 1);
        assert_eq!(stats.event_types, vec![EVENT_TICK.to_string()]);
    }
}
