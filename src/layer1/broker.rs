// Broker Seam - Order placement collaborator
// The engine only depends on the Broker trait; PaperBroker accepts every order locally

use parking_lot::RwLock;
use std::fmt;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::core::types::OrderRequest;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Order rejected: {0}")]
    Rejected(String),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Not connected")]
    NotConnected,
}

// ============================================================================
// Broker trait
// ============================================================================

/// Places orders with an execution venue.
///
/// `Ok(Some(id))` means the venue accepted the order, `Ok(None)` means it
/// returned no identifier. Neither implies a fill.
pub trait Broker: Send + Sync {
    fn place_order(&self, request: &OrderRequest) -> Result<Option<String>, BrokerError>;

    fn name(&self) -> &str;
}

// ============================================================================
// Paper Broker
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaperBehavior {
    Accept,
    /// Accept but return no identifier
    NoId,
    Reject,
}

#[derive(Debug, Clone, Default)]
pub struct BrokerStats {
    pub orders_received: u64,
    pub orders_accepted: u64,
    pub orders_rejected: u64,
}

impl fmt::Display for BrokerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Broker(received={}, accepted={}, rejected={})",
            self.orders_received, self.orders_accepted, self.orders_rejected
        )
    }
}

/// In-process broker used for paper trading and tests
pub struct PaperBroker {
    behavior: RwLock<PaperBehavior>,
    orders: RwLock<Vec<(String, OrderRequest)>>,
    stats: RwLock<BrokerStats>,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self {
            behavior: RwLock::new(PaperBehavior::Accept),
            orders: RwLock::new(Vec::new()),
            stats: RwLock::new(BrokerStats::default()),
        }
    }

    pub fn set_behavior(&self, behavior: PaperBehavior) {
        *self.behavior.write() = behavior;
    }

    /// Accepted orders with their identifiers, in placement order
    pub fn orders(&self) -> Vec<(String, OrderRequest)> {
        self.orders.read().clone()
    }

    pub fn get_stats(&self) -> BrokerStats {
        self.stats.read().clone()
    }
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker for PaperBroker {
    fn place_order(&self, request: &OrderRequest) -> Result<Option<String>, BrokerError> {
        self.stats.write().orders_received += 1;

        match *self.behavior.read() {
            PaperBehavior::Reject => {
                self.stats.write().orders_rejected += 1;
                Err(BrokerError::Rejected(format!("paper broker rejected {}", request.instrument)))
            }
            PaperBehavior::NoId => Ok(None),
            PaperBehavior::Accept => {
                let id = format!("PAPER-{}", &Uuid::new_v4().simple().to_string()[..12]);
                debug!(order_id = %id, order = %request, "Paper order accepted");
                self.orders.write().push((id.clone(), request.clone()));
                self.stats.write().orders_accepted += 1;
                Ok(Some(id))
            }
        }
    }

    fn name(&self) -> &str {
        "paper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{OrderSide, ProductClass};

    fn request() -> OrderRequest {
        OrderRequest::market("BANKNIFTY30DEC25C59600", OrderSide::Buy, 15, ProductClass::Intraday, "TEST")
    }

    #[test]
    fn test_paper_broker_accepts() {
        let broker = PaperBroker::new();
        let id = broker.place_order(&request()).unwrap().unwrap();
        assert!(id.starts_with("PAPER-"));
        assert_eq!(broker.orders().len(), 1);
        assert_eq!(broker.get_stats().orders_accepted, 1);
    }

    #[test]
    fn test_paper_broker_reject_and_no_id() {
        let broker = PaperBroker::new();
        broker.set_behavior(PaperBehavior::Reject);
        assert!(matches!(broker.place_order(&request()), Err(BrokerError::Rejected(_))));

        broker.set_behavior(PaperBehavior::NoId);
        assert!(broker.place_order(&request()).unwrap().is_none());
        assert!(broker.orders().is_empty());
        assert_eq!(broker.get_stats().orders_received, 2);
    }
}
