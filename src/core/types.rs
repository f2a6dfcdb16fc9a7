// Core Type Definitions for the Index Strength Engine
// Value types shared by every layer: ticks, bars, signals, orders, positions

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// +1 for buys, -1 for sells
    pub fn sign(&self) -> i64 {
        match self {
            OrderSide::Buy => 1,
            OrderSide::Sell => -1,
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// Side that flattens a position of the given signed quantity
    pub fn closing(net_qty: i64) -> Self {
        if net_qty > 0 {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

impl std::str::FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BUY" | "B" => Ok(OrderSide::Buy),
            "SELL" | "S" => Ok(OrderSide::Sell),
            _ => Err(format!("Invalid OrderSide: '{}'. Expected 'BUY' or 'SELL'", s)),
        }
    }
}

/// Bookkeeping class of a position. Intraday and carry-forward never net.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProductClass {
    Intraday,
    CarryForward,
}

impl ProductClass {
    /// Broker product code ('I' intraday, 'M' carry-forward)
    pub fn code(&self) -> &'static str {
        match self {
            ProductClass::Intraday => "I",
            ProductClass::CarryForward => "M",
        }
    }
}

impl fmt::Display for ProductClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl std::str::FromStr for ProductClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "I" | "MIS" | "INTRADAY" => Ok(ProductClass::Intraday),
            "M" | "NRML" | "CARRYFORWARD" | "CARRY_FORWARD" => Ok(ProductClass::CarryForward),
            _ => Err(format!("Invalid ProductClass: '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

impl Trend {
    /// Score contribution of a trend classification
    pub fn score(&self) -> f64 {
        match self {
            Trend::Bullish => 1.0,
            Trend::Bearish => -1.0,
            Trend::Neutral => 0.0,
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Bullish => write!(f, "BULLISH"),
            Trend::Bearish => write!(f, "BEARISH"),
            Trend::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionKind {
    Call,
    Put,
}

impl OptionKind {
    pub fn code(&self) -> char {
        match self {
            OptionKind::Call => 'C',
            OptionKind::Put => 'P',
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            OptionKind::Call => OptionKind::Put,
            OptionKind::Put => OptionKind::Call,
        }
    }
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionKind::Call => write!(f, "CE"),
            OptionKind::Put => write!(f, "PE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradingMode {
    /// Simulated fills applied on placement
    Paper,
    /// Fills applied only from broker notifications
    Live,
}

impl fmt::Display for TradingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradingMode::Paper => write!(f, "PAPER"),
            TradingMode::Live => write!(f, "LIVE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MKT")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    BuyCall,
    BuyPut,
    BuyStraddle,
    Exit,
}

impl SignalKind {
    pub fn is_entry(&self) -> bool {
        !matches!(self, SignalKind::Exit)
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::BuyCall => write!(f, "BUY_CALL"),
            SignalKind::BuyPut => write!(f, "BUY_PUT"),
            SignalKind::BuyStraddle => write!(f, "BUY_STRADDLE"),
            SignalKind::Exit => write!(f, "EXIT"),
        }
    }
}

/// Open directional stance held by a signal engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Stance {
    #[default]
    None,
    Call,
    Put,
    Straddle,
}

impl fmt::Display for Stance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stance::None => write!(f, "NONE"),
            Stance::Call => write!(f, "CALL"),
            Stance::Put => write!(f, "PUT"),
            Stance::Straddle => write!(f, "STRADDLE"),
        }
    }
}

// ============================================================================
// Tick
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub instrument: String,
    pub price: f64,
    pub cum_volume: u64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub prev_close: Option<f64>,
    pub change_pct: Option<f64>,
    pub timestamp: i64, // milliseconds, UTC
}

impl Tick {
    pub fn new(instrument: &str, price: f64, cum_volume: u64, timestamp: i64) -> Self {
        Self {
            instrument: instrument.to_string(),
            price,
            cum_volume,
            open: None,
            high: None,
            low: None,
            prev_close: None,
            change_pct: None,
            timestamp,
        }
    }

    pub fn with_open(mut self, open: f64) -> Self {
        self.open = Some(open);
        self
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tick(instrument={}, price={:.2}, vol={}, ts={})",
            self.instrument, self.price, self.cum_volume, self.timestamp
        )
    }
}

// ============================================================================
// Bar
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub instrument: String,
    pub start: i64, // bucket start, milliseconds
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub complete: bool,
}

impl Bar {
    pub fn open_at(instrument: &str, start: i64, price: f64, volume: u64) -> Self {
        Self {
            instrument: instrument.to_string(),
            start,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
            complete: false,
        }
    }
}

impl fmt::Display for Bar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bar(instrument={}, start={}, O={:.2}, H={:.2}, L={:.2}, C={:.2}, V={})",
            self.instrument, self.start, self.open, self.high, self.low, self.close, self.volume
        )
    }
}

// ============================================================================
// Signal
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    pub instrument: String,
    pub price: f64,
    pub reason: String,
    pub timestamp: i64,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Signal({} {} @ {:.2}: {})",
            self.kind, self.instrument, self.price, self.reason
        )
    }
}

// ============================================================================
// Macro snapshot
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroSnapshot {
    pub trend: Trend,
    pub oscillator: f64,
    pub message: String,
}

impl MacroSnapshot {
    pub fn neutral(message: &str) -> Self {
        Self {
            trend: Trend::Neutral,
            oscillator: 0.0,
            message: message.to_string(),
        }
    }
}

// ============================================================================
// Orders
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub instrument: String,
    pub side: OrderSide,
    pub quantity: i64,
    pub order_type: OrderType,
    pub product: ProductClass,
    pub tag: String,
}

impl OrderRequest {
    pub fn market(instrument: &str, side: OrderSide, quantity: i64, product: ProductClass, tag: &str) -> Self {
        Self {
            instrument: instrument.to_string(),
            side,
            quantity,
            order_type: OrderType::Market,
            product,
            tag: tag.to_string(),
        }
    }
}

impl fmt::Display for OrderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Order({} {} {} {} {} tag={})",
            self.side, self.quantity, self.instrument, self.order_type, self.product, self.tag
        )
    }
}

/// Status notification for a previously placed order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    pub order_id: String,
    pub instrument: String,
    pub status: String,
    pub side: Option<OrderSide>,
    pub fill_quantity: i64,
    pub fill_price: f64,
    pub product: ProductClass,
    pub rejection_reason: Option<String>,
}

impl OrderUpdate {
    pub fn is_filled(&self) -> bool {
        matches!(self.status.to_uppercase().as_str(), "COMPLETE" | "FILLED")
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.status.to_uppercase().as_str(), "REJECTED" | "CANCELED" | "CANCELLED")
    }
}

// ============================================================================
// Positions
// ============================================================================

/// Composite key of a position: instrument plus product class
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionKey {
    pub instrument: String,
    pub product: ProductClass,
}

impl PositionKey {
    pub fn new(instrument: &str, product: ProductClass) -> Self {
        Self {
            instrument: instrument.to_string(),
            product,
        }
    }
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.instrument, self.product)
    }
}

/// Read-only view of a position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub key: PositionKey,
    pub net_qty: i64,
    pub avg_price: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub last_price: f64,
    pub tsl_armed: bool,
    pub tsl_trigger: f64,
    pub tsl_breached: bool,
}

impl fmt::Display for PositionSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Position({}, net={}, avg={:.2}, realized={:.2}, unrealized={:.2})",
            self.key, self.net_qty, self.avg_price, self.realized_pnl, self.unrealized_pnl
        )
    }
}

/// Persisted row shape for a position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRow {
    pub instrument: String,
    pub product: ProductClass,
    pub net_qty: i64,
    pub avg_price: f64,
    pub realized_pnl: f64,
    /// Last marked value; informational, not restored
    #[serde(default)]
    pub unrealized_pnl: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_display_traits() {
        assert_eq!(format!("{}", OrderSide::Buy), "BUY");
        assert_eq!(format!("{}", SignalKind::BuyStraddle), "BUY_STRADDLE");
        assert_eq!(format!("{}", ProductClass::CarryForward), "M");
        assert_eq!(format!("{}", Trend::Neutral), "NEUTRAL");
    }

    #[test]
    fn test_order_side_from_str() {
        assert_eq!(OrderSide::from_str("B").unwrap(), OrderSide::Buy);
        assert_eq!(OrderSide::from_str("sell").unwrap(), OrderSide::Sell);
        assert!(OrderSide::from_str("HOLD").is_err());
    }

    #[test]
    fn test_closing_side() {
        assert_eq!(OrderSide::closing(10), OrderSide::Sell);
        assert_eq!(OrderSide::closing(-3), OrderSide::Buy);
    }

    #[test]
    fn test_product_codes() {
        assert_eq!(ProductClass::from_str("MIS").unwrap(), ProductClass::Intraday);
        assert_eq!(ProductClass::from_str("m").unwrap(), ProductClass::CarryForward);
        assert!(ProductClass::from_str("C").is_err());
    }

    #[test]
    fn test_order_update_status() {
        let update = OrderUpdate {
            order_id: "1".to_string(),
            instrument: "X".to_string(),
            status: "complete".to_string(),
            side: Some(OrderSide::Buy),
            fill_quantity: 15,
            fill_price: 10.0,
            product: ProductClass::Intraday,
            rejection_reason: None,
        };
        assert!(update.is_filled());
        assert!(!update.is_rejected());
    }

    #[test]
    fn test_trend_score() {
        assert_eq!(Trend::Bullish.score(), 1.0);
        assert_eq!(Trend::Bearish.score(), -1.0);
        assert_eq!(Trend::Neutral.score(), 0.0);
    }
}
