// Feed Message Parser
// Tick and order-status notifications from the broker feed, with token resolution
// Numbers may arrive as JSON strings or numbers; bad messages are counted and rejected

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::core::types::{OrderSide, OrderUpdate, ProductClass, Tick};

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("Missing field: {0}")]
    MissingField(&'static str),
    #[error("Unknown token: {0}")]
    UnknownToken(String),
    #[error("Invalid number in {field}: {value}")]
    InvalidNumber { field: &'static str, value: String },
    #[error("Unrecognized message")]
    Unrecognized,
}

// ============================================================================
// Token map
// ============================================================================

/// Feed token to instrument symbol, shared with the ATM discovery workers
#[derive(Default)]
pub struct TokenMap {
    inner: RwLock<HashMap<String, String>>,
}

impl TokenMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, token: &str, symbol: &str) {
        self.inner.write().insert(token.to_string(), symbol.to_string());
    }

    pub fn resolve(&self, token: &str) -> Option<String> {
        self.inner.read().get(token).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}

// ============================================================================
// Parsed messages
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage {
    Tick(Tick),
    OrderUpdate(OrderUpdate),
}

#[derive(Debug, Clone, Default)]
pub struct ParserStats {
    pub ticks_parsed: u64,
    pub order_updates_parsed: u64,
    pub unknown_tokens: u64,
    pub invalid_numbers: u64,
    pub parse_errors: u64,
}

impl ParserStats {
    pub fn dropped(&self) -> u64 {
        self.unknown_tokens + self.invalid_numbers + self.parse_errors
    }
}

impl fmt::Display for ParserStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Parser(ticks={}, orders={}, unknown_tokens={}, invalid_numbers={}, errors={})",
            self.ticks_parsed,
            self.order_updates_parsed,
            self.unknown_tokens,
            self.invalid_numbers,
            self.parse_errors
        )
    }
}

// ============================================================================
// Field helpers
// ============================================================================

fn opt_f64(data: &Value, field: &'static str) -> Result<Option<f64>, ParseError> {
    match data.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| ParseError::InvalidNumber { field, value: n.to_string() }),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| ParseError::InvalidNumber { field, value: s.clone() }),
        Some(other) => Err(ParseError::InvalidNumber { field, value: other.to_string() }),
    }
}

fn opt_str<'a>(data: &'a Value, field: &str) -> Option<&'a str> {
    data.get(field).and_then(|v| v.as_str()).map(str::trim).filter(|s| !s.is_empty())
}

fn req_str<'a>(data: &'a Value, field: &'static str) -> Result<&'a str, ParseError> {
    opt_str(data, field).ok_or(ParseError::MissingField(field))
}

// ============================================================================
// FeedParser
// ============================================================================

/// Stateful parser with token resolution and drop statistics
pub struct FeedParser {
    tokens: Arc<TokenMap>,
    pub stats: ParserStats,
}

impl FeedParser {
    pub fn new(tokens: Arc<TokenMap>) -> Self {
        Self {
            tokens,
            stats: ParserStats::default(),
        }
    }

    pub fn tokens(&self) -> Arc<TokenMap> {
        self.tokens.clone()
    }

    /// Parse a raw feed message (auto-detects tick vs order update)
    pub fn parse(&mut self, raw_json: &str, arrival_ms: i64) -> Result<FeedMessage, ParseError> {
        let value: Value = match serde_json::from_str(raw_json) {
            Ok(v) => v,
            Err(e) => {
                self.stats.parse_errors += 1;
                return Err(ParseError::InvalidJson(e.to_string()));
            }
        };

        let result = if value.get("norenordno").is_some() {
            self.parse_order_update(&value).map(FeedMessage::OrderUpdate)
        } else if value.get("tk").is_some() {
            self.parse_tick(&value, arrival_ms).map(FeedMessage::Tick)
        } else {
            Err(ParseError::Unrecognized)
        };

        if let Err(ref e) = result {
            match e {
                ParseError::UnknownToken(_) => self.stats.unknown_tokens += 1,
                ParseError::InvalidNumber { .. } => self.stats.invalid_numbers += 1,
                _ => self.stats.parse_errors += 1,
            }
            debug!(error = %e, "Feed message dropped");
        }
        result
    }

    /// Parse a tick notification. Non-positive prices are rejected.
    pub fn parse_tick(&mut self, data: &Value, arrival_ms: i64) -> Result<Tick, ParseError> {
        let token = req_str(data, "tk")?;
        let instrument = self
            .tokens
            .resolve(token)
            .ok_or_else(|| ParseError::UnknownToken(token.to_string()))?;

        let price = opt_f64(data, "lp")?.ok_or(ParseError::MissingField("lp"))?;
        if !price.is_finite() || price <= 0.0 {
            return Err(ParseError::InvalidNumber { field: "lp", value: price.to_string() });
        }

        let cum_volume = match opt_f64(data, "v")? {
            Some(v) if v.is_finite() && v >= 0.0 => v as u64,
            Some(v) => return Err(ParseError::InvalidNumber { field: "v", value: v.to_string() }),
            None => 0,
        };

        // Feed time is epoch seconds when present
        let timestamp = match opt_f64(data, "ft")? {
            Some(secs) if secs > 0.0 => (secs * 1000.0) as i64,
            _ => arrival_ms,
        };

        let tick = Tick {
            instrument,
            price,
            cum_volume,
            open: opt_f64(data, "o")?.filter(|p| *p > 0.0),
            high: opt_f64(data, "h")?.filter(|p| *p > 0.0),
            low: opt_f64(data, "l")?.filter(|p| *p > 0.0),
            prev_close: opt_f64(data, "c")?.filter(|p| *p > 0.0),
            change_pct: opt_f64(data, "pc")?,
            timestamp,
        };

        self.stats.ticks_parsed += 1;
        Ok(tick)
    }

    /// Parse an order status notification
    pub fn parse_order_update(&mut self, data: &Value) -> Result<OrderUpdate, ParseError> {
        let order_id = req_str(data, "norenordno")?.to_string();
        let instrument = req_str(data, "tsym")?.to_string();
        let status = req_str(data, "status")?.to_uppercase();

        let side = opt_str(data, "trantype").and_then(|s| OrderSide::from_str(s).ok());
        let product = opt_str(data, "prd")
            .and_then(|s| ProductClass::from_str(s).ok())
            .unwrap_or(ProductClass::Intraday);

        let fill_quantity = opt_f64(data, "fillshares")?
            .or(opt_f64(data, "qty")?)
            .unwrap_or(0.0) as i64;
        let fill_price = opt_f64(data, "flprc")?
            .or(opt_f64(data, "avgprc")?)
            .unwrap_or(0.0);

        let rejection_reason = opt_str(data, "rejreason").map(str::to_string);

        self.stats.order_updates_parsed += 1;
        Ok(OrderUpdate {
            order_id,
            instrument,
            status,
            side,
            fill_quantity,
            fill_price,
            product,
            rejection_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> FeedParser {
        let tokens = Arc::new(TokenMap::new());
        tokens.register("26009", "BANKNIFTY");
        tokens.register("1333", "HDFCBANK");
        FeedParser::new(tokens)
    }

    #[test]
    fn test_parse_tick_string_numbers() {
        let mut parser = parser();
        let raw = r#"{"t":"tk","e":"NSE","tk":"1333","lp":"1650.50","v":"12000","o":"1640"}"#;
        match parser.parse(raw, 1_000).unwrap() {
            FeedMessage::Tick(tick) => {
                assert_eq!(tick.instrument, "HDFCBANK");
                assert_eq!(tick.price, 1650.5);
                assert_eq!(tick.cum_volume, 12_000);
                assert_eq!(tick.open, Some(1640.0));
                assert_eq!(tick.timestamp, 1_000);
            }
            other => panic!("expected tick, got {:?}", other),
        }
        assert_eq!(parser.stats.ticks_parsed, 1);
    }

    #[test]
    fn test_parse_tick_feed_time() {
        let mut parser = parser();
        let raw = r#"{"tk":"26009","lp":50000,"ft":"1700000000"}"#;
        let msg = parser.parse(raw, 5).unwrap();
        assert!(matches!(msg, FeedMessage::Tick(t) if t.timestamp == 1_700_000_000_000 && t.cum_volume == 0));
    }

    #[test]
    fn test_drops_bad_ticks() {
        let mut parser = parser();
        assert!(matches!(
            parser.parse(r#"{"tk":"999","lp":"10"}"#, 0),
            Err(ParseError::UnknownToken(_))
        ));
        assert!(matches!(
            parser.parse(r#"{"tk":"1333","lp":"0"}"#, 0),
            Err(ParseError::InvalidNumber { field: "lp", .. })
        ));
        assert!(matches!(
            parser.parse(r#"{"tk":"1333","lp":"abc"}"#, 0),
            Err(ParseError::InvalidNumber { .. })
        ));
        assert!(parser.parse("not json", 0).is_err());

        assert_eq!(parser.stats.unknown_tokens, 1);
        assert_eq!(parser.stats.invalid_numbers, 2);
        assert_eq!(parser.stats.parse_errors, 1);
        assert_eq!(parser.stats.dropped(), 4);
    }

    #[test]
    fn test_parse_order_update() {
        let mut parser = parser();
        let raw = r#"{"t":"om","norenordno":"24121900001","tsym":"BANKNIFTY30DEC25C59600",
            "status":"COMPLETE","trantype":"B","fillshares":"15","flprc":"312.5","prd":"M"}"#;
        match parser.parse(raw, 0).unwrap() {
            FeedMessage::OrderUpdate(update) => {
                assert_eq!(update.order_id, "24121900001");
                assert_eq!(update.side, Some(OrderSide::Buy));
                assert_eq!(update.fill_quantity, 15);
                assert_eq!(update.fill_price, 312.5);
                assert_eq!(update.product, ProductClass::CarryForward);
                assert!(update.is_filled());
            }
            other => panic!("expected order update, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejection() {
        let mut parser = parser();
        let raw = r#"{"norenordno":"7","tsym":"X","status":"REJECTED","rejreason":"margin"}"#;
        let FeedMessage::OrderUpdate(update) = parser.parse(raw, 0).unwrap() else {
            panic!("expected order update");
        };
        assert!(update.is_rejected());
        assert_eq!(update.rejection_reason.as_deref(), Some("margin"));
    }
}
