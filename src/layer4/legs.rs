// Option Leg Selection - Strikes, expiry, symbols and simulated quotes
// Turns an entry signal into one to three tradable BUY legs

use chrono::{Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Timelike, Utc, Weekday};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::core::config::{ExecutionConfig, OtmTier};
use crate::core::types::{OptionKind, OrderSide, SignalKind};
use crate::layer1::instruments::InstrumentReference;

/// Local hour from which the expiry day counts as expired
const EXPIRY_ROLL_HOUR: u32 = 15;

// ============================================================================
// Pure helpers
// ============================================================================

/// Exchange wall-clock time of a UTC millisecond timestamp
pub fn exchange_local_time(ts_ms: i64, utc_offset_minutes: i32) -> Option<NaiveDateTime> {
    let offset = FixedOffset::east_opt(utc_offset_minutes * 60)?;
    Utc.timestamp_millis_opt(ts_ms)
        .single()
        .map(|t| t.with_timezone(&offset).naive_local())
}

pub fn atm_strike(price: f64, step: f64) -> f64 {
    if step <= 0.0 {
        return price;
    }
    (price / step).round() * step
}

/// Offset of the first tier whose bound |strength| strictly exceeds, else 0
pub fn otm_offset(tiers: &[OtmTier], strength: f64) -> f64 {
    let magnitude = strength.abs();
    tiers
        .iter()
        .find(|t| magnitude > t.min_strength)
        .map(|t| t.offset)
        .unwrap_or(0.0)
}

pub fn last_wednesday(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let mut day = NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()?;
    while day.weekday() != Weekday::Wed {
        day = day.pred_opt()?;
    }
    Some(day)
}

/// Monthly expiry: last Wednesday, rolled to next month once past or
/// at the roll hour of expiry day
pub fn monthly_expiry(local: NaiveDateTime) -> Option<NaiveDate> {
    let today = local.date();
    let expiry = last_wednesday(today.year(), today.month())?;

    if today > expiry || (today == expiry && local.hour() >= EXPIRY_ROLL_HOUR) {
        let (year, month) = if today.month() == 12 {
            (today.year() + 1, 1)
        } else {
            (today.year(), today.month() + 1)
        };
        return last_wednesday(year, month);
    }
    Some(expiry)
}

fn format_strike(strike: f64) -> String {
    if strike.fract() == 0.0 {
        format!("{:.0}", strike)
    } else {
        format!("{}", strike)
    }
}

/// `{UNDERLYING}{DD}{MON}{YY}{C|P}{strike}`, e.g. BANKNIFTY30DEC25C59600
pub fn option_symbol(underlying: &str, expiry: NaiveDate, kind: OptionKind, strike: f64) -> String {
    format!(
        "{}{}{}{}",
        underlying,
        expiry.format("%d%b%y").to_string().to_uppercase(),
        kind.code(),
        format_strike(strike)
    )
}

/// Time-value heuristic for paper fills only
pub fn simulated_quote(spot: f64, strike: f64, kind: OptionKind) -> f64 {
    if spot <= 0.0 {
        return 0.05;
    }
    let intrinsic = match kind {
        OptionKind::Call => (spot - strike).max(0.0),
        OptionKind::Put => (strike - spot).max(0.0),
    };
    let distance = (spot - strike).abs() / spot;
    let time_value = spot * 0.006 * (-200.0 * distance * distance).exp();
    (intrinsic + time_value).max(0.05)
}

// ============================================================================
// Legs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegRole {
    Main,
    Wing,
}

impl fmt::Display for LegRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegRole::Main => write!(f, "MAIN"),
            LegRole::Wing => write!(f, "WING"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Leg {
    pub underlying: String,
    pub kind: OptionKind,
    pub strike: f64,
    pub expiry: NaiveDate,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: i64,
    pub role: LegRole,
}

impl fmt::Display for Leg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} [{}]", self.side, self.quantity, self.symbol, self.role)
    }
}

/// Resolves entry legs against the instrument reference
pub struct LegPlanner {
    instruments: Arc<InstrumentReference>,
    config: ExecutionConfig,
    utc_offset_minutes: i32,
}

impl LegPlanner {
    pub fn new(instruments: Arc<InstrumentReference>, config: ExecutionConfig, utc_offset_minutes: i32) -> Self {
        Self {
            instruments,
            config,
            utc_offset_minutes,
        }
    }

    pub fn instruments(&self) -> &Arc<InstrumentReference> {
        &self.instruments
    }

    /// Legs for an entry signal; empty for EXIT
    pub fn plan_entry(
        &self,
        kind: SignalKind,
        underlying: &str,
        spot: f64,
        strength: f64,
        ts_ms: i64,
    ) -> Vec<Leg> {
        let Some(local) = exchange_local_time(ts_ms, self.utc_offset_minutes) else {
            return Vec::new();
        };
        let step = self.instruments.strike_step(underlying);
        let atm = atm_strike(spot, step);
        let quantity = self.config.quantity_lots * self.instruments.lot_size(underlying);

        let mut specs: Vec<(OptionKind, f64, LegRole)> = Vec::new();
        match kind {
            SignalKind::BuyCall | SignalKind::BuyPut => {
                let option = if kind == SignalKind::BuyCall { OptionKind::Call } else { OptionKind::Put };
                let offset = otm_offset(&self.config.otm_tiers, strength);
                let strike = match option {
                    OptionKind::Call => atm + offset,
                    OptionKind::Put => atm - offset,
                };
                specs.push((option, strike, LegRole::Main));

                if self.config.hedged_entries {
                    let wing_strike = match option {
                        OptionKind::Call => atm - self.config.hedge_otm_step,
                        OptionKind::Put => atm + self.config.hedge_otm_step,
                    };
                    specs.push((option.opposite(), wing_strike, LegRole::Wing));
                }
                debug!(strength, atm, offset, "Directional strike selected");
            }
            SignalKind::BuyStraddle => {
                specs.push((OptionKind::Call, atm, LegRole::Main));
                specs.push((OptionKind::Put, atm, LegRole::Main));
            }
            SignalKind::Exit => {}
        }

        specs
            .into_iter()
            .filter_map(|(option, strike, role)| {
                let (expiry, symbol) = self.resolve(underlying, option, strike, local)?;
                Some(Leg {
                    underlying: underlying.to_string(),
                    kind: option,
                    strike,
                    expiry,
                    symbol,
                    side: OrderSide::Buy,
                    quantity,
                    role,
                })
            })
            .collect()
    }

    /// Chain contract when listed, else the synthesized monthly symbol
    fn resolve(
        &self,
        underlying: &str,
        kind: OptionKind,
        strike: f64,
        local: NaiveDateTime,
    ) -> Option<(NaiveDate, String)> {
        if let Some(expiry) = self.instruments.nearest_expiry(underlying, local.date()) {
            if let Some(contract) = self.instruments.find_contract(underlying, expiry, strike, kind) {
                return Some((contract.expiry, contract.symbol));
            }
        }
        let expiry = monthly_expiry(local)?;
        Some((expiry, option_symbol(underlying, expiry, kind, strike)))
    }

    /// Whole days a timestamp sits before the local expiry, for audit fields
    pub fn days_to_expiry(&self, expiry: NaiveDate, ts_ms: i64) -> Option<i64> {
        let local = exchange_local_time(ts_ms, self.utc_offset_minutes)?;
        Some((expiry - local.date()).num_days().max(0))
    }
}

/// Round-trip helper for tests and callers holding a local time
pub fn local_to_utc_ms(local: NaiveDateTime, utc_offset_minutes: i32) -> i64 {
    (local - Duration::minutes(utc_offset_minutes as i64))
        .and_utc()
        .timestamp_millis()
}
