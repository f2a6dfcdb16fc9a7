// Constituent Strength Calculator
// Weighted percent change from the session open across a fixed basket

use std::collections::HashMap;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Default)]
struct Member {
    weight: f64,
    open: Option<f64>,
    current: Option<f64>,
    volume: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Contribution {
    pub instrument: String,
    pub weight: f64,
    pub pct_change: f64,
    pub contribution: f64,
}

impl fmt::Display for Contribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {:+.2}% x {:.1} = {:+.2}",
            self.instrument, self.pct_change, self.weight, self.contribution
        )
    }
}

pub struct ConstituentStrength {
    members: HashMap<String, Member>,
    updates_processed: u64,
}

impl ConstituentStrength {
    /// Weights are percentage points
    pub fn new(weights: &HashMap<String, f64>) -> Self {
        let members = weights
            .iter()
            .map(|(symbol, weight)| {
                (
                    symbol.clone(),
                    Member {
                        weight: *weight,
                        ..Member::default()
                    },
                )
            })
            .collect();

        Self {
            members,
            updates_processed: 0,
        }
    }

    pub fn is_member(&self, instrument: &str) -> bool {
        self.members.contains_key(instrument)
    }

    /// Record a price. The open reference moves only when `is_open` is set
    /// or none exists yet.
    pub fn update(&mut self, instrument: &str, price: f64, volume: u64, is_open: bool) {
        let Some(member) = self.members.get_mut(instrument) else {
            return;
        };

        self.updates_processed += 1;
        member.current = Some(price);
        member.volume = volume;
        if is_open || member.open.is_none() {
            member.open = Some(price);
        }
    }

    /// Seed the open reference from history
    pub fn set_open_price(&mut self, instrument: &str, price: f64) {
        if let Some(member) = self.members.get_mut(instrument) {
            member.open = Some(price);
            debug!(instrument = %instrument, open = price, "Strength open seeded");
        }
    }

    pub fn open_price(&self, instrument: &str) -> Option<f64> {
        self.members.get(instrument).and_then(|m| m.open)
    }

    /// Sum of weight x percent change over members with both prices known
    pub fn weighted_strength(&self) -> f64 {
        self.members
            .iter()
            .filter_map(|(_, m)| contribution_of(m))
            .sum()
    }

    pub fn contributions(&self) -> Vec<Contribution> {
        let mut out: Vec<Contribution> = self
            .members
            .iter()
            .filter_map(|(symbol, m)| {
                let contribution = contribution_of(m)?;
                Some(Contribution {
                    instrument: symbol.clone(),
                    weight: m.weight,
                    pct_change: contribution / m.weight.max(f64::MIN_POSITIVE),
                    contribution,
                })
            })
            .collect();
        out.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        out
    }

    pub fn reset_session(&mut self) {
        for member in self.members.values_mut() {
            member.open = None;
            member.current = None;
            member.volume = 0;
        }
    }

    pub fn updates_processed(&self) -> u64 {
        self.updates_processed
    }
}

fn contribution_of(member: &Member) -> Option<f64> {
    let open = member.open?;
    let current = member.current?;
    if open == 0.0 {
        return None;
    }
    Some(member.weight * (current - open) / open * 100.0)
}
