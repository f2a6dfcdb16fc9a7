// Bar Aggregator - Fixed-interval OHLCV bars from a tick stream
// One instance per (instrument, interval); volume input is a per-tick delta

use std::collections::VecDeque;
use std::fmt;

use crate::core::types::Bar;

const DEFAULT_MAX_HISTORY: usize = 1_000;

#[derive(Debug, Clone, Default)]
pub struct BarAggregatorStats {
    pub ticks_processed: u64,
    pub bars_completed: u64,
    /// Ticks whose bucket precedes the current bar, merged into it
    pub late_ticks: u64,
}

impl fmt::Display for BarAggregatorStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bars(ticks={}, completed={}, late={})",
            self.ticks_processed, self.bars_completed, self.late_ticks
        )
    }
}

pub struct BarAggregator {
    instrument: String,
    interval_ms: i64,
    current: Option<Bar>,
    history: VecDeque<Bar>,
    max_history: usize,
    stats: BarAggregatorStats,
}

impl BarAggregator {
    /// `interval_ms` must be positive; zero is clamped to one millisecond
    pub fn new(instrument: &str, interval_ms: i64) -> Self {
        Self {
            instrument: instrument.to_string(),
            interval_ms: interval_ms.max(1),
            current: None,
            history: VecDeque::with_capacity(64),
            max_history: DEFAULT_MAX_HISTORY,
            stats: BarAggregatorStats::default(),
        }
    }

    pub fn with_minutes(instrument: &str, minutes: u32) -> Self {
        Self::new(instrument, i64::from(minutes) * 60_000)
    }

    pub fn bucket_start(&self, timestamp: i64) -> i64 {
        timestamp - timestamp.rem_euclid(self.interval_ms)
    }

    /// Feed one tick. Returns the bar that this tick closed, if any.
    pub fn process_tick(&mut self, price: f64, volume: u64, timestamp: i64) -> Option<Bar> {
        self.stats.ticks_processed += 1;
        let bucket = self.bucket_start(timestamp);

        match self.current.as_mut() {
            None => {
                self.current = Some(Bar::open_at(&self.instrument, bucket, price, volume));
                None
            }
            Some(bar) if bucket > bar.start => {
                let mut finished = std::mem::replace(
                    bar,
                    Bar::open_at(&self.instrument, bucket, price, volume),
                );
                finished.complete = true;

                self.history.push_back(finished.clone());
                while self.history.len() > self.max_history {
                    self.history.pop_front();
                }
                self.stats.bars_completed += 1;
                Some(finished)
            }
            Some(bar) => {
                if bucket < bar.start {
                    self.stats.late_ticks += 1;
                }
                bar.high = bar.high.max(price);
                bar.low = bar.low.min(price);
                bar.close = price;
                bar.volume += volume;
                None
            }
        }
    }

    pub fn current(&self) -> Option<&Bar> {
        self.current.as_ref()
    }

    /// Completed bars, oldest first
    pub fn history(&self) -> impl Iterator<Item = &Bar> {
        self.history.iter()
    }

    pub fn completed_count(&self) -> u64 {
        self.stats.bars_completed
    }

    pub fn interval_ms(&self) -> i64 {
        self.interval_ms
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn get_stats(&self) -> BarAggregatorStats {
        self.stats.clone()
    }
}
