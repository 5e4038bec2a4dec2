//! Multi-symbol bar synchronization onto a unified timeline.

use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveTime};

use crate::domain::ohlcv::Bar;

const DAY_MS: i64 = 86_400_000;

/// Inclusive calendar range; an open end is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    fn start_ms(&self) -> Option<i64> {
        self.start
            .map(|d| d.and_time(NaiveTime::MIN).and_utc().timestamp_millis())
    }

    /// First millisecond after the end date.
    fn end_ms(&self) -> Option<i64> {
        self.end
            .map(|d| d.and_time(NaiveTime::MIN).and_utc().timestamp_millis() + DAY_MS)
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        self.start_ms().is_none_or(|start| timestamp >= start)
            && self.end_ms().is_none_or(|end| timestamp < end)
    }
}

/// Filter to `range`, sort by timestamp and drop duplicate timestamps,
/// keeping the last occurrence.
pub fn prepare(bars: Vec<Bar>, range: &DateRange) -> Vec<Bar> {
    let mut bars: Vec<Bar> = bars.into_iter().filter(|b| range.contains(b.timestamp)).collect();
    // stable, so equal timestamps keep input order
    bars.sort_by_key(|b| b.timestamp);
    let mut out: Vec<Bar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match out.last_mut() {
            Some(last) if last.timestamp == bar.timestamp => *last = bar,
            _ => out.push(bar),
        }
    }
    out
}

/// Sorted union of every timestamp.
pub fn build_timeline<'a>(series: impl IntoIterator<Item = &'a [Bar]>) -> Vec<i64> {
    let unique: BTreeSet<i64> = series
        .into_iter()
        .flat_map(|bars| bars.iter().map(|b| b.timestamp))
        .collect();
    unique.into_iter().collect()
}

/// One symbol's bars aligned to a timeline. Position `i` of `bars` belongs
/// to tick `first_tick + i`; gaps after the first real bar hold
/// forward-filled bars.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolTrack {
    pub symbol: String,
    pub first_tick: usize,
    pub bars: Vec<Bar>,
}

impl SymbolTrack {
    /// Align prepared `bars` (sorted, unique timestamps) to `timeline`.
    /// Returns `None` if the symbol has no bars on the timeline.
    pub fn align(symbol: &str, bars: &[Bar], timeline: &[i64]) -> Option<Self> {
        let first = bars.first()?;
        let first_tick = timeline.binary_search(&first.timestamp).ok()?;

        let mut aligned: Vec<Bar> = Vec::with_capacity(timeline.len() - first_tick);
        let mut source = bars.iter().peekable();
        for &tick in &timeline[first_tick..] {
            match source.peek() {
                Some(bar) if bar.timestamp == tick => {
                    aligned.push((*bar).clone());
                    source.next();
                }
                _ => {
                    let prev = aligned.last()?;
                    aligned.push(prev.forward_fill(tick));
                }
            }
        }
        Some(Self {
            symbol: symbol.to_string(),
            first_tick,
            bars: aligned,
        })
    }

    /// Bars visible at `tick`: everything up to and including it.
    pub fn visible(&self, tick: usize) -> &[Bar] {
        match tick.checked_sub(self.first_tick) {
            Some(offset) => &self.bars[..(offset + 1).min(self.bars.len())],
            None => &[],
        }
    }

    pub fn bar_at(&self, tick: usize) -> Option<&Bar> {
        self.bars.get(tick.checked_sub(self.first_tick)?)
    }
}
