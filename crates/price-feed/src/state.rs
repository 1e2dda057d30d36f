//! Price table state
//!
//! The table itself is not synchronized; the aggregator wraps it in a
//! reader/writer lock so readers never observe a half-applied update.

use std::collections::HashMap;

use pricewatch_core::{PriceKey, PriceTableEntry, PriceUpdateEvent};

/// Latest price per (source, instrument)
#[derive(Debug, Default)]
pub struct PriceTable {
    entries: HashMap<PriceKey, PriceTableEntry>,

    /// Applied updates across all keys
    update_count: u64,
}

impl PriceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event from `source`, returning the resulting entry.
    ///
    /// Last applied wins: price and timestamp are overwritten even if the
    /// event was observed earlier than the stored one.
    pub fn apply(&mut self, source: &str, event: &PriceUpdateEvent) -> &PriceTableEntry {
        self.update_count += 1;

        let key = PriceKey::new(source, event.instrument.as_str());
        self.entries
            .entry(key)
            .and_modify(|entry| {
                entry.price = event.price;
                entry.last_update = event.observed_at;
                entry.update_count += 1;
            })
            .or_insert_with(|| PriceTableEntry {
                source: source.to_string(),
                instrument: event.instrument.clone(),
                price: event.price,
                last_update: event.observed_at,
                update_count: 1,
            })
    }

    pub fn get(&self, key: &PriceKey) -> Option<&PriceTableEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of every entry, ordered by (source, instrument)
    pub fn snapshot(&self) -> Vec<PriceTableEntry> {
        let mut entries: Vec<_> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| {
            (a.source.as_str(), a.instrument.as_str()).cmp(&(b.source.as_str(), b.instrument.as_str()))
        });
        entries
    }

    /// Stats
    pub fn stats(&self) -> PriceTableStats {
        PriceTableStats {
            entry_count: self.entries.len(),
            update_count: self.update_count,
        }
    }
}

/// Statistics about the price table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceTableStats {
    pub entry_count: usize,
    pub update_count: u64,
}
