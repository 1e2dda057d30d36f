//! Core type definitions

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Well-known blockchain networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainId {
    Ethereum,
    Arbitrum,
    Base,
    Polygon,
}

impl ChainId {
    pub fn from_id(id: u64) -> Option<Self> {
        match id {
            1 => Some(ChainId::Ethereum),
            42161 => Some(ChainId::Arbitrum),
            8453 => Some(ChainId::Base),
            137 => Some(ChainId::Polygon),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChainId::Ethereum => "ethereum",
            ChainId::Arbitrum => "arbitrum",
            ChainId::Base => "base",
            ChainId::Polygon => "polygon",
        }
    }

    /// Source label for a numeric chain id, e.g. `arbitrum (42161)` or `chain 10`.
    pub fn label(id: u64) -> String {
        match Self::from_id(id) {
            Some(chain) => format!("{} ({})", chain.name(), id),
            None => format!("chain {}", id),
        }
    }
}

/// A single observed price for one instrument, as produced by a listener.
///
/// The source is not part of the event: the aggregator attaches the
/// listener's label when applying it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdateEvent {
    pub instrument: String,
    pub price: Decimal,
    pub observed_at: DateTime<Utc>,
}

impl PriceUpdateEvent {
    pub fn new(instrument: impl Into<String>, price: Decimal, observed_at: DateTime<Utc>) -> Self {
        Self {
            instrument: instrument.into(),
            price,
            observed_at,
        }
    }
}

/// Key for price table lookups
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PriceKey {
    pub source: String,
    pub instrument: String,
}

impl PriceKey {
    pub fn new(source: impl Into<String>, instrument: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            instrument: instrument.into(),
        }
    }
}

impl fmt::Display for PriceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.instrument)
    }
}

/// Latest known price for one (source, instrument) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTableEntry {
    pub source: String,
    pub instrument: String,
    pub price: Decimal,
    pub last_update: DateTime<Utc>,
    pub update_count: u64,
}

impl PriceTableEntry {
    pub fn key(&self) -> PriceKey {
        PriceKey::new(self.source.clone(), self.instrument.clone())
    }
}

/// An oracle contract watched by an on-chain listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchTarget {
    pub contract_address: Address,
    pub instrument: String,
    pub price_decimals: u32,
}

impl WatchTarget {
    pub fn new(contract_address: Address, instrument: impl Into<String>, price_decimals: u32) -> Self {
        Self {
            contract_address,
            instrument: instrument.into(),
            price_decimals,
        }
    }
}

/// Lifecycle of a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerState {
    /// Constructed, nothing opened yet
    Idle,
    /// Transport is up, no subscription yet
    Connected,
    Subscribed,
    Streaming,
    /// Terminal; there is no way back
    Closed,
}
