//! Block number to block timestamp cache
//!
//! Oracle logs only carry a block number, so every emitted price needs one
//! timestamp lookup. Blocks arrive close to monotonically, which keeps the
//! hit rate high with a small fixed table.
//!
//! Eviction is a hard wall: once `capacity` entries are stored, the next
//! miss drops the whole table and starts again from empty. There is no
//! per-entry LRU/FIFO eviction.

use tracing::debug;

use pricewatch_core::FeedResult;

use crate::rpc::ChainRpc;

/// Default number of blocks kept before a reset
pub const BLOCK_CACHE_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockTime {
    number: u64,
    timestamp: u64,
}

#[derive(Debug)]
pub struct BlockTimeCache {
    blocks: Vec<BlockTime>,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl BlockTimeCache {
    pub fn new() -> Self {
        Self::with_capacity(BLOCK_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            blocks: Vec::with_capacity(capacity),
            capacity,
            hits: 0,
            misses: 0,
        }
    }

    /// Cached timestamp for `number`, scanning the stored blocks in order.
    pub fn get(&self, number: u64) -> Option<u64> {
        self.blocks
            .iter()
            .find(|b| b.number == number)
            .map(|b| b.timestamp)
    }

    /// Store a freshly fetched block, resetting the table first when full.
    pub fn insert(&mut self, number: u64, timestamp: u64) {
        if self.blocks.len() >= self.capacity {
            debug!("Block cache full ({} entries), resetting", self.capacity);
            self.blocks = Vec::with_capacity(self.capacity);
        }
        self.blocks.push(BlockTime { number, timestamp });
    }

    /// Timestamp for `number`, fetched from `rpc` on a miss.
    ///
    /// A failed fetch leaves the cache untouched.
    pub async fn resolve<R>(&mut self, rpc: &R, number: u64) -> FeedResult<u64>
    where
        R: ChainRpc + ?Sized,
    {
        if let Some(timestamp) = self.get(number) {
            self.hits += 1;
            return Ok(timestamp);
        }

        self.misses += 1;
        let timestamp = rpc.block_timestamp(number).await?;
        self.insert(number, timestamp);
        debug!("Fetched block {} timestamp {}", number, timestamp);

        Ok(timestamp)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// (hits, misses) since creation
    pub fn counters(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

impl Default for BlockTimeCache {
    fn default() -> Self {
        Self::new()
    }
}
