//! Price listeners and the fan-in aggregator
//!
//! Features:
//! - On-chain oracle listener over an RPC log subscription
//! - Bounded block-timestamp cache for log resolution
//! - Exchange ticker listener over a websocket
//! - One fan-in task per listener into a lock-guarded price table

pub mod aggregator;
pub mod block_cache;
pub mod listener;
pub mod onchain;
pub mod rpc;
pub mod state;
pub mod ticker;

pub use aggregator::{Aggregator, ListenReport};
pub use block_cache::BlockTimeCache;
pub use listener::PriceListener;
pub use onchain::OnChainListener;
pub use rpc::{AlloyRpc, ChainRpc, RawLog};
pub use state::PriceTable;
pub use ticker::{TickerConfig, TickerListener};
