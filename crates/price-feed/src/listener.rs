//! The contract every price source implements

use async_trait::async_trait;
use tokio::sync::mpsc;

use pricewatch_core::{FeedResult, ListenerState, PriceUpdateEvent};

/// Receive end of a listener's event stream
pub type PriceEvents = mpsc::Receiver<PriceUpdateEvent>;

/// Base trait for price sources
///
/// A listener is started at most once. `close` releases whatever the
/// listener owns and may be called any number of times, including before
/// `start` or after a failed `start`.
#[async_trait]
pub trait PriceListener: Send + Sync {
    /// Bring up the transport and subscription and hand back the event stream.
    async fn start(&mut self) -> FeedResult<PriceEvents>;

    /// Static label of the source, e.g. `arbitrum (42161)` or `FTX`.
    fn describe(&self) -> String;

    async fn close(&mut self) -> FeedResult<()>;

    fn state(&self) -> ListenerState;
}
