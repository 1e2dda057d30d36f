//! On-chain oracle listener
//!
//! Watches OCR aggregator contracts for `NewTransmission` logs and turns
//! each reported answer into a price update stamped with its block time.

use std::sync::Arc;

use alloy_primitives::B256;
use alloy_sol_types::{sol, SolEvent};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use pricewatch_core::{
    ChainId, FeedError, FeedResult, ListenerState, PriceUpdateEvent, WatchTarget,
    DEFAULT_CHANNEL_CAPACITY,
};

use crate::block_cache::BlockTimeCache;
use crate::listener::{PriceEvents, PriceListener};
use crate::rpc::{ChainRpc, RawLog};

sol! {
    /// Emitted by an OCR aggregator each time a report is transmitted.
    #[derive(Debug)]
    event NewTransmission(
        uint32 indexed aggregatorRoundId,
        int192 answer,
        address transmitter,
        int192[] observations,
        bytes observers,
        bytes32 rawReportContext
    );
}

/// topic0 of a `NewTransmission` log
pub const NEW_TRANSMISSION_TOPIC: B256 = <NewTransmission as SolEvent>::SIGNATURE_HASH;

/// Decode the reported answer of a `NewTransmission` log, scaled by
/// `10^-decimals`.
pub fn decode_answer(log: &RawLog, decimals: u32) -> FeedResult<Decimal> {
    let topic = log
        .topics
        .first()
        .ok_or_else(|| FeedError::Decode("log without topics".to_string()))?;
    if *topic != NEW_TRANSMISSION_TOPIC {
        return Err(FeedError::UnknownEvent(*topic));
    }

    let event = NewTransmission::decode_raw_log(log.topics.iter().copied(), &log.data, true)
        .map_err(|e| FeedError::Decode(e.to_string()))?;

    let raw = i128::try_from(event.answer)
        .map_err(|_| FeedError::Decode(format!("answer {} does not fit a decimal", event.answer)))?;

    Decimal::try_from_i128_with_scale(raw, decimals).map_err(|e| FeedError::Decode(e.to_string()))
}

/// Per-log work done inside the listener task. Owns the block cache.
struct LogProcessor<R: ChainRpc> {
    rpc: Arc<R>,
    label: String,
    targets: Vec<WatchTarget>,
    cache: BlockTimeCache,
}

impl<R: ChainRpc> LogProcessor<R> {
    async fn process(&mut self, log: &RawLog) -> Vec<PriceUpdateEvent> {
        let mut prices = Vec::new();
        for target in self.targets.iter().filter(|t| t.contract_address == log.address) {
            match decode_answer(log, target.price_decimals) {
                Ok(price) => prices.push((target.instrument.clone(), price)),
                Err(FeedError::UnknownEvent(topic)) => {
                    debug!("{}: skipping log {} from {}", self.label, topic, log.address);
                }
                Err(e) => warn!("{}: undecodable log from {}: {}", self.label, log.address, e),
            }
        }

        if prices.is_empty() {
            return Vec::new();
        }

        let Some(block) = log.block_number else {
            warn!("{}: log from {} has no block number, dropped", self.label, log.address);
            return Vec::new();
        };

        let timestamp = match self.cache.resolve(self.rpc.as_ref(), block).await {
            Ok(t) => t,
            Err(e) => {
                warn!("{}: no timestamp for block {}, update dropped: {}", self.label, block, e);
                return Vec::new();
            }
        };

        let Some(observed_at) = i64::try_from(timestamp)
            .ok()
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        else {
            warn!("{}: block {} has invalid timestamp {}", self.label, block, timestamp);
            return Vec::new();
        };

        prices
            .into_iter()
            .map(|(instrument, price)| PriceUpdateEvent::new(instrument, price, observed_at))
            .collect()
    }
}

/// Listener over an RPC log subscription
pub struct OnChainListener<R: ChainRpc> {
    /// Released by `close`; the task holds the only other handle.
    rpc: Option<Arc<R>>,
    chain_id: u64,
    label: String,
    targets: Vec<WatchTarget>,
    channel_capacity: usize,
    started: bool,
    state: Arc<RwLock<ListenerState>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl<R: ChainRpc> OnChainListener<R> {
    /// Resolve the chain id over `rpc`. The listener is `Connected` on success.
    pub async fn connect(rpc: R, targets: Vec<WatchTarget>) -> FeedResult<Self> {
        let chain_id = rpc.chain_id().await?;
        let label = ChainId::label(chain_id);
        info!("Opened listener {} watching {} contracts", label, targets.len());

        Ok(Self {
            rpc: Some(Arc::new(rpc)),
            chain_id,
            label,
            targets,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            started: false,
            state: Arc::new(RwLock::new(ListenerState::Connected)),
            shutdown: None,
            task: None,
        })
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Add a contract to watch. Only effective before `start`.
    pub fn watch(&mut self, target: WatchTarget) {
        if self.started {
            warn!("{}: ignoring watch target {} added after start", self.label, target.instrument);
            return;
        }
        self.targets.push(target);
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn targets(&self) -> &[WatchTarget] {
        &self.targets
    }
}

#[async_trait]
impl<R: ChainRpc> PriceListener for OnChainListener<R> {
    async fn start(&mut self) -> FeedResult<PriceEvents> {
        if self.started {
            return Err(FeedError::AlreadyStarted);
        }
        self.started = true;

        let Some(rpc) = self.rpc.as_ref().map(Arc::clone) else {
            *self.state.write() = ListenerState::Closed;
            return Err(FeedError::Disconnected);
        };

        if self.targets.is_empty() {
            *self.state.write() = ListenerState::Closed;
            return Err(FeedError::SubscriptionFailed(format!("{}: no watch targets", self.label)));
        }

        let addresses = self.targets.iter().map(|t| t.contract_address).collect();
        let logs = match rpc.subscribe_logs(addresses).await {
            Ok(logs) => logs,
            Err(e) => {
                error!("{}: log subscription failed: {}", self.label, e);
                *self.state.write() = ListenerState::Closed;
                return Err(e);
            }
        };
        *self.state.write() = ListenerState::Subscribed;

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let processor = LogProcessor {
            rpc,
            label: self.label.clone(),
            targets: self.targets.clone(),
            cache: BlockTimeCache::new(),
        };

        self.task = Some(tokio::spawn(run_logs(
            processor,
            logs,
            tx,
            shutdown_rx,
            Arc::clone(&self.state),
        )));
        self.shutdown = Some(shutdown_tx);

        Ok(rx)
    }

    fn describe(&self) -> String {
        self.label.clone()
    }

    async fn close(&mut self) -> FeedResult<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        let joined = match self.task.take() {
            Some(task) => task.await.map_err(|e| FeedError::TaskFailed(e.to_string())),
            None => Ok(()),
        };

        // the task has dropped its handle by now, so this drops the transport
        if self.rpc.take().is_some() {
            debug!("{}: RPC transport released", self.label);
        }

        *self.state.write() = ListenerState::Closed;
        joined
    }

    fn state(&self) -> ListenerState {
        *self.state.read()
    }
}

async fn run_logs<R: ChainRpc>(
    mut processor: LogProcessor<R>,
    mut logs: BoxStream<'static, RawLog>,
    tx: mpsc::Sender<PriceUpdateEvent>,
    mut shutdown: oneshot::Receiver<()>,
    state: Arc<RwLock<ListenerState>>,
) {
    *state.write() = ListenerState::Streaming;

    'logs: loop {
        let log = tokio::select! {
            _ = &mut shutdown => {
                info!("{}: closing log subscription", processor.label);
                break;
            }
            next = logs.next() => match next {
                Some(log) => log,
                None => {
                    warn!("{}: log subscription ended", processor.label);
                    break;
                }
            },
        };

        for event in processor.process(&log).await {
            tokio::select! {
                sent = tx.send(event) => {
                    if sent.is_err() {
                        debug!("{}: event receiver dropped", processor.label);
                        break 'logs;
                    }
                }
                _ = &mut shutdown => break 'logs,
            }
        }
    }

    *state.write() = ListenerState::Closed;
}
