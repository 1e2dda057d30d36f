//! Chain RPC access for the on-chain listener

use std::time::Duration;

use alloy::providers::{Provider, ProviderBuilder, RootProvider, WsConnect};
use alloy::pubsub::PubSubFrontend;
use alloy::rpc::types::eth::{BlockNumberOrTag, Filter, Log};
use alloy_primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use tracing::{debug, info};

use pricewatch_core::{FeedError, FeedResult};

/// A contract event log, independent of the RPC client that delivered it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    /// `None` for pending logs
    pub block_number: Option<u64>,
}

impl From<Log> for RawLog {
    fn from(log: Log) -> Self {
        Self {
            address: log.inner.address,
            topics: log.inner.data.topics().to_vec(),
            data: log.inner.data.data.clone(),
            block_number: log.block_number,
        }
    }
}

/// The slice of a chain RPC the on-chain listener needs
#[async_trait]
pub trait ChainRpc: Send + Sync + 'static {
    async fn chain_id(&self) -> FeedResult<u64>;

    /// Live logs emitted by any of `addresses`. The stream ends when the
    /// subscription is torn down or fails.
    async fn subscribe_logs(&self, addresses: Vec<Address>) -> FeedResult<BoxStream<'static, RawLog>>;

    async fn block_timestamp(&self, number: u64) -> FeedResult<u64>;
}

/// Websocket RPC client backed by an alloy provider
pub struct AlloyRpc {
    url: String,
    provider: RootProvider<PubSubFrontend>,
    request_timeout: Duration,
}

impl AlloyRpc {
    pub async fn connect(url: &str, request_timeout: Duration) -> FeedResult<Self> {
        info!("Connecting to RPC at {}", url);

        let provider = ProviderBuilder::new()
            .on_ws(WsConnect::new(url))
            .await
            .map_err(|e| FeedError::ConnectionFailed(format!("{}: {}", url, e)))?;

        Ok(Self {
            url: url.to_string(),
            provider,
            request_timeout,
        })
    }
}

#[async_trait]
impl ChainRpc for AlloyRpc {
    async fn chain_id(&self) -> FeedResult<u64> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| FeedError::ConnectionFailed(format!("chain id from {}: {}", self.url, e)))
    }

    async fn subscribe_logs(&self, addresses: Vec<Address>) -> FeedResult<BoxStream<'static, RawLog>> {
        let filter = Filter::new().address(addresses);
        let subscription = self
            .provider
            .subscribe_logs(&filter)
            .await
            .map_err(|e| FeedError::SubscriptionFailed(e.to_string()))?;

        debug!("Log subscription installed on {}", self.url);
        Ok(subscription.into_stream().map(RawLog::from).boxed())
    }

    async fn block_timestamp(&self, number: u64) -> FeedResult<u64> {
        let request = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number), false);

        let block = tokio::time::timeout(self.request_timeout, request)
            .await
            .map_err(|_| FeedError::Timeout)?
            .map_err(|e| FeedError::TimestampUnavailable {
                block: number,
                reason: e.to_string(),
            })?
            .ok_or_else(|| FeedError::TimestampUnavailable {
                block: number,
                reason: "block not found".to_string(),
            })?;

        Ok(block.header.timestamp)
    }
}
