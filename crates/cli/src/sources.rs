//! Build listeners from configuration

use std::time::Duration;

use tracing::{error, info};

use pricewatch_core::AppConfig;
use pricewatch_feed::{AlloyRpc, OnChainListener, PriceListener, TickerConfig, TickerListener};

/// One listener per configured source.
///
/// A chain whose RPC cannot be dialed is logged and left out; the remaining
/// sources still run.
pub async fn build_listeners(config: &AppConfig) -> Vec<Box<dyn PriceListener>> {
    let mut listeners: Vec<Box<dyn PriceListener>> = Vec::with_capacity(config.source_count());

    for chain in &config.chains {
        let timeout = Duration::from_millis(chain.rpc_timeout_ms);
        let rpc = match AlloyRpc::connect(&chain.rpc_url, timeout).await {
            Ok(rpc) => rpc,
            Err(e) => {
                error!("Failed to open chain listener {}: {}", chain.rpc_url, e);
                continue;
            }
        };

        match OnChainListener::connect(rpc, chain.targets.clone()).await {
            Ok(listener) => {
                let listener = listener.with_channel_capacity(config.channel_capacity);
                info!("Opened listener {}", listener.describe());
                listeners.push(Box::new(listener));
            }
            Err(e) => error!("Failed to open chain listener {}: {}", chain.rpc_url, e),
        }
    }

    for ticker in &config.tickers {
        let listener = TickerListener::new(TickerConfig::from_source(ticker, config.channel_capacity));
        info!("Opened listener {}", listener.describe());
        listeners.push(Box::new(listener));
    }

    listeners
}
