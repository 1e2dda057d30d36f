//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::{CoreError, CoreResult, WatchTarget};

/// Buffered events per listener before the producer waits on the fan-in task
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

/// Keepalive period for streaming connections
pub const DEFAULT_PING_INTERVAL_SECS: u64 = 15;

/// On-chain oracle source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSourceConfig {
    /// Websocket RPC endpoint
    pub rpc_url: String,
    pub targets: Vec<WatchTarget>,
    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
}

/// Exchange streaming ticker source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerSourceConfig {
    /// Source label shown in the price table
    pub name: String,
    pub url: String,
    pub symbols: Vec<String>,
    #[serde(default = "default_ticker_channel")]
    pub channel: String,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

/// Console rendering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub enabled: bool,
    /// Minimum gap between two redraws
    pub min_interval_ms: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval_ms: 250,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub chains: Vec<ChainSourceConfig>,
    #[serde(default)]
    pub tickers: Vec<TickerSourceConfig>,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default)]
    pub render: RenderConfig,
}

impl AppConfig {
    pub fn source_count(&self) -> usize {
        self.chains.len() + self.tickers.len()
    }

    /// Reject configurations that could never produce a price.
    pub fn validate(&self) -> CoreResult<()> {
        if self.source_count() == 0 {
            return Err(CoreError::InvalidConfig("no price sources configured".into()));
        }
        if self.channel_capacity == 0 {
            return Err(CoreError::InvalidConfig("channel_capacity must be positive".into()));
        }

        for chain in &self.chains {
            if chain.rpc_url.is_empty() {
                return Err(CoreError::InvalidConfig("chain source without rpc_url".into()));
            }
            if chain.targets.is_empty() {
                return Err(CoreError::InvalidConfig(format!(
                    "chain source {} has no watch targets",
                    chain.rpc_url
                )));
            }
            for target in &chain.targets {
                // rust_decimal carries at most 28 fractional digits
                if target.price_decimals > 28 {
                    return Err(CoreError::InvalidConfig(format!(
                        "{}: price_decimals {} out of range",
                        target.instrument, target.price_decimals
                    )));
                }
            }
        }

        let mut names = HashSet::new();
        for ticker in &self.tickers {
            if ticker.url.is_empty() || ticker.symbols.is_empty() {
                return Err(CoreError::InvalidConfig(format!(
                    "ticker source {} needs a url and at least one symbol",
                    ticker.name
                )));
            }
            if ticker.ping_interval_secs == 0 {
                return Err(CoreError::InvalidConfig(format!(
                    "ticker source {}: ping_interval_secs must be positive",
                    ticker.name
                )));
            }
            if !names.insert(ticker.name.as_str()) {
                return Err(CoreError::InvalidConfig(format!(
                    "duplicate ticker source name {}",
                    ticker.name
                )));
            }
        }

        Ok(())
    }
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_ping_interval_secs() -> u64 {
    DEFAULT_PING_INTERVAL_SECS
}

fn default_ticker_channel() -> String {
    "ticker".to_string()
}

fn default_rpc_timeout_ms() -> u64 {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticker(name: &str) -> TickerSourceConfig {
        TickerSourceConfig {
            name: name.to_string(),
            url: "wss://ftx.com/ws/".to_string(),
            symbols: vec!["ETH/USD".to_string()],
            channel: default_ticker_channel(),
            ping_interval_secs: DEFAULT_PING_INTERVAL_SECS,
        }
    }

    #[test]
    fn test_empty_config_is_rejected() {
        let config = AppConfig {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_render_section() {
        let json = r#"{
            "tickers": [{"name": "FTX", "url": "wss://ftx.com/ws/", "symbols": ["ETH/USD"]}],
            "render": {"enabled": false}
        }"#;

        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert!(!config.render.enabled);
        assert_eq!(config.render.min_interval_ms, RenderConfig::default().min_interval_ms);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_from_json() {
        let json = r#"{
            "chains": [{
                "rpc_url": "wss://arb1.example/ws",
                "targets": [{
                    "contract_address": "0xeFc5061B7a8AeF31F789F1bA5b3b8256674F2B71",
                    "instrument": "UNI/USD",
                    "price_decimals": 8
                }]
            }],
            "tickers": [{
                "name": "FTX",
                "url": "wss://ftx.com/ws/",
                "symbols": ["ETH/USD", "UNI/USD"]
            }]
        }"#;

        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.tickers[0].channel, "ticker");
        assert_eq!(config.tickers[0].ping_interval_secs, 15);
        assert_eq!(config.chains[0].rpc_timeout_ms, 10_000);
        assert!(config.render.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_ticker_names() {
        let config = AppConfig {
            tickers: vec![ticker("FTX"), ticker("FTX")],
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::InvalidConfig(_))));
    }

    #[test]
    fn test_decimals_out_of_range() {
        let json = r#"{
            "chains": [{
                "rpc_url": "wss://polygon.example/ws",
                "targets": [{
                    "contract_address": "0x4dD6655Ad5ed7C06c882f496E3f42acE5766cb89",
                    "instrument": "ETH/USD",
                    "price_decimals": 30
                }]
            }]
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }
}
