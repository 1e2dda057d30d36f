//! Exchange ticker listener over a websocket
//!
//! Speaks the FTX-style streaming protocol: one `subscribe` request per
//! (channel, market), ticker frames shaped like
//! `{"type":"update","channel":"ticker","market":"ETH/USD","data":{...}}`,
//! and a ping control frame on a fixed period to keep the session alive.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::RwLock;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use pricewatch_core::{
    FeedError, FeedResult, ListenerState, PriceUpdateEvent, TickerSourceConfig,
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_PING_INTERVAL_SECS,
};

use crate::listener::{PriceEvents, PriceListener};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SharedSink = Arc<Mutex<SplitSink<WsStream, Message>>>;

/// Upper bound on the unsubscribe/close writes when the stream shuts down
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Ticker feed configuration
#[derive(Debug, Clone)]
pub struct TickerConfig {
    /// Source label, e.g. `FTX`
    pub name: String,
    pub url: String,
    pub channel: String,
    pub symbols: Vec<String>,
    pub ping_interval: Duration,
    pub channel_capacity: usize,
}

impl TickerConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>, symbols: Vec<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            channel: "ticker".to_string(),
            symbols,
            ping_interval: Duration::from_secs(DEFAULT_PING_INTERVAL_SECS),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }

    pub fn from_source(source: &TickerSourceConfig, channel_capacity: usize) -> Self {
        Self {
            name: source.name.clone(),
            url: source.url.clone(),
            channel: source.channel.clone(),
            symbols: source.symbols.clone(),
            ping_interval: Duration::from_secs(source.ping_interval_secs),
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Instrument used for frames that carry no `market`: only unambiguous
    /// when a single symbol is subscribed.
    fn fallback_instrument(&self) -> Option<&str> {
        match self.symbols.as_slice() {
            [only] => Some(only.as_str()),
            _ => None,
        }
    }
}

/// Ticker payload
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerData {
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub bid_size: Option<f64>,
    pub ask_size: Option<f64>,
    pub last: Option<f64>,
    /// Fractional seconds since the Unix epoch
    pub time: f64,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    channel: Option<String>,
    market: Option<String>,
    data: Option<serde_json::Value>,
    msg: Option<String>,
}

/// Classified inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum TickerFrame {
    /// Server-reported error; the stream stays open
    Error(String),
    /// `subscribed` / `unsubscribed` acknowledgement
    Ack { kind: String, market: Option<String> },
    /// Another channel, a pong, or an informational frame
    Ignored,
    Tick(PriceUpdateEvent),
}

/// Convert fractional epoch seconds (`1700000000.5`) to a timestamp.
pub fn epoch_seconds(time: f64) -> Option<DateTime<Utc>> {
    if !time.is_finite() || time < 0.0 {
        return None;
    }

    let mut secs = time.trunc() as i64;
    let mut nanos = ((time - time.trunc()) * 1e9).round() as u32;
    if nanos >= 1_000_000_000 {
        secs += 1;
        nanos -= 1_000_000_000;
    }

    DateTime::<Utc>::from_timestamp(secs, nanos)
}

/// Classify one text frame from the feed.
///
/// `fallback` names the instrument for ticker frames without a `market`.
pub fn decode_frame(text: &str, channel: &str, fallback: Option<&str>) -> FeedResult<TickerFrame> {
    let envelope: Envelope = serde_json::from_str(text)?;

    if envelope.kind.as_deref() == Some("error") {
        return Ok(TickerFrame::Error(envelope.msg.unwrap_or_else(|| text.to_string())));
    }

    if envelope.channel.as_deref() != Some(channel) {
        return Ok(TickerFrame::Ignored);
    }

    if let Some(kind @ ("subscribed" | "unsubscribed")) = envelope.kind.as_deref() {
        return Ok(TickerFrame::Ack {
            kind: kind.to_string(),
            market: envelope.market,
        });
    }

    let Some(data) = envelope.data else {
        return Ok(TickerFrame::Ignored);
    };

    let ticker: TickerData = serde_json::from_value(data)?;
    let last = ticker
        .last
        .ok_or_else(|| FeedError::InvalidMessage("ticker without last price".into()))?;
    let price = Decimal::from_f64(last)
        .ok_or_else(|| FeedError::InvalidMessage(format!("unrepresentable price {}", last)))?;
    let observed_at = epoch_seconds(ticker.time)
        .ok_or_else(|| FeedError::InvalidMessage(format!("invalid time {}", ticker.time)))?;

    let instrument = match (envelope.market, fallback) {
        (Some(market), _) => market,
        (None, Some(only)) => only.to_string(),
        (None, None) => {
            return Err(FeedError::InvalidMessage("ticker without market".into()));
        }
    };

    Ok(TickerFrame::Tick(PriceUpdateEvent::new(instrument, price, observed_at)))
}

async fn send_requests<S>(sink: &Mutex<S>, op: &str, channel: &str, symbols: &[String]) -> Result<(), WsError>
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let mut sink = sink.lock().await;
    for symbol in symbols {
        let request = serde_json::json!({
            "op": op,
            "channel": channel,
            "market": symbol,
        });
        sink.send(Message::Text(request.to_string())).await?;
    }
    Ok(())
}

/// Websocket ticker listener
pub struct TickerListener {
    config: TickerConfig,
    started: bool,
    state: Arc<RwLock<ListenerState>>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl TickerListener {
    pub fn new(config: TickerConfig) -> Self {
        Self {
            config,
            started: false,
            state: Arc::new(RwLock::new(ListenerState::Idle)),
            shutdown: None,
            task: None,
        }
    }

}

#[async_trait]
impl PriceListener for TickerListener {
    async fn start(&mut self) -> FeedResult<PriceEvents> {
        if self.started {
            return Err(FeedError::AlreadyStarted);
        }
        self.started = true;

        info!("Connecting to {} at {}", self.config.name, self.config.url);
        let ws = match connect_async(self.config.url.as_str()).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                *self.state.write() = ListenerState::Closed;
                return Err(FeedError::ConnectionFailed(format!("{}: {}", self.config.url, e)));
            }
        };
        *self.state.write() = ListenerState::Connected;
        info!("Connected to {}", self.config.name);

        let (write, read) = ws.split();
        let sink: SharedSink = Arc::new(Mutex::new(write));

        if let Err(e) = send_requests(&*sink, "subscribe", &self.config.channel, &self.config.symbols).await {
            let _ = sink.lock().await.close().await;
            *self.state.write() = ListenerState::Closed;
            return Err(FeedError::SubscriptionFailed(format!("{}: {}", self.config.name, e)));
        }
        *self.state.write() = ListenerState::Subscribed;

        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let keepalive = tokio::spawn(keepalive(
            Arc::clone(&sink),
            self.config.ping_interval,
            self.config.name.clone(),
        ));

        self.task = Some(tokio::spawn(run_ticker(
            self.config.clone(),
            read,
            sink,
            keepalive,
            tx,
            shutdown_rx,
            Arc::clone(&self.state),
        )));
        self.shutdown = Some(shutdown_tx);

        Ok(rx)
    }

    fn describe(&self) -> String {
        self.config.name.clone()
    }

    async fn close(&mut self) -> FeedResult<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        let joined = match self.task.take() {
            Some(task) => task.await.map_err(|e| FeedError::TaskFailed(e.to_string())),
            None => Ok(()),
        };

        *self.state.write() = ListenerState::Closed;
        joined
    }

    fn state(&self) -> ListenerState {
        *self.state.read()
    }
}

async fn keepalive(sink: SharedSink, period: Duration, name: String) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        ticker.tick().await;
        if let Err(e) = sink.lock().await.send(Message::Ping(Vec::new())).await {
            warn!("{}: keepalive ping failed: {}", name, e);
            break;
        }
        debug!("{}: ping", name);
    }
}

async fn run_ticker(
    config: TickerConfig,
    mut read: SplitStream<WsStream>,
    sink: SharedSink,
    keepalive: JoinHandle<()>,
    tx: mpsc::Sender<PriceUpdateEvent>,
    mut shutdown: oneshot::Receiver<()>,
    state: Arc<RwLock<ListenerState>>,
) {
    *state.write() = ListenerState::Streaming;
    let fallback = config.fallback_instrument();

    'frames: loop {
        let text = tokio::select! {
            _ = &mut shutdown => {
                info!("{}: closing ticker stream", config.name);
                break;
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => text,
                Some(Ok(Message::Close(frame))) => {
                    info!("{}: websocket closed by server: {:?}", config.name, frame);
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    error!("{}: websocket error: {}", config.name, e);
                    break;
                }
                None => {
                    warn!("{}: websocket stream ended", config.name);
                    break;
                }
            },
        };

        let event = match decode_frame(&text, &config.channel, fallback) {
            Ok(TickerFrame::Tick(event)) => event,
            Ok(TickerFrame::Error(msg)) => {
                error!("{}: feed error: {}", config.name, msg);
                continue;
            }
            Ok(TickerFrame::Ack { kind, market }) => {
                info!("{}: {} {}", config.name, kind, market.unwrap_or_default());
                continue;
            }
            Ok(TickerFrame::Ignored) => continue,
            Err(e) => {
                warn!("{}: dropping frame: {}", config.name, e);
                continue;
            }
        };

        tokio::select! {
            sent = tx.send(event) => {
                if sent.is_err() {
                    debug!("{}: event receiver dropped", config.name);
                    break 'frames;
                }
            }
            _ = &mut shutdown => break 'frames,
        }
    }

    keepalive.abort();

    unsubscribe_and_close(&*sink, &config, CLOSE_GRACE).await;

    *state.write() = ListenerState::Closed;
    info!("{}: ticker stream closed", config.name);
}

/// Send unsubscribe requests and a close frame, giving up after `grace`.
/// Returns false when the peer stopped reading and the writes were abandoned.
async fn unsubscribe_and_close<S>(sink: &Mutex<S>, config: &TickerConfig, grace: Duration) -> bool
where
    S: Sink<Message, Error = WsError> + Unpin,
{
    let goodbye = async {
        if let Err(e) = send_requests(sink, "unsubscribe", &config.channel, &config.symbols).await {
            debug!("{}: unsubscribe not delivered: {}", config.name, e);
        }
        if let Err(e) = sink.lock().await.close().await {
            debug!("{}: close frame not delivered: {}", config.name, e);
        }
    };

    if tokio::time::timeout(grace, goodbye).await.is_err() {
        warn!("{}: peer not reading, dropped unsubscribe after {:?}", config.name, grace);
        return false;
    }
    true
}
