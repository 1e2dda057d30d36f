//! Price aggregator - fans every listener into one price table

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use pricewatch_core::{FeedError, PriceTableEntry};

use crate::listener::{PriceEvents, PriceListener};
use crate::state::{PriceTable, PriceTableStats};

/// Outcome of [`Aggregator::listen`]
#[derive(Debug, Default)]
pub struct ListenReport {
    /// Labels of listeners whose fan-in task is running
    pub started: Vec<String>,
    pub failed: Vec<(String, FeedError)>,
}

impl ListenReport {
    /// True when at least one listener was tried and none came up.
    pub fn all_failed(&self) -> bool {
        self.started.is_empty() && !self.failed.is_empty()
    }
}

/// Main price aggregator
pub struct Aggregator {
    listeners: Vec<Box<dyn PriceListener>>,
    table: Arc<RwLock<PriceTable>>,
    /// Number of applied updates, published after every write
    updates: Arc<watch::Sender<u64>>,
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    listening: bool,
    closed: bool,
}

impl Aggregator {
    pub fn new(listeners: Vec<Box<dyn PriceListener>>) -> Self {
        let (updates, _) = watch::channel(0);
        let (shutdown, _) = watch::channel(false);

        Self {
            listeners,
            table: Arc::new(RwLock::new(PriceTable::new())),
            updates: Arc::new(updates),
            shutdown,
            handles: vec![],
            listening: false,
            closed: false,
        }
    }

    /// Shared table handle for readers
    pub fn table(&self) -> Arc<RwLock<PriceTable>> {
        Arc::clone(&self.table)
    }

    /// Point-in-time copy of the table, ordered by (source, instrument)
    pub fn snapshot(&self) -> Vec<PriceTableEntry> {
        self.table.read().snapshot()
    }

    /// Watch the running count of applied updates; changes after every write.
    pub fn subscribe_updates(&self) -> watch::Receiver<u64> {
        self.updates.subscribe()
    }

    pub fn sources(&self) -> Vec<String> {
        self.listeners.iter().map(|l| l.describe()).collect()
    }

    /// Start every listener and spawn one fan-in task per started listener.
    ///
    /// A listener that fails to start is reported and skipped; it does not
    /// stop the others. Calling this again is a no-op.
    pub async fn listen(&mut self) -> ListenReport {
        let mut report = ListenReport::default();
        if self.listening || self.closed {
            warn!("Aggregator already listening or closed, ignoring listen()");
            return report;
        }
        self.listening = true;

        info!("Starting {} listeners", self.listeners.len());

        for listener in self.listeners.iter_mut() {
            let source = listener.describe();
            match listener.start().await {
                Ok(events) => {
                    let handle = tokio::spawn(fan_in(
                        source.clone(),
                        events,
                        Arc::clone(&self.table),
                        Arc::clone(&self.updates),
                        self.shutdown.subscribe(),
                    ));
                    self.handles.push(handle);

                    info!("Started listener {}", source);
                    report.started.push(source);
                }
                Err(e) => {
                    error!("Failed to start listener {}: {}", source, e);
                    report.failed.push((source, e));
                }
            }
        }

        report
    }

    /// Close every listener once, then stop and join the fan-in tasks.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        info!("Closing price aggregator");

        for listener in self.listeners.iter_mut() {
            if let Err(e) = listener.close().await {
                warn!("Failed to close listener {}: {}", listener.describe(), e);
            }
        }

        let _ = self.shutdown.send(true);

        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                warn!("Fan-in task failed: {}", e);
            }
        }

        let stats = self.stats();
        info!(
            "Price aggregator closed: {} prices, {} updates",
            stats.entry_count, stats.update_count
        );
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Get statistics
    pub fn stats(&self) -> PriceTableStats {
        self.table.read().stats()
    }
}

/// Copy one listener's events into the table until its stream ends or the
/// aggregator shuts down.
async fn fan_in(
    source: String,
    mut events: PriceEvents,
    table: Arc<RwLock<PriceTable>>,
    updates: Arc<watch::Sender<u64>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.changed() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => {
                    info!("{}: event stream ended", source);
                    break;
                }
            },
        };

        let update_count = table.write().apply(&source, &event).update_count;
        debug!(
            "{} {} = {} (#{})",
            source, event.instrument, event.price, update_count
        );

        updates.send_modify(|n| *n += 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use pricewatch_core::{FeedResult, ListenerState, PriceKey, PriceUpdateEvent};
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Emits a fixed list of events and holds the stream open until closed.
    struct ScriptedListener {
        label: String,
        events: Vec<PriceUpdateEvent>,
        fail: bool,
        closes: Arc<AtomicUsize>,
        hold: Option<mpsc::Sender<PriceUpdateEvent>>,
        state: ListenerState,
    }

    impl ScriptedListener {
        fn new(label: &str, events: Vec<PriceUpdateEvent>) -> Self {
            Self {
                label: label.to_string(),
                events,
                fail: false,
                closes: Arc::new(AtomicUsize::new(0)),
                hold: None,
                state: ListenerState::Idle,
            }
        }

        fn failing(label: &str) -> Self {
            Self {
                fail: true,
                ..Self::new(label, vec![])
            }
        }
    }

    #[async_trait]
    impl PriceListener for ScriptedListener {
        async fn start(&mut self) -> FeedResult<PriceEvents> {
            if self.fail {
                return Err(FeedError::ConnectionFailed(format!("{} unreachable", self.label)));
            }

            let (tx, rx) = mpsc::channel(self.events.len().max(1));
            let events = std::mem::take(&mut self.events);
            tokio::spawn({
                let tx = tx.clone();
                async move {
                    for event in events {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                }
            });
            self.hold = Some(tx);
            self.state = ListenerState::Streaming;
            Ok(rx)
        }

        fn describe(&self) -> String {
            self.label.clone()
        }

        async fn close(&mut self) -> FeedResult<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            self.hold = None;
            self.state = ListenerState::Closed;
            Ok(())
        }

        fn state(&self) -> ListenerState {
            self.state
        }
    }

    fn ticks(instrument: &str, n: i64) -> Vec<PriceUpdateEvent> {
        (1..=n)
            .map(|i| {
                PriceUpdateEvent::new(
                    instrument,
                    Decimal::new(i * 100, 2),
                    Utc.timestamp_opt(1_700_000_000 + i, 0).unwrap(),
                )
            })
            .collect()
    }

    async fn wait_for_updates(aggregator: &Aggregator, n: u64) {
        let mut updates = aggregator.subscribe_updates();
        tokio::time::timeout(Duration::from_secs(5), updates.wait_for(|count| *count >= n))
            .await
            .expect("timed out waiting for updates")
            .unwrap();
    }

    #[tokio::test]
    async fn test_aggregator_creation() {
        let aggregator = Aggregator::new(vec![]);

        assert!(!aggregator.is_closed());
        assert!(aggregator.snapshot().is_empty());
        assert_eq!(aggregator.stats().update_count, 0);
    }

    #[tokio::test]
    async fn test_failed_listener_does_not_block_others() {
        let listeners: Vec<Box<dyn PriceListener>> = vec![
            Box::new(ScriptedListener::failing("polygon (137)")),
            Box::new(ScriptedListener::new("arbitrum (42161)", ticks("ETH/USD", 3))),
            Box::new(ScriptedListener::new("FTX", ticks("UNI/USD", 2))),
        ];
        let mut aggregator = Aggregator::new(listeners);

        let report = aggregator.listen().await;
        assert_eq!(report.started, vec!["arbitrum (42161)", "FTX"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "polygon (137)");
        assert!(report.failed[0].1.is_connection());
        assert!(!report.all_failed());

        wait_for_updates(&aggregator, 5).await;

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].source, "FTX");
        assert_eq!(snapshot[0].update_count, 2);
        assert_eq!(snapshot[0].price, Decimal::new(200, 2));
        assert_eq!(snapshot[1].source, "arbitrum (42161)");
        assert_eq!(snapshot[1].instrument, "ETH/USD");
        assert_eq!(snapshot[1].update_count, 3);
        assert_eq!(snapshot[1].price, Decimal::new(300, 2));

        aggregator.close().await;
    }

    #[tokio::test]
    async fn test_all_failed_report() {
        let listeners: Vec<Box<dyn PriceListener>> = vec![Box::new(ScriptedListener::failing("FTX"))];
        let mut aggregator = Aggregator::new(listeners);

        assert!(aggregator.listen().await.all_failed());
        aggregator.close().await;
    }

    #[tokio::test]
    async fn test_concurrent_writers_lose_nothing() {
        let listeners: Vec<Box<dyn PriceListener>> = (0..4)
            .map(|_| Box::new(ScriptedListener::new("shared", ticks("ETH/USD", 250))) as Box<dyn PriceListener>)
            .collect();
        let mut aggregator = Aggregator::new(listeners);
        aggregator.listen().await;

        wait_for_updates(&aggregator, 1_000).await;

        let table = aggregator.table();
        let entry = table
            .read()
            .get(&PriceKey::new("shared", "ETH/USD"))
            .cloned()
            .unwrap();
        assert_eq!(entry.update_count, 1_000);
        assert_eq!(aggregator.stats().entry_count, 1);

        aggregator.close().await;
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let first = ScriptedListener::new("FTX", ticks("ETH/USD", 1));
        let second = ScriptedListener::failing("polygon (137)");
        let first_closes = Arc::clone(&first.closes);
        let second_closes = Arc::clone(&second.closes);

        let mut aggregator = Aggregator::new(vec![Box::new(first), Box::new(second)]);
        aggregator.listen().await;

        aggregator.close().await;
        aggregator.close().await;

        assert!(aggregator.is_closed());
        assert!(aggregator.handles.is_empty());
        assert_eq!(first_closes.load(Ordering::SeqCst), 1);
        assert_eq!(second_closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_without_listen() {
        let listener = ScriptedListener::new("FTX", ticks("ETH/USD", 1));
        let closes = Arc::clone(&listener.closes);

        let mut aggregator = Aggregator::new(vec![Box::new(listener)]);
        aggregator.close().await;
        assert_eq!(closes.load(Ordering::SeqCst), 1);

        // listening after close does nothing
        let report = aggregator.listen().await;
        assert!(report.started.is_empty() && report.failed.is_empty());
    }

    #[tokio::test]
    async fn test_listen_twice_is_noop() {
        let mut aggregator = Aggregator::new(vec![Box::new(ScriptedListener::new("FTX", ticks("ETH/USD", 1)))]);

        assert_eq!(aggregator.listen().await.started.len(), 1);
        let again = aggregator.listen().await;
        assert!(again.started.is_empty() && again.failed.is_empty());
        assert_eq!(aggregator.sources(), vec!["FTX"]);

        aggregator.close().await;
    }
}
